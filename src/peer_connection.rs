use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use derivative::Derivative;
use enclose::enc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine,
        APIBuilder,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_candidate_type::RTCIceCandidateType,
        ice_connection_state::RTCIceConnectionState,
    },
    interceptor::registry::Registry,
    peer_connection::{
        offer_answer_options::RTCOfferOptions,
        sdp::session_description::RTCSessionDescription, signaling_state::RTCSignalingState,
        RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_receiver::RTCRtpReceiver, rtp_sender::RTCRtpSender, RTCRtpTransceiver,
    },
    track::track_remote::TrackRemote,
};

use crate::{
    config::WebRTCTransportConfig,
    error::{Error, TransportErrorKind},
    local_track::LocalTrack,
    track::RemoteTrack,
    transport::{PeerConnection, PeerConnectionEvent, PeerConnectionFactory},
};

/// [`PeerConnection`] backed by a [`webrtc::peer_connection::RTCPeerConnection`].
#[derive(Derivative)]
#[derivative(Debug)]
pub struct WebRtcPeerConnection {
    pub id: String,
    client_id: String,
    #[derivative(Debug = "ignore")]
    peer_connection: Arc<RTCPeerConnection>,
    #[derivative(Debug = "ignore")]
    senders: Mutex<HashMap<String, Arc<RTCRtpSender>>>,
}

impl WebRtcPeerConnection {
    pub async fn new(
        client_id: &str,
        config: &WebRTCTransportConfig,
        events: mpsc::UnboundedSender<PeerConnectionEvent>,
    ) -> Result<Self, Error> {
        let id = Uuid::new_v4().to_string();
        let peer_connection = Self::generate_peer_connection(config).await?;

        let transport = Self {
            id,
            client_id: client_id.to_owned(),
            peer_connection: Arc::new(peer_connection),
            senders: Mutex::new(HashMap::new()),
        };

        transport.ice_state_hooks(events);

        tracing::debug!(
            "WebRtcPeerConnection {} for {} is created",
            transport.id,
            transport.client_id
        );

        Ok(transport)
    }

    async fn generate_peer_connection(
        config: &WebRTCTransportConfig,
    ) -> Result<RTCPeerConnection, Error> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = api.new_peer_connection(config.rtc_configuration()).await?;
        Ok(peer_connection)
    }

    fn ice_state_hooks(&self, events: mpsc::UnboundedSender<PeerConnectionEvent>) {
        let peer = self.peer_connection.clone();

        peer.on_ice_candidate(Box::new(enc!((events) move |candidate: Option<RTCIceCandidate>| {
            Box::pin(enc!((events) async move {
                let event = match candidate {
                    Some(candidate) => {
                        let is_relay = candidate.typ == RTCIceCandidateType::Relay;
                        match candidate.to_json() {
                            Ok(init) => PeerConnectionEvent::IceCandidate {
                                candidate: Some(init),
                                is_relay,
                            },
                            Err(err) => {
                                tracing::error!("failed to serialize ICE candidate: {}", err);
                                return;
                            }
                        }
                    }
                    None => PeerConnectionEvent::IceCandidate {
                        candidate: None,
                        is_relay: false,
                    },
                };
                let _ = events.send(event);
            }))
        })));

        peer.on_ice_connection_state_change(Box::new(enc!((events) move |state: RTCIceConnectionState| {
            tracing::debug!("ICE connection state changed: {}", state);
            let _ = events.send(PeerConnectionEvent::IceConnectionStateChange(state));
            Box::pin(async {})
        })));

        peer.on_negotiation_needed(Box::new(enc!((events) move || {
            let _ = events.send(PeerConnectionEvent::NegotiationNeeded);
            Box::pin(async {})
        })));

        peer.on_track(Box::new(enc!((events) move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
            tracing::info!("track received: track_id={}, stream_id={}", track.id(), track.stream_id());
            let _ = events.send(PeerConnectionEvent::Track(Arc::new(RemoteTrack::new(track))));
            Box::pin(async {})
        })));
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn create_offer(&self, ice_restart: bool) -> Result<RTCSessionDescription, Error> {
        let options = ice_restart.then_some(RTCOfferOptions {
            voice_activity_detection: false,
            ice_restart: true,
        });
        let offer = self.peer_connection.create_offer(options).await?;
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription, Error> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(answer)
    }

    async fn set_local_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), Error> {
        self.peer_connection
            .set_local_description(description)
            .await?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), Error> {
        self.peer_connection
            .set_remote_description(description)
            .await?;
        Ok(())
    }

    async fn has_local_description(&self) -> bool {
        self.peer_connection.local_description().await.is_some()
    }

    async fn has_remote_description(&self) -> bool {
        self.peer_connection.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), Error> {
        self.peer_connection.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), Error> {
        let sender = self.peer_connection.add_track(track.rtc_track()).await?;
        self.senders.lock().await.insert(track.id.clone(), sender);
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<(), Error> {
        let Some(sender) = self.senders.lock().await.remove(track_id) else {
            return Ok(());
        };
        self.peer_connection.remove_track(&sender).await?;
        Ok(())
    }

    async fn replace_track(
        &self,
        old_track_id: &str,
        track: Arc<LocalTrack>,
    ) -> Result<(), Error> {
        let mut senders = self.senders.lock().await;
        let sender = senders.remove(old_track_id).ok_or_else(|| {
            Error::new_transport(
                format!("no sender for track {}", old_track_id),
                TransportErrorKind::PeerConnectionError,
            )
        })?;
        sender.replace_track(Some(track.rtc_track())).await?;
        senders.insert(track.id.clone(), sender);
        Ok(())
    }

    fn signaling_state(&self) -> RTCSignalingState {
        self.peer_connection.signaling_state()
    }

    async fn close(&self) -> Result<(), Error> {
        self.senders.lock().await.clear();
        self.peer_connection.close().await?;
        Ok(())
    }
}

impl Drop for WebRtcPeerConnection {
    fn drop(&mut self) {
        tracing::debug!("WebRtcPeerConnection {} is dropped", self.id);
    }
}

/// Creates [`WebRtcPeerConnection`]s for the mesh manager.
#[derive(Debug, Default, Clone)]
pub struct WebRtcPeerConnectionFactory;

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerConnectionFactory {
    async fn create_peer_connection(
        &self,
        client_id: &str,
        config: &WebRTCTransportConfig,
        events: mpsc::UnboundedSender<PeerConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnection>, Error> {
        let peer_connection = WebRtcPeerConnection::new(client_id, config, events).await?;
        Ok(Arc::new(peer_connection))
    }
}
