use std::{collections::HashSet, sync::Arc};

use tokio::{sync::mpsc, task::JoinHandle, time::Duration};
use webrtc::{
    ice_transport::ice_candidate::RTCIceCandidateInit,
    peer_connection::{
        sdp::session_description::RTCSessionDescription, signaling_state::RTCSignalingState,
    },
};

use crate::{
    config::Features,
    error::{Error, NegotiationErrorKind, TransportErrorKind},
    events::ConnectionStatus,
    local_track::LocalTrack,
    signaling::sdp::prepare_outgoing,
    transport::{IceRestartState, NegotiationQueue, NegotiationRole, PeerConnection},
};

use super::MeshEvent;

/// The peer connection to one remote participant together with its negotiation state.
#[derive(Debug)]
pub(crate) struct Session {
    pub client_id: String,
    /// Distinguishes events of this session from those of a session it replaced.
    pub generation: u64,
    pub role: NegotiationRole,
    pub peer_connection: Arc<dyn PeerConnection>,
    pub negotiation: NegotiationQueue,
    pub ice_restart: IceRestartState,
    /// `PeerConnectionFailed` was emitted since the last connection.
    pub failure_reported: bool,
    pub status: ConnectionStatus,
    pub was_ever_connected: bool,
    pub relay_candidate_seen: bool,
    pub bandwidth: u32,
    /// Set once an offer/answer round has completed.
    pub negotiated: bool,
    pub remote_screenshares: HashSet<String>,
    pending_candidates: Vec<RTCIceCandidateInit>,
    track_ids: HashSet<String>,
    forward_task: JoinHandle<()>,
    restart_check: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        client_id: String,
        generation: u64,
        role: NegotiationRole,
        peer_connection: Arc<dyn PeerConnection>,
        forward_task: JoinHandle<()>,
    ) -> Self {
        tracing::debug!(
            "Session {} (generation {}) is created as {}",
            client_id,
            generation,
            role
        );
        Self {
            client_id,
            generation,
            role,
            peer_connection,
            negotiation: NegotiationQueue::default(),
            ice_restart: IceRestartState::default(),
            failure_reported: false,
            status: ConnectionStatus::Connecting,
            was_ever_connected: false,
            relay_candidate_seen: false,
            bandwidth: 0,
            negotiated: false,
            remote_screenshares: HashSet::new(),
            pending_candidates: Vec::new(),
            track_ids: HashSet::new(),
            forward_task,
            restart_check: None,
        }
    }

    /// Returns `false` when the track was already attached.
    pub async fn add_track(&mut self, track: Arc<LocalTrack>) -> Result<bool, Error> {
        if self.track_ids.contains(&track.id) {
            return Ok(false);
        }
        let id = track.id.clone();
        self.peer_connection.add_track(track).await?;
        self.track_ids.insert(id);
        Ok(true)
    }

    pub async fn remove_track(&mut self, track_id: &str) -> Result<bool, Error> {
        if !self.track_ids.remove(track_id) {
            return Ok(false);
        }
        self.peer_connection.remove_track(track_id).await?;
        Ok(true)
    }

    pub async fn replace_track(
        &mut self,
        old_track_id: &str,
        track: Arc<LocalTrack>,
    ) -> Result<bool, Error> {
        if !self.track_ids.remove(old_track_id) {
            return Ok(false);
        }
        let id = track.id.clone();
        self.peer_connection.replace_track(old_track_id, track).await?;
        self.track_ids.insert(id);
        Ok(true)
    }

    /// Candidates that arrive before the remote description are kept until it is applied.
    pub async fn add_ice_candidate(&mut self, candidate: RTCIceCandidateInit) -> Result<(), Error> {
        if self.peer_connection.has_remote_description().await {
            tracing::trace!("adding ICE candidate for {}", self.client_id);
            self.peer_connection.add_ice_candidate(candidate).await?;
        } else {
            tracing::debug!("pending ICE candidate for {}", self.client_id);
            self.pending_candidates.push(candidate);
        }
        Ok(())
    }

    async fn flush_pending_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(err) = self.peer_connection.add_ice_candidate(candidate).await {
                tracing::error!("failed to add pending ICE candidate: {}", err);
            }
        }
    }

    /// Returns `true` when the value changed.
    pub fn change_bandwidth(&mut self, bandwidth: u32) -> bool {
        if self.bandwidth == bandwidth {
            return false;
        }
        self.bandwidth = bandwidth;
        true
    }

    /// Starts an offer round. `None` means a round is already outstanding and this one is queued.
    pub async fn create_offer(
        &mut self,
        ice_restart: bool,
        features: &Features,
    ) -> Result<Option<RTCSessionDescription>, Error> {
        if !self.negotiation.try_begin(ice_restart) {
            tracing::debug!("negotiation with {} is queued", self.client_id);
            return Ok(None);
        }

        match self.offer(ice_restart, features).await {
            Ok(offer) => Ok(Some(offer)),
            Err(err) => {
                self.negotiation.abandon();
                Err(err)
            }
        }
    }

    async fn offer(
        &mut self,
        ice_restart: bool,
        features: &Features,
    ) -> Result<RTCSessionDescription, Error> {
        let offer = self.peer_connection.create_offer(ice_restart).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        prepare_outgoing(&offer, self.bandwidth, features)
    }

    /// Applies a remote offer and returns the answer to send back.
    pub async fn handle_offer(
        &mut self,
        offer: RTCSessionDescription,
        features: &Features,
    ) -> Result<RTCSessionDescription, Error> {
        let state = self.peer_connection.signaling_state();
        if state != RTCSignalingState::Stable && state != RTCSignalingState::Unspecified {
            return Err(Error::new_transport(
                format!("Signaling state is {}", state),
                TransportErrorKind::SignalingStateInvalidError,
            ));
        }

        self.peer_connection.set_remote_description(offer).await?;
        self.flush_pending_candidates().await;

        let answer = self.peer_connection.create_answer().await?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await?;
        self.negotiated = true;
        prepare_outgoing(&answer, self.bandwidth, features)
    }

    /// Applies the answer to our offer. Returns the ICE restart flag of a queued round, if any.
    pub async fn handle_answer(
        &mut self,
        answer: RTCSessionDescription,
    ) -> Result<Option<bool>, Error> {
        if !self.negotiation.is_in_flight() {
            return Err(Error::new_negotiation(
                format!("unexpected answer from {}", self.client_id),
                NegotiationErrorKind::UnexpectedAnswerError,
            ));
        }

        if let Err(err) = self.peer_connection.set_remote_description(answer).await {
            self.negotiation.abandon();
            return Err(err);
        }
        self.flush_pending_candidates().await;
        self.negotiated = true;
        Ok(self.negotiation.finish())
    }

    /// Prepares an ICE restart: connection history is forgotten so the next connection is
    /// judged on its own.
    pub fn reset_connection_history(&mut self) {
        self.was_ever_connected = false;
        self.relay_candidate_seen = false;
    }

    pub fn on_connected(&mut self) {
        self.was_ever_connected = true;
        self.failure_reported = false;
        self.ice_restart.reset();
        self.cancel_restart_check();
    }

    /// Has the manager look at this session again after `delay`.
    pub fn schedule_restart_check(&mut self, delay: Duration, mesh_events: mpsc::UnboundedSender<MeshEvent>) {
        self.cancel_restart_check();
        let client_id = self.client_id.clone();
        let generation = self.generation;
        self.restart_check = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = mesh_events.send(MeshEvent::IceRestartCheck {
                client_id,
                generation,
            });
        }));
    }

    pub fn cancel_restart_check(&mut self) {
        if let Some(timer) = self.restart_check.take() {
            timer.abort();
        }
    }

    pub async fn close(&mut self) {
        self.cancel_restart_check();
        self.forward_task.abort();
        self.pending_candidates.clear();
        self.track_ids.clear();
        if let Err(err) = self.peer_connection.close().await {
            tracing::error!("failed to close peer connection to {}: {}", self.client_id, err);
        }
        self.status = ConnectionStatus::Closed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_restart_check();
        self.forward_task.abort();
        tracing::debug!(
            "Session {} (generation {}) is dropped",
            self.client_id,
            self.generation
        );
    }
}
