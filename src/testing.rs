//! In-memory stand-ins for the WebRTC stack, the SFU and the signaling channels.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::{
    sync::{mpsc, oneshot, Notify},
    time::Duration,
};
use webrtc::{
    ice_transport::ice_candidate::RTCIceCandidateInit,
    peer_connection::{
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
        signaling_state::RTCSignalingState,
    },
};

use crate::{
    capture::MediaDevices,
    config::WebRTCTransportConfig,
    dispatcher::{ManagerFactory, RoomJoined},
    error::{
        Error, NegotiationErrorKind, SignalingErrorKind, TransportErrorKind,
    },
    events::{ConnectionStatus, EventSender},
    local_track::{LocalTrack, TrackSettings},
    manager::{AcceptStream, ManagerMode, RenderedSize, RtcManager, CAMERA_STREAM_ID},
    sfu::{
        device::{
            DataProduceOptions, ProduceOptions, SfuConsumer, SfuDataConsumer, SfuDataProducer,
            SfuDevice, SfuProducer, SfuTransport, TransportEvent,
        },
        voice_priority::MicScoreSource,
    },
    signaling::{
        sdp::SAMPLE_SDP,
        sfu::{ConsumerAppData, ConsumerOptions, DataConsumerOptions, TransportOptions},
        ConnectParams, MeshSignal, MeshSignaling, SfuConnection, SfuConnector, SfuNotification,
        SfuRequest, SfuSignaling,
    },
    track::{JitterBufferTarget, MediaKind, Track},
    transport::{PeerConnection, PeerConnectionEvent, PeerConnectionFactory},
};

/// Logs of the code under test, filtered by `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Local audio and video of the camera stream, in that order.
pub(crate) fn camera_tracks() -> Vec<Arc<LocalTrack>> {
    vec![
        LocalTrack::with_codec("audio/opus", CAMERA_STREAM_ID, TrackSettings::default()),
        LocalTrack::with_codec(
            "video/VP8",
            CAMERA_STREAM_ID,
            TrackSettings {
                width: 640,
                height: 480,
                frame_rate: 30.0,
            },
        ),
    ]
}

pub(crate) fn drain_events<T>(receiver: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// First event matching `predicate`, skipping the others.
pub(crate) async fn next_event<T, F>(
    receiver: &mut mpsc::UnboundedReceiver<T>,
    predicate: F,
) -> Option<T>
where
    F: Fn(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(600), async {
        while let Some(event) = receiver.recv().await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Returns once every spawned task is waiting. Needs a paused clock.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub(crate) fn consumer_options(
    id: &str,
    client_id: &str,
    kind: MediaKind,
    stream_id: &str,
    screen_share: bool,
) -> ConsumerOptions {
    ConsumerOptions {
        id: id.to_string(),
        producer_id: format!("producer-of-{}", id),
        kind,
        rtp_parameters: json!({}),
        producer_paused: false,
        app_data: ConsumerAppData {
            source_client_id: client_id.to_string(),
            stream_id: stream_id.to_string(),
            screen_share,
            source: None,
        },
    }
}

#[derive(Debug, Default)]
struct FakePeerState {
    local: Option<RTCSessionDescription>,
    remote: Option<RTCSessionDescription>,
    signaling_state: RTCSignalingState,
    candidates: Vec<RTCIceCandidateInit>,
    tracks: Vec<String>,
    offers: usize,
    ice_restart_offers: usize,
    closed: bool,
}

/// Peer connection that walks the signaling states and answers with canned SDP.
#[derive(Debug, Default)]
pub(crate) struct FakePeerConnection {
    state: Mutex<FakePeerState>,
}

impl FakePeerConnection {
    fn state(&self) -> std::sync::MutexGuard<'_, FakePeerState> {
        self.state.lock().unwrap()
    }

    pub fn candidates(&self) -> Vec<RTCIceCandidateInit> {
        self.state().candidates.clone()
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.state().tracks.clone()
    }

    pub fn offers_created(&self) -> usize {
        self.state().offers
    }

    pub fn ice_restart_offers(&self) -> usize {
        self.state().ice_restart_offers
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn create_offer(&self, ice_restart: bool) -> Result<RTCSessionDescription, Error> {
        let mut state = self.state();
        state.offers += 1;
        if ice_restart {
            state.ice_restart_offers += 1;
        }
        Ok(RTCSessionDescription::offer(SAMPLE_SDP.to_string())?)
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription, Error> {
        if self.state().remote.is_none() {
            return Err(Error::new_negotiation(
                "no remote offer".to_string(),
                NegotiationErrorKind::AnswerError,
            ));
        }
        Ok(RTCSessionDescription::answer(SAMPLE_SDP.to_string())?)
    }

    async fn set_local_description(&self, description: RTCSessionDescription) -> Result<(), Error> {
        let mut state = self.state();
        state.signaling_state = match description.sdp_type {
            RTCSdpType::Offer => RTCSignalingState::HaveLocalOffer,
            _ => RTCSignalingState::Stable,
        };
        state.local = Some(description);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), Error> {
        let mut state = self.state();
        match description.sdp_type {
            RTCSdpType::Offer => state.signaling_state = RTCSignalingState::HaveRemoteOffer,
            _ if state.signaling_state != RTCSignalingState::HaveLocalOffer => {
                return Err(Error::new_negotiation(
                    "answer without a local offer".to_string(),
                    NegotiationErrorKind::RemoteDescriptionError,
                ));
            }
            _ => state.signaling_state = RTCSignalingState::Stable,
        }
        state.remote = Some(description);
        Ok(())
    }

    async fn has_local_description(&self) -> bool {
        self.state().local.is_some()
    }

    async fn has_remote_description(&self) -> bool {
        self.state().remote.is_some()
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), Error> {
        self.state().candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), Error> {
        self.state().tracks.push(track.id.clone());
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<(), Error> {
        self.state().tracks.retain(|id| id != track_id);
        Ok(())
    }

    async fn replace_track(&self, old_track_id: &str, track: Arc<LocalTrack>) -> Result<(), Error> {
        let mut state = self.state();
        match state.tracks.iter_mut().find(|id| *id == old_track_id) {
            Some(id) => {
                *id = track.id.clone();
                Ok(())
            }
            None => Err(Error::new_transport(
                format!("track {} is not attached", old_track_id),
                TransportErrorKind::PeerConnectionError,
            )),
        }
    }

    fn signaling_state(&self) -> RTCSignalingState {
        self.state().signaling_state
    }

    async fn close(&self) -> Result<(), Error> {
        let mut state = self.state();
        state.closed = true;
        state.signaling_state = RTCSignalingState::Closed;
        Ok(())
    }
}

type PeerEntry = (
    String,
    Arc<FakePeerConnection>,
    mpsc::UnboundedSender<PeerConnectionEvent>,
);

#[derive(Debug, Default)]
pub(crate) struct FakePeerFactory {
    connections: Mutex<Vec<PeerEntry>>,
}

impl FakePeerFactory {
    /// Every connection created for `client_id`, oldest first.
    pub fn connections_for(&self, client_id: &str) -> Vec<Arc<FakePeerConnection>> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == client_id)
            .map(|(_, connection, _)| connection.clone())
            .collect()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create_peer_connection(
        &self,
        client_id: &str,
        _config: &WebRTCTransportConfig,
        events: mpsc::UnboundedSender<PeerConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnection>, Error> {
        let connection = Arc::new(FakePeerConnection::default());
        self.connections
            .lock()
            .unwrap()
            .push((client_id.to_string(), connection.clone(), events));
        Ok(connection)
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingMeshSignaling {
    sent: Mutex<Vec<(String, MeshSignal)>>,
}

impl RecordingMeshSignaling {
    pub fn sent_to(&self, client_id: &str) -> Vec<MeshSignal> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == client_id)
            .map(|(_, signal)| signal.clone())
            .collect()
    }

    pub fn count(&self, client_id: &str, name: &str) -> usize {
        self.sent_to(client_id)
            .iter()
            .filter(|signal| signal.name() == name)
            .count()
    }
}

impl MeshSignaling for RecordingMeshSignaling {
    fn send(&self, receiver_id: &str, signal: MeshSignal) -> Result<(), Error> {
        self.sent
            .lock()
            .unwrap()
            .push((receiver_id.to_string(), signal));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeMediaDevices {
    acquired: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeMediaDevices {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Later acquisitions wait until the returned gate is notified.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn acquire_camera(&self) -> Result<Arc<LocalTrack>, Error> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(LocalTrack::with_codec(
            "video/VP8",
            CAMERA_STREAM_ID,
            TrackSettings {
                width: 1280,
                height: 720,
                frame_rate: 30.0,
            },
        ))
    }
}

/// SFU signaling that records traffic and answers requests with canned payloads.
#[derive(Debug, Default)]
pub(crate) struct FakeSfuSignaling {
    requests: Mutex<Vec<SfuRequest>>,
    messages: Mutex<Vec<SfuRequest>>,
    failures: Mutex<HashMap<&'static str, String>>,
    closed: AtomicBool,
    counter: AtomicU32,
}

impl FakeSfuSignaling {
    /// Makes every later `method` request fail with a server error.
    pub fn fail(&self, method: &'static str, reason: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(method, reason.to_string());
    }

    pub fn requests(&self) -> Vec<SfuRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_methods(&self) -> Vec<&'static str> {
        self.requests().iter().map(SfuRequest::method).collect()
    }

    pub fn messages(&self) -> Vec<SfuRequest> {
        self.messages.lock().unwrap().clone()
    }

    pub fn message_methods(&self) -> Vec<&'static str> {
        self.messages().iter().map(SfuRequest::method).collect()
    }

    /// Requests and messages sent with `method`.
    pub fn count(&self, method: &str) -> usize {
        self.request_methods()
            .into_iter()
            .chain(self.message_methods())
            .filter(|sent| *sent == method)
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl SfuSignaling for FakeSfuSignaling {
    async fn request(&self, request: SfuRequest) -> Result<Value, Error> {
        if self.is_closed() {
            return Err(Error::new_signaling(
                "connection is closed".to_string(),
                SignalingErrorKind::ConnectionClosedError,
            ));
        }
        let method = request.method();
        self.requests.lock().unwrap().push(request.clone());
        if let Some(reason) = self.failures.lock().unwrap().get(method) {
            return Err(Error::new_signaling(
                reason.clone(),
                SignalingErrorKind::ServerError,
            ));
        }

        let response = match request {
            SfuRequest::GetCapabilities => json!({ "routerRtpCapabilities": { "codecs": [] } }),
            SfuRequest::CreateTransport { producing, .. } => {
                let prefix = if producing { "send" } else { "recv" };
                json!({
                    "id": format!("{}-{}", prefix, self.next_id()),
                    "iceParameters": {},
                    "iceCandidates": [],
                    "dtlsParameters": {},
                })
            }
            SfuRequest::Produce { .. } => json!({ "id": format!("producer-{}", self.next_id()) }),
            SfuRequest::ProduceData { .. } => {
                json!({ "id": format!("data-producer-{}", self.next_id()) })
            }
            SfuRequest::RestartIce { .. } => json!({ "iceParameters": {} }),
            _ => json!({}),
        };
        Ok(response)
    }

    fn message(&self, request: SfuRequest) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::new_signaling(
                "connection is closed".to_string(),
                SignalingErrorKind::NotConnectedError,
            ));
        }
        self.messages.lock().unwrap().push(request);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

type SfuEntry = (
    Arc<FakeSfuSignaling>,
    Option<mpsc::UnboundedSender<SfuNotification>>,
);

#[derive(Debug, Default)]
pub(crate) struct FakeSfuConnector {
    connections: Mutex<Vec<SfuEntry>>,
    params: Mutex<Vec<ConnectParams>>,
}

impl FakeSfuConnector {
    pub fn connects(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn last_params(&self) -> Option<ConnectParams> {
        self.params.lock().unwrap().last().cloned()
    }

    /// Signaling of the latest connection.
    pub fn signaling(&self) -> Arc<FakeSfuSignaling> {
        self.connections
            .lock()
            .unwrap()
            .last()
            .map(|(signaling, _)| signaling.clone())
            .expect("no SFU connection")
    }

    pub fn notify(&self, notification: SfuNotification) {
        let connections = self.connections.lock().unwrap();
        if let Some((_, Some(sender))) = connections.last() {
            let _ = sender.send(notification);
        }
    }

    /// Ends the latest connection as if the server went away.
    pub fn close_latest(&self) {
        if let Some((_, sender)) = self.connections.lock().unwrap().last_mut() {
            sender.take();
        }
    }
}

#[async_trait]
impl SfuConnector for FakeSfuConnector {
    async fn connect(&self, _url: &str, params: &ConnectParams) -> Result<SfuConnection, Error> {
        let signaling = Arc::new(FakeSfuSignaling::default());
        let (tx, rx) = mpsc::unbounded_channel();
        self.params.lock().unwrap().push(params.clone());
        self.connections
            .lock()
            .unwrap()
            .push((signaling.clone(), Some(tx)));
        Ok(SfuConnection {
            signaling,
            notifications: rx,
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeDevice {
    loaded: AtomicBool,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeDevice {
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn latest(&self, prefix: &str) -> Option<Arc<FakeTransport>> {
        self.transports
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|transport| transport.id.starts_with(prefix))
            .cloned()
    }

    pub fn send_transport(&self) -> Option<Arc<FakeTransport>> {
        self.latest("send")
    }

    pub fn recv_transport(&self) -> Option<Arc<FakeTransport>> {
        self.latest("recv")
    }

    /// The latest consumer created with `id` on any transport.
    pub fn consumer(&self, id: &str) -> Option<Arc<FakeConsumer>> {
        self.transports
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|transport| {
                transport
                    .consumers
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|consumer| consumer.id == id)
                    .cloned()
            })
    }

    fn create_transport(
        &self,
        options: TransportOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Arc<dyn SfuTransport> {
        let transport = FakeTransport::with_events(&options.id, events);
        self.transports.lock().unwrap().push(transport.clone());
        transport
    }
}

#[async_trait]
impl SfuDevice for FakeDevice {
    fn loaded(&self) -> bool {
        self.is_loaded()
    }

    async fn load(&self, _router_rtp_capabilities: Value) -> Result<(), Error> {
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn rtp_capabilities(&self) -> Value {
        json!({ "codecs": [] })
    }

    async fn create_send_transport(
        &self,
        options: TransportOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn SfuTransport>, Error> {
        Ok(self.create_transport(options, events))
    }

    async fn create_recv_transport(
        &self,
        options: TransportOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn SfuTransport>, Error> {
        Ok(self.create_transport(options, events))
    }
}

/// Device transport that asks for the server round trips through its event channel, the way a
/// real one does on first use.
#[derive(Debug)]
pub(crate) struct FakeTransport {
    id: String,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    connected: AtomicBool,
    closed: AtomicBool,
    ice_restarts: AtomicU32,
    counter: AtomicU32,
    consumers: Mutex<Vec<Arc<FakeConsumer>>>,
    data_producers: Mutex<Vec<Arc<FakeDataProducer>>>,
}

impl FakeTransport {
    /// A transport without an event channel; round trips are skipped.
    pub fn new(id: &str) -> Arc<Self> {
        Self::build(id, None)
    }

    pub fn with_events(id: &str, events: mpsc::UnboundedSender<TransportEvent>) -> Arc<Self> {
        Self::build(id, Some(events))
    }

    fn build(id: &str, events: Option<mpsc::UnboundedSender<TransportEvent>>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            events,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            ice_restarts: AtomicU32::new(0),
            counter: AtomicU32::new(0),
            consumers: Mutex::new(Vec::new()),
            data_producers: Mutex::new(Vec::new()),
        })
    }

    pub fn emit_state(&self, status: ConnectionStatus) {
        self.emit(TransportEvent::ConnectionStateChange(status));
    }

    pub fn emit_data(&self, data_consumer_id: &str, payload: Bytes) {
        self.emit(TransportEvent::DataMessage {
            data_consumer_id: data_consumer_id.to_string(),
            payload,
        });
    }

    pub fn ice_restarts(&self) -> u32 {
        self.ice_restarts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn data_producers(&self) -> Vec<Arc<FakeDataProducer>> {
        self.data_producers.lock().unwrap().clone()
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(events) = self.events.as_ref() {
            let _ = events.send(event);
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Sends `make(reply)` and waits for the answer. `None` without an event channel.
    async fn round_trip<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, Error>>) -> TransportEvent,
    ) -> Option<Result<T, Error>> {
        let events = self.events.as_ref()?;
        let (tx, rx) = oneshot::channel();
        let _ = events.send(make(tx));
        Some(rx.await.unwrap_or_else(|_| {
            Err(Error::new_transport(
                "transport events are gone".to_string(),
                TransportErrorKind::TransportClosedError,
            ))
        }))
    }

    async fn ensure_connected(&self) -> Result<(), Error> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.round_trip(|reply| TransportEvent::Connect {
            dtls_parameters: json!({}),
            reply,
        })
        .await
        .unwrap_or(Ok(()))
    }
}

#[async_trait]
impl SfuTransport for FakeTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn closed(&self) -> bool {
        self.is_closed()
    }

    async fn restart_ice(&self, _ice_parameters: Value) -> Result<(), Error> {
        self.ice_restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn produce(&self, options: ProduceOptions) -> Result<Arc<dyn SfuProducer>, Error> {
        self.ensure_connected().await?;
        let id = match self
            .round_trip(|reply| TransportEvent::Produce {
                kind: options.track.kind,
                rtp_parameters: json!({}),
                app_data: options.app_data.clone(),
                reply,
            })
            .await
        {
            Some(result) => result?,
            None => self.next_id("producer"),
        };
        Ok(FakeProducer::new(&id, &options.track.id, options.paused))
    }

    async fn produce_data(
        &self,
        options: DataProduceOptions,
    ) -> Result<Arc<dyn SfuDataProducer>, Error> {
        self.ensure_connected().await?;
        let id = match self
            .round_trip(|reply| TransportEvent::ProduceData {
                sctp_stream_parameters: json!({ "ordered": options.ordered }),
                label: options.label.clone(),
                protocol: options.protocol.clone(),
                app_data: options.app_data.clone(),
                reply,
            })
            .await
        {
            Some(result) => result?,
            None => self.next_id("data-producer"),
        };
        let data_producer = FakeDataProducer::new(&id);
        self.data_producers
            .lock()
            .unwrap()
            .push(data_producer.clone());
        Ok(data_producer)
    }

    async fn consume(&self, options: ConsumerOptions) -> Result<Arc<dyn SfuConsumer>, Error> {
        self.ensure_connected().await?;
        let consumer = FakeConsumer::new(&options.id, options.kind);
        self.consumers.lock().unwrap().push(consumer.clone());
        Ok(consumer)
    }

    async fn consume_data(
        &self,
        options: DataConsumerOptions,
    ) -> Result<Arc<dyn SfuDataConsumer>, Error> {
        self.ensure_connected().await?;
        Ok(Arc::new(FakeDataConsumer {
            id: options.id,
            label: options.label,
            closed: AtomicBool::new(false),
        }))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub(crate) struct FakeProducer {
    id: String,
    track_id: Mutex<Option<String>>,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl FakeProducer {
    pub fn new(id: &str, track_id: &str, paused: bool) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            track_id: Mutex::new(Some(track_id.to_string())),
            paused: AtomicBool::new(paused),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl SfuProducer for FakeProducer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn track_id(&self) -> Option<String> {
        self.track_id.lock().unwrap().clone()
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    async fn replace_track(&self, track: Arc<LocalTrack>) -> Result<(), Error> {
        *self.track_id.lock().unwrap() = Some(track.id.clone());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub(crate) struct FakeRemoteTrack {
    id: String,
    kind: MediaKind,
    jitter_buffer_target: JitterBufferTarget,
}

impl FakeRemoteTrack {
    pub fn new(id: &str, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            kind,
            jitter_buffer_target: JitterBufferTarget::default(),
        })
    }
}

impl Track for FakeRemoteTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn stream_id(&self) -> String {
        "remote".to_string()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn jitter_buffer_target(&self) -> Option<Duration> {
        self.jitter_buffer_target.get()
    }

    fn set_jitter_buffer_target(&self, target: Duration) {
        self.jitter_buffer_target.set(target);
    }
}

#[derive(Debug)]
pub(crate) struct FakeConsumer {
    id: String,
    kind: MediaKind,
    track: Arc<FakeRemoteTrack>,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl FakeConsumer {
    pub fn new(id: &str, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            track: FakeRemoteTrack::new(&format!("track-{}", id), kind),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SfuConsumer for FakeConsumer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> Arc<dyn Track> {
        self.track.clone()
    }

    fn paused(&self) -> bool {
        FakeConsumer::paused(self)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub(crate) struct FakeDataProducer {
    id: String,
    sent: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
}

impl FakeDataProducer {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SfuDataProducer for FakeDataProducer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn send(&self, payload: Bytes) -> Result<(), Error> {
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub(crate) struct FakeDataConsumer {
    id: String,
    label: String,
    closed: AtomicBool,
}

impl SfuDataConsumer for FakeDataConsumer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out the queued scores in order, then `fallback` forever.
#[derive(Debug)]
pub(crate) struct FakeMicScores {
    scores: Mutex<VecDeque<Option<f64>>>,
    fallback: Option<f64>,
}

impl FakeMicScores {
    pub fn new(scores: Vec<Option<f64>>) -> Self {
        Self {
            scores: Mutex::new(scores.into()),
            fallback: None,
        }
    }

    pub fn constant(score: f64) -> Self {
        Self {
            scores: Mutex::new(VecDeque::new()),
            fallback: Some(score),
        }
    }
}

impl MicScoreSource for FakeMicScores {
    fn score(&self) -> Option<f64> {
        self.scores
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

/// Records every command as a short line, e.g. `accept p1 0`.
#[derive(Debug)]
pub(crate) struct RecordingManager {
    self_id: String,
    room_name: String,
    mode: ManagerMode,
    calls: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
}

impl RecordingManager {
    pub fn new(self_id: &str, room_name: &str, mode: ManagerMode) -> Arc<Self> {
        Arc::new(Self {
            self_id: self_id.to_owned(),
            room_name: room_name.to_owned(),
            mode,
            calls: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    /// Accepts block until `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            self_id: "me".to_owned(),
            room_name: "/room".to_owned(),
            mode: ManagerMode::Router,
            calls: Mutex::new(Vec::new()),
            gate: Some(gate),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RtcManager for RecordingManager {
    fn mode(&self) -> ManagerMode {
        self.mode
    }

    fn is_initialized_with(&self, self_id: &str, room_name: &str, mode: ManagerMode) -> bool {
        self.self_id == self_id && self.room_name == room_name && self.mode == mode
    }

    async fn accept_new_stream(&self, request: AcceptStream) {
        if let Some(gate) = self.gate.as_ref() {
            gate.notified().await;
        }
        let suffix = if request.should_add_local_video {
            ""
        } else {
            " without video"
        };
        self.record(format!(
            "accept {} {}{}",
            request.participant_id, request.stream_id, suffix
        ));
    }

    async fn disconnect(&self, participant_id: &str, stream_id: &str) {
        self.record(format!("disconnect {} {}", participant_id, stream_id));
    }

    async fn add_new_stream(
        &self,
        stream_id: &str,
        tracks: Vec<Arc<LocalTrack>>,
        _audio_paused: bool,
        _video_paused: bool,
    ) {
        self.record(format!("add_stream {} {}", stream_id, tracks.len()));
    }

    async fn remove_stream(&self, stream_id: &str) {
        self.record(format!("remove_stream {}", stream_id));
    }

    async fn replace_track(&self, old_track_id: &str, track: Arc<LocalTrack>) {
        self.record(format!("replace_track {} {}", old_track_id, track.id));
    }

    async fn update_stream_resolution(
        &self,
        participant_id: &str,
        stream_id: &str,
        size: RenderedSize,
    ) {
        self.record(format!(
            "resolution {} {} {}x{}",
            participant_id, stream_id, size.width, size.height
        ));
    }

    async fn stop_or_resume_audio(&self, enabled: bool) {
        self.record(format!("audio {}", enabled));
    }

    async fn stop_or_resume_video(&self, enabled: bool) {
        self.record(format!("video {}", enabled));
    }

    async fn set_colocation(&self, colocation: Option<String>) {
        self.record(format!("colocation {}", colocation.unwrap_or_default()));
    }

    async fn set_event_claim(&self, event_claim: String) {
        self.record(format!("event_claim {}", event_claim));
    }

    async fn disconnect_all(&self) {
        self.record("disconnect_all".to_owned());
    }
}

/// Hands out `RecordingManager`s and keeps their event senders.
#[derive(Debug, Default)]
pub(crate) struct FakeManagerFactory {
    created: Mutex<Vec<(Arc<RecordingManager>, EventSender)>>,
}

impl FakeManagerFactory {
    pub fn created(&self) -> Vec<Arc<RecordingManager>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(manager, _)| manager.clone())
            .collect()
    }

    pub fn sender(&self, index: usize) -> EventSender {
        self.created.lock().unwrap()[index].1.clone()
    }
}

impl ManagerFactory for FakeManagerFactory {
    fn create_manager(
        &self,
        mode: ManagerMode,
        room: &RoomJoined,
        events: EventSender,
    ) -> Result<Arc<dyn RtcManager>, Error> {
        let manager = RecordingManager::new(&room.self_id, &room.room.name, mode);
        self.created
            .lock()
            .unwrap()
            .push((manager.clone(), events));
        Ok(manager)
    }
}
