//! Router mode: media goes through a selective forwarding unit over one send and one
//! receive transport.

pub(crate) mod consumer;
/// Seams to the client side SFU media stack.
pub mod device;
/// ICE restart policy of SFU transports.
pub mod ice_restart;
/// Simulcast layer selection for remote videos.
pub mod layers;
pub(crate) mod producer;
/// Mic score channel used to prioritize the voices of colocated participants.
pub mod voice_priority;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use derivative::Derivative;
use enclose::enc;
use serde_json::Value;
use strum::IntoEnumIterator;
use tokio::{
    sync::{mpsc, Mutex, MutexGuard},
    task::JoinHandle,
    time::Duration,
};

use crate::{
    capture::{reacquired_camera_wanted, CaptureAction, CaptureController},
    config::{Features, WebRTCTransportConfig},
    error::{Error, SignalingErrorKind},
    events::{emit, ConnectionStatus, EventSender, ManagerEvent, StreamType, TransportDirection},
    local_track::LocalTrack,
    manager::{
        AcceptStream, LifecycleFlag, ManagerContext, ManagerMode, RenderedSize, RtcManager,
        CAMERA_STREAM_ID,
    },
    signaling::{
        request_as,
        sfu::{
            CapabilitiesResponse, ConsumerOptions, DataConsumerOptions, ProduceResponse,
            ProducerSource, RestartIceResponse, TransportOptions,
        },
        ConnectParams, SfuConnection, SfuConnector, SfuNotification, SfuRequest, SfuSignaling,
    },
    track::{MediaKind, Track},
};

use self::{
    consumer::{ConsumerSlot, RemoteClient, StreamChange},
    device::{ProduceOptions, SfuDataConsumer, SfuDevice, SfuTransport, TransportEvent},
    ice_restart::{RestartDecision, TransportSlot},
    layers::{select_layer, spatial_for_size, Layer},
    producer::{ProducerAction, ProducerIntent, ProducerSlot},
    voice_priority::{MicScoreSource, VoicePriority},
};

/// Wait before reconnecting after the server closed the signaling connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub(crate) enum RouterEvent {
    Connect,
    Notification {
        connection_id: u64,
        notification: SfuNotification,
    },
    ConnectionClosed {
        connection_id: u64,
    },
    TransportState {
        direction: TransportDirection,
        transport_id: String,
        status: ConnectionStatus,
    },
    DataMessage {
        data_consumer_id: String,
        payload: Bytes,
    },
    IceRestartSettled {
        direction: TransportDirection,
        transport_id: String,
        result: Result<(), Error>,
    },
    IceRestartTimer {
        direction: TransportDirection,
        transport_id: String,
    },
    SyncProducer(ProducerSource),
    StopCamera,
    Closed,
}

/// Collaborators the router manager drives.
#[derive(Debug, Clone)]
pub struct RouterDependencies {
    pub connector: Arc<dyn SfuConnector>,
    pub device: Arc<dyn SfuDevice>,
    pub mic_scores: Arc<dyn MicScoreSource>,
    pub lifecycle: LifecycleFlag,
}

/// Manager for router mode. Cloning yields another handle to the same manager.
#[derive(Debug, Clone)]
pub struct RouterManager {
    self_id: String,
    room_name: String,
    inner: Arc<Mutex<RouterState>>,
    event_sender: mpsc::UnboundedSender<RouterEvent>,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct Connection {
    id: u64,
    signaling: Arc<dyn SfuSignaling>,
    #[derivative(Debug = "ignore")]
    pump: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[derive(Debug)]
struct RouterState {
    url: String,
    params: ConnectParams,
    features: Features,
    transport_config: WebRTCTransportConfig,
    lifecycle: LifecycleFlag,
    events: EventSender,
    router_events: mpsc::UnboundedSender<RouterEvent>,
    connector: Arc<dyn SfuConnector>,
    device: Arc<dyn SfuDevice>,
    mic_scores: Arc<dyn MicScoreSource>,
    connection: Option<Connection>,
    next_connection_id: u64,
    send_transport: Option<TransportSlot>,
    recv_transport: Option<TransportSlot>,
    producers: HashMap<ProducerSource, ProducerSlot>,
    camera_tracks: Vec<Arc<LocalTrack>>,
    consumers: HashMap<String, ConsumerSlot>,
    data_consumers: HashMap<String, Arc<dyn SfuDataConsumer>>,
    remote_clients: HashMap<String, RemoteClient>,
    voice: VoicePriority,
    colocation: Option<String>,
    capture: CaptureController,
    reconnect_timer: Option<JoinHandle<()>>,
    closed: bool,
}

impl RouterManager {
    /// Creates the manager and starts connecting to the SFU at `url`.
    pub fn new(
        context: ManagerContext,
        url: String,
        event_claim: Option<String>,
        dependencies: RouterDependencies,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport_config = context
            .transport_config
            .clone()
            .with_features(&context.features);
        let params = ConnectParams {
            room_name: context.room_name.clone(),
            client_id: context.self_id.clone(),
            event_claim,
        };

        let state = RouterState {
            url,
            params,
            features: context.features,
            transport_config,
            lifecycle: dependencies.lifecycle,
            events: context.events,
            router_events: tx.clone(),
            connector: dependencies.connector,
            device: dependencies.device,
            mic_scores: dependencies.mic_scores,
            connection: None,
            next_connection_id: 0,
            send_transport: None,
            recv_transport: None,
            producers: ProducerSource::iter()
                .map(|source| (source, ProducerSlot::new(source)))
                .collect(),
            camera_tracks: Vec::new(),
            consumers: HashMap::new(),
            data_consumers: HashMap::new(),
            remote_clients: HashMap::new(),
            voice: VoicePriority::default(),
            colocation: None,
            capture: CaptureController::new(context.capabilities, context.devices),
            reconnect_timer: None,
            closed: false,
        };

        let manager = Self {
            self_id: context.self_id,
            room_name: context.room_name,
            inner: Arc::new(Mutex::new(state)),
            event_sender: tx,
        };

        tokio::spawn(enc!((manager) async move {
            RouterManager::router_event_loop(manager, rx).await;
        }));
        let _ = manager.event_sender.send(RouterEvent::Connect);

        tracing::debug!("RouterManager for {} is created", manager.self_id);

        manager
    }

    async fn router_event_loop(
        manager: RouterManager,
        mut event_receiver: mpsc::UnboundedReceiver<RouterEvent>,
    ) {
        tracing::debug!("RouterManager {} event loop started", manager.self_id);
        while let Some(event) = event_receiver.recv().await {
            match event {
                RouterEvent::Connect => {
                    manager.connect().await;
                }
                RouterEvent::Notification {
                    connection_id,
                    notification,
                } => {
                    manager
                        .handle_notification(connection_id, notification)
                        .await;
                }
                RouterEvent::ConnectionClosed { connection_id } => {
                    manager.handle_connection_closed(connection_id).await;
                }
                RouterEvent::TransportState {
                    direction,
                    transport_id,
                    status,
                } => {
                    let mut state = manager.inner.lock().await;
                    state.handle_transport_state(direction, &transport_id, status);
                }
                RouterEvent::DataMessage {
                    data_consumer_id,
                    payload,
                } => {
                    let state = manager.inner.lock().await;
                    state.handle_data_message(&data_consumer_id, &payload);
                }
                RouterEvent::IceRestartSettled {
                    direction,
                    transport_id,
                    result,
                } => {
                    let mut state = manager.inner.lock().await;
                    state.handle_ice_restart_settled(direction, &transport_id, result);
                }
                RouterEvent::IceRestartTimer {
                    direction,
                    transport_id,
                } => {
                    let mut state = manager.inner.lock().await;
                    let Some(slot) = state.transport_mut(direction, &transport_id) else {
                        continue;
                    };
                    let decision = slot.on_timer();
                    state.apply_restart_decision(direction, decision);
                }
                RouterEvent::SyncProducer(source) => {
                    manager.sync_producer(source).await;
                }
                RouterEvent::StopCamera => {
                    let mut state = manager.inner.lock().await;
                    state.stop_camera();
                }
                RouterEvent::Closed => {
                    break;
                }
            }
        }
        tracing::debug!("RouterManager {} event loop finished", manager.self_id);
    }

    async fn connect(&self) {
        let (connector, url, params) = {
            let mut state = self.inner.lock().await;
            state.reconnect_timer = None;
            if state.closed || state.connection.is_some() || state.lifecycle.is_unloading() {
                return;
            }
            (
                state.connector.clone(),
                state.url.clone(),
                state.params.clone(),
            )
        };

        tracing::info!("connecting to SFU {}", url);
        let connection = match connector.connect(&url, &params).await {
            Ok(connection) => connection,
            Err(err) => {
                tracing::error!("failed to connect to SFU {}: {}", url, err);
                let mut state = self.inner.lock().await;
                if !state.closed && !state.lifecycle.is_unloading() {
                    state.schedule_reconnect();
                }
                return;
            }
        };

        let connection_id = {
            let mut state = self.inner.lock().await;
            if state.closed {
                connection.signaling.close();
                return;
            }
            state.open_connection(connection)
        };

        if let Err(err) = self.join(connection_id).await {
            tracing::error!("failed to join SFU room {}: {}", self.room_name, err);
            self.handle_connection_closed(connection_id).await;
        }
    }

    async fn join(&self, connection_id: u64) -> Result<(), Error> {
        let (signaling, device, transport_config) = {
            let Some(state) = self.current_state(connection_id).await else {
                return Ok(());
            };
            let Some(connection) = state.connection.as_ref() else {
                return Ok(());
            };
            (
                connection.signaling.clone(),
                state.device.clone(),
                state.transport_config.clone(),
            )
        };

        let capabilities: CapabilitiesResponse =
            request_as(signaling.as_ref(), SfuRequest::GetCapabilities).await?;
        if !device.loaded() {
            device.load(capabilities.router_rtp_capabilities).await?;
        }
        signaling.message(SfuRequest::SetCapabilities {
            rtp_capabilities: device.rtp_capabilities(),
        })?;

        let send = self
            .create_transport(TransportDirection::Send, &signaling, &device, &transport_config)
            .await?;
        let recv = self
            .create_transport(
                TransportDirection::Receive,
                &signaling,
                &device,
                &transport_config,
            )
            .await?;

        {
            let Some(mut state) = self.current_state(connection_id).await else {
                return Ok(());
            };
            state.send_transport = Some(send);
            state.recv_transport = Some(recv);
            if let Some(colocation) = state.colocation.clone() {
                state.notify(SfuRequest::SetColocation {
                    colocation: Some(colocation),
                });
            }
            tracing::info!("joined SFU room {}", self.room_name);
        }

        for source in ProducerSource::iter() {
            self.sync_producer(source).await;
        }
        Ok(())
    }

    async fn create_transport(
        &self,
        direction: TransportDirection,
        signaling: &Arc<dyn SfuSignaling>,
        device: &Arc<dyn SfuDevice>,
        transport_config: &WebRTCTransportConfig,
    ) -> Result<TransportSlot, Error> {
        let (producing, consuming) = match direction {
            TransportDirection::Send => (true, false),
            TransportDirection::Receive => (false, true),
        };
        let mut options: TransportOptions = request_as(
            signaling.as_ref(),
            SfuRequest::CreateTransport {
                producing,
                consuming,
            },
        )
        .await?;
        options.ice_servers = transport_config.ice_servers.clone();
        options.relay_only = transport_config.is_relay_only();

        let (tx, rx) = mpsc::unbounded_channel();
        let transport = match direction {
            TransportDirection::Send => device.create_send_transport(options, tx).await?,
            TransportDirection::Receive => device.create_recv_transport(options, tx).await?,
        };
        let pump = spawn_transport_pump(
            direction,
            transport.id(),
            signaling.clone(),
            rx,
            self.event_sender.clone(),
        );
        Ok(TransportSlot::new(direction, transport, pump))
    }

    /// The state, if `connection_id` is still the live connection.
    async fn current_state(&self, connection_id: u64) -> Option<MutexGuard<'_, RouterState>> {
        let state = self.inner.lock().await;
        if state.is_current(connection_id) {
            Some(state)
        } else {
            None
        }
    }

    async fn handle_connection_closed(&self, connection_id: u64) {
        let mut state = self.inner.lock().await;
        if !state
            .connection
            .as_ref()
            .is_some_and(|connection| connection.id == connection_id)
        {
            return;
        }
        tracing::info!("SFU connection {} is closed", connection_id);
        state.teardown(false);
        if !state.closed && !state.lifecycle.is_unloading() {
            state.schedule_reconnect();
        }
    }

    async fn handle_notification(&self, connection_id: u64, notification: SfuNotification) {
        tracing::trace!("SFU notification {:?}", notification);
        match notification {
            SfuNotification::ConsumerReady(options) => {
                self.consume(connection_id, options).await;
            }
            SfuNotification::DataConsumerReady(options) => {
                self.consume_data(connection_id, options).await;
            }
            SfuNotification::ConsumerClosed { consumer_id } => {
                if let Some(mut state) = self.current_state(connection_id).await {
                    state.remove_consumer(&consumer_id);
                }
            }
            SfuNotification::ConsumerPaused { consumer_id } => {
                if let Some(mut state) = self.current_state(connection_id).await {
                    state.set_remote_paused(&consumer_id, true);
                }
            }
            SfuNotification::ConsumerResumed { consumer_id } => {
                if let Some(mut state) = self.current_state(connection_id).await {
                    state.set_remote_paused(&consumer_id, false);
                }
            }
            SfuNotification::DataConsumerClosed { data_consumer_id } => {
                if let Some(mut state) = self.current_state(connection_id).await {
                    if let Some(data_consumer) = state.data_consumers.remove(&data_consumer_id) {
                        data_consumer.close();
                    }
                }
            }
            SfuNotification::DominantSpeaker { consumer_id } => {
                if let Some(state) = self.current_state(connection_id).await {
                    match state.consumers.get(&consumer_id) {
                        Some(slot) => emit(
                            &state.events,
                            ManagerEvent::DominantSpeaker {
                                client_id: slot.client_id.clone(),
                            },
                        ),
                        None => tracing::debug!("dominant speaker on unknown consumer {}", consumer_id),
                    }
                }
            }
        }
    }

    async fn consume(&self, connection_id: u64, options: ConsumerOptions) {
        let transport = {
            let Some(state) = self.current_state(connection_id).await else {
                return;
            };
            match state.recv_transport.as_ref() {
                Some(slot) => slot.transport.clone(),
                None => {
                    tracing::warn!("no receive transport for consumer {}", options.id);
                    return;
                }
            }
        };

        match transport.consume(options.clone()).await {
            Ok(consumer) => {
                let Some(mut state) = self.current_state(connection_id).await else {
                    consumer.close();
                    return;
                };
                tracing::debug!(
                    "consumer {} of {} is created",
                    options.id,
                    options.app_data.source_client_id
                );
                if let Some(target) = state.features.jitter_buffer_target() {
                    consumer.track().set_jitter_buffer_target(target);
                }
                state.add_consumer(ConsumerSlot::new(consumer, &options));
            }
            Err(err) => tracing::error!("failed to consume {}: {}", options.id, err),
        }
    }

    async fn consume_data(&self, connection_id: u64, options: DataConsumerOptions) {
        let transport = {
            let Some(state) = self.current_state(connection_id).await else {
                return;
            };
            match state.recv_transport.as_ref() {
                Some(slot) => slot.transport.clone(),
                None => {
                    tracing::warn!("no receive transport for data consumer {}", options.id);
                    return;
                }
            }
        };

        match transport.consume_data(options.clone()).await {
            Ok(data_consumer) => {
                let Some(mut state) = self.current_state(connection_id).await else {
                    data_consumer.close();
                    return;
                };
                state.data_consumers.insert(options.id, data_consumer);
            }
            Err(err) => tracing::error!("failed to consume data {}: {}", options.id, err),
        }
    }

    /// Moves the producer of `source` towards the latest intent. One step is reissued after the
    /// first settles; anything left after that is deferred to the event loop.
    pub(crate) async fn sync_producer(&self, source: ProducerSource) {
        let mut settled = false;
        for _ in 0..2 {
            if !self.producer_step(source).await {
                settled = true;
                break;
            }
        }
        if !settled {
            let _ = self.event_sender.send(RouterEvent::SyncProducer(source));
        }
        if source == ProducerSource::Mic {
            self.sync_voice_priority().await;
        }
    }

    /// Returns `true` when something was done and another step may be needed.
    async fn producer_step(&self, source: ProducerSource) -> bool {
        let (action, transport, options) = {
            let mut state = self.inner.lock().await;
            if state.closed {
                return false;
            }
            let transport = state
                .send_transport
                .as_ref()
                .map(|slot| slot.transport.clone());
            let action = state
                .producer_slot(source)
                .next_action(transport.is_some());
            let options = match &action {
                ProducerAction::Create(intent) => {
                    Some(state.produce_options(source, intent, &self.self_id))
                }
                _ => None,
            };
            (action, transport, options)
        };

        match action {
            ProducerAction::Idle => false,
            ProducerAction::Create(_) => {
                let (Some(transport), Some(options)) = (transport, options) else {
                    let mut state = self.inner.lock().await;
                    state.producer_slot(source).settle();
                    return false;
                };
                let transport_id = transport.id();
                let result = transport.produce(options).await;

                let mut state = self.inner.lock().await;
                let current = state.send_transport.as_ref().map(|slot| slot.id());
                if state.closed || current.as_deref() != Some(transport_id.as_str()) {
                    state.producer_slot(source).settle();
                    if let Ok(producer) = result {
                        producer.close();
                    }
                    return false;
                }
                state.producer_slot(source).settle_create(result)
            }
            ProducerAction::ReplaceTrack { producer, track } => {
                let result = producer.replace_track(track).await;
                let mut state = self.inner.lock().await;
                match result {
                    Ok(()) => {
                        state.producer_slot(source).settle();
                        true
                    }
                    Err(err) => {
                        tracing::error!("failed to replace track of {} producer: {}", source, err);
                        state.producer_slot(source).fail();
                        false
                    }
                }
            }
            ProducerAction::SetPaused { producer, paused } => {
                let producer_ids = vec![producer.id()];
                let state = self.inner.lock().await;
                if paused {
                    producer.pause();
                    state.notify(SfuRequest::PauseProducers { producer_ids });
                } else {
                    producer.resume();
                    state.notify(SfuRequest::ResumeProducers { producer_ids });
                }
                true
            }
            ProducerAction::Close(producer) => {
                producer.close();
                let state = self.inner.lock().await;
                if !state.lifecycle.is_unloading() {
                    state.notify(SfuRequest::CloseProducers {
                        producer_ids: vec![producer.id()],
                    });
                }
                true
            }
        }
    }

    async fn sync_voice_priority(&self) {
        let (transport, mic_scores) = {
            let mut state = self.inner.lock().await;
            if !state.voice_priority_wanted() {
                state.stop_voice_priority();
                return;
            }
            if !state.voice.try_begin() {
                return;
            }
            let Some(transport) = state
                .send_transport
                .as_ref()
                .map(|slot| slot.transport.clone())
            else {
                state.voice.settle();
                return;
            };
            (transport, state.mic_scores.clone())
        };

        let result = transport
            .produce_data(voice_priority::data_produce_options())
            .await;

        let mut state = self.inner.lock().await;
        match result {
            Ok(data_producer) if state.voice_priority_wanted() => {
                state.voice.start(data_producer, mic_scores);
            }
            Ok(data_producer) => {
                state.voice.settle();
                data_producer.close();
                if !state.lifecycle.is_unloading() {
                    state.notify(SfuRequest::CloseDataProducers {
                        data_producer_ids: vec![data_producer.id()],
                    });
                }
            }
            Err(err) => {
                state.voice.settle();
                tracing::error!("failed to open voice priority channel: {}", err);
            }
        }
    }

    pub async fn set_local_stream(
        &self,
        stream_id: &str,
        tracks: Vec<Arc<LocalTrack>>,
        audio_paused: bool,
        video_paused: bool,
    ) {
        let audio = tracks.iter().find(|t| t.kind == MediaKind::Audio).cloned();
        let video = tracks.iter().find(|t| t.kind == MediaKind::Video).cloned();
        if let Some(track) = audio.as_ref() {
            track.set_enabled(!audio_paused);
        }
        if let Some(track) = video.as_ref() {
            track.set_enabled(!video_paused);
        }

        let sources = {
            let mut state = self.inner.lock().await;
            let (audio_source, video_source) = if stream_id == CAMERA_STREAM_ID {
                state.camera_tracks = tracks;
                (ProducerSource::Mic, ProducerSource::Webcam)
            } else {
                (ProducerSource::ScreenAudio, ProducerSource::ScreenVideo)
            };
            state.set_intent(audio_source, audio, audio_paused, stream_id);
            state.set_intent(video_source, video, video_paused, stream_id);
            [audio_source, video_source]
        };

        for source in sources {
            self.sync_producer(source).await;
        }
    }

    pub async fn unset_local_stream(&self, stream_id: &str) {
        let sources = {
            let mut state = self.inner.lock().await;
            let candidates = if stream_id == CAMERA_STREAM_ID {
                state.camera_tracks.clear();
                state.capture.cancel();
                [ProducerSource::Mic, ProducerSource::Webcam]
            } else {
                [ProducerSource::ScreenAudio, ProducerSource::ScreenVideo]
            };
            let mut sources = Vec::new();
            for source in candidates {
                let slot = state.producer_slot(source);
                if slot
                    .desired
                    .as_ref()
                    .is_some_and(|intent| intent.stream_id == stream_id)
                {
                    slot.desired = None;
                    sources.push(source);
                }
            }
            sources
        };

        for source in sources {
            self.sync_producer(source).await;
        }
    }

    pub async fn replace_local_track(&self, old_track_id: &str, track: Arc<LocalTrack>) {
        let sources = {
            let mut state = self.inner.lock().await;
            state.replace_local_track(old_track_id, track)
        };
        for source in sources {
            self.sync_producer(source).await;
        }
    }

    pub async fn set_audio_enabled(&self, enabled: bool) {
        {
            let mut state = self.inner.lock().await;
            let slot = state.producer_slot(ProducerSource::Mic);
            if let Some(intent) = slot.desired.as_mut() {
                intent.paused = !enabled;
                intent.track.set_enabled(enabled);
            }
        }
        self.sync_producer(ProducerSource::Mic).await;
    }

    pub async fn set_video_enabled(&self, enabled: bool) {
        let reacquire = {
            let mut state = self.inner.lock().await;
            if let Some(intent) = state.producer_slot(ProducerSource::Webcam).desired.as_mut() {
                intent.paused = !enabled;
            }
            match state.camera_video() {
                Some(track) => {
                    let notify = state.router_events.clone();
                    let action = state.capture.set_video_enabled(
                        &track,
                        enabled,
                        notify,
                        RouterEvent::StopCamera,
                    );
                    (action == CaptureAction::Reacquire)
                        .then(|| (track, state.capture.reacquire()))
                }
                None => None,
            }
        };

        if let Some((stopped, acquire)) = reacquire {
            match acquire.await {
                Ok(camera) => {
                    let mut state = self.inner.lock().await;
                    if state.closed
                        || !reacquired_camera_wanted(state.camera_video().as_deref(), &stopped)
                    {
                        tracing::debug!("re-acquired camera {} is not needed anymore", camera.id);
                        camera.stop();
                        return;
                    }
                    camera.set_enabled(true);
                    state.replace_local_track(&stopped.id, camera.clone());
                    emit(
                        &state.events,
                        ManagerEvent::LocalTrackAdded {
                            stream_id: CAMERA_STREAM_ID.to_string(),
                            track: camera,
                        },
                    );
                }
                Err(err) => tracing::error!("failed to re-acquire camera: {}", err),
            }
        }

        self.sync_producer(ProducerSource::Webcam).await;
    }

    pub async fn accept_stream(&self, participant_id: &str, stream_id: &str) {
        let mut state = self.inner.lock().await;
        state.accept(participant_id, stream_id);
    }

    pub async fn unaccept_stream(&self, participant_id: &str, stream_id: &str) {
        let mut state = self.inner.lock().await;
        state.unaccept(participant_id, stream_id);
    }

    pub async fn set_rendered_size(&self, participant_id: &str, stream_id: &str, size: RenderedSize) {
        let mut state = self.inner.lock().await;
        for slot in state.consumers.values_mut().filter(|slot| {
            slot.client_id == participant_id
                && slot.stream_id == stream_id
                && slot.kind() == MediaKind::Video
        }) {
            slot.rendered = Some(size);
        }
        state.update_layers();
    }

    pub async fn colocate(&self, colocation: Option<String>) {
        {
            let mut state = self.inner.lock().await;
            state.colocation = colocation.clone();
            state.notify(SfuRequest::SetColocation { colocation });
        }
        self.sync_voice_priority().await;
    }

    pub async fn claim_event(&self, event_claim: String) {
        let mut state = self.inner.lock().await;
        state.params.event_claim = Some(event_claim.clone());
        state.notify(SfuRequest::EventClaim { event_claim });
    }

    /// Closes everything. Nothing reconnects afterwards.
    pub async fn close(&self) {
        {
            let mut state = self.inner.lock().await;
            if state.closed {
                return;
            }
            if let Some(timer) = state.reconnect_timer.take() {
                timer.abort();
            }
            state.capture.cancel();
            state.teardown(true);
            state.closed = true;
        }
        let _ = self.event_sender.send(RouterEvent::Closed);
        tracing::info!("RouterManager {} is closed", self.self_id);
    }
}

impl RouterState {
    fn is_current(&self, connection_id: u64) -> bool {
        !self.closed
            && self
                .connection
                .as_ref()
                .is_some_and(|connection| connection.id == connection_id)
    }

    fn open_connection(&mut self, connection: SfuConnection) -> u64 {
        let SfuConnection {
            signaling,
            mut notifications,
        } = connection;
        self.next_connection_id += 1;
        let id = self.next_connection_id;

        let router_events = self.router_events.clone();
        let pump = tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                let event = RouterEvent::Notification {
                    connection_id: id,
                    notification,
                };
                if router_events.send(event).is_err() {
                    return;
                }
            }
            let _ = router_events.send(RouterEvent::ConnectionClosed { connection_id: id });
        });

        tracing::info!("SFU connection {} is open", id);
        self.connection = Some(Connection {
            id,
            signaling,
            pump,
        });
        id
    }

    fn notify(&self, request: SfuRequest) {
        let method = request.method();
        let Some(connection) = self.connection.as_ref() else {
            tracing::debug!("not connected to SFU, dropping {}", method);
            return;
        };
        if let Err(err) = connection.signaling.message(request) {
            tracing::error!("failed to send {}: {}", method, err);
        }
    }

    fn schedule_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        tracing::info!("reconnecting to SFU in {:?}", RECONNECT_DELAY);
        let router_events = self.router_events.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_DELAY).await;
            let _ = router_events.send(RouterEvent::Connect);
        }));
    }

    /// Drops every server side resource. With `server_alive`, locally closed producers are
    /// reported to the server before the connection goes away.
    fn teardown(&mut self, server_alive: bool) {
        let notify = server_alive && !self.lifecycle.is_unloading();

        if let Some(data_producer_id) = self.voice.stop() {
            if notify {
                self.notify(SfuRequest::CloseDataProducers {
                    data_producer_ids: vec![data_producer_id],
                });
            }
        }
        self.voice.settle();

        let mut producer_ids = Vec::new();
        for slot in self.producers.values_mut() {
            if let Some(producer) = slot.producer.as_ref() {
                producer_ids.push(producer.id());
            }
            slot.detach();
        }
        if notify && !producer_ids.is_empty() {
            self.notify(SfuRequest::CloseProducers { producer_ids });
        }

        for (_, slot) in self.consumers.drain() {
            slot.consumer.close();
        }
        for (_, data_consumer) in self.data_consumers.drain() {
            data_consumer.close();
        }

        let mut removed = Vec::new();
        for (client_id, client) in self.remote_clients.iter_mut() {
            for (stream_id, stream) in client.streams.drain() {
                if stream.announced {
                    removed.push((client_id.clone(), stream_id));
                }
            }
        }
        self.remote_clients.retain(|_, client| !client.is_empty());
        for (client_id, stream_id) in removed {
            emit(
                &self.events,
                ManagerEvent::StreamRemoved {
                    client_id,
                    stream_id,
                },
            );
        }

        if let Some(mut slot) = self.send_transport.take() {
            slot.close();
        }
        if let Some(mut slot) = self.recv_transport.take() {
            slot.close();
        }
        if let Some(connection) = self.connection.take() {
            connection.signaling.close();
        }
    }

    fn transport_mut(
        &mut self,
        direction: TransportDirection,
        transport_id: &str,
    ) -> Option<&mut TransportSlot> {
        let slot = match direction {
            TransportDirection::Send => self.send_transport.as_mut(),
            TransportDirection::Receive => self.recv_transport.as_mut(),
        };
        slot.filter(|slot| slot.id() == transport_id)
    }

    fn handle_transport_state(
        &mut self,
        direction: TransportDirection,
        transport_id: &str,
        status: ConnectionStatus,
    ) {
        let Some(slot) = self.transport_mut(direction, transport_id) else {
            return;
        };
        let decision = slot.on_state_change(status);
        tracing::info!("{} transport {} is {}", direction, transport_id, status);
        emit(
            &self.events,
            ManagerEvent::TransportStatusChanged { direction, status },
        );
        self.apply_restart_decision(direction, decision);
    }

    fn handle_ice_restart_settled(
        &mut self,
        direction: TransportDirection,
        transport_id: &str,
        result: Result<(), Error>,
    ) {
        let Some(slot) = self.transport_mut(direction, transport_id) else {
            return;
        };
        let decision = slot.on_restart_settled(&result);
        if let Err(err) = result {
            tracing::warn!("ICE restart of {} transport failed: {}", direction, err);
        }
        self.apply_restart_decision(direction, decision);
    }

    fn apply_restart_decision(&mut self, direction: TransportDirection, decision: RestartDecision) {
        let router_events = self.router_events.clone();
        let signaling = self
            .connection
            .as_ref()
            .map(|connection| connection.signaling.clone());
        let slot = match direction {
            TransportDirection::Send => self.send_transport.as_mut(),
            TransportDirection::Receive => self.recv_transport.as_mut(),
        };
        let Some(slot) = slot else {
            return;
        };
        let transport_id = slot.id();

        match decision {
            RestartDecision::Idle => {}
            RestartDecision::RestartNow => {
                tracing::info!(
                    "restarting ICE of {} transport {} (attempt {})",
                    direction,
                    transport_id,
                    slot.ice_restart.attempts
                );
                let transport = slot.transport.clone();
                tokio::spawn(async move {
                    let result = restart_ice(signaling, &transport_id, transport).await;
                    let _ = router_events.send(RouterEvent::IceRestartSettled {
                        direction,
                        transport_id,
                        result,
                    });
                });
            }
            RestartDecision::Schedule(delay) => {
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = router_events.send(RouterEvent::IceRestartTimer {
                        direction,
                        transport_id,
                    });
                });
                slot.set_timer(timer);
            }
            RestartDecision::GiveUp => {
                tracing::warn!(
                    "giving up ICE restarts of {} transport {}",
                    direction,
                    transport_id
                );
                emit(
                    &self.events,
                    ManagerEvent::TransportFailed {
                        direction,
                        transport_id,
                        attempts: slot.ice_restart.attempts,
                    },
                );
            }
            RestartDecision::Stop => {
                tracing::warn!(
                    "SFU no longer knows {} transport {}, not restarting",
                    direction,
                    transport_id
                );
            }
        }
    }

    fn handle_data_message(&self, data_consumer_id: &str, payload: &Bytes) {
        let Some(data_consumer) = self.data_consumers.get(data_consumer_id) else {
            return;
        };
        let data = serde_json::from_slice(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));
        emit(
            &self.events,
            ManagerEvent::CustomStats {
                label: data_consumer.label(),
                data,
            },
        );
    }

    fn producer_slot(&mut self, source: ProducerSource) -> &mut ProducerSlot {
        self.producers
            .entry(source)
            .or_insert_with(|| ProducerSlot::new(source))
    }

    fn produce_options(
        &self,
        source: ProducerSource,
        intent: &ProducerIntent,
        self_id: &str,
    ) -> ProduceOptions {
        let preferred_codec = match source.kind() {
            MediaKind::Video => self.features.preferred_video_codec().map(str::to_string),
            MediaKind::Audio => None,
        };
        ProduceOptions {
            track: intent.track.clone(),
            paused: intent.paused,
            simulcast: source == ProducerSource::Webcam && self.features.simulcast,
            preferred_codec,
            app_data: intent.app_data(source, self_id),
        }
    }

    fn set_intent(
        &mut self,
        source: ProducerSource,
        track: Option<Arc<LocalTrack>>,
        paused: bool,
        stream_id: &str,
    ) {
        self.producer_slot(source).desired = track.map(|track| ProducerIntent {
            track,
            paused,
            stream_id: stream_id.to_owned(),
        });
    }

    /// Swaps the track everywhere it is used. Returns the sources whose intent changed.
    fn replace_local_track(
        &mut self,
        old_track_id: &str,
        track: Arc<LocalTrack>,
    ) -> Vec<ProducerSource> {
        for slot in self.camera_tracks.iter_mut() {
            if slot.id == old_track_id {
                *slot = track.clone();
            }
        }
        let mut sources = Vec::new();
        for slot in self.producers.values_mut() {
            if let Some(intent) = slot.desired.as_mut() {
                if intent.track.id == old_track_id {
                    intent.track = track.clone();
                    sources.push(slot.source);
                }
            }
        }
        sources
    }

    fn camera_video(&self) -> Option<Arc<LocalTrack>> {
        self.camera_tracks
            .iter()
            .find(|t| t.kind == MediaKind::Video)
            .cloned()
    }

    fn stop_camera(&mut self) {
        let Some(track) = self.camera_video() else {
            return;
        };
        if self.capture.stop_if_disabled(&track) {
            emit(
                &self.events,
                ManagerEvent::LocalTrackRemoved {
                    stream_id: CAMERA_STREAM_ID.to_string(),
                    track_id: track.id.clone(),
                    kind: track.kind,
                },
            );
        }
    }

    fn voice_priority_wanted(&self) -> bool {
        !self.closed
            && self.colocation.is_some()
            && self.send_transport.is_some()
            && self
                .producers
                .get(&ProducerSource::Mic)
                .is_some_and(|slot| slot.producer.is_some())
    }

    fn stop_voice_priority(&mut self) {
        if let Some(data_producer_id) = self.voice.stop() {
            if !self.lifecycle.is_unloading() {
                self.notify(SfuRequest::CloseDataProducers {
                    data_producer_ids: vec![data_producer_id],
                });
            }
        }
    }

    fn accept(&mut self, client_id: &str, stream_id: &str) {
        let client = self.remote_clients.entry(client_id.to_owned()).or_default();
        if !client.accepted.insert(stream_id.to_owned()) {
            return;
        }
        let consumer_ids = client
            .streams
            .get(stream_id)
            .map(|stream| stream.consumer_ids.clone())
            .unwrap_or_default();

        let resumed: Vec<String> = consumer_ids
            .into_iter()
            .filter(|id| {
                self.consumers
                    .get_mut(id)
                    .is_some_and(|slot| slot.set_local_paused(false))
            })
            .collect();
        if !resumed.is_empty() {
            self.notify(SfuRequest::ResumeConsumers {
                consumer_ids: resumed,
            });
        }

        self.announce_stream(client_id, stream_id);
        self.update_layers();
    }

    fn unaccept(&mut self, client_id: &str, stream_id: &str) {
        let Some(client) = self.remote_clients.get_mut(client_id) else {
            return;
        };
        if !client.accepted.remove(stream_id) {
            return;
        }
        let (consumer_ids, announced) = match client.streams.get_mut(stream_id) {
            Some(stream) => (
                stream.consumer_ids.clone(),
                std::mem::take(&mut stream.announced),
            ),
            None => (Vec::new(), false),
        };
        if client.is_empty() {
            self.remote_clients.remove(client_id);
        }

        let paused: Vec<String> = consumer_ids
            .into_iter()
            .filter(|id| {
                self.consumers
                    .get_mut(id)
                    .is_some_and(|slot| slot.set_local_paused(true))
            })
            .collect();
        if !paused.is_empty() {
            self.notify(SfuRequest::PauseConsumers {
                consumer_ids: paused,
            });
        }

        if announced {
            emit(
                &self.events,
                ManagerEvent::StreamRemoved {
                    client_id: client_id.to_owned(),
                    stream_id: stream_id.to_owned(),
                },
            );
        }
        self.update_layers();
    }

    /// Publishes the current tracks of an accepted stream.
    fn announce_stream(&mut self, client_id: &str, stream_id: &str) {
        let Some(stream) = self
            .remote_clients
            .get_mut(client_id)
            .and_then(|client| client.streams.get_mut(stream_id))
        else {
            return;
        };
        let tracks: Vec<Arc<dyn Track>> = stream
            .consumer_ids
            .iter()
            .filter_map(|id| self.consumers.get(id))
            .map(|slot| slot.track())
            .collect();
        if tracks.is_empty() {
            return;
        }
        stream.announced = true;

        let stream_type = if stream_id == CAMERA_STREAM_ID {
            StreamType::Webcam
        } else {
            StreamType::Screenshare
        };
        emit(
            &self.events,
            ManagerEvent::StreamAdded {
                client_id: client_id.to_owned(),
                stream_id: stream_id.to_owned(),
                stream_type,
                tracks,
            },
        );
    }

    fn add_consumer(&mut self, mut slot: ConsumerSlot) {
        let consumer_id = slot.id();
        let client_id = slot.client_id.clone();
        let stream_id = slot.stream_id.clone();

        let client = self.remote_clients.entry(client_id.clone()).or_default();
        client.add_consumer(&stream_id, &consumer_id);
        let accepted = client.is_accepted(&stream_id);

        if accepted && slot.set_local_paused(false) {
            self.notify(SfuRequest::ResumeConsumers {
                consumer_ids: vec![consumer_id.clone()],
            });
        }
        self.consumers.insert(consumer_id, slot);

        if accepted {
            self.announce_stream(&client_id, &stream_id);
        }
        self.update_layers();
    }

    fn remove_consumer(&mut self, consumer_id: &str) {
        let Some(slot) = self.consumers.remove(consumer_id) else {
            return;
        };
        slot.consumer.close();

        let mut change = StreamChange::Unchanged;
        let mut forget_client = false;
        if let Some(client) = self.remote_clients.get_mut(&slot.client_id) {
            change = client.remove_consumer(&slot.stream_id, consumer_id);
            forget_client = client.is_empty();
        }
        if forget_client {
            self.remote_clients.remove(&slot.client_id);
        }
        if change == (StreamChange::Emptied {
            was_announced: true,
        }) {
            emit(
                &self.events,
                ManagerEvent::StreamRemoved {
                    client_id: slot.client_id.clone(),
                    stream_id: slot.stream_id.clone(),
                },
            );
        }
        self.update_layers();
    }

    fn set_remote_paused(&mut self, consumer_id: &str, paused: bool) {
        let Some(slot) = self.consumers.get_mut(consumer_id) else {
            tracing::debug!("pause state for unknown consumer {}", consumer_id);
            return;
        };
        if slot.set_remote_paused(paused) {
            self.update_layers();
        }
    }

    /// Requests the layer every playing video needs, sending only what changed.
    fn update_layers(&mut self) {
        let (active_videos, videos_at_lowest) = self
            .consumers
            .values()
            .filter(|slot| slot.kind() == MediaKind::Video && slot.is_playing())
            .fold((0, 0), |(active, lowest), slot| {
                let at_lowest = slot
                    .rendered
                    .is_some_and(|size| spatial_for_size(size) == 0);
                (active + 1, lowest + usize::from(at_lowest))
            });

        let mut changed: HashMap<Layer, Vec<String>> = HashMap::new();
        for slot in self
            .consumers
            .values_mut()
            .filter(|slot| slot.kind() == MediaKind::Video && slot.is_playing())
        {
            let Some(size) = slot.rendered else {
                continue;
            };
            let layer = select_layer(size, active_videos, videos_at_lowest);
            if slot.applied_layer != Some(layer) {
                slot.applied_layer = Some(layer);
                changed.entry(layer).or_default().push(slot.id());
            }
        }

        for (layer, mut consumer_ids) in changed {
            consumer_ids.sort();
            self.notify(SfuRequest::SetConsumersPreferredLayers {
                consumer_ids,
                spatial_layer: layer.spatial_id,
                temporal_layer: layer.temporal_id,
            });
        }
    }
}

impl Drop for RouterState {
    fn drop(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        tracing::debug!("RouterManager state is dropped");
    }
}

async fn restart_ice(
    signaling: Option<Arc<dyn SfuSignaling>>,
    transport_id: &str,
    transport: Arc<dyn SfuTransport>,
) -> Result<(), Error> {
    let signaling = signaling.ok_or_else(|| {
        Error::new_signaling(
            "not connected to SFU".to_string(),
            SignalingErrorKind::NotConnectedError,
        )
    })?;
    let response: RestartIceResponse = request_as(
        signaling.as_ref(),
        SfuRequest::RestartIce {
            transport_id: transport_id.to_owned(),
        },
    )
    .await?;
    transport.restart_ice(response.ice_parameters).await
}

/// Answers the transport's server round trips and forwards its state to the event loop.
fn spawn_transport_pump(
    direction: TransportDirection,
    transport_id: String,
    signaling: Arc<dyn SfuSignaling>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    router_events: mpsc::UnboundedSender<RouterEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connect {
                    dtls_parameters,
                    reply,
                } => {
                    tokio::spawn(enc!((signaling, transport_id) async move {
                        let result = signaling
                            .request(SfuRequest::ConnectTransport {
                                transport_id,
                                dtls_parameters,
                            })
                            .await
                            .map(|_| ());
                        let _ = reply.send(result);
                    }));
                }
                TransportEvent::Produce {
                    kind,
                    rtp_parameters,
                    app_data,
                    reply,
                } => {
                    tokio::spawn(enc!((signaling, transport_id) async move {
                        let request = SfuRequest::Produce {
                            transport_id,
                            kind,
                            rtp_parameters,
                            paused: app_data.paused,
                            app_data,
                        };
                        let result = request_as::<ProduceResponse>(signaling.as_ref(), request)
                            .await
                            .map(|response| response.id);
                        let _ = reply.send(result);
                    }));
                }
                TransportEvent::ProduceData {
                    sctp_stream_parameters,
                    label,
                    protocol,
                    app_data,
                    reply,
                } => {
                    tokio::spawn(enc!((signaling, transport_id) async move {
                        let request = SfuRequest::ProduceData {
                            transport_id,
                            sctp_stream_parameters,
                            label,
                            protocol,
                            app_data,
                        };
                        let result = request_as::<ProduceResponse>(signaling.as_ref(), request)
                            .await
                            .map(|response| response.id);
                        let _ = reply.send(result);
                    }));
                }
                TransportEvent::ConnectionStateChange(status) => {
                    let event = RouterEvent::TransportState {
                        direction,
                        transport_id: transport_id.clone(),
                        status,
                    };
                    if router_events.send(event).is_err() {
                        break;
                    }
                }
                TransportEvent::DataMessage {
                    data_consumer_id,
                    payload,
                } => {
                    let event = RouterEvent::DataMessage {
                        data_consumer_id,
                        payload,
                    };
                    if router_events.send(event).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

#[async_trait]
impl RtcManager for RouterManager {
    fn mode(&self) -> ManagerMode {
        ManagerMode::Router
    }

    fn is_initialized_with(&self, self_id: &str, room_name: &str, mode: ManagerMode) -> bool {
        self.self_id == self_id && self.room_name == room_name && mode == ManagerMode::Router
    }

    async fn accept_new_stream(&self, request: AcceptStream) {
        self.accept_stream(&request.participant_id, &request.stream_id)
            .await;
    }

    async fn disconnect(&self, participant_id: &str, stream_id: &str) {
        self.unaccept_stream(participant_id, stream_id).await;
    }

    async fn add_new_stream(
        &self,
        stream_id: &str,
        tracks: Vec<Arc<LocalTrack>>,
        audio_paused: bool,
        video_paused: bool,
    ) {
        self.set_local_stream(stream_id, tracks, audio_paused, video_paused)
            .await;
    }

    async fn remove_stream(&self, stream_id: &str) {
        self.unset_local_stream(stream_id).await;
    }

    async fn replace_track(&self, old_track_id: &str, track: Arc<LocalTrack>) {
        self.replace_local_track(old_track_id, track).await;
    }

    async fn update_stream_resolution(
        &self,
        participant_id: &str,
        stream_id: &str,
        size: RenderedSize,
    ) {
        self.set_rendered_size(participant_id, stream_id, size).await;
    }

    async fn stop_or_resume_audio(&self, enabled: bool) {
        self.set_audio_enabled(enabled).await;
    }

    async fn stop_or_resume_video(&self, enabled: bool) {
        self.set_video_enabled(enabled).await;
    }

    async fn set_colocation(&self, colocation: Option<String>) {
        self.colocate(colocation).await;
    }

    async fn set_event_claim(&self, event_claim: String) {
        self.claim_event(event_claim).await;
    }

    async fn disconnect_all(&self) {
        self.close().await;
    }
}
