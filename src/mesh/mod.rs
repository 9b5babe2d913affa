//! Mesh mode: one peer connection per remote participant.

/// Video bandwidth per peer count.
pub mod bandwidth;
pub(crate) mod session;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use enclose::enc;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::Duration,
};

use crate::{
    capture::{reacquired_camera_wanted, CaptureAction, CaptureController},
    config::{Features, WebRTCTransportConfig},
    error::Error,
    events::{emit, ConnectionStatus, EventSender, ManagerEvent, StreamType},
    local_track::LocalTrack,
    manager::{
        AcceptStream, ManagerContext, ManagerMode, RenderedSize, RtcManager, CAMERA_STREAM_ID,
    },
    signaling::{MeshSignal, MeshSignaling},
    track::MediaKind,
    transport::{
        recovery_check_delay, NegotiationRole, PeerConnectionEvent, PeerConnectionFactory,
        ICE_RESTART_MIN_INTERVAL,
    },
};

use self::{bandwidth::compute_bandwidth, session::Session};

/// Time the shared statistics connection stays open after the last session closes.
pub const STATS_RELEASE_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub(crate) enum MeshEvent {
    Peer {
        client_id: String,
        generation: u64,
        event: PeerConnectionEvent,
    },
    /// A session's ICE restart timer fired.
    IceRestartCheck {
        client_id: String,
        generation: u64,
    },
    StopCamera,
    ReleaseStatsConnection,
    Closed,
}

/// Manager for mesh mode. Cloning yields another handle to the same manager.
#[derive(Debug, Clone)]
pub struct MeshManager {
    self_id: String,
    room_name: String,
    inner: Arc<Mutex<MeshState>>,
    event_sender: mpsc::UnboundedSender<MeshEvent>,
}

#[derive(Debug)]
struct MeshState {
    features: Features,
    transport_config: WebRTCTransportConfig,
    factory: Arc<dyn PeerConnectionFactory>,
    signaling: Arc<dyn MeshSignaling>,
    events: EventSender,
    mesh_events: mpsc::UnboundedSender<MeshEvent>,
    sessions: HashMap<String, Session>,
    next_generation: u64,
    camera_tracks: Vec<Arc<LocalTrack>>,
    screenshares: HashMap<String, Vec<Arc<LocalTrack>>>,
    capture: CaptureController,
    stats_grace: Option<JoinHandle<()>>,
    stats_connection_open: bool,
    bandwidth: u32,
    closed: bool,
}

impl MeshManager {
    pub fn new(
        context: ManagerContext,
        factory: Arc<dyn PeerConnectionFactory>,
        signaling: Arc<dyn MeshSignaling>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport_config = context
            .transport_config
            .clone()
            .with_features(&context.features);

        let state = MeshState {
            features: context.features,
            transport_config,
            factory,
            signaling,
            events: context.events,
            mesh_events: tx.clone(),
            sessions: HashMap::new(),
            next_generation: 0,
            camera_tracks: Vec::new(),
            screenshares: HashMap::new(),
            capture: CaptureController::new(context.capabilities, context.devices),
            stats_grace: None,
            stats_connection_open: false,
            bandwidth: 0,
            closed: false,
        };

        let manager = Self {
            self_id: context.self_id,
            room_name: context.room_name,
            inner: Arc::new(Mutex::new(state)),
            event_sender: tx,
        };

        tokio::spawn(enc!((manager) async move {
            MeshManager::mesh_event_loop(manager, rx).await;
        }));

        tracing::debug!("MeshManager for {} is created", manager.self_id);

        manager
    }

    async fn mesh_event_loop(manager: MeshManager, mut event_receiver: mpsc::UnboundedReceiver<MeshEvent>) {
        tracing::debug!("MeshManager {} event loop started", manager.self_id);
        while let Some(event) = event_receiver.recv().await {
            match event {
                MeshEvent::Peer {
                    client_id,
                    generation,
                    event,
                } => {
                    manager
                        .handle_peer_event(&client_id, generation, event)
                        .await;
                }
                MeshEvent::IceRestartCheck {
                    client_id,
                    generation,
                } => {
                    let mut state = manager.inner.lock().await;
                    let recover = match state.sessions.get_mut(&client_id) {
                        Some(session) if session.generation == generation => {
                            session.cancel_restart_check();
                            session.status.needs_recovery()
                        }
                        _ => false,
                    };
                    if recover {
                        state.maybe_restart_ice(&client_id).await;
                    }
                }
                MeshEvent::StopCamera => {
                    let mut state = manager.inner.lock().await;
                    state.stop_camera();
                }
                MeshEvent::ReleaseStatsConnection => {
                    let mut state = manager.inner.lock().await;
                    state.stats_grace = None;
                    if state.sessions.is_empty() {
                        state.release_stats_connection();
                    }
                }
                MeshEvent::Closed => {
                    break;
                }
            }
        }
        tracing::debug!("MeshManager {} event loop finished", manager.self_id);
    }

    /// Opens a session to `client_id` as offerer, replacing any existing one.
    pub async fn connect(&self, client_id: &str) -> Result<(), Error> {
        let mut state = self.inner.lock().await;
        state.connect(client_id).await
    }

    pub async fn accept_stream(&self, request: &AcceptStream) -> Result<(), Error> {
        let mut state = self.inner.lock().await;
        if state.closed {
            return Ok(());
        }

        if request.stream_id != CAMERA_STREAM_ID {
            if !state.sessions.contains_key(&request.participant_id) {
                tracing::debug!(
                    "no session with {} yet, screen share {} arrives with it",
                    request.participant_id,
                    request.stream_id
                );
            }
            return Ok(());
        }

        state
            .replace_session(&request.participant_id, NegotiationRole::Answerer)
            .await?;
        state
            .attach_local_tracks(&request.participant_id, request.should_add_local_video)
            .await;
        state.update_bandwidth().await;
        state.send(
            &request.participant_id,
            MeshSignal::ReadyToReceiveOffer {
                stream_id: request.stream_id.clone(),
            },
        );
        Ok(())
    }

    pub async fn disconnect_stream(&self, participant_id: &str, stream_id: &str) {
        if stream_id != CAMERA_STREAM_ID {
            return;
        }
        let mut state = self.inner.lock().await;
        if !state.close_session(participant_id).await {
            return;
        }
        state.update_bandwidth().await;
        if state.sessions.is_empty() {
            state.schedule_stats_release();
        }
    }

    /// Handles a message relayed from `from`.
    pub async fn handle_signal(&self, from: &str, signal: MeshSignal) -> Result<(), Error> {
        tracing::trace!("{} from {}", signal.name(), from);
        let mut state = self.inner.lock().await;
        if state.closed {
            return Ok(());
        }

        match signal {
            MeshSignal::SdpOffer { sdp } => {
                if !state.sessions.contains_key(from) {
                    state.replace_session(from, NegotiationRole::Answerer).await?;
                    state.attach_local_tracks(from, true).await;
                    state.update_bandwidth().await;
                }
                let MeshState {
                    sessions, features, ..
                } = &mut *state;
                let Some(session) = sessions.get_mut(from) else {
                    return Ok(());
                };
                let answer = session.handle_offer(sdp, features).await?;
                state.send(from, MeshSignal::SdpAnswer { sdp: answer });
            }
            MeshSignal::SdpAnswer { sdp } => {
                let Some(session) = state.sessions.get_mut(from) else {
                    tracing::debug!("answer from {} without session", from);
                    return Ok(());
                };
                if let Some(ice_restart) = session.handle_answer(sdp).await? {
                    state.negotiate(from, ice_restart).await;
                }
            }
            MeshSignal::IceCandidate { candidate } => {
                let Some(session) = state.sessions.get_mut(from) else {
                    tracing::debug!("ICE candidate from {} without session", from);
                    return Ok(());
                };
                session.add_ice_candidate(candidate).await?;
            }
            MeshSignal::IceEndOfCandidates => {
                tracing::debug!("{} finished gathering candidates", from);
            }
            MeshSignal::ReadyToReceiveOffer { .. } => {
                state.connect(from).await?;
            }
            MeshSignal::StartScreenshare {
                stream_id,
                has_audio_track,
            } => {
                if let Some(session) = state.sessions.get_mut(from) {
                    session.remote_screenshares.insert(stream_id.clone());
                }
                emit(
                    &state.events,
                    ManagerEvent::ScreenshareStarted {
                        client_id: from.to_owned(),
                        stream_id,
                        has_audio_track,
                    },
                );
            }
            MeshSignal::StopScreenshare { stream_id } => {
                if let Some(session) = state.sessions.get_mut(from) {
                    session.remote_screenshares.remove(&stream_id);
                }
                emit(
                    &state.events,
                    ManagerEvent::ScreenshareStopped {
                        client_id: from.to_owned(),
                        stream_id: stream_id.clone(),
                    },
                );
                emit(
                    &state.events,
                    ManagerEvent::StreamRemoved {
                        client_id: from.to_owned(),
                        stream_id,
                    },
                );
            }
        }
        Ok(())
    }

    pub(crate) async fn handle_peer_event(
        &self,
        client_id: &str,
        generation: u64,
        event: PeerConnectionEvent,
    ) {
        let mut state = self.inner.lock().await;
        let Some(session) = state.sessions.get_mut(client_id) else {
            return;
        };
        if session.generation != generation {
            tracing::debug!(
                "ignoring event of replaced session {} (generation {})",
                client_id,
                generation
            );
            return;
        }

        match event {
            PeerConnectionEvent::IceCandidate {
                candidate,
                is_relay,
            } => {
                if is_relay {
                    session.relay_candidate_seen = true;
                }
                let signal = match candidate {
                    Some(candidate) => MeshSignal::IceCandidate { candidate },
                    None => MeshSignal::IceEndOfCandidates,
                };
                state.send(client_id, signal);
            }
            PeerConnectionEvent::IceConnectionStateChange(ice_state) => {
                let Some(status) = ConnectionStatus::from_ice_state(ice_state) else {
                    return;
                };
                session.status = status;
                if status == ConnectionStatus::Connected {
                    session.on_connected();
                }
                emit(
                    &state.events,
                    ManagerEvent::ConnectionStatusChanged {
                        client_id: client_id.to_owned(),
                        status,
                    },
                );
                if status.needs_recovery() {
                    state.maybe_restart_ice(client_id).await;
                }
            }
            PeerConnectionEvent::NegotiationNeeded => {
                tracing::debug!("negotiation needed for {}", client_id);
            }
            PeerConnectionEvent::Track(track) => {
                let track_stream_id = track.stream_id();
                let (stream_id, stream_type) =
                    if session.remote_screenshares.contains(&track_stream_id) {
                        (track_stream_id, StreamType::Screenshare)
                    } else {
                        (CAMERA_STREAM_ID.to_string(), StreamType::Webcam)
                    };
                if let Some(target) = state.features.jitter_buffer_target() {
                    track.set_jitter_buffer_target(target);
                }
                emit(
                    &state.events,
                    ManagerEvent::StreamAdded {
                        client_id: client_id.to_owned(),
                        stream_id,
                        stream_type,
                        tracks: vec![track],
                    },
                );
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
        for track in tracks.iter() {
            let paused = match track.kind {
                MediaKind::Audio => audio_paused,
                MediaKind::Video => video_paused,
            };
            track.set_enabled(!paused);
        }

        let mut state = self.inner.lock().await;
        if stream_id == CAMERA_STREAM_ID {
            let old = std::mem::replace(&mut state.camera_tracks, tracks.clone());
            state.swap_tracks(&old, &tracks).await;
            state.update_bandwidth().await;
            return;
        }

        let has_audio_track = tracks.iter().any(|t| t.kind == MediaKind::Audio);
        let old = state
            .screenshares
            .insert(stream_id.to_owned(), tracks.clone())
            .unwrap_or_default();
        let client_ids: Vec<String> = state.sessions.keys().cloned().collect();
        for client_id in client_ids.iter() {
            state.send(
                client_id,
                MeshSignal::StartScreenshare {
                    stream_id: stream_id.to_owned(),
                    has_audio_track,
                },
            );
        }
        state.swap_tracks(&old, &tracks).await;
    }

    pub async fn unset_local_stream(&self, stream_id: &str) {
        let mut state = self.inner.lock().await;
        let removed = if stream_id == CAMERA_STREAM_ID {
            std::mem::take(&mut state.camera_tracks)
        } else {
            let Some(tracks) = state.screenshares.remove(stream_id) else {
                return;
            };
            let client_ids: Vec<String> = state.sessions.keys().cloned().collect();
            for client_id in client_ids.iter() {
                state.send(
                    client_id,
                    MeshSignal::StopScreenshare {
                        stream_id: stream_id.to_owned(),
                    },
                );
            }
            tracks
        };
        state.swap_tracks(&removed, &[]).await;
    }

    pub async fn replace_local_track(&self, old_track_id: &str, track: Arc<LocalTrack>) {
        let mut state = self.inner.lock().await;
        state.replace_local_track(old_track_id, track).await;
    }

    pub async fn set_audio_enabled(&self, enabled: bool) {
        let state = self.inner.lock().await;
        for track in state
            .camera_tracks
            .iter()
            .filter(|t| t.kind == MediaKind::Audio)
        {
            track.set_enabled(enabled);
        }
    }

    pub async fn set_video_enabled(&self, enabled: bool) {
        let (track, acquire) = {
            let mut state = self.inner.lock().await;
            let Some(track) = state.camera_video() else {
                return;
            };
            let notify = state.mesh_events.clone();
            let action = state
                .capture
                .set_video_enabled(&track, enabled, notify, MeshEvent::StopCamera);
            if action != CaptureAction::Reacquire {
                return;
            }
            let acquire = state.capture.reacquire();
            (track, acquire)
        };

        let camera = match acquire.await {
            Ok(camera) => camera,
            Err(err) => {
                tracing::error!("failed to re-acquire camera: {}", err);
                return;
            }
        };

        let mut state = self.inner.lock().await;
        if state.closed || !reacquired_camera_wanted(state.camera_video().as_deref(), &track) {
            tracing::debug!("re-acquired camera {} is not needed anymore", camera.id);
            camera.stop();
            return;
        }
        camera.set_enabled(true);
        state.replace_local_track(&track.id, camera.clone()).await;
        emit(
            &state.events,
            ManagerEvent::LocalTrackAdded {
                stream_id: CAMERA_STREAM_ID.to_string(),
                track: camera,
            },
        );
        state.update_bandwidth().await;
    }

    pub async fn close(&self) {
        let mut state = self.inner.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        let client_ids: Vec<String> = state.sessions.keys().cloned().collect();
        for client_id in client_ids.iter() {
            state.close_session(client_id).await;
        }
        state.capture.cancel();
        state.cancel_stats_release();
        state.release_stats_connection();
        let _ = self.event_sender.send(MeshEvent::Closed);
        tracing::info!("MeshManager {} is closed", self.self_id);
    }
}

impl MeshState {
    async fn connect(&mut self, client_id: &str) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.replace_session(client_id, NegotiationRole::Offerer)
            .await?;
        self.attach_local_tracks(client_id, true).await;
        self.update_bandwidth().await;
        self.negotiate(client_id, false).await;
        Ok(())
    }

    /// Creates the session for `client_id`, tearing down the previous one first.
    async fn replace_session(&mut self, client_id: &str, role: NegotiationRole) -> Result<(), Error> {
        if let Some(mut old) = self.sessions.remove(client_id) {
            tracing::debug!("replacing session with {}", client_id);
            old.close().await;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer_connection = self
            .factory
            .create_peer_connection(client_id, &self.transport_config, tx)
            .await?;

        let mesh_events = self.mesh_events.clone();
        let peer_id = client_id.to_owned();
        let forward_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let event = MeshEvent::Peer {
                    client_id: peer_id.clone(),
                    generation,
                    event,
                };
                if mesh_events.send(event).is_err() {
                    break;
                }
            }
        });

        self.cancel_stats_release();
        self.stats_connection_open = true;
        self.sessions.insert(
            client_id.to_owned(),
            Session::new(
                client_id.to_owned(),
                generation,
                role,
                peer_connection,
                forward_task,
            ),
        );
        Ok(())
    }

    async fn close_session(&mut self, client_id: &str) -> bool {
        let Some(mut session) = self.sessions.remove(client_id) else {
            return false;
        };
        session.close().await;
        emit(
            &self.events,
            ManagerEvent::ConnectionStatusChanged {
                client_id: client_id.to_owned(),
                status: ConnectionStatus::Closed,
            },
        );
        true
    }

    async fn attach_local_tracks(&mut self, client_id: &str, include_camera: bool) {
        let mut tracks: Vec<Arc<LocalTrack>> = Vec::new();
        if include_camera {
            tracks.extend(self.camera_tracks.iter().cloned());
        }
        tracks.extend(self.screenshares.values().flatten().cloned());

        let Some(session) = self.sessions.get_mut(client_id) else {
            return;
        };
        for track in tracks {
            if let Err(err) = session.add_track(track).await {
                tracing::error!("failed to add track for {}: {}", client_id, err);
            }
        }
    }

    /// Moves every session from `old` tracks to `new` ones and renegotiates where needed.
    async fn swap_tracks(&mut self, old: &[Arc<LocalTrack>], new: &[Arc<LocalTrack>]) {
        let mut renegotiate = Vec::new();
        for (client_id, session) in self.sessions.iter_mut() {
            let mut changed = false;
            for track in old.iter().filter(|t| !new.iter().any(|n| n.id == t.id)) {
                match session.remove_track(&track.id).await {
                    Ok(removed) => changed |= removed,
                    Err(err) => tracing::error!("failed to remove track for {}: {}", client_id, err),
                }
            }
            for track in new.iter() {
                match session.add_track(track.clone()).await {
                    Ok(added) => changed |= added,
                    Err(err) => tracing::error!("failed to add track for {}: {}", client_id, err),
                }
            }
            if changed && (session.negotiated || session.negotiation.is_in_flight()) {
                renegotiate.push(client_id.clone());
            }
        }
        for client_id in renegotiate.iter() {
            self.negotiate(client_id, false).await;
        }
    }

    async fn replace_local_track(&mut self, old_track_id: &str, track: Arc<LocalTrack>) {
        for slot in self
            .camera_tracks
            .iter_mut()
            .chain(self.screenshares.values_mut().flatten())
        {
            if slot.id == old_track_id {
                *slot = track.clone();
            }
        }
        for (client_id, session) in self.sessions.iter_mut() {
            if let Err(err) = session.replace_track(old_track_id, track.clone()).await {
                tracing::error!("failed to replace track for {}: {}", client_id, err);
            }
        }
    }

    /// Recomputes the bandwidth for the current session count and hands it to every session.
    async fn update_bandwidth(&mut self) {
        let camera = self.camera_video().map(|track| track.settings);
        let bandwidth = compute_bandwidth(self.sessions.len(), &self.features, camera.as_ref());
        if bandwidth != self.bandwidth {
            tracing::debug!(
                "bandwidth for {} sessions is {} kbps",
                self.sessions.len(),
                bandwidth
            );
        }
        self.bandwidth = bandwidth;

        let mut renegotiate = Vec::new();
        for (client_id, session) in self.sessions.iter_mut() {
            if session.change_bandwidth(bandwidth)
                && session.negotiated
                && session.role == NegotiationRole::Offerer
            {
                renegotiate.push(client_id.clone());
            }
        }
        for client_id in renegotiate.iter() {
            self.negotiate(client_id, false).await;
        }
    }

    async fn negotiate(&mut self, client_id: &str, ice_restart: bool) {
        let Some(session) = self.sessions.get_mut(client_id) else {
            return;
        };
        match session.create_offer(ice_restart, &self.features).await {
            Ok(Some(offer)) => self.send(client_id, MeshSignal::SdpOffer { sdp: offer }),
            Ok(None) => {}
            Err(err) => tracing::error!("failed to create offer for {}: {}", client_id, err),
        }
    }

    /// Only the original offerer restarts ICE; the answerer waits for its offer. A session that
    /// is still down when its timer fires is looked at again until attempts run out.
    async fn maybe_restart_ice(&mut self, client_id: &str) {
        let Some(session) = self.sessions.get_mut(client_id) else {
            return;
        };
        if session.role != NegotiationRole::Offerer {
            tracing::debug!("waiting for {} to restart ICE", client_id);
            return;
        }
        if session.ice_restart.exhausted() {
            if !session.failure_reported {
                session.failure_reported = true;
                tracing::warn!("giving up ICE restarts with {}", client_id);
                emit(
                    &self.events,
                    ManagerEvent::PeerConnectionFailed {
                        client_id: client_id.to_owned(),
                        attempts: session.ice_restart.attempts,
                    },
                );
            }
            return;
        }
        if let Some(elapsed) = session.ice_restart.since_last_attempt() {
            if elapsed < ICE_RESTART_MIN_INTERVAL {
                tracing::debug!("ICE restart with {} was attempted recently", client_id);
                session.schedule_restart_check(ICE_RESTART_MIN_INTERVAL - elapsed, self.mesh_events.clone());
                return;
            }
        }

        tracing::info!(
            "restarting ICE with {} (attempt {})",
            client_id,
            session.ice_restart.attempts + 1
        );
        session.reset_connection_history();
        session.ice_restart.record_attempt();
        let retry = session.ice_restart.attempts - 1;
        session.schedule_restart_check(recovery_check_delay(retry), self.mesh_events.clone());
        self.negotiate(client_id, true).await;
    }

    fn send(&self, client_id: &str, signal: MeshSignal) {
        let name = signal.name();
        if let Err(err) = self.signaling.send(client_id, signal) {
            tracing::error!("failed to send {} to {}: {}", name, client_id, err);
        }
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

    fn schedule_stats_release(&mut self) {
        self.cancel_stats_release();
        let mesh_events = self.mesh_events.clone();
        self.stats_grace = Some(tokio::spawn(async move {
            tokio::time::sleep(STATS_RELEASE_DELAY).await;
            let _ = mesh_events.send(MeshEvent::ReleaseStatsConnection);
        }));
    }

    fn cancel_stats_release(&mut self) {
        if let Some(timer) = self.stats_grace.take() {
            timer.abort();
        }
    }

    fn release_stats_connection(&mut self) {
        if self.stats_connection_open {
            self.stats_connection_open = false;
            emit(&self.events, ManagerEvent::StatsConnectionReleased);
        }
    }
}

#[async_trait]
impl RtcManager for MeshManager {
    fn mode(&self) -> ManagerMode {
        ManagerMode::Mesh
    }

    fn is_initialized_with(&self, self_id: &str, room_name: &str, mode: ManagerMode) -> bool {
        self.self_id == self_id && self.room_name == room_name && mode == ManagerMode::Mesh
    }

    async fn accept_new_stream(&self, request: AcceptStream) {
        if let Err(err) = self.accept_stream(&request).await {
            tracing::error!(
                "failed to accept stream {} of {}: {}",
                request.stream_id,
                request.participant_id,
                err
            );
        }
    }

    async fn disconnect(&self, participant_id: &str, stream_id: &str) {
        self.disconnect_stream(participant_id, stream_id).await;
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
        _participant_id: &str,
        _stream_id: &str,
        _size: RenderedSize,
    ) {
    }

    async fn stop_or_resume_audio(&self, enabled: bool) {
        self.set_audio_enabled(enabled).await;
    }

    async fn stop_or_resume_video(&self, enabled: bool) {
        self.set_video_enabled(enabled).await;
    }

    async fn set_colocation(&self, _colocation: Option<String>) {}

    async fn set_event_claim(&self, event_claim: String) {
        tracing::debug!("event claim {} has no effect in mesh mode", event_claim);
    }

    async fn disconnect_all(&self) {
        self.close().await;
    }
}

impl Drop for MeshState {
    fn drop(&mut self) {
        self.cancel_stats_release();
        tracing::debug!("MeshManager state is dropped");
    }
}
