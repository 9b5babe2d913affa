use std::sync::Arc;

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    capture::MediaDevices,
    config::{Features, PlatformCapabilities, WebRTCTransportConfig},
    error::{Error, SignalingErrorKind},
    events::{DispatcherEvent, EventSender, ManagerEvent},
    manager::{LifecycleFlag, ManagerContext, ManagerMode, RtcManager},
    mesh::MeshManager,
    sfu::{device::SfuDevice, voice_priority::MicScoreSource, RouterDependencies, RouterManager},
    signaling::{MeshSignaling, SfuConnector},
    transport::PeerConnectionFactory,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SfuServer {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub name: String,
    #[serde(default)]
    pub sfu_server: Option<SfuServer>,
    #[serde(default)]
    pub event_claim: Option<String>,
}

/// Payload of the room joined signaling event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    pub self_id: String,
    pub room: RoomInfo,
    #[serde(default)]
    pub breakout_group: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RoomJoined {
    /// Router mode whenever the room names an SFU.
    pub fn mode(&self) -> ManagerMode {
        match self.room.sfu_server {
            Some(_) => ManagerMode::Router,
            None => ManagerMode::Mesh,
        }
    }
}

/// Room level signaling events the dispatcher reacts to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomJoined(RoomJoined),
    Reconnected(RoomJoined),
    Disconnected,
}

/// Builds managers for the dispatcher.
pub trait ManagerFactory: Send + Sync + std::fmt::Debug {
    fn create_manager(
        &self,
        mode: ManagerMode,
        room: &RoomJoined,
        events: EventSender,
    ) -> Result<Arc<dyn RtcManager>, Error>;
}

/// Factory wiring the real managers to the collaborators of the embedding application.
#[derive(Debug, Clone)]
pub struct DefaultManagerFactory {
    pub features: Features,
    pub transport_config: WebRTCTransportConfig,
    pub capabilities: PlatformCapabilities,
    pub devices: Arc<dyn MediaDevices>,
    pub peer_factory: Arc<dyn PeerConnectionFactory>,
    pub mesh_signaling: Arc<dyn MeshSignaling>,
    pub connector: Arc<dyn SfuConnector>,
    pub device: Arc<dyn SfuDevice>,
    pub mic_scores: Arc<dyn MicScoreSource>,
    pub lifecycle: LifecycleFlag,
}

impl ManagerFactory for DefaultManagerFactory {
    fn create_manager(
        &self,
        mode: ManagerMode,
        room: &RoomJoined,
        events: EventSender,
    ) -> Result<Arc<dyn RtcManager>, Error> {
        let context = ManagerContext {
            self_id: room.self_id.clone(),
            room_name: room.room.name.clone(),
            features: self.features.clone(),
            transport_config: self.transport_config.clone(),
            capabilities: self.capabilities.clone(),
            devices: self.devices.clone(),
            events,
        };

        match mode {
            ManagerMode::Mesh => Ok(Arc::new(MeshManager::new(
                context,
                self.peer_factory.clone(),
                self.mesh_signaling.clone(),
            ))),
            ManagerMode::Router => {
                let Some(server) = room.room.sfu_server.as_ref() else {
                    return Err(Error::new_signaling(
                        format!("room {} has no SFU server", room.room.name),
                        SignalingErrorKind::InvalidMessageError,
                    ));
                };
                Ok(Arc::new(RouterManager::new(
                    context,
                    server.url.clone(),
                    room.room.event_claim.clone(),
                    RouterDependencies {
                        connector: self.connector.clone(),
                        device: self.device.clone(),
                        mic_scores: self.mic_scores.clone(),
                        lifecycle: self.lifecycle.clone(),
                    },
                )))
            }
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
struct ActiveManager {
    manager: Arc<dyn RtcManager>,
    cancel: CancellationToken,
    #[derivative(Debug = "ignore")]
    forwarder: JoinHandle<()>,
}

impl Drop for ActiveManager {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.forwarder.abort();
    }
}

/// Owns the active manager and replaces it when the room changes mode or identity.
#[derive(Debug)]
pub struct ManagerDispatcher {
    factory: Arc<dyn ManagerFactory>,
    events: mpsc::UnboundedSender<DispatcherEvent>,
    current: Mutex<Option<ActiveManager>>,
}

impl ManagerDispatcher {
    pub fn new(
        factory: Arc<dyn ManagerFactory>,
        events: mpsc::UnboundedSender<DispatcherEvent>,
    ) -> Self {
        tracing::debug!("ManagerDispatcher is created");
        Self {
            factory,
            events,
            current: Mutex::new(None),
        }
    }

    pub async fn handle_server_event(&self, event: ServerEvent) -> Result<(), Error> {
        match event {
            ServerEvent::RoomJoined(joined) => self.handle_room_joined(joined).await,
            ServerEvent::Reconnected(joined) => self.handle_reconnect(joined).await,
            ServerEvent::Disconnected => {
                tracing::info!("signaling disconnected, keeping the current manager");
                Ok(())
            }
        }
    }

    pub async fn handle_room_joined(&self, joined: RoomJoined) -> Result<(), Error> {
        if let Some(err) = joined.error.as_ref() {
            tracing::warn!("joining room {} failed: {}", joined.room.name, err);
            return Ok(());
        }
        self.ensure_manager(&joined).await
    }

    pub async fn handle_reconnect(&self, joined: RoomJoined) -> Result<(), Error> {
        tracing::info!("signaling reconnected to room {}", joined.room.name);
        self.handle_room_joined(joined).await
    }

    /// The active manager, for the duration of one operation.
    pub async fn current_manager(&self) -> Option<Arc<dyn RtcManager>> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|active| active.manager.clone())
    }

    /// Tears the active manager down without replacing it.
    pub async fn shutdown(&self) {
        let mut current = self.current.lock().await;
        if let Some(active) = current.take() {
            self.destroy(active).await;
        }
    }

    async fn ensure_manager(&self, joined: &RoomJoined) -> Result<(), Error> {
        let mode = joined.mode();
        let mut current = self.current.lock().await;

        if let Some(active) = current.as_ref() {
            if active
                .manager
                .is_initialized_with(&joined.self_id, &joined.room.name, mode)
            {
                tracing::debug!("keeping {} manager for {}", mode, joined.room.name);
                if let Some(event_claim) = joined.room.event_claim.clone() {
                    active.manager.set_event_claim(event_claim).await;
                }
                return Ok(());
            }
        }

        if let Some(active) = current.take() {
            self.destroy(active).await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let manager = self.factory.create_manager(mode, joined, tx)?;
        let _ = self.events.send(DispatcherEvent::ManagerCreated { mode });
        tracing::info!("{} manager for {} is created", mode, joined.room.name);

        let cancel = CancellationToken::new();
        let forwarder = tokio::spawn(forward_events(rx, self.events.clone(), cancel.clone()));
        *current = Some(ActiveManager {
            manager,
            cancel,
            forwarder,
        });
        Ok(())
    }

    async fn destroy(&self, active: ActiveManager) {
        let mode = active.manager.mode();
        active.cancel.cancel();
        active.manager.disconnect_all().await;
        let _ = self.events.send(DispatcherEvent::ManagerDestroyed { mode });
        tracing::info!("{} manager is destroyed", mode);
    }
}

async fn forward_events(
    mut receiver: mpsc::UnboundedReceiver<ManagerEvent>,
    events: mpsc::UnboundedSender<DispatcherEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = receiver.recv() => {
                let Some(event) = event else {
                    break;
                };
                if events.send(DispatcherEvent::Manager(event)).is_err() {
                    break;
                }
            }
        }
    }
}
