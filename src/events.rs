use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

use crate::{
    local_track::LocalTrack,
    manager::ManagerMode,
    track::{MediaKind, Track},
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionStatus {
    pub fn from_ice_state(state: RTCIceConnectionState) -> Option<Self> {
        match state {
            RTCIceConnectionState::New | RTCIceConnectionState::Checking => {
                Some(ConnectionStatus::Connecting)
            }
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                Some(ConnectionStatus::Connected)
            }
            RTCIceConnectionState::Disconnected => Some(ConnectionStatus::Disconnected),
            RTCIceConnectionState::Failed => Some(ConnectionStatus::Failed),
            RTCIceConnectionState::Closed => Some(ConnectionStatus::Closed),
            _ => None,
        }
    }

    /// Disconnected and failed transports are candidates for an ICE restart.
    pub fn needs_recovery(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Disconnected | ConnectionStatus::Failed
        )
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamType {
    Webcam,
    Screenshare,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransportDirection {
    Send,
    Receive,
}

/// Notifications emitted by the active manager towards presentation and state layers.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    ConnectionStatusChanged {
        client_id: String,
        status: ConnectionStatus,
    },
    StreamAdded {
        client_id: String,
        stream_id: String,
        stream_type: StreamType,
        tracks: Vec<Arc<dyn Track>>,
    },
    StreamRemoved {
        client_id: String,
        stream_id: String,
    },
    LocalTrackAdded {
        stream_id: String,
        track: Arc<LocalTrack>,
    },
    LocalTrackRemoved {
        stream_id: String,
        track_id: String,
        kind: MediaKind,
    },
    DominantSpeaker {
        client_id: String,
    },
    ScreenshareStarted {
        client_id: String,
        stream_id: String,
        has_audio_track: bool,
    },
    ScreenshareStopped {
        client_id: String,
        stream_id: String,
    },
    TransportStatusChanged {
        direction: TransportDirection,
        status: ConnectionStatus,
    },
    /// ICE restarts are exhausted; the transport stays failed until torn down explicitly.
    TransportFailed {
        direction: TransportDirection,
        transport_id: String,
        attempts: u32,
    },
    /// Mesh counterpart of `TransportFailed` for the peer connection to one participant.
    PeerConnectionFailed {
        client_id: String,
        attempts: u32,
    },
    StatsConnectionReleased,
    CustomStats {
        label: String,
        data: serde_json::Value,
    },
}

pub type EventSender = mpsc::UnboundedSender<ManagerEvent>;

/// What the dispatcher publishes: lifecycle of the active manager plus its forwarded events.
#[derive(Debug, Clone)]
pub enum DispatcherEvent {
    ManagerCreated { mode: ManagerMode },
    ManagerDestroyed { mode: ManagerMode },
    Manager(ManagerEvent),
}

pub(crate) fn emit(events: &EventSender, event: ManagerEvent) {
    if let Err(err) = events.send(event) {
        tracing::warn!("failed to emit manager event: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_state_mapping() {
        assert_eq!(
            ConnectionStatus::from_ice_state(RTCIceConnectionState::Checking),
            Some(ConnectionStatus::Connecting)
        );
        assert_eq!(
            ConnectionStatus::from_ice_state(RTCIceConnectionState::Completed),
            Some(ConnectionStatus::Connected)
        );
        assert_eq!(
            ConnectionStatus::from_ice_state(RTCIceConnectionState::Unspecified),
            None
        );
        assert!(ConnectionStatus::Failed.needs_recovery());
        assert!(!ConnectionStatus::Connecting.needs_recovery());
    }
}
