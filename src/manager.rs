use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::{
    capture::MediaDevices,
    config::{Features, PlatformCapabilities, WebRTCTransportConfig},
    events::EventSender,
    local_track::LocalTrack,
};

/// Stream id of the camera and microphone stream. Any other id is a screen share.
pub const CAMERA_STREAM_ID: &str = "0";

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ManagerMode {
    Mesh,
    Router,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptStream {
    pub stream_id: String,
    pub participant_id: String,
    pub should_add_local_video: bool,
}

/// Rendered tile size of a remote video, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedSize {
    pub width: u32,
    pub height: u32,
}

impl RenderedSize {
    pub fn largest_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// Set while the application is unloading: closing producers must not talk to the server
/// and nothing reconnects.
#[derive(Debug, Clone, Default)]
pub struct LifecycleFlag(Arc<AtomicBool>);

impl LifecycleFlag {
    pub fn set_unloading(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_unloading(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything a manager needs from the embedding application.
#[derive(Debug, Clone)]
pub struct ManagerContext {
    pub self_id: String,
    pub room_name: String,
    pub features: Features,
    pub transport_config: WebRTCTransportConfig,
    pub capabilities: PlatformCapabilities,
    pub devices: Arc<dyn MediaDevices>,
    pub events: EventSender,
}

/// Commands accepted by both the mesh and the router manager. Failures are handled inside the
/// manager; nothing here returns an error to the caller.
#[async_trait]
pub trait RtcManager: Send + Sync + std::fmt::Debug {
    fn mode(&self) -> ManagerMode;

    fn is_initialized_with(&self, self_id: &str, room_name: &str, mode: ManagerMode) -> bool;

    async fn accept_new_stream(&self, request: AcceptStream);

    async fn disconnect(&self, participant_id: &str, stream_id: &str);

    async fn add_new_stream(
        &self,
        stream_id: &str,
        tracks: Vec<Arc<LocalTrack>>,
        audio_paused: bool,
        video_paused: bool,
    );

    async fn remove_stream(&self, stream_id: &str);

    async fn replace_track(&self, old_track_id: &str, track: Arc<LocalTrack>);

    async fn update_stream_resolution(
        &self,
        participant_id: &str,
        stream_id: &str,
        size: RenderedSize,
    );

    async fn stop_or_resume_audio(&self, enabled: bool);

    async fn stop_or_resume_video(&self, enabled: bool);

    async fn set_colocation(&self, colocation: Option<String>);

    async fn set_event_claim(&self, event_claim: String);

    async fn disconnect_all(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_flag_is_shared() {
        let flag = LifecycleFlag::default();
        let copied = flag.clone();
        assert!(!copied.is_unloading());
        flag.set_unloading();
        assert!(copied.is_unloading());
    }

    #[test]
    fn accept_stream_wire_format() {
        let request = AcceptStream {
            stream_id: CAMERA_STREAM_ID.to_string(),
            participant_id: "p1".to_string(),
            should_add_local_video: true,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"streamId": "0", "participantId": "p1", "shouldAddLocalVideo": true})
        );
    }
}
