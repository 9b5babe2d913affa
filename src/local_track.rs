use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use webrtc::{
    rtp_transceiver::rtp_codec::RTCRtpCodecCapability,
    track::track_local::{track_local_static_sample::TrackLocalStaticSample, TrackLocal},
};

use crate::track::{detect_mime_type, MediaKind};

/// Capture settings reported by the device that produced a local track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

/// An outbound track captured on this device.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
    pub stream_id: String,
    pub settings: TrackSettings,
    enabled: AtomicBool,
    stopped: AtomicBool,
    #[derivative(Debug = "ignore")]
    track: Arc<dyn TrackLocal + Send + Sync>,
}

impl LocalTrack {
    pub fn new(
        kind: MediaKind,
        settings: TrackSettings,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Arc<Self> {
        let local_track = Self {
            id: track.id().to_string(),
            stream_id: track.stream_id().to_string(),
            kind,
            settings,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            track,
        };

        tracing::debug!(
            "LocalTrack id={} kind={} is created",
            local_track.id,
            local_track.kind
        );

        Arc::new(local_track)
    }

    /// Creates a sample based track for the given codec, e.g. `video/VP8` or `audio/opus`.
    pub fn with_codec(mime_type: &str, stream_id: &str, settings: TrackSettings) -> Arc<Self> {
        let kind = detect_mime_type(mime_type);
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            Uuid::new_v4().to_string(),
            stream_id.to_owned(),
        ));
        Self::new(kind, settings, track)
    }

    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Releases the capture device. A stopped track never restarts.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::Relaxed) {
            tracing::debug!("LocalTrack {} is stopped", self.id);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

impl Drop for LocalTrack {
    fn drop(&mut self) {
        tracing::debug!("LocalTrack {} is dropped", self.id);
    }
}
