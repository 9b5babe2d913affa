use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use webrtc::{rtp_transceiver::rtp_codec::RTPCodecType, track::track_remote::TrackRemote};

/// An inbound media track, received either on a mesh peer connection or through an SFU consumer.
pub trait Track: Send + Sync + std::fmt::Debug {
    fn id(&self) -> String;
    fn stream_id(&self) -> String;
    fn kind(&self) -> MediaKind;
    /// Playout delay the receiving side should buffer this track for, if one was requested.
    fn jitter_buffer_target(&self) -> Option<Duration>;
    fn set_jitter_buffer_target(&self, target: Duration);
}

/// Jitter buffer target of one inbound track, in milliseconds. Zero means unset.
#[derive(Debug, Default)]
pub struct JitterBufferTarget(AtomicU32);

impl JitterBufferTarget {
    pub fn get(&self) -> Option<Duration> {
        match self.0.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms.into())),
        }
    }

    pub fn set(&self, target: Duration) {
        let ms = u32::try_from(target.as_millis()).unwrap_or(u32::MAX);
        self.0.store(ms, Ordering::Relaxed);
    }
}

#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl From<RTPCodecType> for MediaKind {
    fn from(value: RTPCodecType) -> Self {
        match value {
            RTPCodecType::Video => MediaKind::Video,
            _ => MediaKind::Audio,
        }
    }
}

impl From<MediaKind> for RTPCodecType {
    fn from(value: MediaKind) -> Self {
        match value {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        }
    }
}

pub(crate) fn detect_mime_type(mime_type: &str) -> MediaKind {
    if mime_type.to_lowercase().starts_with("video/") {
        MediaKind::Video
    } else {
        MediaKind::Audio
    }
}

/// [`Track`] over a [`webrtc::track::track_remote::TrackRemote`] of a mesh peer connection.
#[derive(Debug)]
pub struct RemoteTrack {
    pub track: Arc<TrackRemote>,
    jitter_buffer_target: JitterBufferTarget,
}

impl RemoteTrack {
    pub fn new(track: Arc<TrackRemote>) -> Self {
        Self {
            track,
            jitter_buffer_target: JitterBufferTarget::default(),
        }
    }
}

impl Track for RemoteTrack {
    fn id(&self) -> String {
        self.track.id()
    }

    fn stream_id(&self) -> String {
        self.track.stream_id()
    }

    fn kind(&self) -> MediaKind {
        self.track.kind().into()
    }

    fn jitter_buffer_target(&self) -> Option<Duration> {
        self.jitter_buffer_target.get()
    }

    fn set_jitter_buffer_target(&self, target: Duration) {
        self.jitter_buffer_target.set(target);
    }
}
