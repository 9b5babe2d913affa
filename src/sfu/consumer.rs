use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    manager::{RenderedSize, CAMERA_STREAM_ID},
    signaling::sfu::{ConsumerAppData, ConsumerOptions},
    track::{MediaKind, Track},
};

use super::{device::SfuConsumer, layers::Layer};

/// An inbound track from the SFU. It plays only while neither side has paused it.
#[derive(Debug)]
pub(crate) struct ConsumerSlot {
    pub consumer: Arc<dyn SfuConsumer>,
    pub client_id: String,
    pub stream_id: String,
    pub local_paused: bool,
    pub remote_paused: bool,
    pub rendered: Option<RenderedSize>,
    pub applied_layer: Option<Layer>,
}

impl ConsumerSlot {
    /// New consumers start locally paused until their stream is accepted.
    pub fn new(consumer: Arc<dyn SfuConsumer>, options: &ConsumerOptions) -> Self {
        let slot = Self {
            consumer,
            client_id: options.app_data.source_client_id.clone(),
            stream_id: stream_key(&options.app_data),
            local_paused: true,
            remote_paused: options.producer_paused,
            rendered: None,
            applied_layer: None,
        };
        slot.apply_playback();
        slot
    }

    pub fn id(&self) -> String {
        self.consumer.id()
    }

    pub fn kind(&self) -> MediaKind {
        self.consumer.kind()
    }

    pub fn track(&self) -> Arc<dyn Track> {
        self.consumer.track()
    }

    pub fn is_playing(&self) -> bool {
        !self.local_paused && !self.remote_paused
    }

    /// Returns `true` when the flag changed.
    pub fn set_local_paused(&mut self, paused: bool) -> bool {
        if self.local_paused == paused {
            return false;
        }
        self.local_paused = paused;
        self.apply_playback();
        true
    }

    pub fn set_remote_paused(&mut self, paused: bool) -> bool {
        if self.remote_paused == paused {
            return false;
        }
        self.remote_paused = paused;
        self.apply_playback();
        true
    }

    fn apply_playback(&self) {
        if self.is_playing() {
            self.consumer.resume();
        } else {
            self.consumer.pause();
        }
    }
}

/// Stream a consumer belongs to: the camera stream or the screen share it was announced with.
pub(crate) fn stream_key(app_data: &ConsumerAppData) -> String {
    let screen_share = app_data.screen_share
        || app_data
            .source
            .is_some_and(|source| source.is_screen_share());
    if screen_share {
        app_data.stream_id.clone()
    } else {
        CAMERA_STREAM_ID.to_string()
    }
}

#[derive(Debug, Default)]
pub(crate) struct RemoteStream {
    pub consumer_ids: Vec<String>,
    /// `StreamAdded` was emitted and no `StreamRemoved` since.
    pub announced: bool,
}

/// Streams of one remote participant and which of them the local side accepted.
#[derive(Debug, Default)]
pub(crate) struct RemoteClient {
    pub accepted: HashSet<String>,
    pub streams: HashMap<String, RemoteStream>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamChange {
    Unchanged,
    /// The last consumer left; the stream is gone and a later consumer starts a new one.
    Emptied { was_announced: bool },
}

impl RemoteClient {
    pub fn is_accepted(&self, stream_id: &str) -> bool {
        self.accepted.contains(stream_id)
    }

    pub fn add_consumer(&mut self, stream_id: &str, consumer_id: &str) -> &mut RemoteStream {
        let stream = self.streams.entry(stream_id.to_owned()).or_default();
        if !stream.consumer_ids.iter().any(|id| id == consumer_id) {
            stream.consumer_ids.push(consumer_id.to_owned());
        }
        stream
    }

    pub fn remove_consumer(&mut self, stream_id: &str, consumer_id: &str) -> StreamChange {
        let Some(stream) = self.streams.get_mut(stream_id) else {
            return StreamChange::Unchanged;
        };
        stream.consumer_ids.retain(|id| id != consumer_id);
        if !stream.consumer_ids.is_empty() {
            return StreamChange::Unchanged;
        }
        let was_announced = stream.announced;
        self.streams.remove(stream_id);
        StreamChange::Emptied { was_announced }
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.streams.is_empty()
    }
}
