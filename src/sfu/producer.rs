use std::sync::Arc;

use crate::{
    error::Error,
    local_track::LocalTrack,
    signaling::sfu::{ProducerAppData, ProducerSource},
};

use super::device::SfuProducer;

/// What the application wants a source to send right now.
#[derive(Debug, Clone)]
pub(crate) struct ProducerIntent {
    pub track: Arc<LocalTrack>,
    pub paused: bool,
    pub stream_id: String,
}

impl ProducerIntent {
    pub fn app_data(&self, source: ProducerSource, self_id: &str) -> ProducerAppData {
        ProducerAppData {
            source,
            stream_id: self.stream_id.clone(),
            source_client_id: self_id.to_owned(),
            screen_share: source.is_screen_share(),
            paused: self.paused,
            local_closed: false,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ProducerAction {
    Idle,
    Create(ProducerIntent),
    ReplaceTrack {
        producer: Arc<dyn SfuProducer>,
        track: Arc<LocalTrack>,
    },
    SetPaused {
        producer: Arc<dyn SfuProducer>,
        paused: bool,
    },
    Close(Arc<dyn SfuProducer>),
}

/// The producer of one local source. Only one device operation runs at a time; whatever the
/// application asks for meanwhile is kept in `desired` and applied once it settles.
#[derive(Debug)]
pub(crate) struct ProducerSlot {
    pub source: ProducerSource,
    pub producer: Option<Arc<dyn SfuProducer>>,
    pub desired: Option<ProducerIntent>,
    busy: bool,
    /// Track of the create or replace in flight.
    attempted: Option<String>,
    /// Track whose last create or replace failed. Not retried until the intent moves on.
    failed: Option<String>,
}

impl ProducerSlot {
    pub fn new(source: ProducerSource) -> Self {
        Self {
            source,
            producer: None,
            desired: None,
            busy: false,
            attempted: None,
            failed: None,
        }
    }

    fn begin(&mut self, track_id: &str) -> bool {
        if self.failed.as_deref() == Some(track_id) {
            return false;
        }
        self.failed = None;
        self.attempted = Some(track_id.to_owned());
        self.busy = true;
        true
    }

    /// Next step towards `desired`. Creating or replacing marks the slot busy until settled.
    pub fn next_action(&mut self, send_transport_ready: bool) -> ProducerAction {
        if self.busy {
            return ProducerAction::Idle;
        }

        if self.producer.as_ref().is_some_and(|p| p.closed()) {
            tracing::debug!("{} producer was closed underneath", self.source);
            self.producer = None;
        }

        let Some(intent) = self.desired.clone() else {
            return match self.producer.take() {
                Some(producer) => ProducerAction::Close(producer),
                None => ProducerAction::Idle,
            };
        };

        let Some(producer) = self.producer.clone() else {
            if !send_transport_ready {
                tracing::debug!("{} producer waits for the send transport", self.source);
                return ProducerAction::Idle;
            }
            if !self.begin(&intent.track.id) {
                return ProducerAction::Idle;
            }
            return ProducerAction::Create(intent);
        };

        if producer.track_id().as_deref() != Some(intent.track.id.as_str()) {
            if !self.begin(&intent.track.id) {
                return ProducerAction::Idle;
            }
            ProducerAction::ReplaceTrack {
                producer,
                track: intent.track,
            }
        } else if producer.paused() != intent.paused {
            ProducerAction::SetPaused {
                producer,
                paused: intent.paused,
            }
        } else {
            ProducerAction::Idle
        }
    }

    /// Returns `true` when the producer was created.
    pub fn settle_create(&mut self, result: Result<Arc<dyn SfuProducer>, Error>) -> bool {
        match result {
            Ok(producer) => {
                tracing::debug!("{} producer {} is created", self.source, producer.id());
                self.producer = Some(producer);
                self.settle();
                true
            }
            Err(err) => {
                tracing::error!("failed to create {} producer: {}", self.source, err);
                self.fail();
                false
            }
        }
    }

    pub fn settle(&mut self) {
        self.busy = false;
        self.attempted = None;
    }

    /// Settles a failed create or replace. The same track is not tried again.
    pub fn fail(&mut self) {
        self.busy = false;
        self.failed = self.attempted.take();
    }

    /// Forgets the producer after its transport went away. Nothing is sent to the server.
    pub fn detach(&mut self) {
        self.settle();
        self.failed = None;
        if let Some(producer) = self.producer.take() {
            producer.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{local_track::TrackSettings, testing::FakeProducer};

    fn intent(paused: bool) -> ProducerIntent {
        ProducerIntent {
            track: LocalTrack::with_codec("audio/opus", "0", TrackSettings::default()),
            paused,
            stream_id: "0".to_string(),
        }
    }

    #[test]
    fn waits_for_send_transport() {
        let mut slot = ProducerSlot::new(ProducerSource::Mic);
        slot.desired = Some(intent(false));
        assert!(matches!(slot.next_action(false), ProducerAction::Idle));
        assert!(matches!(slot.next_action(true), ProducerAction::Create(_)));
        assert!(matches!(slot.next_action(true), ProducerAction::Idle));
    }

    #[test]
    fn failed_track_waits_for_new_intent() {
        let mut slot = ProducerSlot::new(ProducerSource::Mic);
        slot.desired = Some(intent(false));
        assert!(matches!(slot.next_action(true), ProducerAction::Create(_)));
        let created = slot.settle_create(Err(Error::new_signaling(
            "producer rejected".to_string(),
            crate::error::SignalingErrorKind::ServerError,
        )));
        assert!(!created);
        assert!(matches!(slot.next_action(true), ProducerAction::Idle));

        slot.desired = Some(intent(false));
        assert!(matches!(slot.next_action(true), ProducerAction::Create(_)));
        slot.fail();
        slot.detach();
        assert!(matches!(slot.next_action(true), ProducerAction::Create(_)));
    }

    #[tokio::test]
    async fn latest_intent_wins_after_creation() {
        let mut slot = ProducerSlot::new(ProducerSource::Mic);
        let first = intent(false);
        slot.desired = Some(first.clone());
        let ProducerAction::Create(applied) = slot.next_action(true) else {
            panic!("expected create");
        };

        let second = intent(true);
        slot.desired = Some(second.clone());
        slot.settle_create(Ok(FakeProducer::new("p1", &applied.track.id, false)));

        let ProducerAction::ReplaceTrack { producer, track } = slot.next_action(true) else {
            panic!("expected replace");
        };
        assert_eq!(track.id, second.track.id);
        producer.replace_track(track).await.unwrap();
        slot.settle();

        assert!(matches!(
            slot.next_action(true),
            ProducerAction::SetPaused { paused: true, .. }
        ));
        producer.pause();
        assert!(matches!(slot.next_action(true), ProducerAction::Idle));
        assert_eq!(first.stream_id, second.stream_id);
    }

    #[test]
    fn pause_follows_intent() {
        let mut slot = ProducerSlot::new(ProducerSource::Webcam);
        let current = intent(false);
        slot.producer = Some(FakeProducer::new("p1", &current.track.id, false));
        slot.desired = Some(ProducerIntent {
            paused: true,
            ..current
        });
        assert!(matches!(
            slot.next_action(true),
            ProducerAction::SetPaused { paused: true, .. }
        ));
    }

    #[test]
    fn dropped_intent_closes_producer() {
        let mut slot = ProducerSlot::new(ProducerSource::ScreenVideo);
        slot.producer = Some(FakeProducer::new("p1", "t1", false));
        assert!(matches!(slot.next_action(true), ProducerAction::Close(_)));
        assert!(slot.producer.is_none());
        assert!(matches!(slot.next_action(true), ProducerAction::Idle));
    }

    #[test]
    fn app_data_marks_screen_share() {
        let data = intent(true).app_data(ProducerSource::ScreenAudio, "me");
        assert!(data.screen_share);
        assert!(data.paused);
        assert_eq!(data.source_client_id, "me");
    }
}
