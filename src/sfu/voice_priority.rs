use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tokio::{task::JoinHandle, time::Duration};

use super::device::{DataProduceOptions, SfuDataProducer};

pub const VOICE_PRIORITY_LABEL: &str = "micscore";
pub const VOICE_PRIORITY_PACKET_LIFE_TIME: u16 = 3000;
pub const MIC_SCORE_INTERVAL: Duration = Duration::from_millis(100);

/// Loudness of the local microphone, sampled while colocated participants share a room.
pub trait MicScoreSource: Send + Sync + std::fmt::Debug {
    fn score(&self) -> Option<f64>;
}

pub fn data_produce_options() -> DataProduceOptions {
    DataProduceOptions {
        label: VOICE_PRIORITY_LABEL.to_string(),
        protocol: String::new(),
        ordered: false,
        max_packet_life_time: Some(VOICE_PRIORITY_PACKET_LIFE_TIME),
        app_data: json!({ "source": VOICE_PRIORITY_LABEL }),
    }
}

/// `None` for scores that cannot be sent (`NaN`, infinities).
pub fn encode_score(score: f64) -> Option<Bytes> {
    if !score.is_finite() {
        return None;
    }
    Some(Bytes::from(score.to_string()))
}

/// The voice priority data producer and the task feeding it.
#[derive(Debug, Default)]
pub(crate) struct VoicePriority {
    pub data_producer: Option<Arc<dyn SfuDataProducer>>,
    sampler: Option<JoinHandle<()>>,
    busy: bool,
}

impl VoicePriority {
    /// Claims the right to open the data producer. `false` while one exists or is being opened.
    pub fn try_begin(&mut self) -> bool {
        if self.busy || self.data_producer.is_some() {
            return false;
        }
        self.busy = true;
        true
    }

    pub fn settle(&mut self) {
        self.busy = false;
    }

    pub fn start(&mut self, data_producer: Arc<dyn SfuDataProducer>, source: Arc<dyn MicScoreSource>) {
        self.busy = false;
        self.stop();
        let producer = data_producer.clone();
        self.sampler = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(MIC_SCORE_INTERVAL);
            loop {
                interval.tick().await;
                let Some(payload) = source.score().and_then(encode_score) else {
                    continue;
                };
                if let Err(err) = producer.send(payload) {
                    tracing::debug!("failed to send mic score: {}", err);
                }
            }
        }));
        self.data_producer = Some(data_producer);
        tracing::debug!("voice priority is started");
    }

    /// Closes the data producer locally and returns its id so the server can be told.
    pub fn stop(&mut self) -> Option<String> {
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
        let producer = self.data_producer.take()?;
        producer.close();
        tracing::debug!("voice priority is stopped");
        Some(producer.id())
    }
}

impl Drop for VoicePriority {
    fn drop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
    }
}
