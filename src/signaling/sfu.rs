use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumIter};
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::{error::Error, track::MediaKind};

/// Local media source behind a producer. At most one producer exists per source.
#[derive(
    Debug, Display, EnumIter, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProducerSource {
    Mic,
    Webcam,
    ScreenVideo,
    ScreenAudio,
}

impl ProducerSource {
    pub fn kind(&self) -> MediaKind {
        match self {
            ProducerSource::Mic | ProducerSource::ScreenAudio => MediaKind::Audio,
            ProducerSource::Webcam | ProducerSource::ScreenVideo => MediaKind::Video,
        }
    }

    pub fn is_screen_share(&self) -> bool {
        matches!(self, ProducerSource::ScreenVideo | ProducerSource::ScreenAudio)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerAppData {
    pub source: ProducerSource,
    pub stream_id: String,
    pub source_client_id: String,
    pub screen_share: bool,
    pub paused: bool,
    #[serde(default)]
    pub local_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerAppData {
    pub source_client_id: String,
    pub stream_id: String,
    #[serde(default)]
    pub screen_share: bool,
    pub source: Option<ProducerSource>,
}

/// Transport parameters returned by `createTransport`, completed locally with ICE settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
    #[serde(default)]
    pub sctp_parameters: Option<Value>,
    #[serde(default)]
    pub ice_servers: Vec<RTCIceServer>,
    #[serde(default)]
    pub relay_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerOptions {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    #[serde(default)]
    pub producer_paused: bool,
    pub app_data: ConsumerAppData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataConsumerOptions {
    pub id: String,
    pub data_producer_id: String,
    pub sctp_stream_parameters: Value,
    pub label: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub app_data: Value,
}

/// Requests and one-way messages sent to the SFU.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum SfuRequest {
    GetCapabilities,
    #[serde(rename_all = "camelCase")]
    SetCapabilities {
        rtp_capabilities: Value,
    },
    #[serde(rename_all = "camelCase")]
    CreateTransport {
        producing: bool,
        consuming: bool,
    },
    #[serde(rename_all = "camelCase")]
    ConnectTransport {
        transport_id: String,
        dtls_parameters: Value,
    },
    #[serde(rename_all = "camelCase")]
    Produce {
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
        paused: bool,
        app_data: ProducerAppData,
    },
    #[serde(rename_all = "camelCase")]
    ProduceData {
        transport_id: String,
        sctp_stream_parameters: Value,
        label: String,
        protocol: String,
        app_data: Value,
    },
    #[serde(rename_all = "camelCase")]
    RestartIce {
        transport_id: String,
    },
    #[serde(rename_all = "camelCase")]
    PauseProducers {
        producer_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    ResumeProducers {
        producer_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    PauseConsumers {
        consumer_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    ResumeConsumers {
        consumer_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    SetConsumersPreferredLayers {
        consumer_ids: Vec<String>,
        spatial_layer: u8,
        temporal_layer: u8,
    },
    SetColocation {
        colocation: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CloseProducers {
        producer_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    CloseDataProducers {
        data_producer_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    EventClaim {
        event_claim: String,
    },
}

impl SfuRequest {
    pub fn method(&self) -> &'static str {
        match self {
            SfuRequest::GetCapabilities => "getCapabilities",
            SfuRequest::SetCapabilities { .. } => "setCapabilities",
            SfuRequest::CreateTransport { .. } => "createTransport",
            SfuRequest::ConnectTransport { .. } => "connectTransport",
            SfuRequest::Produce { .. } => "produce",
            SfuRequest::ProduceData { .. } => "produceData",
            SfuRequest::RestartIce { .. } => "restartIce",
            SfuRequest::PauseProducers { .. } => "pauseProducers",
            SfuRequest::ResumeProducers { .. } => "resumeProducers",
            SfuRequest::PauseConsumers { .. } => "pauseConsumers",
            SfuRequest::ResumeConsumers { .. } => "resumeConsumers",
            SfuRequest::SetConsumersPreferredLayers { .. } => "setConsumersPreferredLayers",
            SfuRequest::SetColocation { .. } => "setColocation",
            SfuRequest::CloseProducers { .. } => "closeProducers",
            SfuRequest::CloseDataProducers { .. } => "closeDataProducers",
            SfuRequest::EventClaim { .. } => "eventClaim",
        }
    }
}

/// Pushes from the SFU.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum SfuNotification {
    ConsumerReady(ConsumerOptions),
    #[serde(rename_all = "camelCase")]
    ConsumerClosed {
        consumer_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ConsumerPaused {
        consumer_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ConsumerResumed {
        consumer_id: String,
    },
    DataConsumerReady(DataConsumerOptions),
    #[serde(rename_all = "camelCase")]
    DataConsumerClosed {
        data_consumer_id: String,
    },
    /// The audio consumer of whoever is speaking the loudest.
    #[serde(rename_all = "camelCase")]
    DominantSpeaker {
        consumer_id: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResponse {
    pub router_rtp_capabilities: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProduceResponse {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartIceResponse {
    pub ice_parameters: Value,
}

#[async_trait]
pub trait SfuSignaling: Send + Sync + std::fmt::Debug {
    /// Sends a request and waits for its response payload.
    async fn request(&self, request: SfuRequest) -> Result<Value, Error>;
    /// Sends a message without waiting for a response.
    fn message(&self, request: SfuRequest) -> Result<(), Error>;
    fn close(&self);
}

pub async fn request_as<T: DeserializeOwned>(
    signaling: &dyn SfuSignaling,
    request: SfuRequest,
) -> Result<T, Error> {
    let value = signaling.request(request).await?;
    let response = serde_json::from_value(value)?;
    Ok(response)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub room_name: String,
    pub client_id: String,
    pub event_claim: Option<String>,
}

/// An open SFU signaling connection. The notification stream ends when the server closes it.
#[derive(Debug)]
pub struct SfuConnection {
    pub signaling: Arc<dyn SfuSignaling>,
    pub notifications: mpsc::UnboundedReceiver<SfuNotification>,
}

#[async_trait]
pub trait SfuConnector: Send + Sync + std::fmt::Debug {
    async fn connect(&self, url: &str, params: &ConnectParams) -> Result<SfuConnection, Error>;
}
