use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::Error,
    events::ConnectionStatus,
    local_track::LocalTrack,
    signaling::sfu::{ConsumerOptions, DataConsumerOptions, ProducerAppData, TransportOptions},
    track::{MediaKind, Track},
};

/// Client side of the SFU media stack: loads the router capabilities and creates transports.
#[async_trait]
pub trait SfuDevice: Send + Sync + std::fmt::Debug {
    fn loaded(&self) -> bool;
    async fn load(&self, router_rtp_capabilities: Value) -> Result<(), Error>;
    fn rtp_capabilities(&self) -> Value;
    async fn create_send_transport(
        &self,
        options: TransportOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn SfuTransport>, Error>;
    async fn create_recv_transport(
        &self,
        options: TransportOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn SfuTransport>, Error>;
}

#[async_trait]
pub trait SfuTransport: Send + Sync + std::fmt::Debug {
    fn id(&self) -> String;
    fn closed(&self) -> bool;
    async fn restart_ice(&self, ice_parameters: Value) -> Result<(), Error>;
    async fn produce(&self, options: ProduceOptions) -> Result<Arc<dyn SfuProducer>, Error>;
    async fn produce_data(
        &self,
        options: DataProduceOptions,
    ) -> Result<Arc<dyn SfuDataProducer>, Error>;
    async fn consume(&self, options: ConsumerOptions) -> Result<Arc<dyn SfuConsumer>, Error>;
    async fn consume_data(
        &self,
        options: DataConsumerOptions,
    ) -> Result<Arc<dyn SfuDataConsumer>, Error>;
    fn close(&self);
}

#[async_trait]
pub trait SfuProducer: Send + Sync + std::fmt::Debug {
    fn id(&self) -> String;
    fn track_id(&self) -> Option<String>;
    fn paused(&self) -> bool;
    fn closed(&self) -> bool;
    fn pause(&self);
    fn resume(&self);
    async fn replace_track(&self, track: Arc<LocalTrack>) -> Result<(), Error>;
    fn close(&self);
}

pub trait SfuConsumer: Send + Sync + std::fmt::Debug {
    fn id(&self) -> String;
    fn kind(&self) -> MediaKind;
    fn track(&self) -> Arc<dyn Track>;
    fn paused(&self) -> bool;
    fn pause(&self);
    fn resume(&self);
    fn close(&self);
}

pub trait SfuDataProducer: Send + Sync + std::fmt::Debug {
    fn id(&self) -> String;
    fn send(&self, payload: Bytes) -> Result<(), Error>;
    fn close(&self);
}

pub trait SfuDataConsumer: Send + Sync + std::fmt::Debug {
    fn id(&self) -> String;
    fn label(&self) -> String;
    fn close(&self);
}

#[derive(Debug, Clone)]
pub struct ProduceOptions {
    pub track: Arc<LocalTrack>,
    pub paused: bool,
    pub simulcast: bool,
    /// Codec placed first in the producer's codec list, e.g. `H264`.
    pub preferred_codec: Option<String>,
    pub app_data: ProducerAppData,
}

#[derive(Debug, Clone)]
pub struct DataProduceOptions {
    pub label: String,
    pub protocol: String,
    pub ordered: bool,
    pub max_packet_life_time: Option<u16>,
    pub app_data: Value,
}

/// Callbacks of a device transport. The ones carrying a `reply` need a server round trip
/// before the transport can continue.
#[derive(Debug)]
pub enum TransportEvent {
    Connect {
        dtls_parameters: Value,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Produce {
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: ProducerAppData,
        reply: oneshot::Sender<Result<String, Error>>,
    },
    ProduceData {
        sctp_stream_parameters: Value,
        label: String,
        protocol: String,
        app_data: Value,
        reply: oneshot::Sender<Result<String, Error>>,
    },
    ConnectionStateChange(ConnectionStatus),
    DataMessage {
        data_consumer_id: String,
        payload: Bytes,
    },
}
