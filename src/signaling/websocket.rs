use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, Mutex},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::sfu::{ConnectParams, SfuConnection, SfuConnector, SfuNotification, SfuRequest, SfuSignaling};
use crate::error::{Error, SignalingErrorKind};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, Error>>>>>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundFrame {
    #[serde(default)]
    response: bool,
    #[serde(default)]
    notification: bool,
    id: Option<u64>,
    #[serde(default)]
    ok: bool,
    method: Option<String>,
    #[serde(default)]
    data: Value,
    error_reason: Option<String>,
}

#[derive(Debug)]
pub(crate) enum Frame {
    Response {
        id: u64,
        result: Result<Value, Error>,
    },
    Notification(SfuNotification),
    Ignored,
}

fn split_request(request: &SfuRequest) -> Result<(String, Value), Error> {
    let mut value = serde_json::to_value(request)?;
    let data = value
        .get_mut("data")
        .map(Value::take)
        .unwrap_or_else(|| json!({}));
    Ok((request.method().to_string(), data))
}

pub(crate) fn encode_request(id: u64, request: &SfuRequest) -> Result<String, Error> {
    let (method, data) = split_request(request)?;
    let frame = json!({
        "request": true,
        "id": id,
        "method": method,
        "data": data,
    });
    Ok(frame.to_string())
}

pub(crate) fn encode_notification(request: &SfuRequest) -> Result<String, Error> {
    let (method, data) = split_request(request)?;
    let frame = json!({
        "notification": true,
        "method": method,
        "data": data,
    });
    Ok(frame.to_string())
}

pub(crate) fn decode_frame(text: &str) -> Result<Frame, Error> {
    let frame: InboundFrame = serde_json::from_str(text)?;
    if frame.response {
        let id = frame.id.ok_or_else(|| {
            Error::new_signaling(
                "response without id".to_string(),
                SignalingErrorKind::InvalidMessageError,
            )
        })?;
        let result = if frame.ok {
            Ok(frame.data)
        } else {
            Err(Error::new_signaling(
                frame
                    .error_reason
                    .unwrap_or_else(|| "request failed".to_string()),
                SignalingErrorKind::ServerError,
            ))
        };
        return Ok(Frame::Response { id, result });
    }

    if frame.notification {
        let method = frame.method.unwrap_or_default();
        let notification =
            serde_json::from_value(json!({ "method": method, "data": frame.data }))?;
        return Ok(Frame::Notification(notification));
    }

    Ok(Frame::Ignored)
}

/// [`SfuSignaling`] over one websocket connection.
#[derive(Debug)]
pub struct WebSocketSignaling {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingRequests,
    next_id: AtomicU64,
    request_timeout: Duration,
    closed: CancellationToken,
}

impl WebSocketSignaling {
    fn closed_error() -> Error {
        Error::new_signaling(
            "signaling connection is closed".to_string(),
            SignalingErrorKind::ConnectionClosedError,
        )
    }

    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
        closed: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = closed.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(err) = write.send(msg).await {
                        tracing::error!("failed to send websocket message: {}", err);
                        break;
                    }
                }
            }
        }
        tracing::debug!("websocket sender task terminated");
    }

    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        pending: PendingRequests,
        notifications: mpsc::UnboundedSender<SfuNotification>,
        closed: CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                _ = closed.cancelled() => break,
                msg = read.next() => msg,
            };
            match msg {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!("websocket message: {}", text);
                    match decode_frame(&text) {
                        Ok(Frame::Response { id, result }) => {
                            match pending.lock().await.remove(&id) {
                                Some(reply) => {
                                    let _ = reply.send(result);
                                }
                                None => tracing::warn!("response for unknown request {}", id),
                            }
                        }
                        Ok(Frame::Notification(notification)) => {
                            if notifications.send(notification).is_err() {
                                tracing::debug!("notification receiver is dropped");
                            }
                        }
                        Ok(Frame::Ignored) => {}
                        Err(err) => tracing::warn!("failed to decode websocket message: {}", err),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("websocket connection closed");
                    break;
                }
                Some(Err(err)) => {
                    tracing::error!("websocket error: {}", err);
                    break;
                }
                Some(Ok(_)) => {}
            }
        }

        closed.cancel();
        for (_, reply) in pending.lock().await.drain() {
            let _ = reply.send(Err(Self::closed_error()));
        }
        tracing::debug!("websocket receiver task terminated");
    }
}

#[async_trait]
impl SfuSignaling for WebSocketSignaling {
    async fn request(&self, request: SfuRequest) -> Result<Value, Error> {
        if self.closed.is_cancelled() {
            return Err(Self::closed_error());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = encode_request(id, &request)?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        tracing::trace!("request {} {}", id, request.method());
        if self.outgoing.send(Message::Text(text)).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Self::closed_error());
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Self::closed_error()),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::new_signaling(
                    format!("{} timed out", request.method()),
                    SignalingErrorKind::RequestTimeoutError,
                ))
            }
        }
    }

    fn message(&self, request: SfuRequest) -> Result<(), Error> {
        if self.closed.is_cancelled() {
            return Err(Self::closed_error());
        }
        let text = encode_notification(&request)?;
        tracing::trace!("message {}", request.method());
        self.outgoing
            .send(Message::Text(text))
            .map_err(|_| Self::closed_error())
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

impl Drop for WebSocketSignaling {
    fn drop(&mut self) {
        self.closed.cancel();
        tracing::debug!("WebSocketSignaling is dropped");
    }
}

/// Opens SFU signaling connections over websocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    pub request_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl WebSocketConnector {
    pub(crate) fn connection_url(url: &str, params: &ConnectParams) -> Result<Url, Error> {
        let mut url = Url::parse(url).map_err(|e| {
            Error::new_signaling(
                format!("invalid sfu url {}: {}", url, e),
                SignalingErrorKind::NotConnectedError,
            )
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("roomName", &params.room_name);
            query.append_pair("clientId", &params.client_id);
            if let Some(event_claim) = &params.event_claim {
                query.append_pair("eventClaim", event_claim);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl SfuConnector for WebSocketConnector {
    async fn connect(&self, url: &str, params: &ConnectParams) -> Result<SfuConnection, Error> {
        let url = Self::connection_url(url, params)?;
        tracing::info!("connecting to sfu: {}", url.host_str().unwrap_or_default());

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (write, read) = ws_stream.split();

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (notification_tx, notifications) = mpsc::unbounded_channel();
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        tokio::spawn(WebSocketSignaling::sender_task(
            write,
            outgoing_rx,
            closed.clone(),
        ));
        tokio::spawn(WebSocketSignaling::receiver_task(
            read,
            pending.clone(),
            notification_tx,
            closed.clone(),
        ));

        tracing::info!("sfu signaling connected");

        let signaling = WebSocketSignaling {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: self.request_timeout,
            closed,
        };

        Ok(SfuConnection {
            signaling: Arc::new(signaling),
            notifications,
        })
    }
}
