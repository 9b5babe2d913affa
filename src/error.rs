use strum_macros::Display;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("transport error: {0}")]
    TransportError(TransportErrorKind),
    #[error("negotiation error: {0}")]
    NegotiationError(NegotiationErrorKind),
    #[error("signaling error: {0}")]
    SignalingError(SignalingErrorKind),
    #[error("webrtc error")]
    WebRTCError(#[source] webrtc::Error),
    #[error("sdp error")]
    SdpError(#[source] webrtc::sdp::Error),
    #[error("json error")]
    JsonError(#[source] serde_json::Error),
    #[error("websocket error")]
    WebSocketError(#[source] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    TransportNotFoundError,
    TransportClosedError,
    SignalingStateInvalidError,
    LocalDescriptionError,
    PeerConnectionError,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationErrorKind {
    OfferError,
    AnswerError,
    RemoteDescriptionError,
    UnexpectedAnswerError,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum SignalingErrorKind {
    NotConnectedError,
    RequestTimeoutError,
    ServerError,
    ConnectionClosedError,
    InvalidMessageError,
}

/// Server errors that a retry can never fix.
const NON_RETRYABLE_SERVER_ERRORS: [&str; 2] = ["missing transportId", "no such transport"];

impl Error {
    pub fn new_transport(message: String, kind: TransportErrorKind) -> Self {
        Self {
            kind: ErrorKind::TransportError(kind),
            message,
        }
    }

    pub fn new_negotiation(message: String, kind: NegotiationErrorKind) -> Self {
        Self {
            kind: ErrorKind::NegotiationError(kind),
            message,
        }
    }

    pub fn new_signaling(message: String, kind: SignalingErrorKind) -> Self {
        Self {
            kind: ErrorKind::SignalingError(kind),
            message,
        }
    }

    /// Whether a failed request is worth repeating. Only server errors that name a missing
    /// transport are final.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::SignalingError(SignalingErrorKind::ServerError) => !NON_RETRYABLE_SERVER_ERRORS
                .iter()
                .any(|reason| self.message.contains(reason)),
            _ => true,
        }
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Self {
            message: e.to_string(),
            kind: ErrorKind::WebRTCError(e),
        }
    }
}

impl From<webrtc::sdp::Error> for Error {
    fn from(e: webrtc::sdp::Error) -> Self {
        Self {
            message: e.to_string(),
            kind: ErrorKind::SdpError(e),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self {
            message: e.to_string(),
            kind: ErrorKind::JsonError(e),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self {
            message: e.to_string(),
            kind: ErrorKind::WebSocketError(e),
        }
    }
}
