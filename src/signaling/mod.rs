/// Messages relayed between participants in mesh mode.
pub mod mesh;
/// SDP munging applied to outgoing descriptions.
pub mod sdp;
/// Messages exchanged with the SFU and the connection seams used to carry them.
pub mod sfu;
/// Websocket transport for SFU signaling.
pub mod websocket;

pub use mesh::{MeshSignal, MeshSignaling};
pub use sfu::{
    request_as, ConnectParams, SfuConnection, SfuConnector, SfuNotification, SfuRequest,
    SfuSignaling,
};
