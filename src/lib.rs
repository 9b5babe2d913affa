#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Meetlink
//! Meetlink is the real-time media layer of a video conferencing client. It connects the local participant to the other participants of a room either peer to peer (mesh) or through a selective forwarding unit (router), and switches between the two when the room changes.
//! Signaling is not part of this crate: plug your own channels in through [`signaling::MeshSignaling`] and [`signaling::SfuConnector`], or use the websocket connector in [`signaling::websocket`].
//!
//! ## Usage
//! Build a [`dispatcher::DefaultManagerFactory`], hand it to a [`dispatcher::ManagerDispatcher`] and feed the dispatcher with room events. Stream acceptance is driven by [`reconciler::Reconciler`].

/// Local camera and microphone capture for mute and unmute.
pub mod capture;
/// Configuration for [`mesh::MeshManager`] and [`sfu::RouterManager`].
pub mod config;
/// Dispatcher is a module that picks and replaces the active manager.
pub mod dispatcher;
pub mod error;
/// Events emitted by the managers and the dispatcher.
pub mod events;
/// Track related methods for a local track.
pub mod local_track;
/// Common interface of both managers.
pub mod manager;
/// Peer to peer connections with every remote participant.
pub mod mesh;
/// [`webrtc::peer_connection::RTCPeerConnection`] backed transport.
pub mod peer_connection;
/// Reconciler is a module that decides which remote streams should be flowing.
pub mod reconciler;
/// Connection to a selective forwarding unit.
pub mod sfu;
pub mod signaling;
pub mod track;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
