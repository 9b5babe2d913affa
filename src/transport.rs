use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tokio::{
    sync::mpsc,
    time::{Duration, Instant},
};
use webrtc::{
    ice_transport::{
        ice_candidate::RTCIceCandidateInit, ice_connection_state::RTCIceConnectionState,
    },
    peer_connection::{
        sdp::session_description::RTCSessionDescription, signaling_state::RTCSignalingState,
    },
};

use crate::{config::WebRTCTransportConfig, error::Error, local_track::LocalTrack, track::Track};

/// Operations the mesh manager needs from one peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync + std::fmt::Debug {
    async fn create_offer(&self, ice_restart: bool) -> Result<RTCSessionDescription, Error>;
    async fn create_answer(&self) -> Result<RTCSessionDescription, Error>;
    async fn set_local_description(&self, description: RTCSessionDescription)
        -> Result<(), Error>;
    async fn set_remote_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), Error>;
    async fn has_local_description(&self) -> bool;
    async fn has_remote_description(&self) -> bool;
    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), Error>;
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), Error>;
    async fn remove_track(&self, track_id: &str) -> Result<(), Error>;
    async fn replace_track(&self, old_track_id: &str, track: Arc<LocalTrack>)
        -> Result<(), Error>;
    fn signaling_state(&self) -> RTCSignalingState;
    async fn close(&self) -> Result<(), Error>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync + std::fmt::Debug {
    async fn create_peer_connection(
        &self,
        client_id: &str,
        config: &WebRTCTransportConfig,
        events: mpsc::UnboundedSender<PeerConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnection>, Error>;
}

/// Callbacks of a peer connection, delivered as events.
#[derive(Debug)]
pub enum PeerConnectionEvent {
    /// `None` marks the end of gathering.
    IceCandidate {
        candidate: Option<RTCIceCandidateInit>,
        is_relay: bool,
    },
    IceConnectionStateChange(RTCIceConnectionState),
    NegotiationNeeded,
    Track(Arc<dyn Track>),
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

/// Serializes offer/answer rounds on one session. A renegotiation requested while an offer is
/// outstanding is remembered and run once the answer is applied.
#[derive(Debug, Default)]
pub struct NegotiationQueue {
    in_flight: bool,
    queued: bool,
    queued_ice_restart: bool,
}

impl NegotiationQueue {
    /// Returns `true` when the caller owns the next round.
    pub fn try_begin(&mut self, ice_restart: bool) -> bool {
        if self.in_flight {
            self.queued = true;
            self.queued_ice_restart |= ice_restart;
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Completes the outstanding round. Returns the ICE restart flag of a queued round, if any.
    pub fn finish(&mut self) -> Option<bool> {
        self.in_flight = false;
        if self.queued {
            self.queued = false;
            Some(std::mem::take(&mut self.queued_ice_restart))
        } else {
            None
        }
    }

    /// Drops the outstanding round after a failure. Queued work waits for the next trigger.
    pub fn abandon(&mut self) {
        self.in_flight = false;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}

/// Minimum time between two ICE restarts of one transport session.
pub const ICE_RESTART_MIN_INTERVAL: Duration = Duration::from_millis(3500);
/// ICE restarts attempted before a transport session is reported as failed.
pub const MAX_ICE_RESTART_ATTEMPTS: u32 = 5;
const RECOVERY_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const MAX_RECOVERY_CHECK_FACTOR: u32 = 8;

/// Wait before re-checking a transport session after a restart went out.
pub fn recovery_check_delay(retry: u32) -> Duration {
    RECOVERY_CHECK_INTERVAL * (retry + 1).min(MAX_RECOVERY_CHECK_FACTOR)
}

/// ICE restart bookkeeping of one transport session.
#[derive(Debug, Default)]
pub struct IceRestartState {
    pub last_attempt: Option<Instant>,
    pub attempts: u32,
    pub in_flight: bool,
}

impl IceRestartState {
    pub fn since_last_attempt(&self) -> Option<Duration> {
        self.last_attempt.map(|last| last.elapsed())
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= MAX_ICE_RESTART_ATTEMPTS
    }

    pub fn record_attempt(&mut self) {
        self.last_attempt = Some(Instant::now());
        self.attempts += 1;
    }

    pub fn begin(&mut self) {
        self.record_attempt();
        self.in_flight = true;
    }

    pub fn settle(&mut self) {
        self.in_flight = false;
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.in_flight = false;
    }
}
