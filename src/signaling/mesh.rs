use serde::{Deserialize, Serialize};
use webrtc::{
    ice_transport::ice_candidate::RTCIceCandidateInit,
    peer_connection::sdp::session_description::RTCSessionDescription,
};

use crate::error::Error;

/// Messages relayed between two participants in mesh mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeshSignal {
    SdpOffer {
        sdp: RTCSessionDescription,
    },
    SdpAnswer {
        sdp: RTCSessionDescription,
    },
    IceCandidate {
        candidate: RTCIceCandidateInit,
    },
    IceEndOfCandidates,
    #[serde(rename_all = "camelCase")]
    ReadyToReceiveOffer {
        stream_id: String,
    },
    #[serde(rename_all = "camelCase")]
    StartScreenshare {
        stream_id: String,
        has_audio_track: bool,
    },
    #[serde(rename_all = "camelCase")]
    StopScreenshare {
        stream_id: String,
    },
}

impl MeshSignal {
    pub fn name(&self) -> &'static str {
        match self {
            MeshSignal::SdpOffer { .. } => "SDP_OFFER",
            MeshSignal::SdpAnswer { .. } => "SDP_ANSWER",
            MeshSignal::IceCandidate { .. } => "ICE_CANDIDATE",
            MeshSignal::IceEndOfCandidates => "ICE_END_OF_CANDIDATES",
            MeshSignal::ReadyToReceiveOffer { .. } => "READY_TO_RECEIVE_OFFER",
            MeshSignal::StartScreenshare { .. } => "START_SCREENSHARE",
            MeshSignal::StopScreenshare { .. } => "STOP_SCREENSHARE",
        }
    }
}

/// Outbound relay towards one remote participant.
pub trait MeshSignaling: Send + Sync + std::fmt::Debug {
    fn send(&self, receiver_id: &str, signal: MeshSignal) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ready_to_receive_offer_wire_format() {
        let signal = MeshSignal::ReadyToReceiveOffer {
            stream_id: "0".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&signal).unwrap(),
            json!({"type": "READY_TO_RECEIVE_OFFER", "streamId": "0"})
        );
        assert_eq!(signal.name(), "READY_TO_RECEIVE_OFFER");
    }

    #[test]
    fn parse_offer() {
        let signal: MeshSignal = serde_json::from_value(json!({
            "type": "SDP_OFFER",
            "sdp": {"type": "offer", "sdp": "v=0\r\n"},
        }))
        .unwrap();
        match signal {
            MeshSignal::SdpOffer { sdp } => assert_eq!(sdp.sdp, "v=0\r\n"),
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn parse_end_of_candidates() {
        let signal: MeshSignal =
            serde_json::from_value(json!({"type": "ICE_END_OF_CANDIDATES"})).unwrap();
        assert!(matches!(signal, MeshSignal::IceEndOfCandidates));
    }
}
