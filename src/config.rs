use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use webrtc::{
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, policy::ice_transport_policy::RTCIceTransportPolicy,
    },
};

use crate::error::Error;

/// Feature switches read at construction and negotiation time. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Features {
    /// Fixed mesh bandwidth in kbps, replacing the peer count table.
    #[serde(deserialize_with = "number_or_string")]
    pub bandwidth: Option<u32>,
    pub higher_p2p_bitrate: bool,
    pub adjust_bitrate_to_camera: bool,
    pub prefer_h264: bool,
    pub prefer_vp9: bool,
    pub turn_only: bool,
    #[serde(deserialize_with = "number_or_string")]
    pub jitter_buffer_target_ms: Option<u32>,
    pub simulcast: bool,
}

impl Features {
    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        let features = serde_json::from_value(value)?;
        Ok(features)
    }

    /// Playout delay applied to every inbound track.
    pub fn jitter_buffer_target(&self) -> Option<Duration> {
        self.jitter_buffer_target_ms
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms.into()))
    }

    /// Codec moved to the front of every video section, if any.
    pub fn preferred_video_codec(&self) -> Option<&'static str> {
        if self.prefer_h264 {
            Some("H264")
        } else if self.prefer_vp9 {
            Some("VP9")
        } else {
            None
        }
    }
}

fn number_or_string<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// ICE configuration shared by mesh peer connections and SFU transports.
#[derive(Debug, Clone, Default)]
pub struct WebRTCTransportConfig {
    pub ice_servers: Vec<RTCIceServer>,
    pub ice_transport_policy: RTCIceTransportPolicy,
}

impl WebRTCTransportConfig {
    pub fn new(ice_servers: Vec<RTCIceServer>) -> Self {
        Self {
            ice_servers,
            ice_transport_policy: RTCIceTransportPolicy::All,
        }
    }

    /// Forces relay candidates when `turnOnly` is set.
    pub fn with_features(mut self, features: &Features) -> Self {
        if features.turn_only {
            self.ice_transport_policy = RTCIceTransportPolicy::Relay;
        }
        self
    }

    pub fn is_relay_only(&self) -> bool {
        self.ice_transport_policy == RTCIceTransportPolicy::Relay
    }

    pub fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ice_transport_policy: self.ice_transport_policy,
            ..Default::default()
        }
    }
}

/// Platform behaviour resolved once at startup by the embedding application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformCapabilities {
    /// A disabled camera should be released after a short delay so the device light goes off.
    pub stops_capture_on_disable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_features() {
        let features = Features::from_value(json!({
            "bandwidth": "512",
            "higherP2pBitrate": true,
            "preferH264": true,
            "jitterBufferTargetMs": 120,
            "somethingElse": "ignored",
        }))
        .unwrap();

        assert_eq!(features.bandwidth, Some(512));
        assert!(features.higher_p2p_bitrate);
        assert!(!features.adjust_bitrate_to_camera);
        assert_eq!(features.jitter_buffer_target_ms, Some(120));
        assert_eq!(
            features.jitter_buffer_target(),
            Some(Duration::from_millis(120))
        );
        assert_eq!(Features::default().jitter_buffer_target(), None);
        assert_eq!(features.preferred_video_codec(), Some("H264"));
    }

    #[test]
    fn empty_features() {
        let features = Features::from_value(json!({})).unwrap();
        assert_eq!(features, Features::default());
        assert_eq!(features.preferred_video_codec(), None);
    }

    #[test]
    fn turn_only_forces_relay() {
        let features = Features {
            turn_only: true,
            ..Default::default()
        };
        let config = WebRTCTransportConfig::new(vec![]).with_features(&features);
        assert!(config.is_relay_only());
        assert_eq!(
            config.rtc_configuration().ice_transport_policy,
            RTCIceTransportPolicy::Relay
        );
    }
}
