use crate::{config::Features, local_track::TrackSettings};

/// Video bandwidth in kbps keyed by the number of connected peers, 1 to 7. Zero is uncapped.
pub const BANDWIDTH_TABLE: [u32; 7] = [0, 384, 256, 192, 128, 128, 64];

const BITS_PER_PIXEL: f64 = 0.05;
const MIN_CAMERA_BITRATE: u32 = 64;
const MAX_CAMERA_BITRATE: u32 = 2500;
const HIGHER_P2P_FACTOR: f64 = 1.5;

pub fn table_bandwidth(peers: usize) -> u32 {
    if peers == 0 {
        return 0;
    }
    BANDWIDTH_TABLE[peers.min(BANDWIDTH_TABLE.len()) - 1]
}

/// Bitrate in kbps a camera with these settings needs for reasonable quality.
pub fn estimate_bitrate(settings: &TrackSettings) -> Option<u32> {
    if settings.width == 0 || settings.height == 0 || settings.frame_rate <= 0.0 {
        return None;
    }
    let pixels_per_second = settings.width as f64 * settings.height as f64 * settings.frame_rate;
    let kbps = (pixels_per_second * BITS_PER_PIXEL / 1000.0).round() as u32;
    Some(kbps.clamp(MIN_CAMERA_BITRATE, MAX_CAMERA_BITRATE))
}

/// Bandwidth every session gets when `peers` sessions are open.
pub fn compute_bandwidth(peers: usize, features: &Features, camera: Option<&TrackSettings>) -> u32 {
    let mut bandwidth = features.bandwidth.unwrap_or_else(|| table_bandwidth(peers));

    if features.adjust_bitrate_to_camera {
        if let Some(estimate) = camera.and_then(estimate_bitrate) {
            bandwidth = if bandwidth == 0 {
                estimate
            } else {
                bandwidth.min(estimate)
            };
        }
    }

    if features.higher_p2p_bitrate {
        bandwidth = (bandwidth as f64 * HIGHER_P2P_FACTOR).round() as u32;
    }

    bandwidth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_table_for_every_peer_count() {
        let features = Features::default();
        for peers in 1..=7 {
            assert_eq!(
                compute_bandwidth(peers, &features, None),
                BANDWIDTH_TABLE[peers - 1]
            );
        }
        assert_eq!(compute_bandwidth(8, &features, None), 64);
        assert_eq!(compute_bandwidth(30, &features, None), 64);
        assert_eq!(compute_bandwidth(0, &features, None), 0);
    }

    #[test]
    fn explicit_bandwidth_overrides_table() {
        let features = Features {
            bandwidth: Some(900),
            ..Default::default()
        };
        assert_eq!(compute_bandwidth(2, &features, None), 900);
        assert_eq!(compute_bandwidth(7, &features, None), 900);
    }

    #[test]
    fn camera_estimate_never_exceeds_table() {
        let features = Features {
            adjust_bitrate_to_camera: true,
            ..Default::default()
        };
        let hd = TrackSettings {
            width: 1280,
            height: 720,
            frame_rate: 30.0,
        };
        let small = TrackSettings {
            width: 320,
            height: 180,
            frame_rate: 15.0,
        };

        assert_eq!(estimate_bitrate(&hd), Some(1382));
        assert_eq!(compute_bandwidth(2, &features, Some(&hd)), 384);
        assert_eq!(estimate_bitrate(&small), Some(64));
        assert_eq!(compute_bandwidth(2, &features, Some(&small)), 64);
        // an uncapped table value lets the estimate through
        assert_eq!(compute_bandwidth(1, &features, Some(&hd)), 1382);
        assert_eq!(compute_bandwidth(2, &features, None), 384);
    }

    #[test]
    fn higher_p2p_bitrate_scales() {
        let features = Features {
            higher_p2p_bitrate: true,
            ..Default::default()
        };
        assert_eq!(compute_bandwidth(2, &features, None), 576);
        assert_eq!(compute_bandwidth(1, &features, None), 0);
    }

    #[test]
    fn unknown_camera_settings() {
        assert_eq!(estimate_bitrate(&TrackSettings::default()), None);
    }
}
