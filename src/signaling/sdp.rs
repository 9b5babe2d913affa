use std::io::Cursor;

use webrtc::{
    peer_connection::sdp::{
        sdp_type::RTCSdpType, session_description::RTCSessionDescription,
    },
    sdp::{description::common::Bandwidth, MediaDescription, SessionDescription},
};

use crate::{config::Features, error::Error};

const APPLICATION_SPECIFIC_MAXIMUM: &str = "AS";

fn parse(sdp: &str) -> Result<SessionDescription, Error> {
    let mut reader = Cursor::new(sdp.as_bytes());
    let session = SessionDescription::unmarshal(&mut reader)?;
    Ok(session)
}

fn video_sections(session: &mut SessionDescription) -> impl Iterator<Item = &mut MediaDescription> {
    session
        .media_descriptions
        .iter_mut()
        .filter(|media| media.media_name.media == "video")
}

/// Caps every video section at `kbps` with a `b=AS` line. Zero removes the cap.
pub fn set_video_bandwidth(sdp: &str, kbps: u32) -> Result<String, Error> {
    let mut session = parse(sdp)?;
    for media in video_sections(&mut session) {
        media
            .bandwidth
            .retain(|b| b.bandwidth_type != APPLICATION_SPECIFIC_MAXIMUM);
        if kbps > 0 {
            media.bandwidth.push(Bandwidth {
                experimental: false,
                bandwidth_type: APPLICATION_SPECIFIC_MAXIMUM.to_string(),
                bandwidth: kbps as u64,
            });
        }
    }
    Ok(session.marshal())
}

/// Moves the payload types of `codec` (e.g. `H264`) to the front of every video section.
pub fn prefer_video_codec(sdp: &str, codec: &str) -> Result<String, Error> {
    let mut session = parse(sdp)?;
    for media in video_sections(&mut session) {
        let preferred: Vec<String> = media
            .attributes
            .iter()
            .filter(|attribute| attribute.key == "rtpmap")
            .filter_map(|attribute| attribute.value.as_deref())
            .filter_map(|value| {
                let (payload_type, encoding) = value.split_once(' ')?;
                let name = encoding.split('/').next()?;
                name.eq_ignore_ascii_case(codec)
                    .then(|| payload_type.to_string())
            })
            .collect();
        if preferred.is_empty() {
            continue;
        }

        let (mut front, rest): (Vec<String>, Vec<String>) = media
            .media_name
            .formats
            .drain(..)
            .partition(|format| preferred.contains(format));
        front.extend(rest);
        media.media_name.formats = front;
    }
    Ok(session.marshal())
}

/// Returns the description to send to a peer: bandwidth cap and codec preference applied.
/// The description set locally stays untouched.
pub(crate) fn prepare_outgoing(
    description: &RTCSessionDescription,
    bandwidth: u32,
    features: &Features,
) -> Result<RTCSessionDescription, Error> {
    let codec = features.preferred_video_codec();
    if bandwidth == 0 && codec.is_none() {
        return Ok(description.clone());
    }

    let mut sdp = set_video_bandwidth(&description.sdp, bandwidth)?;
    if let Some(codec) = codec {
        sdp = prefer_video_codec(&sdp, codec)?;
    }

    let munged = match description.sdp_type {
        RTCSdpType::Offer => RTCSessionDescription::offer(sdp)?,
        RTCSdpType::Answer => RTCSessionDescription::answer(sdp)?,
        RTCSdpType::Pranswer => RTCSessionDescription::pranswer(sdp)?,
        _ => description.clone(),
    };
    Ok(munged)
}

#[cfg(test)]
pub(crate) const SAMPLE_SDP: &str = "v=0\r\n\
o=- 4215775240449105457 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 102\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:102 H264/90000\r\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_is_set_on_video_only() {
        let sdp = set_video_bandwidth(SAMPLE_SDP, 384).unwrap();
        assert_eq!(sdp.matches("b=AS:384").count(), 1);

        let video = sdp.split("m=video").nth(1).unwrap();
        assert!(video.contains("b=AS:384"));
        let audio = sdp.split("m=video").next().unwrap();
        assert!(!audio.contains("b=AS"));
    }

    #[test]
    fn bandwidth_is_replaced_and_removed() {
        let capped = set_video_bandwidth(SAMPLE_SDP, 384).unwrap();
        let recapped = set_video_bandwidth(&capped, 128).unwrap();
        assert!(recapped.contains("b=AS:128"));
        assert!(!recapped.contains("b=AS:384"));

        let uncapped = set_video_bandwidth(&recapped, 0).unwrap();
        assert!(!uncapped.contains("b=AS"));
    }

    #[test]
    fn codec_preference_reorders_formats() {
        let sdp = prefer_video_codec(SAMPLE_SDP, "h264").unwrap();
        assert!(sdp.contains("m=video 9 UDP/TLS/RTP/SAVPF 102 96"));
        assert!(sdp.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111"));
    }

    #[test]
    fn unknown_codec_is_ignored() {
        let sdp = prefer_video_codec(SAMPLE_SDP, "AV1").unwrap();
        assert!(sdp.contains("m=video 9 UDP/TLS/RTP/SAVPF 96 102"));
    }

    #[test]
    fn invalid_sdp_is_an_error() {
        assert!(set_video_bandwidth("not an sdp", 100).is_err());
    }

    #[test]
    fn outgoing_description_without_changes_is_kept() {
        let offer = RTCSessionDescription::offer(SAMPLE_SDP.to_string()).unwrap();
        let outgoing = prepare_outgoing(&offer, 0, &Features::default()).unwrap();
        assert_eq!(outgoing.sdp, offer.sdp);

        let outgoing = prepare_outgoing(&offer, 256, &Features::default()).unwrap();
        assert_eq!(outgoing.sdp_type, RTCSdpType::Offer);
        assert!(outgoing.sdp.contains("b=AS:256"));
    }
}
