//! SDP media descriptions
//!
//! Only the lines the host conversation needs are consumed: `m=` opens a
//! media block, `a=control:` and `a=rtpmap:` populate the current block.
//! Blocks keep the order the host sent them.

/// One media description from a DESCRIBE response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdpMedia {
    /// "video" or "audio"
    pub kind: String,
    pub port: u16,
    pub protocol: String,
    pub format: String,
    pub control: String,
    pub codec: String,
    pub clock_rate: u32,
    pub channels: u32,
}

/// Parse the media blocks of an SDP body.
pub fn parse_sdp(body: &str) -> Vec<SdpMedia> {
    let mut media: Vec<SdpMedia> = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.len() != 1 {
            continue;
        }

        match key {
            "m" => {
                // m=<media> <port> <proto> <fmt>
                let parts: Vec<&str> = value.split_whitespace().collect();
                if parts.len() >= 4 {
                    media.push(SdpMedia {
                        kind: parts[0].to_string(),
                        port: parts[1].parse().unwrap_or(0),
                        protocol: parts[2].to_string(),
                        format: parts[3].to_string(),
                        ..Default::default()
                    });
                }
            }
            "a" => {
                let Some(current) = media.last_mut() else {
                    continue;
                };
                if let Some(control) = value.strip_prefix("control:") {
                    current.control = control.to_string();
                } else if let Some(rtpmap) = value.strip_prefix("rtpmap:") {
                    // rtpmap:<payload> <encoding>/<clock-rate>[/<channels>]
                    if let Some((_, encoding)) = rtpmap.split_once(' ') {
                        let mut parts = encoding.split('/');
                        if let Some(codec) = parts.next() {
                            current.codec = codec.to_string();
                        }
                        if let Some(clock) = parts.next() {
                            current.clock_rate = clock.trim().parse().unwrap_or(0);
                        }
                        if let Some(channels) = parts.next() {
                            current.channels = channels.trim().parse().unwrap_or(0);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    media
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Sunshine\r\n\
m=video 0 RTP/AVP 96\r\n\
a=control:streamid=0\r\n\
a=rtpmap:96 H264/90000\r\n\
m=audio 0 RTP/AVP 97\r\n\
a=control:streamid=1\r\n\
a=rtpmap:97 opus/48000/2\r\n";

    #[test]
    fn parses_media_blocks_in_order() {
        let media = parse_sdp(SDP);
        assert_eq!(media.len(), 2);

        assert_eq!(media[0].kind, "video");
        assert_eq!(media[0].protocol, "RTP/AVP");
        assert_eq!(media[0].format, "96");
        assert_eq!(media[0].control, "streamid=0");
        assert_eq!(media[0].codec, "H264");
        assert_eq!(media[0].clock_rate, 90000);
        assert_eq!(media[0].channels, 0);

        assert_eq!(media[1].kind, "audio");
        assert_eq!(media[1].codec, "opus");
        assert_eq!(media[1].clock_rate, 48000);
        assert_eq!(media[1].channels, 2);
    }

    #[test]
    fn attributes_before_any_media_are_ignored() {
        let media = parse_sdp("a=control:*\r\nm=video 0 RTP/AVP 96\r\n");
        assert_eq!(media.len(), 1);
        assert!(media[0].control.is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let media = parse_sdp("nonsense\r\nm=video 0 RTP/AVP\r\nm=video 0 RTP/AVP 96\r\n");
        // The short m= line lacks a format and is dropped
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].format, "96");
    }
}
