//! Signaling frame types
//!
//! Each WebSocket frame is a JSON envelope `{type, data}` where `data`
//! carries the type-specific payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{Participant, SessionState};

/// Framed signaling message.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    /// Build an outbound frame, serialized and ready to send. Returns
    /// `None` only if the payload fails to serialize.
    pub fn outbound(kind: &str, data: impl Serialize) -> Option<String> {
        let data = serde_json::to_value(data).ok()?;
        serde_json::to_string(&Envelope {
            kind: kind.to_string(),
            data,
        })
        .ok()
    }
}

/// `offer` / `answer` payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct SdpPayload {
    pub sdp: String,
}

/// `ice_candidate` payload, both directions.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IcePayload {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none", default)]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub username_fragment: Option<String>,
}

/// `set_quality` payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct QualityPayload {
    pub bitrate: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

/// `set_permission` payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionPayload {
    pub target_id: String,
    pub keyboard: bool,
    pub mouse: bool,
}

/// `session_state` payload: the receiver's own participant plus the full
/// session snapshot.
#[derive(Debug, Serialize)]
pub struct SessionStatePayload {
    pub you: Participant,
    pub session: SessionState,
}

/// `error` payload.
#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let frame = Envelope::outbound("answer", SdpPayload { sdp: "v=0".into() }).unwrap();
        let parsed: Envelope = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed.kind, "answer");
        let sdp: SdpPayload = serde_json::from_value(parsed.data).unwrap();
        assert_eq!(sdp.sdp, "v=0");
    }

    #[test]
    fn empty_data_is_accepted() {
        let parsed: Envelope = serde_json::from_str(r#"{"type":"join_as_player"}"#).unwrap();
        assert_eq!(parsed.kind, "join_as_player");
        assert!(parsed.data.is_null());
    }

    #[test]
    fn ice_payload_uses_wire_field_names() {
        let json = r#"{"candidate":"candidate:1","sdpMid":"0","sdpMLineIndex":0}"#;
        let ice: IcePayload = serde_json::from_str(json).unwrap();
        assert_eq!(ice.sdp_mid.as_deref(), Some("0"));
        assert_eq!(ice.sdp_mline_index, Some(0));
        assert_eq!(ice.username_fragment, None);

        let out = serde_json::to_string(&ice).unwrap();
        assert!(out.contains("sdpMid"));
        assert!(out.contains("sdpMLineIndex"));
        assert!(!out.contains("usernameFragment"));
    }
}
