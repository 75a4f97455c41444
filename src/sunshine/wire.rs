//! XML response model for the host's control endpoints
//!
//! Every endpoint answers with a single `<root>` element carrying a
//! `status_code` attribute and a flat set of optional children. Numeric
//! children arrive as decimal strings; byte strings are uppercase hex.

use serde::Deserialize;

use super::SunshineError;

/// Parsed `<root>` response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename = "root")]
pub struct HostResponse {
    #[serde(rename = "@status_code", default)]
    pub status_code: u16,
    #[serde(rename = "@status_message")]
    pub status_message: Option<String>,

    // serverinfo
    pub hostname: Option<String>,
    pub appversion: Option<String>,
    #[serde(rename = "GfeVersion")]
    pub gfe_version: Option<String>,
    pub uniqueid: Option<String>,
    #[serde(rename = "HttpsPort")]
    pub https_port: Option<String>,
    #[serde(rename = "ExternalPort")]
    pub external_port: Option<String>,
    pub mac: Option<String>,
    #[serde(rename = "LocalIP")]
    pub local_ip: Option<String>,
    #[serde(rename = "ServerCodecModeSupport")]
    pub server_codec_mode_support: Option<String>,
    #[serde(rename = "PairStatus")]
    pub pair_status: Option<String>,
    pub currentgame: Option<String>,
    pub state: Option<String>,
    #[serde(rename = "MaxLumaPixelsHEVC")]
    pub max_luma_pixels_hevc: Option<String>,

    // pairing
    pub paired: Option<String>,
    pub plaincert: Option<String>,
    pub challengeresponse: Option<String>,
    pub pairingsecret: Option<String>,

    // launch / resume / cancel
    pub gamesession: Option<String>,
    #[serde(rename = "sessionUrl0")]
    pub session_url0: Option<String>,
    pub resume: Option<String>,
    pub cancel: Option<String>,

    #[serde(rename = "App", default)]
    pub apps: Vec<XmlApp>,
}

#[derive(Debug, Default, Deserialize)]
pub struct XmlApp {
    #[serde(rename = "ID")]
    pub id: Option<String>,
    #[serde(rename = "AppTitle")]
    pub title: Option<String>,
    #[serde(rename = "IsHdrSupported")]
    pub is_hdr_supported: Option<String>,
}

impl HostResponse {
    /// Parse a response body, turning a 4xx status_code into an error.
    pub fn parse(body: &str) -> Result<Self, SunshineError> {
        let root: HostResponse = quick_xml::de::from_str(body)
            .map_err(|e| SunshineError::Protocol(format!("parsing XML: {}", e)))?;

        if root.status_code / 100 == 4 {
            let message = root
                .status_message
                .clone()
                .unwrap_or_else(|| "request failed".to_string());
            return Err(SunshineError::Server {
                code: root.status_code,
                message,
            });
        }

        Ok(root)
    }

    /// Whether the response acknowledged a pairing step.
    pub fn is_paired(&self) -> bool {
        self.paired.as_deref() == Some("1")
    }

    /// Decimal child parsed as an integer, `None` when absent or malformed.
    pub fn int_field(field: &Option<String>) -> Option<i64> {
        field.as_deref().and_then(|s| s.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serverinfo_response() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<root status_code="200">
  <hostname>sunshine-box</hostname>
  <appversion>7.1.431.0</appversion>
  <HttpsPort>47984</HttpsPort>
  <ExternalPort>47989</ExternalPort>
  <ServerCodecModeSupport>259</ServerCodecModeSupport>
  <PairStatus>1</PairStatus>
  <currentgame>0</currentgame>
  <state>SUNSHINE_SERVER_FREE</state>
</root>"#;

        let root = HostResponse::parse(body).unwrap();
        assert_eq!(root.status_code, 200);
        assert_eq!(root.hostname.as_deref(), Some("sunshine-box"));
        assert_eq!(HostResponse::int_field(&root.https_port), Some(47984));
        assert_eq!(HostResponse::int_field(&root.pair_status), Some(1));
        assert_eq!(root.state.as_deref(), Some("SUNSHINE_SERVER_FREE"));
    }

    #[test]
    fn parses_app_list() {
        let body = r#"<root status_code="200">
  <App><ID>1</ID><AppTitle>Desktop</AppTitle></App>
  <App><ID>2</ID><AppTitle>Steam</AppTitle><IsHdrSupported>1</IsHdrSupported></App>
</root>"#;

        let root = HostResponse::parse(body).unwrap();
        assert_eq!(root.apps.len(), 2);
        assert_eq!(root.apps[0].title.as_deref(), Some("Desktop"));
        assert_eq!(root.apps[1].is_hdr_supported.as_deref(), Some("1"));
    }

    #[test]
    fn status_4xx_is_an_error() {
        let body = r#"<root status_code="401" status_message="pin not accepted"/>"#;
        match HostResponse::parse(body) {
            Err(SunshineError::Server { code, message }) => {
                assert_eq!(code, 401);
                assert_eq!(message, "pin not accepted");
            }
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[test]
    fn missing_status_message_gets_default() {
        let body = r#"<root status_code="400"/>"#;
        match HostResponse::parse(body) {
            Err(SunshineError::Server { message, .. }) => {
                assert_eq!(message, "request failed");
            }
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[test]
    fn paired_flag() {
        let body = r#"<root status_code="200"><paired>1</paired></root>"#;
        assert!(HostResponse::parse(body).unwrap().is_paired());
        let body = r#"<root status_code="200"><paired>0</paired></root>"#;
        assert!(!HostResponse::parse(body).unwrap().is_paired());
    }
}
