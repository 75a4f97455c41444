//! Configuration management for gamecast

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Error raised while loading or validating the configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Reading the file failed for a reason other than absence
    Io(std::io::Error),
    /// The file exists but is not valid YAML for this schema
    Parse(String),
    /// The configuration violates a constraint
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "reading config: {}", e),
            ConfigError::Parse(msg) => write!(f, "parsing config: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Upstream streaming host
    #[serde(default)]
    pub sunshine: SunshineConfig,

    /// WebRTC fan-out settings
    #[serde(default)]
    pub webrtc: WebRtcConfig,

    /// Browser-facing HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Default stream parameters
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Connection settings for the Sunshine host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SunshineConfig {
    pub host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_https_port")]
    pub https_port: u16,

    /// Paired client certificate (PEM), written by `--pair`
    #[serde(default)]
    pub client_cert: Option<String>,

    /// Private key for the client certificate (PEM)
    #[serde(default)]
    pub client_key: Option<String>,
}

impl Default for SunshineConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            http_port: default_http_port(),
            https_port: default_https_port(),
            client_cert: None,
            client_key: None,
        }
    }
}

/// ICE server entry for NAT traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub credential: Option<String>,
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self {
            urls: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            username: None,
            credential: None,
        }
    }
}

/// Ephemeral UDP port range for ICE.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfig {
    #[serde(default)]
    pub ice_servers: Vec<IceServerConfig>,

    #[serde(default)]
    pub port_range: Option<PortRange>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig::default()],
            port_range: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default)]
    pub tls_cert: Option<String>,

    #[serde(default)]
    pub tls_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_app")]
    pub default_app: String,

    #[serde(default = "default_bitrate")]
    pub default_bitrate: u32,

    #[serde(default = "default_fps")]
    pub default_fps: u32,

    #[serde(default = "default_width")]
    pub default_width: u32,

    #[serde(default = "default_height")]
    pub default_height: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_app: default_app(),
            default_bitrate: default_bitrate(),
            default_fps: default_fps(),
            default_width: default_width(),
            default_height: default_height(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file. A missing file yields the
    /// defaults; a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Config::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sunshine.host.is_empty() {
            return Err(ConfigError::Invalid("sunshine host must be set".into()));
        }

        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "server bind_address {:?} is not a valid socket address",
                self.server.bind_address
            )));
        }

        if self.stream.default_width == 0 || self.stream.default_height == 0 {
            return Err(ConfigError::Invalid(
                "stream dimensions must be non-zero".into(),
            ));
        }

        if self.stream.default_fps == 0 {
            return Err(ConfigError::Invalid("stream fps must be non-zero".into()));
        }

        if self.stream.default_bitrate == 0 {
            return Err(ConfigError::Invalid(
                "stream bitrate must be non-zero".into(),
            ));
        }

        if let Some(range) = self.webrtc.port_range {
            if range.min == 0 || range.min > range.max {
                return Err(ConfigError::Invalid(
                    "invalid WebRTC ephemeral UDP port range".into(),
                ));
            }
        }

        if self.sunshine.client_cert.is_some() != self.sunshine.client_key.is_some() {
            return Err(ConfigError::Invalid(
                "sunshine client_cert and client_key must be set together".into(),
            ));
        }

        Ok(())
    }
}

fn default_http_port() -> u16 {
    47989
}

fn default_https_port() -> u16 {
    47984
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_app() -> String {
    "Desktop".to_string()
}

fn default_bitrate() -> u32 {
    10_000
}

fn default_fps() -> u32 {
    60
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.sunshine.http_port, 47989);
        assert_eq!(cfg.sunshine.https_port, 47984);
        assert_eq!(cfg.server.bind_address, "0.0.0.0:8080");
        assert_eq!(cfg.stream.default_app, "Desktop");
    }

    #[test]
    fn validate_rejects_bad_bind_address() {
        let mut cfg = Config::default();
        cfg.server.bind_address = "not-an-address".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_port_range() {
        let mut cfg = Config::default();
        cfg.webrtc.port_range = Some(PortRange { min: 50000, max: 40000 });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_cert_without_key() {
        let mut cfg = Config::default();
        cfg.sunshine.client_cert = Some("client.pem".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "sunshine:\n  host: 192.168.1.50\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.sunshine.host, "192.168.1.50");
        assert_eq!(cfg.sunshine.http_port, 47989);
        assert_eq!(cfg.stream.default_fps, 60);
        assert!(cfg.webrtc.port_range.is_none());
    }
}
