//! HTTP(S) control client
//!
//! Keeps two HTTP clients: a plaintext one for unpaired endpoints and the
//! first four pairing steps, and a TLS one (self-signed host certificate,
//! attached client identity) for everything after pairing.

use std::time::Duration;

use log::debug;

use super::wire::HostResponse;
use super::SunshineError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Control client for a single Sunshine host.
pub struct SunshineClient {
    host: String,
    http_port: u16,
    https_port: u16,

    http: reqwest::Client,
    https: reqwest::Client,

    // Client identity sent on every request
    unique_id: String,
    uuid: String,
}

/// Host capabilities and pairing status from `/serverinfo`.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub hostname: String,
    pub app_version: String,
    pub gfe_version: String,
    pub unique_id: String,
    pub https_port: u16,
    pub external_port: u16,
    pub mac: String,
    pub local_ip: String,
    pub server_codec_mode_support: i64,
    pub paired: bool,
    pub current_game: i64,
    pub state: String,
    pub max_luma_pixels_hevc: i64,
}

/// An application in the host's catalogue.
#[derive(Debug, Clone)]
pub struct App {
    pub id: i64,
    pub title: String,
    pub hdr_supported: bool,
}

/// Parameters for `/launch` and `/resume`.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub app_id: i64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub ri_key: [u8; 16],
    pub ri_key_id: u32,
    pub local_audio: bool,
    /// Bitmask of occupied gamepad slots, bit i for slot i+1
    pub gamepads: u8,
}

/// Result of a successful `/launch` or `/resume`.
#[derive(Debug, Clone)]
pub struct LaunchResponse {
    pub session_id: i64,
    pub session_url: String,
}

impl SunshineClient {
    pub fn new(host: &str, http_port: u16, https_port: u16) -> Result<Self, SunshineError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        // The host presents a self-signed certificate
        let https = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            host: host.to_string(),
            http_port,
            https_port,
            http,
            https,
            unique_id: "0123456789ABCDEF".to_string(),
            uuid: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Attach the paired client certificate. Post-pairing HTTPS endpoints
    /// refuse connections without it.
    pub fn set_client_identity(
        &mut self,
        cert_pem: &str,
        key_pem: &str,
    ) -> Result<(), SunshineError> {
        let mut bundle = Vec::new();
        bundle.extend_from_slice(key_pem.as_bytes());
        bundle.extend_from_slice(cert_pem.as_bytes());

        let identity = reqwest::Identity::from_pem(&bundle)
            .map_err(|e| SunshineError::Protocol(format!("loading client identity: {}", e)))?;

        self.https = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .identity(identity)
            .build()?;

        Ok(())
    }

    pub(super) fn http_url(&self, endpoint: &str) -> String {
        format!("http://{}:{}/{}", self.host, self.http_port, endpoint)
    }

    pub(super) fn https_url(&self, endpoint: &str) -> String {
        format!("https://{}:{}/{}", self.host, self.https_port, endpoint)
    }

    pub(super) fn client_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("uniqueid", self.unique_id.clone()),
            ("uuid", self.uuid.clone()),
        ]
    }

    pub(super) fn plain_client(&self) -> &reqwest::Client {
        &self.http
    }

    pub(super) fn tls_client(&self) -> &reqwest::Client {
        &self.https
    }

    pub(super) async fn do_request(
        &self,
        client: &reqwest::Client,
        url: String,
        params: &[(&str, String)],
    ) -> Result<HostResponse, SunshineError> {
        debug!("GET {} ({} params)", url, params.len());
        let body = client
            .get(&url)
            .query(params)
            .send()
            .await?
            .text()
            .await?;

        HostResponse::parse(&body)
    }

    /// Query host capabilities and pairing status.
    pub async fn server_info(&self) -> Result<ServerInfo, SunshineError> {
        let params = self.client_params();
        let root = self
            .do_request(&self.http, self.http_url("serverinfo"), &params)
            .await?;

        Ok(ServerInfo {
            hostname: root.hostname.clone().unwrap_or_default(),
            app_version: root.appversion.clone().unwrap_or_default(),
            gfe_version: root.gfe_version.clone().unwrap_or_default(),
            unique_id: root.uniqueid.clone().unwrap_or_default(),
            https_port: HostResponse::int_field(&root.https_port).unwrap_or(0) as u16,
            external_port: HostResponse::int_field(&root.external_port).unwrap_or(0) as u16,
            mac: root.mac.clone().unwrap_or_default(),
            local_ip: root.local_ip.clone().unwrap_or_default(),
            server_codec_mode_support: HostResponse::int_field(&root.server_codec_mode_support)
                .unwrap_or(0),
            paired: HostResponse::int_field(&root.pair_status) == Some(1),
            current_game: HostResponse::int_field(&root.currentgame).unwrap_or(0),
            state: root.state.clone().unwrap_or_default(),
            max_luma_pixels_hevc: HostResponse::int_field(&root.max_luma_pixels_hevc)
                .unwrap_or(0),
        })
    }

    /// Fetch the application catalogue. Requires the client certificate.
    pub async fn app_list(&self) -> Result<Vec<App>, SunshineError> {
        let params = self.client_params();
        let root = self
            .do_request(&self.https, self.https_url("applist"), &params)
            .await?;

        let apps = root
            .apps
            .iter()
            .map(|a| App {
                id: HostResponse::int_field(&a.id).unwrap_or(0),
                title: a.title.clone().unwrap_or_default(),
                hdr_supported: a.is_hdr_supported.as_deref() == Some("1"),
            })
            .collect();

        Ok(apps)
    }

    /// Start streaming an application.
    pub async fn launch(&self, req: &LaunchRequest) -> Result<LaunchResponse, SunshineError> {
        let params = self.launch_params(req);
        let root = self
            .do_request(&self.https, self.https_url("launch"), &params)
            .await?;

        Ok(LaunchResponse {
            session_id: HostResponse::int_field(&root.gamesession).unwrap_or(0),
            session_url: root.session_url0.clone().unwrap_or_default(),
        })
    }

    /// Resume an existing streaming session.
    pub async fn resume(&self, req: &LaunchRequest) -> Result<LaunchResponse, SunshineError> {
        let params = self.launch_params(req);
        let root = self
            .do_request(&self.https, self.https_url("resume"), &params)
            .await?;

        Ok(LaunchResponse {
            session_id: HostResponse::int_field(&root.resume).unwrap_or(0),
            session_url: root.session_url0.clone().unwrap_or_default(),
        })
    }

    /// Stop the current streaming session. Fire and forget.
    pub async fn cancel(&self) -> Result<(), SunshineError> {
        let params = self.client_params();
        self.do_request(&self.https, self.https_url("cancel"), &params)
            .await?;
        Ok(())
    }

    /// Remove the pairing with the host. Fire and forget.
    pub async fn unpair(&self) -> Result<(), SunshineError> {
        let params = self.client_params();
        self.do_request(&self.http, self.http_url("unpair"), &params)
            .await?;
        Ok(())
    }

    fn launch_params(&self, req: &LaunchRequest) -> Vec<(&'static str, String)> {
        let mut params = self.client_params();
        params.push(("appid", req.app_id.to_string()));
        params.push((
            "mode",
            format!("{}x{}x{}", req.width, req.height, req.fps),
        ));
        params.push(("additionalStates", "1".to_string()));
        params.push(("sops", "1".to_string()));
        params.push(("rikey", hex::encode_upper(req.ri_key)));
        params.push(("rikeyid", req.ri_key_id.to_string()));
        params.push((
            "localAudioPlayMode",
            if req.local_audio { "1" } else { "0" }.to_string(),
        ));
        params.push(("remoteControllersBitmap", req.gamepads.to_string()));
        params.push(("gcmap", req.gamepads.to_string()));
        params.push(("gcpersist", "0".to_string()));
        params
    }
}
