//! RTSP request/response client
//!
//! The conversation is a strict request/response lockstep over one TCP
//! connection: DESCRIBE, one SETUP per media, PLAY, TEARDOWN. Every
//! request carries an increasing CSeq; the Session header learned from
//! SETUP is echoed on subsequent requests.

use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::sdp::{parse_sdp, SdpMedia};
use super::RtspError;

const DEFAULT_PORT: u16 = 48010;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "gamecast/1.0";

/// Parsed RTSP response head.
#[derive(Debug)]
struct Response {
    status_code: u16,
    status_text: String,
    headers: HashMap<String, String>,
}

/// RTSP client bound to one server URL.
pub struct RtspClient {
    server_url: String,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
    session_id: Option<String>,
    cseq: u32,
}

impl RtspClient {
    pub fn new(server_url: &str) -> Self {
        Self {
            server_url: server_url.to_string(),
            reader: None,
            writer: None,
            session_id: None,
            cseq: 1,
        }
    }

    /// Open the TCP control connection. The URL's port defaults to 48010.
    pub async fn connect(&mut self) -> Result<(), RtspError> {
        let mut host = self
            .server_url
            .strip_prefix("rtsp://")
            .unwrap_or(&self.server_url)
            .to_string();
        if let Some(idx) = host.find('/') {
            host.truncate(idx);
        }
        if !host.contains(':') {
            host = format!("{}:{}", host, DEFAULT_PORT);
        }

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&host))
            .await
            .map_err(|_| RtspError::Transport(format!("connecting to {}: timed out", host)))?
            .map_err(|e| RtspError::Transport(format!("connecting to {}: {}", host, e)))?;

        let (read_half, write_half) = stream.into_split();
        self.reader = Some(BufReader::new(read_half));
        self.writer = Some(write_half);
        debug!("RTSP connected to {}", host);
        Ok(())
    }

    /// DESCRIBE: fetch the SDP media list.
    pub async fn describe(&mut self) -> Result<Vec<SdpMedia>, RtspError> {
        let mut req = self.build_request("DESCRIBE", &self.server_url.clone());
        req.push_str("Accept: application/sdp\r\n\r\n");

        let (resp, body) = self.send_request(&req).await?;
        check_status("DESCRIBE", &resp)?;

        Ok(parse_sdp(&body))
    }

    /// SETUP one media stream, announcing our UDP `client_port` pair.
    pub async fn setup(&mut self, media: &SdpMedia, client_port: u16) -> Result<(), RtspError> {
        let control_url = if media.control.is_empty() || media.control.starts_with("rtsp://") {
            self.server_url.clone()
        } else {
            format!("{}/{}", self.server_url, media.control)
        };

        let mut req = self.build_request("SETUP", &control_url);
        req.push_str(&format!(
            "Transport: RTP/AVP;unicast;client_port={}-{}\r\n",
            client_port,
            client_port + 1
        ));
        if let Some(session) = &self.session_id {
            req.push_str(&format!("Session: {}\r\n", session));
        }
        req.push_str("\r\n");

        let (resp, _) = self.send_request(&req).await?;
        check_status("SETUP", &resp)?;

        if let Some(session) = resp.headers.get("Session") {
            // Strip any ;timeout=... parameter
            let session = session
                .split_once(';')
                .map(|(id, _)| id)
                .unwrap_or(session);
            self.session_id = Some(session.trim().to_string());
        }

        Ok(())
    }

    /// PLAY: start media flow on the negotiated ports.
    pub async fn play(&mut self) -> Result<(), RtspError> {
        let session = self.session_id.clone().unwrap_or_default();
        let mut req = self.build_request("PLAY", &self.server_url.clone());
        req.push_str(&format!("Session: {}\r\n", session));
        req.push_str("Range: npt=0.000-\r\n\r\n");

        let (resp, _) = self.send_request(&req).await?;
        check_status("PLAY", &resp)
    }

    /// TEARDOWN: end the session. A no-op without a negotiated session.
    pub async fn teardown(&mut self) -> Result<(), RtspError> {
        let Some(session) = self.session_id.clone() else {
            return Ok(());
        };

        let mut req = self.build_request("TEARDOWN", &self.server_url.clone());
        req.push_str(&format!("Session: {}\r\n", session));
        req.push_str("\r\n");

        let (resp, _) = self.send_request(&req).await?;
        check_status("TEARDOWN", &resp)?;

        self.session_id = None;
        Ok(())
    }

    fn build_request(&mut self, method: &str, url: &str) -> String {
        let req = format!(
            "{} {} RTSP/1.0\r\nCSeq: {}\r\nUser-Agent: {}\r\n",
            method, url, self.cseq, USER_AGENT
        );
        self.cseq += 1;
        req
    }

    async fn send_request(&mut self, req: &str) -> Result<(Response, String), RtspError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| RtspError::Transport("not connected".to_string()))?;
        writer.write_all(req.as_bytes()).await?;
        writer.flush().await?;

        self.read_response().await
    }

    async fn read_response(&mut self) -> Result<(Response, String), RtspError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| RtspError::Transport("not connected".to_string()))?;

        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let (status_code, status_text) = parse_status_line(line.trim())?;

        let mut headers = HashMap::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(RtspError::Transport(
                    "connection closed mid-response".to_string(),
                ));
            }
            let line = line.trim();
            if line.is_empty() {
                break;
            }

            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim().to_string();
                let value = value.trim().to_string();
                if key.eq_ignore_ascii_case("Content-Length") {
                    content_length = value.parse().unwrap_or(0);
                }
                headers.insert(key, value);
            }
        }

        let mut body = String::new();
        if content_length > 0 {
            let mut buf = vec![0u8; content_length];
            reader.read_exact(&mut buf).await?;
            body = String::from_utf8_lossy(&buf).into_owned();
        }

        Ok((
            Response {
                status_code,
                status_text,
                headers,
            },
            body,
        ))
    }
}

fn parse_status_line(line: &str) -> Result<(u16, String), RtspError> {
    // RTSP/1.0 <code> <text>
    let mut parts = line.splitn(3, ' ');
    let _version = parts
        .next()
        .ok_or_else(|| RtspError::Protocol(format!("invalid status line: {:?}", line)))?;
    let code = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RtspError::Protocol(format!("invalid status code in {:?}", line)))?;
    let text = parts.next().unwrap_or("").to_string();
    Ok((code, text))
}

fn check_status(method: &str, resp: &Response) -> Result<(), RtspError> {
    if resp.status_code != 200 {
        return Err(RtspError::Status {
            code: resp.status_code,
            text: format!("{} {}", method, resp.status_text),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn status_line_parsing() {
        let (code, text) = parse_status_line("RTSP/1.0 200 OK").unwrap();
        assert_eq!(code, 200);
        assert_eq!(text, "OK");

        let (code, text) = parse_status_line("RTSP/1.0 454 Session Not Found").unwrap();
        assert_eq!(code, 454);
        assert_eq!(text, "Session Not Found");

        assert!(parse_status_line("garbage").is_err());
    }

    #[test]
    fn cseq_increments_per_request() {
        let mut client = RtspClient::new("rtsp://host:48010");
        let first = client.build_request("DESCRIBE", "rtsp://host:48010");
        let second = client.build_request("PLAY", "rtsp://host:48010");
        assert!(first.contains("CSeq: 1\r\n"));
        assert!(second.contains("CSeq: 2\r\n"));
    }

    async fn serve_one(listener: TcpListener, response: &'static str) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        // Read the request head; the test requests have no body
        let _ = stream.read(&mut buf).await.unwrap();
        stream.write_all(response.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn describe_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = "m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\n";
        let response: &'static str = Box::leak(
            format!(
                "RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            )
            .into_boxed_str(),
        );
        let server = tokio::spawn(serve_one(listener, response));

        let mut client = RtspClient::new(&format!("rtsp://{}", addr));
        client.connect().await.unwrap();
        let media = client.describe().await.unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].codec, "H264");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn setup_learns_session_and_strips_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_one(
            listener,
            "RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: DEADBEEF;timeout=60\r\n\r\n",
        ));

        let mut client = RtspClient::new(&format!("rtsp://{}", addr));
        client.connect().await.unwrap();
        let media = SdpMedia {
            kind: "video".to_string(),
            control: "streamid=0".to_string(),
            ..Default::default()
        };
        client.setup(&media, 47998).await.unwrap();
        assert_eq!(client.session_id.as_deref(), Some("DEADBEEF"));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn non_200_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_one(
            listener,
            "RTSP/1.0 454 Session Not Found\r\nCSeq: 1\r\n\r\n",
        ));

        let mut client = RtspClient::new(&format!("rtsp://{}", addr));
        client.connect().await.unwrap();
        let err = client.play().await.unwrap_err();
        assert!(matches!(err, RtspError::Status { code: 454, .. }));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn teardown_without_session_is_noop() {
        let mut client = RtspClient::new("rtsp://127.0.0.1:1");
        client.teardown().await.unwrap();
    }
}
