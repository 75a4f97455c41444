//! RTSP client and RTP receiver
//!
//! Negotiates per-media UDP transport with the host (DESCRIBE / SETUP /
//! PLAY / TEARDOWN) and receives the resulting RTP packet streams.

pub mod client;
pub mod receiver;
pub mod sdp;

pub use client::RtspClient;
pub use receiver::{spawn_receiver, PacketSink};
pub use sdp::SdpMedia;

use std::error::Error;
use std::fmt;

/// Errors from the RTSP conversation and RTP reception
#[derive(Debug)]
pub enum RtspError {
    /// TCP/UDP level failure
    Transport(String),
    /// Malformed status line, header, or SDP
    Protocol(String),
    /// The server answered a request with a non-200 status
    Status { code: u16, text: String },
}

impl fmt::Display for RtspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtspError::Transport(msg) => write!(f, "transport error: {}", msg),
            RtspError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            RtspError::Status { code, text } => write!(f, "request failed: {} {}", code, text),
        }
    }
}

impl Error for RtspError {}

impl From<std::io::Error> for RtspError {
    fn from(e: std::io::Error) -> Self {
        RtspError::Transport(e.to_string())
    }
}
