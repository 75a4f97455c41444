//! WebRTC fan-out
//!
//! One source video track and one source audio track, retransmitted by the
//! engine to every attached peer. Data channels opened by peers carry
//! input payloads upward through a single callback; authorization happens
//! in the caller, not here.

pub mod fanout;

pub use fanout::{create_audio_track, create_video_track, FanOut, Peer};

use std::error::Error;
use std::fmt;

/// WebRTC-related errors
#[derive(Debug)]
pub enum FanOutError {
    /// Peer connection creation or close failed
    ConnectionFailed(String),
    /// SDP processing failed
    SdpError(String),
    /// ICE candidate processing failed
    IceError(String),
    /// Media track error
    MediaError(String),
    /// Peer not found
    PeerNotFound(String),
}

impl fmt::Display for FanOutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanOutError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            FanOutError::SdpError(msg) => write!(f, "SDP error: {}", msg),
            FanOutError::IceError(msg) => write!(f, "ICE error: {}", msg),
            FanOutError::MediaError(msg) => write!(f, "media error: {}", msg),
            FanOutError::PeerNotFound(id) => write!(f, "peer not found: {}", id),
        }
    }
}

impl Error for FanOutError {}
