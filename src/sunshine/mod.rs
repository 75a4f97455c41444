//! Sunshine control client
//!
//! HTTP/HTTPS XML dialogue with the streaming host: server info, app
//! catalogue, the 5-step pairing handshake, and launch/resume/cancel of
//! streaming sessions.

pub mod client;
pub mod pair;
pub mod wire;

pub use client::{App, LaunchRequest, LaunchResponse, ServerInfo, SunshineClient};
pub use pair::PairState;

use std::error::Error;
use std::fmt;

/// Errors from the control client and pairing state machine
#[derive(Debug)]
pub enum SunshineError {
    /// TCP/HTTP level failure
    Transport(String),
    /// Response could not be parsed or was structurally unexpected
    Protocol(String),
    /// The host answered with a 4xx status_code
    Server { code: u16, message: String },
    /// A pairing step was refused or a hash check failed; the pairing
    /// state is unusable afterwards
    PairingRejected(String),
    /// Ciphertext length or padding violation
    CryptoInvalid(String),
}

impl fmt::Display for SunshineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SunshineError::Transport(msg) => write!(f, "transport error: {}", msg),
            SunshineError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            SunshineError::Server { code, message } => {
                write!(f, "server error {}: {}", code, message)
            }
            SunshineError::PairingRejected(msg) => write!(f, "pairing rejected: {}", msg),
            SunshineError::CryptoInvalid(msg) => write!(f, "crypto error: {}", msg),
        }
    }
}

impl Error for SunshineError {}

impl From<reqwest::Error> for SunshineError {
    fn from(e: reqwest::Error) -> Self {
        SunshineError::Transport(e.to_string())
    }
}
