//! gamecast - multi-user game stream bridge
//!
//! Attaches to a single Moonlight-protocol streaming host (pairing, launch,
//! RTSP/RTP ingestion) and fans the media out to many browsers over WebRTC
//! while routing player input back toward the host.

pub mod config;
pub mod input;
pub mod orchestrator;
pub mod rtsp;
pub mod session;
pub mod sunshine;
pub mod web;
pub mod webrtc;

// Re-exports
pub use config::Config;
pub use input::{HostInputSink, InputEvent, LogSink};
pub use orchestrator::Pipeline;
pub use session::{Participant, Role, SessionManager, StreamSettings};
pub use sunshine::SunshineClient;
pub use webrtc::FanOut;
