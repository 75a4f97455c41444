//! Input events and routing
//!
//! Binary input payloads arrive on per-peer WebRTC data channels, are
//! decoded into typed events, permission-checked against the session, and
//! handed to a [`HostInputSink`]. The sink is the seam for the host's
//! encrypted input channel; the default implementation only logs.

pub mod dispatch;
pub mod events;

pub use dispatch::InputRouter;
pub use events::{HostInputSink, InputEvent, LogSink};
