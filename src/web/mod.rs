//! Browser-facing HTTP and WebSocket surface
//!
//! Serves the session snapshot API and the signaling socket that carries
//! WebRTC negotiation and session control intents.

pub mod messages;
pub mod server;
pub mod ws;

pub use server::{router, AppState};
