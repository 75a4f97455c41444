//! HTTP server and routes
//!
//! `GET /api/session` returns the session snapshot, `GET /ws` upgrades to
//! the signaling WebSocket, `GET /health` answers liveness probes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use log::debug;
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::orchestrator::Pipeline;
use crate::session::SessionManager;
use crate::webrtc::FanOut;

/// Per-client handle: the bounded outbound frame queue.
pub struct ClientHandle {
    tx: mpsc::Sender<String>,
}

impl ClientHandle {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Queue a frame; on overflow the frame is dropped and a later
    /// `session_state` broadcast recovers the client.
    pub fn send(&self, frame: String) {
        if self.tx.try_send(frame).is_err() {
            debug!("outbound queue full, dropping frame");
        }
    }
}

/// State shared by all routes and signaling connections.
pub struct AppState {
    pub config: Arc<Config>,
    pub session: Arc<SessionManager>,
    pub fanout: Arc<FanOut>,
    pub pipeline: Arc<Pipeline>,
    pub clients: RwLock<HashMap<String, ClientHandle>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        session: Arc<SessionManager>,
        fanout: Arc<FanOut>,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Self {
            config,
            session,
            fanout,
            pipeline,
            clients: RwLock::new(HashMap::new()),
        }
    }
}

/// Build the browser-facing router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/session", get(session_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn session_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.session.state())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        super::ws::handle_socket(socket, state).await;
    })
}
