//! Signaling connection handling
//!
//! One WebSocket per browser peer. The connection id doubles as the peer
//! id in the fan-out and the participant id in the session. Frames are
//! processed in arrival order; session mutations are committed before the
//! acknowledging broadcast goes out.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use crate::session::{SessionError, StreamSettings};

use super::messages::{
    Envelope, ErrorPayload, IcePayload, PermissionPayload, QualityPayload, SdpPayload,
    SessionStatePayload,
};
use super::server::{AppState, ClientHandle};

/// Outbound frames queued per client before overflow drops them
const OUTBOUND_QUEUE: usize = 256;

/// Drive one signaling connection from upgrade to disconnect.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let client_id = uuid::Uuid::new_v4().to_string();
    info!("signaling client {} connected", client_id);

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    state
        .clients
        .write()
        .await
        .insert(client_id.clone(), ClientHandle::new(tx.clone()));

    if join_session(&state, &client_id).await {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    handle_frame(&state, &client_id, text.as_ref()).await;
                }
                Ok(Message::Binary(_)) => {
                    debug!("ignoring binary frame from {}", client_id);
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    debug!("websocket error for {}: {}", client_id, e);
                    break;
                }
            }
        }
    }

    // Disconnect: drop the participant, the peer, and the client handle
    if let Some(outcome) = state.session.leave(&client_id) {
        info!(
            "participant {} ({}) left",
            outcome.participant.name, client_id
        );
        if outcome.session_ended {
            info!("last eligible participant left, stopping stream");
            state.pipeline.stop().await;
        }
    }
    state.fanout.remove_peer(&client_id).await;
    state.clients.write().await.remove(&client_id);
    broadcast_session_state(&state).await;

    drop(tx);
    let _ = writer.await;
    info!("signaling client {} disconnected", client_id);
}

/// Ensure a session exists (starting the host stream for the first
/// arrival) and join it. Returns false when the client cannot join.
async fn join_session(state: &Arc<AppState>, client_id: &str) -> bool {
    if !state.session.is_active() {
        let settings = StreamSettings {
            bitrate: state.config.stream.default_bitrate,
            fps: state.config.stream.default_fps,
            width: state.config.stream.default_width,
            height: state.config.stream.default_height,
        };

        // Another connection may win the race; joining below still works
        if state
            .session
            .create(0, &state.config.stream.default_app, settings)
            .is_ok()
        {
            if let Err(e) = state.pipeline.start(&settings).await {
                error!("failed to start stream: {}", e);
                state.session.end();
                send_error(state, client_id, &format!("failed to start stream: {}", e)).await;
                return false;
            }
        }
    }

    let participant = match state.session.join(client_id, "Player") {
        Ok(p) => p,
        Err(e) => {
            send_error(state, client_id, &e.to_string()).await;
            return false;
        }
    };
    info!(
        "participant {} joined as {:?} (host: {})",
        client_id, participant.role, participant.is_host
    );

    send_session_state(state, client_id).await;
    true
}

/// Dispatch one inbound frame.
async fn handle_frame(state: &Arc<AppState>, client_id: &str, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            debug!("invalid frame from {}: {}", client_id, e);
            return;
        }
    };

    match envelope.kind.as_str() {
        "offer" => {
            let Ok(sdp) = serde_json::from_value::<SdpPayload>(envelope.data) else {
                debug!("invalid offer payload from {}", client_id);
                return;
            };
            handle_offer(state, client_id, sdp).await;
        }

        "ice_candidate" => {
            let Ok(ice) = serde_json::from_value::<IcePayload>(envelope.data) else {
                debug!("invalid ICE payload from {}", client_id);
                return;
            };
            let candidate = RTCIceCandidateInit {
                candidate: ice.candidate,
                sdp_mid: ice.sdp_mid,
                sdp_mline_index: ice.sdp_mline_index,
                username_fragment: ice.username_fragment,
            };
            if let Err(e) = state.fanout.add_ice_candidate(client_id, candidate).await {
                warn!("adding ICE candidate for {}: {}", client_id, e);
            }
        }

        "join_as_player" => match state.session.join_as_player(client_id) {
            Ok(p) => {
                info!("{} promoted to player slot {:?}", client_id, p.slot);
                broadcast_session_state(state).await;
            }
            Err(e) => report_session_error(state, client_id, e).await,
        },

        "spectate" => match state.session.spectate(client_id) {
            Ok(_) => {
                info!("{} moved to spectator", client_id);
                broadcast_session_state(state).await;
            }
            Err(e) => report_session_error(state, client_id, e).await,
        },

        "set_quality" => {
            let Ok(quality) = serde_json::from_value::<QualityPayload>(envelope.data) else {
                return;
            };
            let settings = StreamSettings {
                bitrate: quality.bitrate,
                fps: quality.fps,
                width: quality.width,
                height: quality.height,
            };
            match state.session.set_quality(client_id, settings) {
                Ok(()) => {
                    // Recorded only; the running stream keeps its mode
                    info!(
                        "quality change recorded: {}x{}@{} {} kbps",
                        settings.width, settings.height, settings.fps, settings.bitrate
                    );
                }
                Err(e) => report_session_error(state, client_id, e).await,
            }
        }

        "set_permission" => {
            let Ok(perm) = serde_json::from_value::<PermissionPayload>(envelope.data) else {
                return;
            };
            let keyboard = state
                .session
                .set_keyboard_permission(client_id, &perm.target_id, perm.keyboard);
            let mouse = state
                .session
                .set_mouse_permission(client_id, &perm.target_id, perm.mouse);
            match keyboard.and(mouse) {
                Ok(_) => broadcast_session_state(state).await,
                Err(e) => report_session_error(state, client_id, e).await,
            }
        }

        other => {
            debug!("unknown frame type {:?} from {}", other, client_id);
        }
    }
}

/// Apply an SDP offer, wire up candidate trickling, and answer.
async fn handle_offer(state: &Arc<AppState>, client_id: &str, sdp: SdpPayload) {
    let answer = match state.fanout.handle_offer(client_id, &sdp.sdp).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!("offer from {} failed: {}", client_id, e);
            send_error(state, client_id, &format!("offer failed: {}", e)).await;
            return;
        }
    };

    // Locally gathered candidates trickle out on the same connection
    let candidate_state = state.clone();
    let candidate_client = client_id.to_string();
    let result = state
        .fanout
        .on_ice_candidate(client_id, move |init| {
            let state = candidate_state.clone();
            let client_id = candidate_client.clone();
            tokio::spawn(async move {
                let payload = IcePayload {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                };
                send_to(&state, &client_id, "ice_candidate", payload).await;
            });
        })
        .await;
    if let Err(e) = result {
        warn!("installing ICE callback for {}: {}", client_id, e);
    }

    send_to(state, client_id, "answer", SdpPayload { sdp: answer }).await;
}

async fn report_session_error(state: &Arc<AppState>, client_id: &str, error: SessionError) {
    debug!("session error for {}: {}", client_id, error);
    send_error(state, client_id, &error.to_string()).await;
}

async fn send_error(state: &Arc<AppState>, client_id: &str, message: &str) {
    send_to(
        state,
        client_id,
        "error",
        ErrorPayload {
            message: message.to_string(),
        },
    )
    .await;
}

async fn send_to(state: &Arc<AppState>, client_id: &str, kind: &str, data: impl serde::Serialize) {
    let Some(frame) = Envelope::outbound(kind, data) else {
        return;
    };
    let clients = state.clients.read().await;
    if let Some(client) = clients.get(client_id) {
        client.send(frame);
    }
}

/// Send each connected participant the session snapshot plus its own
/// participant record.
pub async fn send_session_state(state: &Arc<AppState>, client_id: &str) {
    let Some(you) = state.session.participant(client_id) else {
        return;
    };
    let payload = SessionStatePayload {
        you,
        session: state.session.state(),
    };
    send_to(state, client_id, "session_state", payload).await;
}

pub async fn broadcast_session_state(state: &Arc<AppState>) {
    let session = state.session.state();
    let clients = state.clients.read().await;
    for (client_id, client) in clients.iter() {
        let Some(you) = state.session.participant(client_id) else {
            continue;
        };
        let payload = SessionStatePayload {
            you,
            session: session.clone(),
        };
        if let Some(frame) = Envelope::outbound("session_state", payload) {
            client.send(frame);
        }
    }
}
