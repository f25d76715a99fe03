// WebSocket endpoint: status queries for the management surface.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use tracing::debug;

use vtuner_core::auth::Scope;

use crate::api::status_response;
use crate::auth_gate::require_scope;
use crate::state::AppState;

const MAX_MESSAGE_BYTES: usize = 32 * 1024 * 1024;

/// `GET /ws/` — upgrade and answer `{"cmd": ...}` messages. The connection
/// counter is held manually for the socket's lifetime since the upgrade
/// hijacks the HTTP stream.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(e) = require_scope(
        &state,
        &headers,
        &query,
        Scope::Web,
        state.config.auth.web,
    )
    .await
    {
        return e.into_response();
    }

    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, mut socket: WebSocket) {
    let _guard = state.connections.guard();

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "websocket receive failed");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                let reply = handle_command(&state, &text);
                if socket.send(Message::Text(reply.into())).await.is_err() {
                    break;
                }
            }
            Message::Ping(payload) => {
                if socket.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

fn handle_command(state: &AppState, text: &str) -> String {
    let cmd = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("cmd").and_then(|c| c.as_str()).map(ToString::to_string));

    let body = match cmd.as_deref() {
        Some("status") => status_response(state, None),
        Some(other) => serde_json::json!({"status": false, "error": format!("unknown command: {other}")}),
        None => serde_json::json!({"status": false, "error": "missing cmd"}),
    };
    body.to_string()
}
