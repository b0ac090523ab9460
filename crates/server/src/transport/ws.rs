// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session input/event socket: authenticated bidirectional JSON
//! frames carrying pointer/keyboard/text events, heartbeat, and
//! server-side notifications.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{RawQuery, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::protocol::{epoch_s, protocol_payload, PROTOCOL_VERSION};
use crate::transport::auth::{self, get_perm};
use crate::transport::state::AppState;
use crate::transport::ws_msg::{
    extract_text_payload, is_text_event_type, parse_button, ClientEvent, ServerEvent,
};

/// `GET /ws` — upgrade to the input socket. The token arrives in the
/// `Authorization` header (or query when `ALLOW_QUERY_TOKEN` is on) and
/// must belong to an approved session.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = match auth::resolve_token(&state, &headers, query.as_deref()) {
        Ok(token) => token,
        Err(err) => return err.into_response(),
    };
    ws.on_upgrade(move |socket| handle_connection(state, token, socket)).into_response()
}

/// Per-connection event loop: single-threaded cooperative; events from
/// one socket dispatch in arrival order.
async fn handle_connection(state: Arc<AppState>, token: String, socket: WebSocket) {
    let registration = state.hub.register(&token);
    let registration_id = registration.id;
    let cancel = registration.cancel;
    let mut rx = registration.rx;
    let (mut ws_tx, mut ws_rx) = socket.split();

    let config = state.config();
    let hello = ServerEvent::Hello {
        protocol_version: PROTOCOL_VERSION,
        min_supported_protocol_version: crate::protocol::MIN_SUPPORTED_PROTOCOL_VERSION,
        server_version: crate::protocol::SERVER_VERSION.to_owned(),
        features: protocol_payload().features,
        heartbeat_interval_ms: config.heartbeat_interval().as_millis() as u64,
        heartbeat_timeout_ms: config.heartbeat_timeout().as_millis() as u64,
    };
    if send_event(&mut ws_tx, &hello).await.is_err() {
        state.hub.unregister(&token, registration_id);
        return;
    }
    info!(token = %short_token(&token), "input socket connected");

    let heartbeat_timeout = config.heartbeat_timeout();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Session revoked or replaced by a newer bind: flush any
                // queued events (best effort), then close cleanly.
                while let Ok(event) = rx.try_recv() {
                    if send_event(&mut ws_tx, &event).await.is_err() {
                        break;
                    }
                }
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame { code: 1000, reason: "".into() })))
                    .await;
                break;
            }
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut ws_tx, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            frame = tokio::time::timeout(heartbeat_timeout, ws_rx.next()) => {
                let frame = match frame {
                    Err(_) => {
                        debug!(token = %short_token(&token), "input socket idle timeout");
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame { code: 1011, reason: "idle".into() })))
                            .await;
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(_))) => break,
                    Ok(Some(Ok(frame))) => frame,
                };
                match frame {
                    Message::Text(text) => {
                        if let Some(reply) = handle_frame(&state, &token, text.as_str()) {
                            if send_event(&mut ws_tx, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    // Control frames still count as liveness.
                    _ => {
                        state.sessions.touch(&token, epoch_s());
                    }
                }
            }
        }
    }

    state.hub.unregister(&token, registration_id);
    info!(token = %short_token(&token), "input socket closed");
}

async fn send_event<S>(tx: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = serde_json::to_string(event).map_err(|_| ())?;
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

fn short_token(token: &str) -> &str {
    &token[..token.len().min(8)]
}

/// Dispatch one client frame; the return value is sent back when present.
fn handle_frame(state: &Arc<AppState>, token: &str, text: &str) -> Option<ServerEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            return Some(ServerEvent::Error {
                code: "INVALID_INPUT".to_owned(),
                detail: "invalid message".to_owned(),
            })
        }
    };
    state.sessions.touch(token, epoch_s());

    let kind = value.get("type").and_then(Value::as_str).unwrap_or("").to_owned();
    if is_text_event_type(&kind) {
        let payload = value.as_object().cloned().unwrap_or_else(Map::new);
        let text = extract_text_payload(&payload);
        if !text.is_empty() && allowed(state, token, "perm_keyboard") {
            state.input.type_text(&text);
        }
        return None;
    }

    let event: ClientEvent = match serde_json::from_value(value) {
        Ok(event) => event,
        Err(_) => {
            return Some(ServerEvent::Error {
                code: "INVALID_INPUT".to_owned(),
                detail: format!("unsupported event: {kind}"),
            })
        }
    };
    match event {
        ClientEvent::Ping {} => Some(ServerEvent::Pong { ts: epoch_s() }),
        ClientEvent::Stats { rtt_ms, fps, dropped } => {
            debug!(token = %short_token(token), ?rtt_ms, ?fps, ?dropped, "transport metrics");
            None
        }
        ClientEvent::MouseMove { dx, dy } => {
            if allowed(state, token, "perm_mouse") {
                state.input.move_relative(dx.round() as i32, dy.round() as i32);
            }
            None
        }
        ClientEvent::MouseClick { button, double } => {
            if allowed(state, token, "perm_mouse") {
                state.input.click(parse_button(button.as_deref()), double);
            }
            None
        }
        ClientEvent::MouseDown { button } => {
            if allowed(state, token, "perm_mouse") {
                state.input.button_down(parse_button(button.as_deref()));
            }
            None
        }
        ClientEvent::MouseUp { button } => {
            if allowed(state, token, "perm_mouse") {
                state.input.button_up(parse_button(button.as_deref()));
            }
            None
        }
        ClientEvent::Scroll { dy } => {
            if allowed(state, token, "perm_mouse") {
                state.input.scroll(dy.round() as i32);
            }
            None
        }
        ClientEvent::KeyPress { key } => {
            if allowed(state, token, "perm_keyboard") {
                if !state.input.key_press(&key) {
                    warn!(key = %key, "key press not delivered");
                }
            }
            None
        }
        ClientEvent::Hotkey { keys } => {
            if !keys.is_empty() && allowed(state, token, "perm_keyboard") {
                state.input.hotkey(&keys);
            }
            None
        }
    }
}

/// Input events are dropped while the guard is locked or when the
/// session lacks the permission.
fn allowed(state: &Arc<AppState>, token: &str, perm: &str) -> bool {
    !state.guard.is_locked() && get_perm(state, token, perm)
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
