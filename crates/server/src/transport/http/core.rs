// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Public API surface: handshake, pairing status, protocol, host stats,
//! and extended diagnostics.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::protocol::{epoch_s, protocol_payload};
use crate::transport::auth::{require_perm, AuthedToken, ClientIp};
use crate::transport::http::{merge_object, with_protocol};
use crate::transport::state::AppState;
use crate::transport::ws_msg::ServerEvent;

#[derive(Debug, Deserialize)]
pub struct HandshakeRequest {
    pub code: String,
    pub device_id: String,
    pub device_name: String,
    #[serde(default)]
    pub protocol_version: Option<u32>,
    #[serde(default)]
    pub capabilities: Option<Value>,
}

/// Record a freshly authorized session: events, socket cleanup for
/// evicted victims, optional single-use rotation. Returns the response
/// payload shared by handshake and QR login.
pub(crate) fn finish_authorization(
    state: &Arc<AppState>,
    source: &str,
    device_id: &str,
    device_name: &str,
    ip: &str,
) -> Value {
    let now = epoch_s();
    let approval_required = state.config().device_approval_required;
    let approved = !approval_required;
    let outcome = state.sessions.authorize(device_id, device_name, ip, approved, now);
    for victim in &outcome.evicted {
        state.hub.close(
            victim,
            Some(ServerEvent::SessionRevoked { reason: "evicted".to_owned() }),
        );
        state.stabilizer.forget(victim);
    }

    let payload = json!({
        "token": outcome.token,
        "device_id": device_id,
        "name": device_name,
        "ip": ip,
    });
    if approved {
        state.events.emit(
            "device_connected",
            "CyberDeck",
            &format!("Device connected: {device_name}"),
            payload,
        );
    } else {
        state.events.emit(
            "device_pending",
            "CyberDeck",
            &format!("Device approval required: {device_name}"),
            payload,
        );
    }

    let mut rotated = false;
    if state.pairing.single_use() {
        state.pairing.rotate(now);
        state.pin.reset();
        rotated = true;
        state.events.emit(
            "pairing_rotated",
            "CyberDeck",
            "Pairing code rotated after successful authorization",
            json!({"source": source, "device_id": device_id, "name": device_name}),
        );
    }
    info!(device = device_name, device_id, ip, approved, source, "authorization ok");

    merge_object(
        json!({
            "status": "ok",
            "approved": approved,
            "approval_pending": !approved,
            "token": outcome.token,
            "server_name": state.config().server_name(),
            "pairing_rotated": rotated,
        }),
        serde_json::to_value(state.pairing.meta(now)).unwrap_or_default(),
    )
}

/// `POST /api/handshake` — pair a device with the 4-digit code.
pub async fn handshake(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(req): Json<HandshakeRequest>,
) -> ApiResult<Json<Value>> {
    let now = epoch_s();
    if state.pairing.is_expired(now) {
        return Err(ErrorCode::PairingExpired.with("pairing_expired"));
    }

    let limits = state.pin_limits();
    let (allowed, retry_after) = state.pin.check(&ip, now, &limits);
    if !allowed {
        return Err(ApiError::rate_limited(retry_after));
    }

    if req.code != state.pairing.code() {
        state.pin.record_failure(&ip, now, &limits);
        return Err(ErrorCode::Unauthorized.with("Invalid Code"));
    }
    state.pin.record_success(&ip);

    let body = finish_authorization(&state, "handshake", &req.device_id, &req.device_name, &ip);
    Ok(with_protocol(body))
}

#[derive(Debug, Deserialize)]
pub struct PairingStatusQuery {
    #[serde(default)]
    pub token: String,
}

/// `GET /api/pairing_status` — approval status for a token, pending
/// sessions included.
pub async fn pairing_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PairingStatusQuery>,
) -> ApiResult<Json<Value>> {
    let token = query.token.trim();
    if token.is_empty() {
        return Err(ErrorCode::InvalidInput.with("token_required"));
    }
    let Some(session) = state.sessions.get_session(token, true) else {
        return Err(ErrorCode::NotFound.with("session_not_found"));
    };
    Ok(with_protocol(json!({
        "status": "ok",
        "token": token,
        "approved": session.approved,
        "approval_pending": !session.approved,
        "device_id": session.device_id,
        "device_name": session.device_name,
        "server_name": state.config().server_name(),
    })))
}

/// `GET /api/protocol` — protocol metadata for the current build.
pub async fn get_protocol() -> Json<Value> {
    Json(serde_json::to_value(protocol_payload()).unwrap_or_default())
}

/// `GET /api/stats` — lightweight host metrics for authenticated clients.
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    AuthedToken(_token): AuthedToken,
) -> Json<Value> {
    with_protocol(json!({
        "cpu": state.cpu_percent(),
        "ram": state.ram_percent(),
    }))
}

/// `GET /api/diag` — extended diagnostics including stream and socket
/// runtime state.
pub async fn get_diag(
    State(state): State<Arc<AppState>>,
    AuthedToken(token): AuthedToken,
) -> ApiResult<Json<Value>> {
    require_perm(&state, &token, "perm_stream")?;
    let stream = super::stream::stream_stats_value(&state).await;
    Ok(with_protocol(json!({
        "cpu": state.cpu_percent(),
        "ram": state.ram_percent(),
        "hostname": state.config().server_name(),
        "stream": stream,
        "ws": {
            "online": state.hub.is_online(&token),
            "ws_clients": state.hub.online_count(),
        },
    })))
}

#[cfg(test)]
#[path = "core_tests.rs"]
mod tests;
