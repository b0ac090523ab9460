// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Management API consumed by the launcher. Every handler except QR
//! login is restricted to loopback callers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::{ApiResult, ErrorCode};
use crate::net::{get_local_ip, is_loopback_host};
use crate::protocol::{epoch_s, protocol_payload};
use crate::session::Session;
use crate::transfer::trigger_file_send;
use crate::transport::auth::ClientIp;
use crate::transport::http::{merge_object, with_protocol};
use crate::transport::state::AppState;
use crate::transport::ws_msg::ServerEvent;

/// Allow access only from localhost/loopback addresses.
fn require_localhost(ip: &str) -> ApiResult<()> {
    if is_loopback_host(ip) {
        Ok(())
    } else {
        Err(ErrorCode::Unauthorized.with("loopback_only"))
    }
}

fn session_row(session: &Session) -> Value {
    serde_json::to_value(session).unwrap_or_default()
}

/// Trusted-device row with alias/note and recency metadata.
fn trusted_device_row(session: &Session, now: f64) -> Value {
    let mut row = session_row(session);
    if let Some(map) = row.as_object_mut() {
        let alias = session.settings.get("alias").and_then(Value::as_str).unwrap_or("").trim();
        let note = session.settings.get("note").and_then(Value::as_str).unwrap_or("").trim();
        map.insert("alias".to_owned(), alias.into());
        map.insert("note".to_owned(), note.into());
        map.insert(
            "last_seen_ago_s".to_owned(),
            if session.last_seen_ts > 0.0 {
                (((now - session.last_seen_ts).max(0.0)) as u64).into()
            } else {
                Value::Null
            },
        );
        map.insert(
            "created_ago_s".to_owned(),
            if session.created_ts > 0.0 {
                (((now - session.created_ts).max(0.0)) as u64).into()
            } else {
                Value::Null
            },
        );
    }
    row
}

// -- info / events / device listings ------------------------------------------

/// `GET /api/local/info` — runtime information for the launcher.
pub async fn local_info(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let config = state.config();
    let now = epoch_s();
    let meta = serde_json::to_value(state.pairing.meta(now)).unwrap_or_default();
    let body = merge_object(
        json!({
            "version": crate::protocol::SERVER_VERSION,
            "server_id": state.server_id,
            "ip": get_local_ip(),
            "port": state.bound_port(),
            "scheme": config.scheme,
            "tls": config.tls_enabled,
            "hostname": config.server_name(),
            "approval_required": config.device_approval_required,
            "security": state.guard.snapshot(),
            "pin_limiter": state.pin.stats(),
            "devices": state.sessions.get_all_devices().iter().map(session_row).collect::<Vec<_>>(),
            "pending_devices": state.sessions.get_pending_devices().iter().map(session_row).collect::<Vec<_>>(),
        }),
        meta,
    );
    Ok(with_protocol(body))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since_id: u64,
    #[serde(default = "default_events_limit")]
    pub limit: usize,
}

fn default_events_limit() -> usize {
    100
}

/// `GET /api/local/events` — event stream for launcher notifications.
pub async fn local_events(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let page = state.events.list_after(query.since_id, query.limit);
    Ok(Json(json!({ "events": page.events, "latest_id": page.latest_id })))
}

/// `GET /api/local/pending_devices` — sessions waiting for approval.
pub async fn local_pending_devices(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let rows: Vec<Value> = state.sessions.get_pending_devices().iter().map(session_row).collect();
    Ok(Json(json!({ "pending_devices": rows })))
}

/// `GET /api/local/trusted_devices` — approved devices with activity
/// metadata.
pub async fn local_trusted_devices(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let now = epoch_s();
    let rows: Vec<Value> =
        state.sessions.get_all_devices().iter().map(|s| trusted_device_row(s, now)).collect();
    let total = rows.len();
    Ok(Json(json!({ "trusted_devices": rows, "total": total })))
}

/// `GET /api/local/security_state` — input lock state plus pairing TTL
/// metadata.
pub async fn local_security_state(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let meta = serde_json::to_value(state.pairing.meta(epoch_s())).unwrap_or_default();
    Ok(Json(merge_object(json!({ "security": state.guard.snapshot() }), meta)))
}

// -- approval -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub token: String,
    #[serde(default = "default_true")]
    pub allow: bool,
}

fn default_true() -> bool {
    true
}

/// `POST /api/local/device_approve` — approve or deny a pending session.
pub async fn local_device_approve(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let token = req.token.trim();
    if token.is_empty() {
        return Err(ErrorCode::InvalidInput.with("token_required"));
    }
    let Some(session) = state.sessions.get_session(token, true) else {
        return Err(ErrorCode::NotFound.with("device_not_found"));
    };
    if req.allow {
        if !state.sessions.set_approved(token, true) {
            return Err(ErrorCode::Internal.with("approve_failed"));
        }
        let payload = json!({
            "token": token,
            "device_id": session.device_id,
            "name": session.device_name,
        });
        state.events.emit(
            "device_approved",
            "CyberDeck",
            &format!("Device approved: {}", session.device_name),
            payload.clone(),
        );
        state.events.emit(
            "device_connected",
            "CyberDeck",
            &format!("Device connected: {}", session.device_name),
            merge_object(payload, json!({"ip": session.ip})),
        );
        return Ok(Json(json!({ "ok": true, "approved": true })));
    }
    if !state.revoke_session(token, "denied") {
        return Err(ErrorCode::Internal.with("delete_failed"));
    }
    state.events.emit(
        "device_denied",
        "CyberDeck",
        &format!("Device denied: {}", session.device_name),
        json!({"token": token, "device_id": session.device_id, "name": session.device_name}),
    );
    Ok(Json(json!({ "ok": true, "approved": false })))
}

// -- QR pairing ---------------------------------------------------------------

/// `GET /api/local/qr_payload` — one-time QR payload for mobile pairing.
pub async fn local_qr_payload(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let config = state.config();
    let now = epoch_s();
    let host_ip = get_local_ip();
    let port = state.bound_port();
    let scheme = config.scheme.clone();
    let qr_token = state.qr.issue(now);
    let meta = state.pairing.meta(now);

    let payload = merge_object(
        json!({
            "type": "cyberdeck_qr_v1",
            "server_id": state.server_id,
            "hostname": config.server_name(),
            "version": crate::protocol::SERVER_VERSION,
            "ip": host_ip,
            "port": port,
            "scheme": scheme,
            "ts": now as u64,
            "qr_token": qr_token,
        }),
        serde_json::to_value(&meta).unwrap_or_default(),
    );

    // The QR encodes a URL so mobile cameras can open the web client
    // directly; the one-shot token rides along as a query parameter.
    let exp = meta.pairing_expires_at.map(|v| (v as u64).to_string()).unwrap_or_default();
    let qr_token = payload.get("qr_token").and_then(Value::as_str).unwrap_or_default();
    let url = format!(
        "{scheme}://{host_ip}:{port}/?server_id={}&hostname={}&code={}&ts={}&qr_token={qr_token}&exp={exp}",
        state.server_id,
        crate::transfer::encode_path_segment(&config.server_name()),
        meta.pairing_code,
        now as u64,
    );

    Ok(Json(json!({ "payload": payload, "url": url })))
}

#[derive(Debug, Deserialize)]
pub struct QrLoginRequest {
    #[serde(default)]
    pub qr_token: Option<String>,
    /// Older mobile payloads used `nonce` for the same value.
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
}

/// `POST /api/qr/login` — authorize a device with a one-shot QR token.
pub async fn qr_login(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(req): Json<QrLoginRequest>,
) -> ApiResult<Json<Value>> {
    let now = epoch_s();
    let qr_token = req
        .qr_token
        .as_deref()
        .or(req.nonce.as_deref())
        .unwrap_or("")
        .trim()
        .to_owned();
    if qr_token.is_empty() {
        return Err(ErrorCode::InvalidInput.with("qr_token_required"));
    }
    if !state.qr.consume(&qr_token, now) {
        return Err(ErrorCode::Unauthorized.with("invalid_or_expired_qr_token"));
    }
    if state.pairing.is_expired(now) {
        return Err(ErrorCode::PairingExpired.with("pairing_expired"));
    }

    let device_id = match req.device_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_owned(),
        _ => format!("qr-{}", &crate::pairing::random_token()[..12]),
    };
    let device_name = match req.device_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => "CyberDeck Mobile".to_owned(),
    };
    let body = super::core::finish_authorization(&state, "qr_login", &device_id, &device_name, &ip);
    Ok(with_protocol(body))
}

// -- stats --------------------------------------------------------------------

/// `GET /api/local/stats` — host CPU, RAM, uptime, process memory.
pub async fn local_stats(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    Ok(Json(json!({
        "cpu": state.cpu_percent(),
        "ram": state.ram_percent(),
        "uptime_s": state.started_at.elapsed().as_secs(),
        "process_ram": state.process_rss(),
    })))
}

// -- device management --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub token: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// `POST /api/local/device_rename` — alias/note for a trusted device.
pub async fn local_device_rename(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(req): Json<RenameRequest>,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let token = req.token.trim();
    if token.is_empty() {
        return Err(ErrorCode::InvalidInput.with("token_required"));
    }
    if state.sessions.get_session(token, true).is_none() {
        return Err(ErrorCode::NotFound.with("device_not_found"));
    }
    let alias = req.alias.unwrap_or_default().trim().to_owned();
    let note = req.note.unwrap_or_default().trim().to_owned();
    let mut patch = Map::new();
    patch.insert("alias".to_owned(), if alias.is_empty() { Value::Null } else { alias.clone().into() });
    patch.insert("note".to_owned(), if note.is_empty() { Value::Null } else { note.clone().into() });
    if !state.sessions.update_settings(token, patch) {
        return Err(ErrorCode::Internal.with("rename_failed"));
    }
    Ok(Json(json!({ "ok": true, "token": token, "alias": alias, "note": note })))
}

#[derive(Debug, Deserialize)]
pub struct SettingsQuery {
    pub token: String,
}

/// `GET /api/local/device_settings` — persisted per-device settings.
pub async fn local_get_device_settings(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Query(query): Query<SettingsQuery>,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let Some(session) = state.sessions.get_session(&query.token, true) else {
        return Err(ErrorCode::NotFound.with("device_not_found"));
    };
    Ok(Json(json!({ "token": query.token, "settings": session.settings })))
}

#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    pub token: String,
    pub settings: Map<String, Value>,
}

/// `POST /api/local/device_settings` — update per-device settings.
pub async fn local_set_device_settings(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(req): Json<SettingsRequest>,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    if !state.sessions.update_settings(&req.token, req.settings) {
        return Err(ErrorCode::NotFound.with("device_not_found"));
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

/// `POST /api/local/device_disconnect` — close a session's socket
/// without deleting the session.
pub async fn local_device_disconnect(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(req): Json<TokenRequest>,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let Some(session) = state.sessions.get_session(&req.token, true) else {
        return Err(ErrorCode::NotFound.with("device_not_found"));
    };
    let had_socket = state.hub.close(&req.token, None);
    state.events.emit(
        "device_disconnected",
        "CyberDeck",
        &format!("Device disconnected: {}", session.device_name),
        json!({"token": req.token, "device_id": session.device_id, "name": session.device_name}),
    );
    if !had_socket {
        return Ok(Json(json!({ "ok": true, "msg": "already_offline" })));
    }
    Ok(Json(json!({ "ok": true })))
}

/// `POST /api/local/device_delete` — delete a session by token.
pub async fn local_device_delete(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(req): Json<TokenRequest>,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let Some(session) = state.sessions.get_session(&req.token, true) else {
        return Err(ErrorCode::NotFound.with("device_not_found"));
    };
    if !state.revoke_session(&req.token, "deleted") {
        return Err(ErrorCode::Internal.with("delete_failed"));
    }
    state.events.emit(
        "device_deleted",
        "CyberDeck",
        &format!("Device removed: {}", session.device_name),
        json!({"token": req.token, "device_id": session.device_id, "name": session.device_name}),
    );
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct DeviceIdRequest {
    pub device_id: String,
}

/// `POST /api/local/device_delete_by_id` — delete a session by device id.
pub async fn local_device_delete_by_id(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(req): Json<DeviceIdRequest>,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let device_id = req.device_id.trim();
    if device_id.is_empty() {
        return Err(ErrorCode::InvalidInput.with("device_id_required"));
    }
    let Some(token) = state.sessions.find_token_by_device_id(device_id, true) else {
        return Err(ErrorCode::NotFound.with("device_not_found"));
    };
    let session = state.sessions.get_session(&token, true);
    if !state.revoke_session(&token, "deleted") {
        return Err(ErrorCode::Internal.with("delete_failed"));
    }
    let name = session.map(|s| s.device_name).unwrap_or_default();
    state.events.emit(
        "device_deleted",
        "CyberDeck",
        &format!("Device removed: {name}"),
        json!({"token": token, "device_id": device_id, "name": name}),
    );
    Ok(Json(json!({ "ok": true, "token": token, "device_id": device_id })))
}

#[derive(Debug, Deserialize)]
pub struct RevokeAllRequest {
    #[serde(default)]
    pub keep_token: Option<String>,
}

/// `POST /api/local/revoke_all` — revoke all sessions except an optional
/// token.
pub async fn local_revoke_all(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(req): Json<RevokeAllRequest>,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let keep = req.keep_token.unwrap_or_default().trim().to_owned();
    let revoked = state.revoke_all(&keep);
    if revoked > 0 {
        state.events.emit(
            "sessions_revoked",
            "CyberDeck",
            &format!("Revoked {revoked} session(s)"),
            json!({"revoked": revoked, "kept": (!keep.is_empty()).then_some(keep.clone())}),
        );
    }
    Ok(Json(json!({
        "ok": true,
        "revoked": revoked,
        "kept": (!keep.is_empty()).then_some(keep),
    })))
}

// -- input lock / panic mode --------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct InputLockRequest {
    #[serde(default = "default_true")]
    pub locked: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

/// `POST /api/local/input_lock` — toggle the remote-input lock.
pub async fn local_input_lock(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(req): Json<InputLockRequest>,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let reason = req.reason.unwrap_or_default();
    let actor = req.actor.unwrap_or_else(|| "local_api".to_owned());
    let snapshot = state.guard.set_locked(req.locked, reason.trim(), actor.trim());
    state.hub.broadcast(&ServerEvent::InputLockChanged { security: snapshot.clone() });
    state.events.emit(
        "input_lock_changed",
        "CyberDeck",
        if snapshot.locked { "Remote input locked" } else { "Remote input unlocked" },
        json!({"security": snapshot}),
    );
    Ok(Json(json!({ "ok": true, "security": state.guard.snapshot() })))
}

#[derive(Debug, Deserialize)]
pub struct PanicRequest {
    #[serde(default)]
    pub keep_token: Option<String>,
    #[serde(default = "default_true")]
    pub lock_input: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `POST /api/local/panic_mode` — revoke sessions in one action and
/// optionally lock remote input.
pub async fn local_panic_mode(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(req): Json<PanicRequest>,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let keep = req.keep_token.unwrap_or_default().trim().to_owned();
    let revoked = state.revoke_all(&keep);
    let security = if req.lock_input {
        let reason = req.reason.unwrap_or_default();
        let reason = if reason.trim().is_empty() { "panic_mode" } else { reason.trim() };
        let snapshot = state.guard.set_locked(true, reason, "panic_mode");
        state.hub.broadcast(&ServerEvent::InputLockChanged { security: snapshot.clone() });
        snapshot
    } else {
        state.guard.snapshot()
    };
    state.events.emit(
        "panic_mode",
        "CyberDeck",
        &format!("Panic mode executed: revoked={revoked}"),
        json!({"revoked": revoked, "kept": (!keep.is_empty()).then_some(keep.clone()), "security": security}),
    );
    info!(revoked, kept = %keep, "panic mode executed");
    Ok(Json(json!({
        "ok": true,
        "revoked": revoked,
        "kept": (!keep.is_empty()).then_some(keep),
        "security": security,
    })))
}

// -- diagnostics / pairing rotation -------------------------------------------

/// `GET /api/local/diag_bundle` — bundled diagnostics for support.
pub async fn local_diag_bundle(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let config = state.config();
    let now = epoch_s();
    Ok(Json(json!({
        "collected_at": now as u64,
        "version": crate::protocol::SERVER_VERSION,
        "server_id": state.server_id,
        "hostname": config.server_name(),
        "scheme": config.scheme,
        "port": state.bound_port(),
        "tls_enabled": config.tls_enabled,
        "approval_required": config.device_approval_required,
        "cpu": state.cpu_percent(),
        "ram": state.ram_percent(),
        "process_ram": state.process_rss(),
        "uptime_s": state.started_at.elapsed().as_secs(),
        "pairing": serde_json::to_value(state.pairing.meta(now)).unwrap_or_default(),
        "security": state.guard.snapshot(),
        "pin_limiter": state.pin.stats(),
        "devices": state.sessions.get_all_devices().iter().map(session_row).collect::<Vec<_>>(),
        "pending_devices": state.sessions.get_pending_devices().iter().map(session_row).collect::<Vec<_>>(),
        "protocol": serde_json::to_value(protocol_payload()).unwrap_or_default(),
    })))
}

/// `POST /api/local/regenerate_code` — rotate the pairing code and reset
/// the PIN limiter.
pub async fn local_regenerate_code(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let now = epoch_s();
    let new_code = state.pairing.rotate(now);
    state.pin.reset();
    state.events.emit(
        "pairing_rotated",
        "CyberDeck",
        "Pairing code regenerated",
        json!({"source": "local_api"}),
    );
    info!("pairing code regenerated");
    let meta = serde_json::to_value(state.pairing.meta(now)).unwrap_or_default();
    Ok(Json(merge_object(json!({ "new_code": new_code }), meta)))
}

/// `POST /api/local/reload_config` — re-read every knob from the
/// process environment.
pub async fn local_reload_config(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    state.reload_config_from_env();
    let config = state.config();
    info!("configuration reloaded from environment");
    Ok(Json(json!({
        "ok": true,
        "approval_required": config.device_approval_required,
        "allow_query_token": config.allow_query_token,
        "upload_max_bytes": config.upload_max_bytes,
    })))
}

// -- file transfer ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TriggerFileRequest {
    pub token: String,
    pub file_path: String,
}

/// `POST /api/local/trigger_file` — start a server-to-client transfer.
pub async fn local_trigger_file(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(req): Json<TriggerFileRequest>,
) -> ApiResult<Json<Value>> {
    require_localhost(&ip)?;
    let (ok, msg) = trigger_file_send(&state, &req.token, &req.file_path).await;
    Ok(Json(json!({ "ok": ok, "msg": msg })))
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
