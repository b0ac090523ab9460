// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request authentication (token resolution) and per-operation
//! permission checks.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use serde_json::Value;

use crate::error::{ApiError, ErrorCode};
use crate::transport::state::AppState;

/// Permission defaults applied when a session has no explicit setting.
pub const DEFAULT_PERMS: [(&str, bool); 6] = [
    ("perm_mouse", true),
    ("perm_keyboard", true),
    ("perm_upload", true),
    ("perm_file_send", true),
    ("perm_stream", true),
    ("perm_power", false),
];

/// Resolve a session token from the request: `Authorization: Bearer`
/// first, then `?token=` only when `ALLOW_QUERY_TOKEN` is enabled.
/// The token must resolve to an approved session.
pub fn resolve_token(
    state: &AppState,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<String, ApiError> {
    if let Some(token) = bearer_token(headers) {
        if state.sessions.get_session(&token, false).is_some() {
            return Ok(token);
        }
    }
    if state.config().allow_query_token {
        if let Some(token) = query_token(query) {
            if state.sessions.get_session(&token, false).is_some() {
                return Ok(token);
            }
        }
    }
    Err(ErrorCode::Unauthorized.with("Unauthorized"))
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    (!token.is_empty()).then(|| token.to_owned())
}

pub fn query_token(query: Option<&str>) -> Option<String> {
    for pair in query?.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            if !value.is_empty() {
                return Some(value.to_owned());
            }
        }
    }
    None
}

/// Extractor yielding the authenticated session token.
pub struct AuthedToken(pub String);

impl FromRequestParts<Arc<AppState>> for AuthedToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        resolve_token(state, &parts.headers, parts.uri.query()).map(AuthedToken)
    }
}

/// Extractor yielding the observed remote IP. Falls back to loopback
/// when the transport does not provide connect info (mock test servers).
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip().to_string())
            .unwrap_or_else(|| "127.0.0.1".to_owned());
        Ok(ClientIp(ip))
    }
}

/// Coerce a settings value into a permission flag.
///
/// Recognized truthy strings: `1,true,yes,on,y,t`; falsy:
/// `0,false,no,off,n,f`. Other non-empty strings are truthy; null/empty
/// yield the default.
pub fn coerce_flag(value: &Value, default: bool) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(default),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" => default,
            "1" | "true" | "yes" | "on" | "y" | "t" => true,
            "0" | "false" | "no" | "off" | "n" | "f" => false,
            _ => true,
        },
        Value::Null => default,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn perm_default(key: &str) -> bool {
    DEFAULT_PERMS.iter().find(|(name, _)| *name == key).map(|(_, v)| *v).unwrap_or(false)
}

/// Effective permission value for a session token (pending included, so
/// the launcher can inspect queued devices).
pub fn get_perm(state: &AppState, token: &str, key: &str) -> bool {
    let default = perm_default(key);
    let Some(session) = state.sessions.get_session(token, true) else {
        return false;
    };
    match session.settings.get(key) {
        Some(value) => coerce_flag(value, default),
        None => default,
    }
}

/// Reject with `403 permission_denied:<key>` when the permission is off.
pub fn require_perm(state: &AppState, token: &str, key: &str) -> Result<(), ApiError> {
    if get_perm(state, token, key) {
        Ok(())
    } else {
        Err(ErrorCode::PermissionDenied.with(format!("permission_denied:{key}")))
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
