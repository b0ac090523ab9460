// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request/response types and axum handler implementations.

pub mod core;
pub mod local;
pub mod stream;
pub mod system;
pub mod upload;

pub use self::core::*;
pub use self::local::*;
pub use self::stream::*;
pub use self::system::*;
pub use self::upload::*;

use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::Value;

use crate::protocol::merge_protocol;
use crate::transport::state::AppState;

/// Merge the protocol payload into a JSON object response.
pub(crate) fn with_protocol(mut value: Value) -> axum::Json<Value> {
    if let Some(map) = value.as_object_mut() {
        merge_protocol(map);
    }
    axum::Json(value)
}

/// Merge extra key/value pairs into a JSON object.
pub(crate) fn merge_object(mut value: Value, extra: Value) -> Value {
    if let (Some(map), Value::Object(extra)) = (value.as_object_mut(), extra) {
        for (k, v) in extra {
            map.insert(k, v);
        }
    }
    value
}

/// Absolute base URL for self-referential links: the request `Host`
/// header when present, otherwise the LAN address and bound port.
pub(crate) fn base_url(state: &Arc<AppState>, headers: &HeaderMap) -> String {
    let scheme = state.config().scheme;
    match headers.get("host").and_then(|v| v.to_str().ok()) {
        Some(host) if !host.trim().is_empty() => format!("{scheme}://{}", host.trim()),
        _ => format!("{scheme}://{}:{}", crate::net::get_local_ip(), state.bound_port()),
    }
}
