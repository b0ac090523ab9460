// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API contract types and server implementation for the HTTP surface and
//! the input socket.

pub mod auth;
pub mod http;
pub mod hub;
pub mod state;
pub mod ws;
pub mod ws_msg;

pub use state::AppState;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the axum `Router` with the public, streaming, system, and
/// management routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Public API surface
        .route("/api/handshake", post(http::handshake))
        .route("/api/pairing_status", get(http::pairing_status))
        .route("/api/protocol", get(http::get_protocol))
        .route("/api/stats", get(http::get_stats))
        .route("/api/diag", get(http::get_diag))
        // The body limit is enforced by the upload handler itself
        // (`UPLOAD_MAX_BYTES`), not by the framework default.
        .route(
            "/api/file/upload",
            post(http::upload_file).layer(axum::extract::DefaultBodyLimit::disable()),
        )
        .route("/api/qr/login", post(http::qr_login))
        // Streaming
        .route("/api/stream_offer", get(http::stream_offer))
        .route("/api/stream_stats", get(http::stream_stats))
        .route("/api/stream_backends", get(http::stream_backends))
        .route("/api/monitors", get(http::list_monitors))
        .route("/video_feed", get(http::video_feed))
        .route("/video_h264", get(http::video_h264))
        .route("/video_h265", get(http::video_h265))
        // System control
        .route("/system/{action}", post(http::system_action))
        .route("/volume/{action}", post(http::volume_action))
        // Input socket
        .route("/ws", get(ws::ws_handler))
        // Management plane (loopback only)
        .route("/api/local/info", get(http::local_info))
        .route("/api/local/events", get(http::local_events))
        .route("/api/local/pending_devices", get(http::local_pending_devices))
        .route("/api/local/trusted_devices", get(http::local_trusted_devices))
        .route("/api/local/security_state", get(http::local_security_state))
        .route("/api/local/device_approve", post(http::local_device_approve))
        .route("/api/local/qr_payload", get(http::local_qr_payload))
        .route("/api/local/stats", get(http::local_stats))
        .route("/api/local/device_rename", post(http::local_device_rename))
        .route(
            "/api/local/device_settings",
            get(http::local_get_device_settings).post(http::local_set_device_settings),
        )
        .route("/api/local/device_disconnect", post(http::local_device_disconnect))
        .route("/api/local/device_delete", post(http::local_device_delete))
        .route("/api/local/device_delete_by_id", post(http::local_device_delete_by_id))
        .route("/api/local/revoke_all", post(http::local_revoke_all))
        .route("/api/local/input_lock", post(http::local_input_lock))
        .route("/api/local/panic_mode", post(http::local_panic_mode))
        .route("/api/local/diag_bundle", get(http::local_diag_bundle))
        .route("/api/local/regenerate_code", post(http::local_regenerate_code))
        .route("/api/local/reload_config", post(http::local_reload_config))
        .route("/api/local/trigger_file", post(http::local_trigger_file))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
