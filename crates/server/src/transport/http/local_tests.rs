// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use serde_json::{json, Value};

use crate::test_support::{seed_session, StateBuilder, TestCtx};
use crate::transport::build_router;

fn server(ctx: &TestCtx) -> axum_test::TestServer {
    axum_test::TestServer::new(build_router(ctx.state.clone())).expect("test server")
}

#[tokio::test]
async fn info_reports_pairing_and_devices() {
    let ctx = StateBuilder::new().pairing_code("1234").build();
    seed_session(&ctx, "d-1", "Phone");
    let server = server(&ctx);

    let res = server.get("/api/local/info").await;
    res.assert_status(StatusCode::OK);
    let body: Value = res.json();
    assert_eq!(body["pairing_code"], "1234");
    assert_eq!(body["devices"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["security"]["locked"], false);
    assert!(body["pin_limiter"]["tracked_ips"].is_number());
    assert!(body["protocol_version"].is_number());
}

#[tokio::test]
async fn events_endpoint_pages_by_cursor() {
    let ctx = StateBuilder::new().build();
    for i in 0..5 {
        ctx.state.events.emit("event", "", &format!("m{i}"), json!({}));
    }
    let server = server(&ctx);

    let res = server.get("/api/local/events?since_id=3&limit=10").await;
    res.assert_status(StatusCode::OK);
    let body: Value = res.json();
    assert_eq!(body["latest_id"], 5);
    assert_eq!(body["events"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn approve_moves_pending_session_into_active_set() {
    let ctx = StateBuilder::new().pairing_code("1234").approval_required(true).build();
    let server = server(&ctx);

    let handshake: Value = server
        .post("/api/handshake")
        .json(&json!({"code": "1234", "device_id": "d-1", "device_name": "Phone"}))
        .await
        .json();
    let token = handshake["token"].as_str().expect("token").to_owned();

    let res = server.get("/api/local/pending_devices").await;
    let body: Value = res.json();
    assert_eq!(body["pending_devices"].as_array().map(Vec::len), Some(1));

    let res = server
        .post("/api/local/device_approve")
        .json(&json!({"token": token, "allow": true}))
        .await;
    res.assert_status(StatusCode::OK);
    assert!(ctx.state.sessions.get_session(&token, false).is_some_and(|s| s.approved));
    assert_eq!(ctx.state.sessions.counts(), (1, 0));
}

#[tokio::test]
async fn deny_deletes_the_pending_session() {
    let ctx = StateBuilder::new().approval_required(true).build();
    let token = ctx.state.sessions.authorize("d-1", "Phone", "ip", false, 0.0).token;
    let server = server(&ctx);

    let res = server
        .post("/api/local/device_approve")
        .json(&json!({"token": token, "allow": false}))
        .await;
    res.assert_status(StatusCode::OK);
    assert!(ctx.state.sessions.get_session(&token, true).is_none());

    server
        .post("/api/local/device_approve")
        .json(&json!({"token": token, "allow": true}))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn qr_pairing_is_one_shot() {
    // S4: a QR token authorizes exactly once.
    let ctx = StateBuilder::new().build();
    let server = server(&ctx);

    let payload: Value = server.get("/api/local/qr_payload").await.json();
    let qr_token = payload["payload"]["qr_token"].as_str().expect("qr_token").to_owned();
    assert!(payload["url"].as_str().is_some_and(|u| u.contains("qr_token=")));

    let res = server
        .post("/api/qr/login")
        .json(&json!({"qr_token": qr_token, "device_id": "qr-a", "device_name": "Mobile"}))
        .await;
    res.assert_status(StatusCode::OK);
    let body: Value = res.json();
    assert_eq!(body["status"], "ok");
    assert!(body["token"].as_str().is_some());

    let res = server
        .post("/api/qr/login")
        .json(&json!({"qr_token": qr_token, "device_id": "qr-a", "device_name": "Mobile"}))
        .await;
    res.assert_status(StatusCode::FORBIDDEN);
    let body: Value = res.json();
    assert_eq!(body["error"]["message"], "invalid_or_expired_qr_token");
}

#[tokio::test]
async fn qr_login_accepts_legacy_nonce_field() {
    let ctx = StateBuilder::new().build();
    let server = server(&ctx);
    let payload: Value = server.get("/api/local/qr_payload").await.json();
    let qr_token = payload["payload"]["qr_token"].as_str().expect("qr_token").to_owned();

    let res = server.post("/api/qr/login").json(&json!({"nonce": qr_token})).await;
    res.assert_status(StatusCode::OK);
    let body: Value = res.json();
    assert_eq!(body["approved"], true);
}

#[tokio::test]
async fn rename_and_settings_round_trip() {
    let ctx = StateBuilder::new().build();
    let token = seed_session(&ctx, "d-1", "Phone");
    let server = server(&ctx);

    let res = server
        .post("/api/local/device_rename")
        .json(&json!({"token": token, "alias": "couch", "note": "living room"}))
        .await;
    res.assert_status(StatusCode::OK);

    let settings: Value =
        server.get(&format!("/api/local/device_settings?token={token}")).await.json();
    assert_eq!(settings["settings"]["alias"], "couch");
    assert_eq!(settings["settings"]["note"], "living room");

    // Clearing the alias deletes the key.
    server
        .post("/api/local/device_rename")
        .json(&json!({"token": token, "note": "only note"}))
        .await
        .assert_status(StatusCode::OK);
    let settings: Value =
        server.get(&format!("/api/local/device_settings?token={token}")).await.json();
    assert!(settings["settings"].get("alias").is_none());

    let res = server
        .post("/api/local/device_settings")
        .json(&json!({"token": token, "settings": {"perm_power": true, "transfer_preset": "fast"}}))
        .await;
    res.assert_status(StatusCode::OK);
    let session = ctx.state.sessions.get_session(&token, false).expect("session");
    assert_eq!(session.settings.get("perm_power"), Some(&json!(true)));
}

#[tokio::test]
async fn trusted_devices_include_alias_metadata() {
    let ctx = StateBuilder::new().build();
    let token = seed_session(&ctx, "d-1", "Phone");
    let server = server(&ctx);
    server
        .post("/api/local/device_rename")
        .json(&json!({"token": token, "alias": "couch"}))
        .await
        .assert_status(StatusCode::OK);

    let body: Value = server.get("/api/local/trusted_devices").await.json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["trusted_devices"][0]["alias"], "couch");
    assert!(body["trusted_devices"][0]["last_seen_ago_s"].is_number());
}

#[tokio::test]
async fn disconnect_reports_offline_state() {
    let ctx = StateBuilder::new().build();
    let token = seed_session(&ctx, "d-1", "Phone");
    let server = server(&ctx);

    let body: Value =
        server.post("/api/local/device_disconnect").json(&json!({"token": token})).await.json();
    assert_eq!(body["msg"], "already_offline");

    let _registration = ctx.state.hub.register(&token);
    let body: Value =
        server.post("/api/local/device_disconnect").json(&json!({"token": token})).await.json();
    assert_eq!(body["ok"], true);
    assert!(body.get("msg").is_none());
    assert!(!ctx.state.hub.is_online(&token));
    // The session itself survives a disconnect.
    assert!(ctx.state.sessions.get_session(&token, false).is_some());
}

#[tokio::test]
async fn delete_by_token_and_by_device_id() {
    let ctx = StateBuilder::new().build();
    let token = seed_session(&ctx, "d-1", "Phone");
    seed_session(&ctx, "d-2", "Tablet");
    let server = server(&ctx);

    server
        .post("/api/local/device_delete")
        .json(&json!({"token": token}))
        .await
        .assert_status(StatusCode::OK);
    assert!(ctx.state.sessions.get_session(&token, true).is_none());

    let body: Value = server
        .post("/api/local/device_delete_by_id")
        .json(&json!({"device_id": "d-2"}))
        .await
        .json();
    assert_eq!(body["device_id"], "d-2");
    assert_eq!(ctx.state.sessions.counts(), (0, 0));

    server
        .post("/api/local/device_delete_by_id")
        .json(&json!({"device_id": "d-2"}))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn revoke_all_honors_keep_token() {
    let ctx = StateBuilder::new().build();
    let keep = seed_session(&ctx, "d-1", "Phone");
    seed_session(&ctx, "d-2", "Tablet");
    seed_session(&ctx, "d-3", "Laptop");
    let server = server(&ctx);

    let body: Value =
        server.post("/api/local/revoke_all").json(&json!({"keep_token": keep})).await.json();
    assert_eq!(body["revoked"], 2);
    assert_eq!(body["kept"], json!(keep));
    assert_eq!(ctx.state.sessions.counts(), (1, 0));
}

#[tokio::test]
async fn input_lock_toggles_guard_and_emits_event() {
    let ctx = StateBuilder::new().build();
    let server = server(&ctx);

    let body: Value = server
        .post("/api/local/input_lock")
        .json(&json!({"locked": true, "reason": "maintenance"}))
        .await
        .json();
    assert_eq!(body["security"]["locked"], true);
    assert_eq!(body["security"]["reason"], "maintenance");
    assert!(ctx.state.guard.is_locked());

    let page = ctx.state.events.list_after(0, 100);
    assert!(page.events.iter().any(|e| e.kind == "input_lock_changed"));

    let body: Value =
        server.post("/api/local/input_lock").json(&json!({"locked": false})).await.json();
    assert_eq!(body["security"]["locked"], false);
    assert!(!ctx.state.guard.is_locked());
}

#[tokio::test]
async fn panic_mode_revokes_all_but_kept_and_locks_input() {
    // S6: three sessions, keep one, lock input.
    let ctx = StateBuilder::new().build();
    let t1 = seed_session(&ctx, "d-1", "Phone");
    let t2 = seed_session(&ctx, "d-2", "Tablet");
    let t3 = seed_session(&ctx, "d-3", "Laptop");
    let _s2 = ctx.state.hub.register(&t2);
    let _s3 = ctx.state.hub.register(&t3);
    let server = server(&ctx);

    let body: Value = server
        .post("/api/local/panic_mode")
        .json(&json!({"keep_token": t1, "lock_input": true}))
        .await
        .json();
    assert_eq!(body["revoked"], 2);
    assert_eq!(body["kept"], json!(t1));
    assert_eq!(body["security"]["locked"], true);

    assert!(ctx.state.sessions.get_session(&t1, true).is_some());
    assert!(ctx.state.sessions.get_session(&t2, true).is_none());
    assert!(ctx.state.sessions.get_session(&t3, true).is_none());
    // Sockets of revoked sessions no longer accept writes.
    assert!(!ctx.state.hub.send(&t2, crate::transport::ws_msg::ServerEvent::Pong { ts: 0.0 }));
    assert!(!ctx.state.hub.send(&t3, crate::transport::ws_msg::ServerEvent::Pong { ts: 0.0 }));
    assert!(ctx.state.guard.is_locked());
}

#[tokio::test]
async fn panic_mode_without_lock_keeps_guard_state() {
    let ctx = StateBuilder::new().build();
    seed_session(&ctx, "d-1", "Phone");
    let server = server(&ctx);

    let body: Value =
        server.post("/api/local/panic_mode").json(&json!({"lock_input": false})).await.json();
    assert_eq!(body["revoked"], 1);
    assert_eq!(body["kept"], Value::Null);
    assert_eq!(body["security"]["locked"], false);
    assert!(!ctx.state.guard.is_locked());
}

#[tokio::test]
async fn regenerate_code_rotates_and_returns_meta() {
    let ctx = StateBuilder::new().pairing_code("1234").build();
    let server = server(&ctx);

    let body: Value = server.post("/api/local/regenerate_code").await.json();
    let new_code = body["new_code"].as_str().expect("new_code");
    assert_eq!(new_code.len(), 4);
    assert_eq!(body["pairing_code"], new_code);
    assert_eq!(ctx.state.pairing.code(), new_code);
}

#[tokio::test]
async fn security_state_and_diag_bundle_shapes() {
    let ctx = StateBuilder::new().build();
    let server = server(&ctx);

    let body: Value = server.get("/api/local/security_state").await.json();
    assert_eq!(body["security"]["locked"], false);
    assert!(body["pairing_code"].is_string());

    let bundle: Value = server.get("/api/local/diag_bundle").await.json();
    for key in ["collected_at", "version", "server_id", "pairing", "security", "pin_limiter", "devices", "protocol"] {
        assert!(bundle.get(key).is_some(), "missing {key}");
    }
}

#[tokio::test]
async fn reload_config_rereads_environment() {
    let ctx = StateBuilder::new().build();
    let server = server(&ctx);
    let body: Value = server.post("/api/local/reload_config").await.json();
    assert_eq!(body["ok"], true);
    assert!(body["upload_max_bytes"].is_number());
}

#[tokio::test]
async fn trigger_file_reports_offline_device() {
    let ctx = StateBuilder::new().build();
    let token = seed_session(&ctx, "d-1", "Phone");
    let server = server(&ctx);

    let body: Value = server
        .post("/api/local/trigger_file")
        .json(&json!({"token": token, "file_path": "/tmp/file.bin"}))
        .await
        .json();
    assert_eq!(body["ok"], false);
    assert_eq!(body["msg"], "Offline");
}
