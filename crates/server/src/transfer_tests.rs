// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{encode_path_segment, pick_transfer_params, sha256_file, trigger_file_send, TransferParams};
use crate::test_support::{seed_session, StateBuilder};
use crate::transport::ws_msg::ServerEvent;

fn settings(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

#[test]
fn presets_resolve_to_expected_profiles() {
    let fast = pick_transfer_params(&settings(&[("transfer_preset", json!("fast"))]));
    assert_eq!(fast, TransferParams { chunk: 1024 * 1024, sleep: Duration::ZERO });

    let balanced = pick_transfer_params(&settings(&[]));
    assert_eq!(balanced.chunk, 256 * 1024);

    let safe = pick_transfer_params(&settings(&[("transfer_preset", json!("safe"))]));
    assert_eq!(safe.chunk, 64 * 1024);

    let ultra = pick_transfer_params(&settings(&[("transfer_preset", json!("ULTRA_SAFE"))]));
    assert_eq!(ultra.chunk, 32 * 1024);
}

#[test]
fn chunk_and_sleep_overrides_apply_with_floors() {
    let params = pick_transfer_params(&settings(&[
        ("transfer_preset", json!("fast")),
        ("transfer_chunk", json!(10)),
        ("transfer_sleep", json!(0.25)),
    ]));
    assert_eq!(params.chunk, 1024);
    assert_eq!(params.sleep, Duration::from_secs_f64(0.25));
}

#[test]
fn unknown_preset_falls_back_to_balanced() {
    let params = pick_transfer_params(&settings(&[("transfer_preset", json!("warp"))]));
    assert_eq!(params.chunk, 256 * 1024);
}

#[test]
fn path_segment_encoding() {
    assert_eq!(encode_path_segment("report.pdf"), "report.pdf");
    assert_eq!(encode_path_segment("my file.txt"), "my%20file.txt");
    assert_eq!(encode_path_segment("a/b"), "a%2Fb");
}

#[test]
fn sha256_matches_known_vector() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("a.txt");
    std::fs::write(&path, b"hello")?;
    let (digest, size) = sha256_file(&path)?;
    assert_eq!(digest, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
    assert_eq!(size, 5);
    Ok(())
}

#[tokio::test]
async fn trigger_requires_permission_and_liveness() -> anyhow::Result<()> {
    let ctx = StateBuilder::new().build();
    let token = seed_session(&ctx, "d-1", "Phone");

    // No socket bound yet.
    let (ok, msg) = trigger_file_send(&ctx.state, &token, "/tmp/whatever").await;
    assert!(!ok);
    assert_eq!(msg, "Offline");

    // Permission off.
    let mut patch = Map::new();
    patch.insert("perm_file_send".to_owned(), json!(false));
    ctx.state.sessions.update_settings(&token, patch);
    let (ok, msg) = trigger_file_send(&ctx.state, &token, "/tmp/whatever").await;
    assert!(!ok);
    assert_eq!(msg, "permission_denied:perm_file_send");
    Ok(())
}

#[tokio::test]
async fn trigger_reports_missing_file() -> anyhow::Result<()> {
    let ctx = StateBuilder::new().build();
    let token = seed_session(&ctx, "d-1", "Phone");
    let _registration = ctx.state.hub.register(&token);
    let (ok, msg) = trigger_file_send(&ctx.state, &token, "/definitely/not/here.bin").await;
    assert!(!ok);
    assert_eq!(msg, "File missing");
    Ok(())
}

#[tokio::test]
async fn one_shot_origin_serves_once_with_token_and_hash() -> anyhow::Result<()> {
    let ctx = StateBuilder::new().build();
    let token = seed_session(&ctx, "d-1", "Phone");
    let mut registration = ctx.state.hub.register(&token);

    let payload = b"transfer payload bytes".to_vec();
    let file = ctx.dir.path().join("send me.bin");
    std::fs::write(&file, &payload)?;

    let (ok, msg) = trigger_file_send(&ctx.state, &token, &file.to_string_lossy()).await;
    assert!(ok, "{msg}");

    let event = tokio::time::timeout(Duration::from_secs(2), registration.rx.recv())
        .await?
        .expect("file_transfer event");
    let ServerEvent::FileTransfer { filename, url, size, sha256 } = event else {
        anyhow::bail!("unexpected event");
    };
    assert_eq!(filename, "send me.bin");
    assert_eq!(size, payload.len() as u64);
    let (expected_sha, _) = sha256_file(&file)?;
    assert_eq!(sha256, expected_sha);

    // Fetch the one-shot URL with a raw HTTP/1.1 GET.
    let body = http_get(&url).await?;
    assert_eq!(body, payload);

    // Wrong token is rejected.
    let bad_url = url.split('?').next().map(|u| format!("{u}?t=wrong")).unwrap_or_default();
    let status = http_status(&bad_url).await?;
    assert_eq!(status, 403);
    Ok(())
}

/// Minimal HTTP/1.1 GET returning the response body.
async fn http_get(url: &str) -> anyhow::Result<Vec<u8>> {
    let (status, body) = http_fetch(url).await?;
    anyhow::ensure!(status == 200, "status {status}");
    Ok(body)
}

async fn http_status(url: &str) -> anyhow::Result<u16> {
    Ok(http_fetch(url).await?.0)
}

async fn http_fetch(url: &str) -> anyhow::Result<(u16, Vec<u8>)> {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
    // Connect via loopback so the origin's IP pinning sees the same
    // address the session was authorized from.
    let port: u16 = authority.rsplit(':').next().and_then(|p| p.parse().ok()).unwrap_or(80);
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await?;
    let request = format!("GET /{path} HTTP/1.1\r\nHost: {authority}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let header_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| anyhow::anyhow!("malformed response"))?;
    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("missing status"))?;
    Ok((status, raw[header_end + 4..].to_vec()))
}
