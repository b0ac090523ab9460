// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-to-client file transfer: a one-shot authenticated HTTP origin
//! per transfer, announced to the device over its input socket.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path as UrlPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::net::{find_free_port, get_local_ip};
use crate::pairing::random_token;
use crate::transport::auth::get_perm;
use crate::transport::state::AppState;
use crate::transport::ws_msg::ServerEvent;

/// The origin shuts down after one successful serve or this long.
const TRANSFER_WATCHDOG: Duration = Duration::from_secs(300);

/// Throughput profile applied while serving a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferParams {
    pub chunk: usize,
    pub sleep: Duration,
}

/// Resolve the device's transfer profile: preset name plus optional
/// per-device chunk/sleep overrides.
pub fn pick_transfer_params(settings: &Map<String, Value>) -> TransferParams {
    let preset = settings
        .get("transfer_preset")
        .and_then(Value::as_str)
        .unwrap_or("balanced")
        .to_ascii_lowercase();
    let mut params = match preset.as_str() {
        "fast" => TransferParams { chunk: 1024 * 1024, sleep: Duration::ZERO },
        "safe" => TransferParams { chunk: 64 * 1024, sleep: Duration::from_micros(2000) },
        "ultra_safe" => TransferParams { chunk: 32 * 1024, sleep: Duration::from_micros(5000) },
        _ => TransferParams { chunk: 256 * 1024, sleep: Duration::from_micros(1000) },
    };
    if let Some(chunk) = settings.get("transfer_chunk").and_then(Value::as_u64) {
        params.chunk = (chunk as usize).max(1024);
    }
    if let Some(sleep) = settings.get("transfer_sleep").and_then(Value::as_f64) {
        params.sleep = Duration::from_secs_f64(sleep.max(0.0));
    }
    params
}

/// Compute the SHA-256 and size of a file.
pub fn sha256_file(path: &std::path::Path) -> std::io::Result<(String, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let total = std::io::copy(&mut file, &mut hasher)?;
    Ok((hex(&hasher.finalize()), total))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Percent-encode a filename for use as a URL path segment.
pub fn encode_path_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

struct OneShotOrigin {
    path: PathBuf,
    filename: String,
    dl_token: String,
    allow_ip: String,
    params: TransferParams,
    served: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    #[serde(default)]
    t: String,
}

/// Trigger a file send to a paired device. Returns `(ok, message)` the
/// way the launcher consumes it.
pub async fn trigger_file_send(state: &Arc<AppState>, token: &str, file_path: &str) -> (bool, String) {
    if !get_perm(state, token, "perm_file_send") {
        return (false, "permission_denied:perm_file_send".to_owned());
    }
    let Some(session) = state.sessions.get_session(token, false) else {
        return (false, "Offline".to_owned());
    };
    if !state.hub.is_online(token) {
        return (false, "Offline".to_owned());
    }
    let path = PathBuf::from(file_path);
    if !path.is_file() {
        return (false, "File missing".to_owned());
    }
    let Some(filename) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return (false, "File missing".to_owned());
    };

    let hash_path = path.clone();
    let digest = tokio::task::spawn_blocking(move || sha256_file(&hash_path)).await;
    let (sha256, size) = match digest {
        Ok(Ok(result)) => result,
        _ => return (false, "File unreadable".to_owned()),
    };

    let Ok(port) = find_free_port() else {
        return (false, "No free port".to_owned());
    };
    let dl_token = random_token();
    let params = pick_transfer_params(&session.settings);
    let origin = Arc::new(OneShotOrigin {
        path,
        filename: filename.clone(),
        dl_token: dl_token.clone(),
        allow_ip: session.ip.clone(),
        params,
        served: CancellationToken::new(),
    });
    if let Err(e) = spawn_one_shot_origin(Arc::clone(&origin), port).await {
        return (false, format!("Transporter failed: {e}"));
    }

    let scheme = state.config().scheme;
    let url = format!(
        "{scheme}://{}:{port}/{}?t={dl_token}",
        get_local_ip(),
        encode_path_segment(&filename),
    );
    info!(
        device = %session.device_name,
        ip = %session.ip,
        chunk = params.chunk,
        file = %filename,
        "transfer origin started"
    );

    let delivered = state.hub.send(
        token,
        ServerEvent::FileTransfer { filename, url, size, sha256 },
    );
    if !delivered {
        origin.served.cancel();
        return (false, "Offline".to_owned());
    }
    (true, "Transporter started".to_owned())
}

/// Bind the one-shot origin and serve until one download completes or
/// the watchdog fires.
async fn spawn_one_shot_origin(origin: Arc<OneShotOrigin>, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    let served = origin.served.clone();
    let router = Router::new().route("/{name}", get(serve_file)).with_state(origin);
    tokio::spawn(async move {
        let shutdown = async move {
            tokio::select! {
                _ = served.cancelled() => {}
                _ = tokio::time::sleep(TRANSFER_WATCHDOG) => {}
            }
        };
        let serve = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown);
        if let Err(e) = serve.await {
            warn!(err = %e, "transfer origin failed");
        }
    });
    Ok(())
}

/// Single handler of the one-shot origin: exact filename, token match,
/// optional client IP pinning, throttled streaming.
async fn serve_file(
    State(origin): State<Arc<OneShotOrigin>>,
    UrlPath(name): UrlPath<String>,
    Query(query): Query<DownloadQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    if name != origin.filename {
        return StatusCode::NOT_FOUND.into_response();
    }
    if !origin.allow_ip.is_empty() && addr.ip().to_string() != origin.allow_ip {
        return StatusCode::FORBIDDEN.into_response();
    }
    if query.t != origin.dl_token {
        return StatusCode::FORBIDDEN.into_response();
    }
    let Ok(file) = tokio::fs::File::open(&origin.path).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let size = file.metadata().await.map(|m| m.len()).unwrap_or(0);

    let chunk = origin.params.chunk.max(1024);
    let sleep = origin.params.sleep;
    let served = origin.served.clone();
    let stream = futures_util::stream::unfold(
        (file, served, false),
        move |(mut file, served, done)| async move {
            if done {
                return None;
            }
            let mut buf = vec![0u8; chunk];
            match file.read(&mut buf).await {
                Ok(0) => {
                    // Completed download: let the origin shut down.
                    served.cancel();
                    None
                }
                Ok(n) => {
                    buf.truncate(n);
                    if !sleep.is_zero() {
                        tokio::time::sleep(sleep).await;
                    }
                    Some((Ok::<_, std::io::Error>(bytes::Bytes::from(buf)), (file, served, false)))
                }
                Err(e) => Some((Err(e), (file, served, true))),
            }
        },
    );

    let encoded = encode_path_segment(&origin.filename);
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/octet-stream"));
    if let Ok(value) = header::HeaderValue::from_str(&size.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Ok(value) = header::HeaderValue::from_str(&format!("attachment; filename*=UTF-8''{encoded}")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

#[cfg(test)]
#[path = "transfer_tests.rs"]
mod tests;
