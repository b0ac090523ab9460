// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-to-server file upload: streamed multipart body with SHA-256
//! integrity, size/extension enforcement, and atomic placement.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{ApiResult, ErrorCode};
use crate::transfer::hex;
use crate::transport::auth::{require_perm, AuthedToken};
use crate::transport::state::AppState;

/// Sanitize the upload filename while preserving the extension.
pub fn normalized_upload_name(raw: &str) -> String {
    let raw = raw.replace('\\', "/");
    let name = raw.rsplit('/').next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        return "upload.bin".to_owned();
    }
    let clean: String = name.chars().filter(|c| *c != '\0').collect();
    let mut end = clean.len().min(240);
    while end > 0 && !clean.is_char_boundary(end) {
        end -= 1;
    }
    let trimmed = &clean[..end];
    if trimmed.is_empty() {
        "upload.bin".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Build a non-colliding path in the upload directory: `stem_1.ext`,
/// `stem_2.ext`, … capped at 10 000 before falling back to a random
/// suffix.
pub fn unique_upload_path(base_dir: &Path, filename: &str) -> (PathBuf, String) {
    let path = base_dir.join(filename);
    if !path.exists() {
        return (path, filename.to_owned());
    }
    let stem = Path::new(filename).file_stem().and_then(|s| s.to_str()).unwrap_or(filename);
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    for i in 1..=10_000u32 {
        let candidate = format!("{stem}_{i}{ext}");
        let path = base_dir.join(&candidate);
        if !path.exists() {
            return (path, candidate);
        }
    }
    let candidate = format!("{stem}_{}{ext}", &crate::pairing::random_token()[..8]);
    let path = base_dir.join(&candidate);
    (path, candidate)
}

/// Lowercased dot-prefixed extension of a filename, empty when absent.
pub fn file_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

fn cleanup_tmp_upload(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), err = %e, "tmp upload cleanup failed");
        }
    }
}

/// `POST /api/file/upload` — validate and atomically persist an uploaded
/// file into the configured upload directory.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    AuthedToken(token): AuthedToken,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    require_perm(&state, &token, "perm_upload")?;
    let config = state.config();

    let field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|e| ErrorCode::InvalidInput.with(format!("invalid multipart body: {e}")))?
        {
            Some(candidate) => {
                if candidate.name() == Some("file") || candidate.file_name().is_some() {
                    break Some(candidate);
                }
            }
            None => break None,
        }
    };
    let mut field = field.ok_or_else(|| ErrorCode::InvalidInput.with("file_field_required"))?;

    let name = normalized_upload_name(field.file_name().unwrap_or("upload.bin"));
    let ext = file_extension(&name);
    let allowed = config.allowed_extensions();
    if !allowed.is_empty() && !allowed.contains(&ext) {
        return Err(ErrorCode::UploadRejected.with("upload_extension_not_allowed"));
    }

    tokio::fs::create_dir_all(&config.files_dir)
        .await
        .map_err(|e| ErrorCode::Internal.with(format!("upload_dir_unavailable: {e}")))?;
    let (final_path, final_name) = unique_upload_path(&config.files_dir, &name);
    let tmp_path = final_path
        .with_file_name(format!("{final_name}.part-{}", &crate::pairing::random_token()[..8]));

    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(|e| ErrorCode::Internal.with(format!("upload_failed: {e}")))?;
    let mut hasher = Sha256::new();
    let mut total: u64 = 0;
    let max_bytes = config.upload_max_bytes;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                drop(file);
                cleanup_tmp_upload(&tmp_path);
                return Err(ErrorCode::InvalidInput.with(format!("upload_interrupted: {e}")));
            }
        };
        total += chunk.len() as u64;
        if max_bytes > 0 && total > max_bytes {
            drop(file);
            cleanup_tmp_upload(&tmp_path);
            return Err(ErrorCode::UploadTooLarge.with("upload_too_large"));
        }
        hasher.update(&chunk);
        if let Err(e) = file.write_all(&chunk).await {
            drop(file);
            cleanup_tmp_upload(&tmp_path);
            return Err(ErrorCode::Internal.with(format!("upload_failed: {e}")));
        }
    }
    if let Err(e) = file.flush().await {
        drop(file);
        cleanup_tmp_upload(&tmp_path);
        return Err(ErrorCode::Internal.with(format!("upload_failed: {e}")));
    }
    drop(file);

    let actual = hex(&hasher.finalize());
    let expected = headers
        .get("x-file-sha256")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty());
    // Reject corrupted payloads before exposing the file under its
    // final name.
    if let Some(expected) = expected {
        if expected != actual {
            cleanup_tmp_upload(&tmp_path);
            return Err(ErrorCode::InvalidInput.with("upload_checksum_mismatch"));
        }
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
        cleanup_tmp_upload(&tmp_path);
        return Err(ErrorCode::Internal.with(format!("upload_failed: {e}")));
    }

    let uploader = state.sessions.get_session(&token, true);
    state.events.emit(
        "file_received",
        "CyberDeck",
        &format!("File received: {final_name}"),
        json!({
            "filename": final_name,
            "size": total,
            "sha256": actual,
            "from_token": token,
            "from_name": uploader.as_ref().map(|s| s.device_name.clone()).unwrap_or_else(|| "Unknown device".to_owned()),
            "from_ip": uploader.as_ref().map(|s| s.ip.clone()).unwrap_or_default(),
        }),
    );

    Ok(Json(json!({
        "status": "ok",
        "filename": final_name,
        "size": total,
        "sha256": actual,
    })))
}

#[cfg(test)]
#[path = "upload_tests.rs"]
mod tests;
