// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! System control endpoints: power/session actions via the host command
//! runner and media-key volume control.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{ApiResult, ErrorCode};
use crate::input::MediaKey;
use crate::transport::auth::{require_perm, AuthedToken};
use crate::transport::state::AppState;

fn cmds(list: &[&[&str]]) -> Vec<Vec<String>> {
    list.iter().map(|cmd| cmd.iter().map(|s| (*s).to_owned()).collect()).collect()
}

fn linux_logoff_cmds() -> Vec<Vec<String>> {
    let mut out: Vec<Vec<String>> = Vec::new();
    if let Ok(session_id) = std::env::var("XDG_SESSION_ID") {
        let session_id = session_id.trim().to_owned();
        if !session_id.is_empty() {
            out.push(vec!["loginctl".into(), "terminate-session".into(), session_id]);
        }
    }
    out.extend(cmds(&[
        &["gnome-session-quit", "--logout", "--no-prompt"],
        &["cinnamon-session-quit", "--logout", "--no-prompt"],
        &["xfce4-session-logout", "--logout", "--fast"],
        &["mate-session-save", "--logout-dialog"],
        &["qdbus", "org.kde.Shutdown", "/Shutdown", "logout"],
        &["systemctl", "--user", "exit"],
    ]));
    out
}

/// Candidate command lists per action. `None` means the action name is
/// unknown.
pub fn action_commands(action: &str) -> Option<Vec<Vec<String>>> {
    if cfg!(windows) {
        let list = match action {
            "shutdown" => cmds(&[&["shutdown", "/s", "/t", "1"]]),
            "restart" => cmds(&[&["shutdown", "/r", "/t", "1"]]),
            "logoff" => cmds(&[&["shutdown", "/l"]]),
            "lock" => cmds(&[&["rundll32.exe", "user32.dll,LockWorkStation"]]),
            "sleep" => cmds(&[&["rundll32.exe", "powrprof.dll,SetSuspendState", "0,1,0"]]),
            "hibernate" => cmds(&[&["rundll32.exe", "powrprof.dll,SetSuspendState", "1,1,0"]]),
            _ => return None,
        };
        return Some(list);
    }
    let list = match action {
        "shutdown" => cmds(&[&["systemctl", "poweroff"], &["shutdown", "-h", "now"], &["poweroff"]]),
        "restart" => cmds(&[&["systemctl", "reboot"], &["shutdown", "-r", "now"], &["reboot"]]),
        "logoff" => linux_logoff_cmds(),
        "lock" => cmds(&[
            &["loginctl", "lock-sessions"],
            &["xdg-screensaver", "lock"],
            &["gnome-screensaver-command", "-l"],
            &["dm-tool", "lock"],
        ]),
        "sleep" => cmds(&[&["systemctl", "suspend"]]),
        "hibernate" => cmds(&[&["systemctl", "hibernate"]]),
        _ => return None,
    };
    Some(list)
}

/// Result payload and failure mapping per action.
fn action_result(action: &str) -> (&'static str, ErrorCode, String) {
    match action {
        "lock" => ("locked", ErrorCode::InvalidInput, "lock_not_supported_on_this_system".into()),
        "logoff" => {
            ("logoff", ErrorCode::InvalidInput, "logoff_not_supported_on_this_system".into())
        }
        "shutdown" => ("shutdown", ErrorCode::Internal, "shutdown_failed".into()),
        "restart" => ("restart", ErrorCode::Internal, "restart_failed".into()),
        "sleep" => ("sleep", ErrorCode::Internal, "sleep_failed".into()),
        _ => ("hibernate", ErrorCode::Internal, "hibernate_failed".into()),
    }
}

/// Run candidate commands sequentially; true on the first zero exit.
async fn run_first_ok(commands: &[Vec<String>], timeout: Duration) -> bool {
    for cmd in commands {
        let Some((program, args)) = cmd.split_first() else { continue };
        let status = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match tokio::time::timeout(timeout, status).await {
            Ok(Ok(status)) if status.success() => return true,
            Ok(_) => continue,
            Err(_) => {
                warn!(cmd = %cmd.join(" "), "system command timed out");
                continue;
            }
        }
    }
    false
}

/// `POST /system/{action}` — host power/session actions.
pub async fn system_action(
    State(state): State<Arc<AppState>>,
    AuthedToken(token): AuthedToken,
    Path(action): Path<String>,
) -> ApiResult<Json<Value>> {
    require_perm(&state, &token, "perm_power")?;
    let Some(commands) = action_commands(&action) else {
        return Err(ErrorCode::InvalidInput.with("unknown_action"));
    };
    let (status, fail_code, fail_detail) = action_result(&action);
    let timeout = state.config().stream.system_cmd_timeout();
    if run_first_ok(&commands, timeout).await {
        Ok(Json(json!({ "status": status })))
    } else {
        Err(fail_code.with(fail_detail))
    }
}

/// `POST /volume/{action}` — media-key volume control via the input
/// backend.
pub async fn volume_action(
    State(state): State<Arc<AppState>>,
    AuthedToken(token): AuthedToken,
    Path(action): Path<String>,
) -> ApiResult<Json<Value>> {
    require_perm(&state, &token, "perm_keyboard")?;
    let key = match action.as_str() {
        "up" => MediaKey::VolumeUp,
        "down" => MediaKey::VolumeDown,
        "mute" => MediaKey::VolumeMute,
        _ => return Err(ErrorCode::InvalidInput.with("unknown_action")),
    };
    if !state.input.media_key(key) {
        return Err(ErrorCode::BackendUnavailable.with("keyboard_input_unavailable"));
    }
    Ok(Json(json!({ "status": "ok" })))
}

#[cfg(test)]
#[path = "system_tests.rs"]
mod tests;
