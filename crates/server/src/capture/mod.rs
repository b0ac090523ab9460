// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pluggable screen-capture producers and their shared diagnostics.

pub mod ffmpeg;
pub mod gst;
pub mod native;
pub mod probe;
pub mod screenshot;

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::protocol::epoch_s;

/// Canonical MJPEG capture backends, in declaration order.
pub const MJPEG_BACKENDS: [BackendKind; 4] =
    [BackendKind::Native, BackendKind::Ffmpeg, BackendKind::Gstreamer, BackendKind::Screenshot];

/// One interchangeable producer of video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Native,
    Ffmpeg,
    Gstreamer,
    Screenshot,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Ffmpeg => "ffmpeg",
            Self::Gstreamer => "gstreamer",
            Self::Screenshot => "screenshot",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-supplied backend hint: `auto` or a concrete backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    Auto,
    Named(BackendKind),
}

impl BackendChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Named(kind) => kind.as_str(),
        }
    }
}

/// Normalize user/client backend aliases into canonical identifiers.
/// Unknown values fall back to `auto`.
pub fn normalize_backend(raw: Option<&str>) -> BackendChoice {
    match raw.unwrap_or("").trim().to_ascii_lowercase().as_str() {
        "native" | "mss" => BackendChoice::Named(BackendKind::Native),
        "ffmpeg" => BackendChoice::Named(BackendKind::Ffmpeg),
        "gst" | "gstreamer" => BackendChoice::Named(BackendKind::Gstreamer),
        "grim" | "screenshot" | "tool" => BackendChoice::Named(BackendKind::Screenshot),
        _ => BackendChoice::Auto,
    }
}

/// Availability map queried by the negotiator.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BackendStatus {
    pub native: bool,
    pub ffmpeg: bool,
    pub gstreamer: bool,
    pub screenshot: bool,
}

impl BackendStatus {
    pub fn get(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Native => self.native,
            BackendKind::Ffmpeg => self.ffmpeg,
            BackendKind::Gstreamer => self.gstreamer,
            BackendKind::Screenshot => self.screenshot,
        }
    }

    pub fn any(&self) -> bool {
        self.native || self.ffmpeg || self.gstreamer || self.screenshot
    }
}

/// Monitor geometry reported by the capture layer.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MonitorRect {
    pub id: u32,
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
    pub primary: bool,
}

/// Enumerate capturable monitors. Geometry is origin-relative; capture
/// displays report size only, so offsets are zero.
pub fn list_monitors() -> Vec<MonitorRect> {
    let Ok(displays) = scrap::Display::all() else {
        return Vec::new();
    };
    displays
        .iter()
        .enumerate()
        .map(|(i, d)| MonitorRect {
            id: i as u32 + 1,
            left: 0,
            top: 0,
            width: d.width() as u32,
            height: d.height() as u32,
            primary: i == 0,
        })
        .collect()
}

/// Resolve geometry for a 1-based monitor index, defaulting to the first
/// monitor for out-of-range requests.
pub fn monitor_rect(monitor: u32) -> Option<MonitorRect> {
    let monitors = list_monitors();
    if monitors.is_empty() {
        return None;
    }
    let idx = (monitor.max(1) as usize - 1).min(monitors.len() - 1);
    monitors.get(idx).copied()
}

/// Cache key for a previously successful subprocess command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WinnerKey {
    pub codec: String,
    pub monitor: u32,
    pub fps: u32,
    pub width: u32,
    pub low_latency: bool,
    pub audio: bool,
}

#[derive(Default)]
struct DiagInner {
    last_cmd: Option<String>,
    last_error: Option<String>,
    last_error_ts: f64,
}

/// Backend command/error diagnostics plus the winning-command cache.
#[derive(Default)]
pub struct StreamDiag {
    inner: Mutex<DiagInner>,
    winners: Mutex<HashMap<WinnerKey, Vec<String>>>,
}

impl StreamDiag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist the last attempted command and error snippet.
    pub fn record(&self, cmd: Option<&[String]>, err: Option<&str>) {
        let mut inner = self.inner.lock();
        inner.last_cmd = cmd.map(|c| c.join(" "));
        if let Some(err) = err {
            let mut msg = err.to_owned();
            msg.truncate(800);
            inner.last_error = Some(msg);
            inner.last_error_ts = epoch_s();
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock();
        json!({
            "last_cmd": inner.last_cmd,
            "last_error": inner.last_error,
            "last_error_ts": (inner.last_error_ts > 0.0).then_some(inner.last_error_ts),
        })
    }

    /// Remember the command that produced a working stream for this key.
    pub fn remember_winner(&self, key: WinnerKey, cmd: Vec<String>) {
        self.winners.lock().insert(key, cmd);
    }

    pub fn winner(&self, key: &WinnerKey) -> Option<Vec<String>> {
        self.winners.lock().get(key).cloned()
    }

    pub fn forget_winner(&self, key: &WinnerKey) {
        self.winners.lock().remove(key);
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
