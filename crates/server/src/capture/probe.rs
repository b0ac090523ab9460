// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment detection and cached availability probes for the capture
//! toolchain (ffmpeg, GStreamer, screenshot tools, pipewire).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::process::Command;

use crate::config::StreamTuning;

/// Probe results are trusted for this long before re-running the tool.
pub const PROBE_TTL: Duration = Duration::from_secs(8);

const FFMPEG_BIN_NEGATIVE_TTL: Duration = Duration::from_secs(5);
const PIPEWIRE_NODES_TTL: Duration = Duration::from_secs(5);

/// Detect whether the current Linux session is Wayland.
pub fn is_wayland_session() -> bool {
    if cfg!(windows) {
        return false;
    }
    let xdg = std::env::var("XDG_SESSION_TYPE").unwrap_or_default().trim().to_ascii_lowercase();
    if xdg == "wayland" {
        return true;
    }
    if xdg == "x11" {
        return false;
    }
    env_set("WAYLAND_DISPLAY") && !env_set("DISPLAY")
}

/// Detect a GNOME-like desktop environment.
pub fn is_gnome_session() -> bool {
    ["XDG_CURRENT_DESKTOP", "DESKTOP_SESSION", "GDMSESSION"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .any(|value| value.to_ascii_lowercase().contains("gnome"))
}

fn env_set(name: &str) -> bool {
    std::env::var(name).map(|v| !v.trim().is_empty()).unwrap_or(false)
}

/// Run a probe command with a hard timeout; the child is killed when the
/// timeout elapses.
pub async fn run_probe(program: &str, args: &[&str], timeout: Duration) -> Option<std::process::Output> {
    let fut = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(output)) => Some(output),
        _ => None,
    }
}

/// Value cached with an expiry stamp.
struct TtlCache<T> {
    slot: Mutex<Option<(T, Instant)>>,
}

impl<T: Clone> TtlCache<T> {
    fn new() -> Self {
        Self { slot: Mutex::new(None) }
    }

    fn get(&self, ttl: Duration) -> Option<T> {
        let slot = self.slot.lock();
        slot.as_ref().filter(|(_, at)| at.elapsed() < ttl).map(|(v, _)| v.clone())
    }

    fn put(&self, value: T) {
        *self.slot.lock() = Some((value, Instant::now()));
    }
}

/// Cached availability state for every capture backend toolchain.
pub struct CaptureProbe {
    tuning: StreamTuning,
    ffmpeg_bin: Mutex<Option<(Option<PathBuf>, Instant)>>,
    ffmpeg_formats: Mutex<Option<String>>,
    ffmpeg_encoders: Mutex<Option<String>>,
    ffmpeg_filters: Mutex<Option<String>>,
    gst_pipewire: TtlCache<bool>,
    gst_healthy: TtlCache<bool>,
    ffmpeg_healthy: TtlCache<bool>,
    shot_healthy: TtlCache<bool>,
    pipewire_nodes: TtlCache<Vec<String>>,
    screenshot_tool: Mutex<Option<String>>,
}

impl CaptureProbe {
    pub fn new(tuning: StreamTuning) -> Self {
        Self {
            tuning,
            ffmpeg_bin: Mutex::new(None),
            ffmpeg_formats: Mutex::new(None),
            ffmpeg_encoders: Mutex::new(None),
            ffmpeg_filters: Mutex::new(None),
            gst_pipewire: TtlCache::new(),
            gst_healthy: TtlCache::new(),
            ffmpeg_healthy: TtlCache::new(),
            shot_healthy: TtlCache::new(),
            pipewire_nodes: TtlCache::new(),
            screenshot_tool: Mutex::new(None),
        }
    }

    pub fn tuning(&self) -> &StreamTuning {
        &self.tuning
    }

    // -- ffmpeg ---------------------------------------------------------------

    /// Resolve the ffmpeg binary from the override or PATH. A negative
    /// result is cached briefly to avoid hammering PATH lookups.
    pub fn ffmpeg_binary(&self) -> Option<PathBuf> {
        {
            let cached = self.ffmpeg_bin.lock();
            if let Some((ref value, at)) = *cached {
                match value {
                    Some(path) if path.is_file() => return Some(path.clone()),
                    None if at.elapsed() < FFMPEG_BIN_NEGATIVE_TTL => return None,
                    _ => {}
                }
            }
        }
        let resolved = self
            .tuning
            .ffmpeg_bin
            .as_ref()
            .filter(|p| p.is_file())
            .cloned()
            .or_else(|| which::which("ffmpeg").ok());
        *self.ffmpeg_bin.lock() = Some((resolved.clone(), Instant::now()));
        resolved
    }

    pub fn ffmpeg_available(&self) -> bool {
        self.ffmpeg_binary().is_some()
    }

    async fn ffmpeg_probe_text(&self, cache: &Mutex<Option<String>>, flag: &str) -> String {
        if let Some(cached) = cache.lock().clone() {
            return cached;
        }
        let Some(bin) = self.ffmpeg_binary() else {
            return String::new();
        };
        let out = run_probe(
            &bin.to_string_lossy(),
            &["-hide_banner", flag],
            Duration::from_secs(2),
        )
        .await
        .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
        .unwrap_or_default();
        *cache.lock() = Some(out.clone());
        out
    }

    pub async fn ffmpeg_formats(&self) -> String {
        self.ffmpeg_probe_text(&self.ffmpeg_formats, "-formats").await
    }

    pub async fn ffmpeg_encoders(&self) -> String {
        self.ffmpeg_probe_text(&self.ffmpeg_encoders, "-encoders").await
    }

    pub async fn ffmpeg_filters(&self) -> String {
        self.ffmpeg_probe_text(&self.ffmpeg_filters, "-filters").await
    }

    pub async fn ffmpeg_supports_pipewire(&self) -> bool {
        self.ffmpeg_formats().await.to_ascii_lowercase().contains("pipewire")
    }

    pub async fn ffmpeg_supports_x11grab(&self) -> bool {
        self.ffmpeg_formats().await.to_ascii_lowercase().contains("x11grab")
    }

    pub async fn ffmpeg_supports_ddagrab(&self) -> bool {
        self.ffmpeg_filters().await.to_ascii_lowercase().contains("ddagrab")
    }

    pub async fn ffmpeg_supports_encoder(&self, name: &str) -> bool {
        let needle = name.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.ffmpeg_encoders().await.to_ascii_lowercase().contains(&needle)
    }

    // -- GStreamer ------------------------------------------------------------

    pub fn gst_available(&self) -> bool {
        which::which("gst-launch-1.0").is_ok()
    }

    /// True when the GStreamer pipewire source plugin is installed.
    pub async fn gst_supports_pipewire(&self) -> bool {
        if let Some(cached) = self.gst_pipewire.get(PROBE_TTL) {
            return cached;
        }
        let ok = match which::which("gst-inspect-1.0") {
            Ok(bin) => run_probe(&bin.to_string_lossy(), &["pipewiresrc"], Duration::from_secs(2))
                .await
                .is_some_and(|o| o.status.success()),
            Err(_) => false,
        };
        self.gst_pipewire.put(ok);
        ok
    }

    /// Short gst-launch probe confirming pipewire capture produces frames.
    pub async fn gst_pipewire_capture_healthy(&self) -> bool {
        if let Some(cached) = self.gst_healthy.get(PROBE_TTL) {
            return cached;
        }
        let ok = if !is_wayland_session() || !self.gst_available() || !self.gst_supports_pipewire().await
        {
            false
        } else {
            run_probe(
                "gst-launch-1.0",
                &[
                    "-q",
                    "pipewiresrc",
                    "num-buffers=1",
                    "do-timestamp=true",
                    "!",
                    "videoconvert",
                    "!",
                    "jpegenc",
                    "quality=45",
                    "!",
                    "fakesink",
                    "sync=false",
                ],
                Duration::from_secs(4),
            )
            .await
            .is_some_and(|o| o.status.success())
        };
        self.gst_healthy.put(ok);
        ok
    }

    pub(crate) fn ffmpeg_healthy_cached(&self) -> Option<bool> {
        self.ffmpeg_healthy.get(PROBE_TTL)
    }

    pub(crate) fn ffmpeg_healthy_store(&self, ok: bool) {
        self.ffmpeg_healthy.put(ok);
    }

    pub(crate) fn shot_healthy_cached(&self) -> Option<bool> {
        self.shot_healthy.get(PROBE_TTL)
    }

    pub(crate) fn shot_healthy_store(&self, ok: bool) {
        self.shot_healthy.put(ok);
    }

    // -- pipewire -------------------------------------------------------------

    /// Discover likely screencast node ids from `pw-cli ls Node` output.
    pub async fn discover_pipewire_nodes(&self) -> Vec<String> {
        if let Some(cached) = self.pipewire_nodes.get(PIPEWIRE_NODES_TTL) {
            return cached;
        }
        let nodes = match which::which("pw-cli") {
            Ok(bin) => {
                let text = run_probe(&bin.to_string_lossy(), &["ls", "Node"], Duration::from_millis(450))
                    .await
                    .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
                    .unwrap_or_default();
                parse_pipewire_nodes(&text)
            }
            Err(_) => Vec::new(),
        };
        self.pipewire_nodes.put(nodes.clone());
        nodes
    }

    /// Ordered pipewire source candidates: env overrides, ffmpeg default
    /// aliases, then discovered screencast nodes.
    pub async fn pipewire_source_candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        if let Some(ref node) = self.tuning.pipewire_node {
            if !node.trim().is_empty() {
                out.push(node.trim().to_owned());
            }
        }
        if let Ok(node) = std::env::var("PIPEWIRE_NODE") {
            if !node.trim().is_empty() {
                out.push(node.trim().to_owned());
            }
        }
        // Default aliases first: different ffmpeg builds expect different
        // names, and they avoid the node-probing latency.
        out.push("default".to_owned());
        out.push("pipewire:".to_owned());
        let max_sources = self.tuning.pipewire_max_sources();
        for node in self.discover_pipewire_nodes().await.into_iter().take(max_sources) {
            out.push(node);
        }
        dedup_keep_order(out)
    }

    pub fn wayland_allow_x11_fallback(&self) -> bool {
        if cfg!(windows) || !is_wayland_session() {
            return false;
        }
        env_set("DISPLAY") && self.tuning.wayland_allow_x11_fallback
    }

    // -- screenshot tools -----------------------------------------------------

    pub fn grim_available(&self) -> bool {
        which::which("grim").is_ok()
    }

    /// Ordered screenshot-tool candidates: override, DBus shells, CLI tools.
    pub fn screenshot_tool_candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        if let Some(ref forced) = self.tuning.screenshot_tool {
            if !forced.trim().is_empty() {
                out.push(forced.trim().to_owned());
            }
        }
        if which::which("gdbus").is_ok() {
            out.push("gdbus_gnome_shell".to_owned());
        }
        if which::which("qdbus").is_ok() || which::which("qdbus6").is_ok() {
            out.push("qdbus_kwin".to_owned());
        }
        if self.grim_available() {
            out.push("grim".to_owned());
        }
        if which::which("spectacle").is_ok() {
            out.push("spectacle".to_owned());
        }
        if self.tuning.allow_gnome_screenshot && which::which("gnome-screenshot").is_ok() {
            out.push("gnome-screenshot".to_owned());
        }
        dedup_keep_order(out)
    }

    pub fn screenshot_tool_available(&self) -> bool {
        self.selected_screenshot_tool().is_some() || !self.screenshot_tool_candidates().is_empty()
    }

    pub fn selected_screenshot_tool(&self) -> Option<String> {
        self.screenshot_tool.lock().clone()
    }

    /// Remember the tool that successfully produced a frame.
    pub fn mark_screenshot_tool(&self, name: &str) {
        let name = name.trim();
        *self.screenshot_tool.lock() = (!name.is_empty()).then(|| name.to_owned());
    }
}

fn parse_pipewire_nodes(text: &str) -> Vec<String> {
    let mut nodes = Vec::new();
    let mut current_id: Option<String> = None;
    let mut name = String::new();
    let mut desc = String::new();
    let mut media = String::new();

    let mut flush = |id: &Option<String>, name: &str, desc: &str, media: &str, nodes: &mut Vec<String>| {
        let Some(id) = id else { return };
        let meta = format!("{name} {desc} {media}").to_ascii_lowercase();
        if meta.trim().is_empty() {
            return;
        }
        let looks_video = meta.contains("video");
        let looks_screen = ["screen", "monitor", "portal", "xdpw", "screencast", "desktop", "wayland"]
            .iter()
            .any(|k| meta.contains(k));
        let looks_camera = meta.contains("camera") || meta.contains("webcam");
        if looks_video && looks_screen && !looks_camera {
            nodes.push(id.clone());
        }
    };

    for raw in text.lines() {
        let line = raw.trim();
        if line.starts_with("id ") && line.contains(',') {
            flush(&current_id, &name, &desc, &media, &mut nodes);
            current_id = line
                .strip_prefix("id ")
                .and_then(|rest| rest.split(',').next())
                .map(|id| id.trim().to_owned());
            name.clear();
            desc.clear();
            media.clear();
            continue;
        }
        if let Some(value) = line.strip_prefix("node.name =") {
            name = value.trim().trim_matches('"').to_owned();
        } else if let Some(value) = line.strip_prefix("node.description =") {
            desc = value.trim().trim_matches('"').to_owned();
        } else if let Some(value) = line.strip_prefix("media.class =") {
            media = value.trim().trim_matches('"').to_owned();
        }
    }
    flush(&current_id, &name, &desc, &media, &mut nodes);
    dedup_keep_order(nodes)
}

pub(crate) fn dedup_keep_order(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
#[path = "probe_tests.rs"]
mod tests;
