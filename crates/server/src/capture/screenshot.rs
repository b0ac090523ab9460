// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Screenshot-loop capture: one-shot frames from grim, desktop-shell DBus
//! calls, or CLI screenshot tools, converted to JPEG at a low cadence.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::time::sleep;

use super::probe::{is_wayland_session, run_probe, CaptureProbe};
use crate::stream::jpeg::{encode_jpeg, jpeg_has_visible_content, resize_to_width};

static OUT_PATH_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"'(file://[^']+\.(?:png|jpg|jpeg))'",
        r#""(file://[^"]+\.(?:png|jpg|jpeg))""#,
        r"'(/[^']+\.(?:png|jpg|jpeg))'",
        r#""(/[^"]+\.(?:png|jpg|jpeg))""#,
        r#"(/[^'"\s]+\.(?:png|jpg|jpeg))"#,
    ]
    .iter()
    .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
    .collect()
});

/// Decode a screenshot command output value into a filesystem path.
fn decode_out_path(raw: &str) -> String {
    let value = raw.trim().trim_matches(|c| c == '\'' || c == '"');
    if value.is_empty() {
        return String::new();
    }
    let path = value.strip_prefix("file://").unwrap_or(value);
    percent_decode(path)
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(v) = u8::from_str_radix(&raw[i + 1..i + 3], 16) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Extract screenshot image path candidates from command output text.
fn extract_out_path(text: &str) -> String {
    let mut seen: Vec<String> = Vec::new();
    for pattern in OUT_PATH_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let Some(m) = caps.get(1) else { continue };
            let candidate = decode_out_path(m.as_str());
            if candidate.is_empty() || seen.contains(&candidate) {
                continue;
            }
            if Path::new(&candidate).exists() {
                return candidate;
            }
            seen.push(candidate);
        }
    }
    seen.into_iter().next().unwrap_or_default()
}

/// Wait for one of `paths` to exist with non-zero size.
async fn wait_existing(paths: &[String], timeout: Duration) -> Option<PathBuf> {
    let deadline = tokio::time::Instant::now() + timeout;
    let candidates: Vec<&String> = paths.iter().filter(|p| !p.trim().is_empty()).collect();
    loop {
        for path in &candidates {
            let path = Path::new(path.as_str());
            if std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false) {
                return Some(path.to_path_buf());
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        sleep(Duration::from_millis(50)).await;
    }
}

fn load_as_jpeg(path: &Path, width: u32, quality: u8) -> Option<Vec<u8>> {
    let img = image::open(path).ok()?;
    let resized = resize_to_width(img, width, false);
    encode_jpeg(&resized.to_rgb8(), quality)
}

impl CaptureProbe {
    /// Capture a single frame with grim and convert it to JPEG bytes.
    pub async fn wayland_grim_frame(&self, width: u32, quality: u8) -> Option<Vec<u8>> {
        let grim = which::which("grim").ok()?;
        let output = run_probe(&grim.to_string_lossy(), &["-"], Duration::from_secs(3)).await?;
        if output.stdout.is_empty() {
            return None;
        }
        let img = image::load_from_memory(&output.stdout).ok()?;
        let resized = resize_to_width(img, width, false);
        encode_jpeg(&resized.to_rgb8(), quality)
    }

    /// Capture a single frame via the DBus/CLI screenshot tool chain.
    pub async fn screenshot_tool_frame(&self, width: u32, quality: u8) -> Option<Vec<u8>> {
        let mut tools: Vec<String> = Vec::new();
        if let Some(cached) = self.selected_screenshot_tool() {
            tools.push(cached);
        }
        for tool in self.screenshot_tool_candidates() {
            if !tools.contains(&tool) {
                tools.push(tool);
            }
        }
        if tools.is_empty() {
            return None;
        }

        let tmp = tempfile::Builder::new()
            .prefix("cyberdeck-shot-")
            .suffix(".png")
            .tempfile()
            .ok()?
            .into_temp_path();
        let tmp_path = tmp.to_path_buf();
        let tmp_str = tmp_path.to_string_lossy().into_owned();

        for tool in tools {
            let capture_path: Option<PathBuf> = match tool.as_str() {
                "gdbus_gnome_shell" => self.gnome_shell_screenshot(&tmp_str).await,
                "qdbus_kwin" => self.kwin_screenshot().await,
                "grim" => self.run_file_tool("grim", &[tmp_str.as_str()], &tmp_path).await,
                "spectacle" => {
                    self.run_file_tool("spectacle", &["-b", "-n", "-o", tmp_str.as_str()], &tmp_path)
                        .await
                }
                "gnome-screenshot" => {
                    self.run_file_tool("gnome-screenshot", &["-f", tmp_str.as_str()], &tmp_path).await
                }
                _ => None,
            };
            let Some(capture_path) = capture_path else { continue };
            let Some(jpeg) = load_as_jpeg(&capture_path, width, quality) else { continue };
            self.mark_screenshot_tool(&tool);
            if capture_path != tmp_path {
                let _ = std::fs::remove_file(&capture_path);
            }
            return Some(jpeg);
        }
        None
    }

    async fn run_file_tool(&self, tool: &str, args: &[&str], expect: &Path) -> Option<PathBuf> {
        let bin = which::which(tool).ok()?;
        let output = run_probe(&bin.to_string_lossy(), args, Duration::from_secs(3)).await?;
        if !output.status.success() {
            return None;
        }
        std::fs::metadata(expect).ok().filter(|m| m.len() > 0).map(|_| expect.to_path_buf())
    }

    async fn gnome_shell_screenshot(&self, target: &str) -> Option<PathBuf> {
        let gdbus = which::which("gdbus").ok()?;
        let bin = gdbus.to_string_lossy().into_owned();
        // Newer shells ignore the target argument and report their own
        // output path on stdout; try both call shapes.
        for filename in [target, ""] {
            let args = [
                "call",
                "--session",
                "--dest",
                "org.gnome.Shell.Screenshot",
                "--object-path",
                "/org/gnome/Shell/Screenshot",
                "--method",
                "org.gnome.Shell.Screenshot.Screenshot",
                "false",
                "false",
                filename,
            ];
            let Some(output) = run_probe(&bin, &args, Duration::from_millis(4500)).await else {
                continue;
            };
            if !output.status.success() {
                continue;
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            let parsed = extract_out_path(&stdout);
            let candidates = vec![parsed, filename.to_owned(), target.to_owned()];
            if let Some(found) = wait_existing(&candidates, Duration::from_secs(1)).await {
                return Some(found);
            }
        }
        None
    }

    async fn kwin_screenshot(&self) -> Option<PathBuf> {
        let qdbus = which::which("qdbus").or_else(|_| which::which("qdbus6")).ok()?;
        let bin = qdbus.to_string_lossy().into_owned();
        // KWin API names differ across versions/builds.
        let calls: [&[&str]; 2] = [
            &["org.kde.KWin", "/Screenshot", "screenshotFullscreen"],
            &["org.kde.KWin", "/Screenshot", "org.kde.KWin.ScreenShot2.screenshotFullscreen"],
        ];
        for args in calls {
            let Some(output) = run_probe(&bin, args, Duration::from_secs(3)).await else { continue };
            if !output.status.success() {
                continue;
            }
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            if stdout.is_empty() {
                continue;
            }
            let parsed = extract_out_path(&stdout);
            if !parsed.is_empty() && Path::new(&parsed).exists() {
                return Some(PathBuf::from(parsed));
            }
            if Path::new(&stdout).exists() {
                return Some(PathBuf::from(stdout));
            }
        }
        None
    }

    /// Probe the screenshot fallback for visible, non-empty frames.
    pub async fn screenshot_capture_healthy(&self) -> bool {
        if let Some(cached) = self.shot_healthy_cached() {
            return cached;
        }
        let ok = if cfg!(windows) || !is_wayland_session() {
            false
        } else {
            let frame = match self.wayland_grim_frame(640, 45).await {
                Some(frame) => Some(frame),
                None => self.screenshot_tool_frame(640, 45).await,
            };
            frame.map(|f| jpeg_has_visible_content(&f)).unwrap_or(false)
        };
        self.shot_healthy_store(ok);
        ok
    }
}

#[cfg(test)]
#[path = "screenshot_tests.rs"]
mod tests;
