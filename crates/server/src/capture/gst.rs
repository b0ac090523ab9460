// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GStreamer MJPEG capture on Wayland: pipewiresrc → videoconvert →
//! jpegenc → multipartmux.

use super::probe::{dedup_keep_order, CaptureProbe};

/// Build the gst-launch argument list for one pipewire source candidate.
/// An empty `node` selects default portal routing.
pub fn build_gst_pipeline(node: &str, fps: u32, quality: u8, width: u32) -> Vec<String> {
    let fps = fps.max(5);
    let quality = quality.clamp(10, 95);
    let mut cmd: Vec<String> = vec!["gst-launch-1.0".into(), "-q".into(), "pipewiresrc".into()];
    if !node.is_empty() {
        cmd.push(format!("path={node}"));
    }
    cmd.push("do-timestamp=true".into());
    cmd.extend(["!".into(), "videorate".into()]);
    cmd.extend(["!".into(), format!("video/x-raw,framerate={fps}/1")]);
    cmd.extend(["!".into(), "videoconvert".into()]);
    if width > 0 {
        cmd.extend(["!".into(), "videoscale".into()]);
        cmd.extend(["!".into(), format!("video/x-raw,width={width}")]);
    }
    cmd.extend(["!".into(), "jpegenc".into(), format!("quality={quality}")]);
    cmd.extend(["!".into(), "multipartmux".into(), "boundary=frame".into()]);
    cmd.extend(["!".into(), "fdsink".into(), "fd=1".into()]);
    cmd
}

impl CaptureProbe {
    /// Sanitized pipewire source candidates for gst pipelines. The empty
    /// string (default portal routing) is always tried first; numeric
    /// sentinels that never resolve are dropped.
    pub async fn gst_pipewire_source_candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = vec![String::new()];
        for src in self.pipewire_source_candidates().await {
            let mut s = src.trim().to_owned();
            let lower = s.to_ascii_lowercase();
            if lower == "default" || lower == "pipewire:" {
                s = String::new();
            }
            if s == "0" {
                continue;
            }
            if s.chars().all(|c| c.is_ascii_digit()) && s.parse::<u64>().map(|v| v == 0).unwrap_or(false) {
                continue;
            }
            if !out.contains(&s) {
                out.push(s);
            }
        }
        // Keep the leading default entry even though it is "empty".
        let mut tail = out.split_off(1);
        tail = dedup_keep_order(tail);
        out.extend(tail);
        out
    }
}

#[cfg(test)]
#[path = "gst_tests.rs"]
mod tests;
