// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ffmpeg capture: input-argument candidates per platform and the MJPEG /
//! MPEG-TS command builders.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::probe::{is_wayland_session, run_probe, CaptureProbe};
use super::{monitor_rect, StreamDiag, WinnerKey};
use crate::stream::jpeg::{extract_first_jpeg, jpeg_has_visible_content};
use crate::stream::supervisor::{supervise, FirstChunkGate, SupervisedStream, SuperviseOptions};

/// Logical stream codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    Mjpeg,
    H264,
    H265,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mjpeg => "mjpeg",
            Self::H264 => "h264",
            Self::H265 => "h265",
        }
    }
}

/// Ordered ffmpeg encoder candidates per logical codec.
pub fn codec_encoder_candidates(codec: Codec) -> &'static [&'static str] {
    match codec {
        Codec::Mjpeg => &["mjpeg"],
        Codec::H264 => {
            &["libx264", "h264_nvenc", "h264_qsv", "h264_amf", "h264_vaapi", "h264_videotoolbox"]
        }
        Codec::H265 => {
            &["libx265", "hevc_nvenc", "hevc_qsv", "hevc_amf", "hevc_vaapi", "hevc_videotoolbox"]
        }
    }
}

/// Parameters for one MPEG-TS encode command.
#[derive(Debug, Clone)]
pub struct TsParams {
    pub codec: Codec,
    pub fps: u32,
    pub bitrate_k: u32,
    pub gop: u32,
    pub preset: String,
    pub max_w: u32,
    pub low_latency: bool,
    pub audio_bitrate_k: u32,
}

/// Map the public 10..95 quality scale onto ffmpeg's MJPEG `-q:v`
/// (2 best .. 31 worst), tuned for sharp text at the top of the range.
pub fn mjpeg_qv(quality: u8) -> u8 {
    let q = quality.clamp(10, 95) as f64;
    let qv = (2.0 + (95.0 - q) * 14.0 / 85.0).round() as i64;
    qv.clamp(2, 16) as u8
}

/// Conservative bitrate cap for low-latency transport at a given size/fps.
pub fn lowlat_bitrate_cap_k(max_w: u32, fps: u32, codec: Codec) -> u32 {
    let w = max_w.max(320) as f64;
    let f = fps.max(10) as f64;
    // Bitrate budget tuned for LAN/Wi-Fi: enough detail for desktop UI
    // without queue growth under jitter.
    let mut base = 4200.0 * (w / 1280.0) * (f / 30.0);
    if codec == Codec::H265 {
        base *= 0.72;
    }
    (base.round() as u32).clamp(1200, 18_000)
}

/// Build ffmpeg x11grab input arguments for a monitor and frame rate.
pub fn x11_input_args(monitor: u32, fps: u32) -> Option<Vec<String>> {
    let rect = monitor_rect(monitor)?;
    let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_owned());
    Some(svec([
        "-f",
        "x11grab",
        "-draw_mouse",
        "1",
        "-framerate",
        &fps.to_string(),
        "-video_size",
        &format!("{}x{}", rect.width, rect.height),
        "-i",
        &format!("{display}+{},{}", rect.left, rect.top),
    ]))
}

fn gdigrab_input_args(monitor: u32, fps: u32) -> Option<Vec<String>> {
    let rect = monitor_rect(monitor)?;
    Some(svec([
        "-f",
        "gdigrab",
        "-draw_mouse",
        "1",
        "-framerate",
        &fps.to_string(),
        "-offset_x",
        &rect.left.to_string(),
        "-offset_y",
        &rect.top.to_string(),
        "-video_size",
        &format!("{}x{}", rect.width, rect.height),
        "-i",
        "desktop",
    ]))
}

/// Parse the `||`-separated audio-input override, or fall back to the
/// platform default source.
pub fn audio_input_arg_sets(raw: Option<&str>) -> Vec<Vec<String>> {
    if let Some(raw) = raw {
        let trimmed = raw.trim();
        if matches!(trimmed.to_ascii_lowercase().as_str(), "0" | "off" | "none" | "disabled") {
            return Vec::new();
        }
        let parsed: Vec<Vec<String>> = trimmed
            .split("||")
            .map(|part| part.split_whitespace().map(str::to_owned).collect::<Vec<_>>())
            .filter(|args: &Vec<String>| !args.is_empty())
            .collect();
        if !parsed.is_empty() {
            return parsed;
        }
    }
    if cfg!(windows) {
        vec![svec(["-f", "wasapi", "-i", "default"])]
    } else if cfg!(target_os = "macos") {
        vec![svec(["-f", "avfoundation", "-i", ":0"])]
    } else {
        vec![svec(["-f", "pulse", "-i", "default"])]
    }
}

/// Build one MPEG-TS encode command for a resolved input/encoder pair.
pub fn build_ts_command(
    ffmpeg_bin: &str,
    input_args: &[String],
    audio_args: Option<&[String]>,
    encoder: &str,
    params: &TsParams,
) -> Vec<String> {
    let fps = params.fps.max(5);
    let bitrate_k = params.bitrate_k.max(200);
    let mut gop = params.gop.max(10);
    if params.low_latency {
        gop = gop.min(fps.max(10));
    }
    let maxrate_k = (bitrate_k as f64 * if params.low_latency { 1.2 } else { 1.5 }).round() as u32;
    let bufsize_k = (bitrate_k as f64 * if params.low_latency { 2.0 } else { 3.0 }).round() as u32;

    let mut cmd: Vec<String> = vec![ffmpeg_bin.to_owned()];
    cmd.extend(svec(["-loglevel", "error", "-fflags", "nobuffer", "-flags", "low_delay", "-max_delay", "0"]));
    cmd.extend(input_args.iter().cloned());
    if let Some(audio_args) = audio_args {
        cmd.extend(audio_args.iter().cloned());
    }
    cmd.extend(svec(["-pix_fmt", "yuv420p", "-r", &fps.to_string(), "-vsync", "cfr", "-c:v", encoder]));
    if params.max_w > 0 {
        cmd.extend(svec([
            "-vf",
            &format!("scale={}:-2:flags=lanczos:force_original_aspect_ratio=decrease", params.max_w),
        ]));
    }
    if encoder == "libx264" || encoder == "libx265" {
        cmd.extend(svec(["-preset", &params.preset, "-tune", "zerolatency"]));
    }
    if params.codec == Codec::H264 && encoder == "libx264" {
        cmd.extend(svec(["-profile:v", if params.low_latency { "baseline" } else { "main" }]));
    }
    if audio_args.is_some() {
        cmd.extend(svec([
            "-map",
            "0:v:0",
            "-map",
            "1:a:0",
            "-c:a",
            "aac",
            "-b:a",
            &format!("{}k", params.audio_bitrate_k.clamp(48, 256)),
            "-ac",
            "2",
            "-ar",
            "48000",
        ]));
    } else {
        cmd.push("-an".to_owned());
    }
    cmd.extend(svec([
        "-flush_packets",
        "1",
        "-muxdelay",
        "0",
        "-muxpreload",
        "0",
        "-b:v",
        &format!("{bitrate_k}k"),
        "-maxrate",
        &format!("{maxrate_k}k"),
        "-bufsize",
        &format!("{bufsize_k}k"),
        "-g",
        &gop.to_string(),
        "-keyint_min",
        &gop.to_string(),
        "-bf",
        "0",
        "-f",
        "mpegts",
        "pipe:1",
    ]));
    if params.codec == Codec::H265 && encoder == "libx265" {
        cmd.extend(svec(["-x265-params", "repeat-headers=1:log-level=error"]));
    }
    cmd
}

/// Build one multipart MJPEG command for a resolved input.
pub fn build_mjpeg_command(
    ffmpeg_bin: &str,
    input_args: &[String],
    quality: u8,
    width: u32,
    low_latency: bool,
) -> Vec<String> {
    let qv = mjpeg_qv(quality);
    let scale_flags = if low_latency { "fast_bilinear" } else { "lanczos" };
    let pix_fmt = if low_latency { "yuvj420p" } else { "yuvj444p" };

    let mut cmd: Vec<String> = vec![ffmpeg_bin.to_owned()];
    cmd.extend(svec(["-loglevel", "error", "-fflags", "nobuffer", "-flags", "low_delay", "-max_delay", "0"]));
    cmd.extend(input_args.iter().cloned());
    cmd.push("-an".to_owned());
    if width > 0 {
        cmd.extend(svec([
            "-vf",
            &format!("scale={width}:-2:flags={scale_flags}:force_original_aspect_ratio=decrease"),
        ]));
    }
    cmd.extend(svec([
        "-c:v",
        "mjpeg",
        "-pix_fmt",
        pix_fmt,
        "-q:v",
        &qv.to_string(),
        "-flush_packets",
        "1",
        "-f",
        "mpjpeg",
        "-boundary_tag",
        "frame",
        "pipe:1",
    ]));
    cmd
}

impl CaptureProbe {
    /// Build ffmpeg input argument candidates across Wayland/X11/Windows.
    pub async fn ffmpeg_input_arg_sets(&self, monitor: u32, fps: u32) -> Vec<Vec<String>> {
        let fps = fps.max(5);
        if cfg!(windows) {
            let mut out = Vec::new();
            // Desktop Duplication capture handles elevated and accelerated
            // windows more reliably than gdigrab.
            if self.tuning().windows_try_ddagrab && self.ffmpeg_supports_ddagrab().await {
                let output_idx = monitor.max(1) - 1;
                out.push(svec([
                    "-f",
                    "lavfi",
                    "-i",
                    &format!("ddagrab=framerate={fps}:draw_mouse=1:output_idx={output_idx}"),
                ]));
            }
            if let Some(args) = gdigrab_input_args(monitor, fps) {
                out.push(args);
            }
            return out;
        }

        if is_wayland_session() {
            let mut out = Vec::new();
            if self.ffmpeg_supports_pipewire().await {
                for src in self.pipewire_source_candidates().await {
                    out.push(svec(["-f", "pipewire", "-framerate", &fps.to_string(), "-i", &src]));
                }
            }
            if self.wayland_allow_x11_fallback() && self.ffmpeg_supports_x11grab().await {
                if let Some(args) = x11_input_args(monitor, fps) {
                    out.push(args);
                }
            }
            return out;
        }

        x11_input_args(monitor, fps).into_iter().collect()
    }

    /// Whether any ffmpeg capture input is currently available.
    pub async fn capture_input_available(&self, monitor: u32, fps: u32) -> bool {
        self.ffmpeg_available() && !self.ffmpeg_input_arg_sets(monitor, fps).await.is_empty()
    }

    /// Whether ffmpeg capture is trustworthy in the current session type.
    pub async fn ffmpeg_wayland_capture_reliable(&self) -> bool {
        if cfg!(windows) || !is_wayland_session() {
            return true;
        }
        if !self.ffmpeg_available() {
            return false;
        }
        if self.ffmpeg_supports_pipewire().await {
            return true;
        }
        self.wayland_allow_x11_fallback() && self.ffmpeg_supports_x11grab().await
    }

    /// Available encoders for a logical codec, in priority order.
    pub async fn available_codec_encoders(&self, codec: Codec) -> Vec<&'static str> {
        if !self.ffmpeg_available() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for name in codec_encoder_candidates(codec) {
            if self.ffmpeg_supports_encoder(name).await {
                out.push(*name);
            }
        }
        out
    }

    pub async fn preferred_codec_encoder(&self, codec: Codec) -> Option<&'static str> {
        self.available_codec_encoders(codec).await.into_iter().next()
    }

    pub async fn codec_encoder_available(&self, codec: Codec) -> bool {
        self.preferred_codec_encoder(codec).await.is_some()
    }

    /// One-frame ffmpeg probe confirming MJPEG capture currently works.
    pub async fn ffmpeg_mjpeg_capture_healthy(&self, monitor: u32, fps: u32) -> bool {
        if let Some(cached) = self.ffmpeg_healthy_cached() {
            return cached;
        }
        let mut ok = false;
        if let Some(bin) = self.ffmpeg_binary() {
            let bin = bin.to_string_lossy().into_owned();
            for input_args in self.ffmpeg_input_arg_sets(monitor, fps.max(5)).await {
                let mut args: Vec<String> = svec(["-hide_banner", "-loglevel", "error"]);
                args.extend(input_args);
                args.extend(svec(["-an", "-frames:v", "1", "-f", "image2pipe", "-vcodec", "mjpeg", "pipe:1"]));
                let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
                let output = run_probe(&bin, &arg_refs, Duration::from_secs(4)).await;
                if let Some(output) = output {
                    let raw = output.stdout;
                    if output.status.success() {
                        if let Some(jpeg) = extract_first_jpeg(&raw) {
                            if jpeg_has_visible_content(&jpeg) {
                                ok = true;
                                break;
                            }
                        }
                    }
                }
            }
        }
        self.ffmpeg_healthy_store(ok);
        ok
    }
}

/// Start an ffmpeg MPEG-TS stream for the requested codec and profile,
/// trying the remembered winning command first and then every
/// input/encoder candidate in order.
pub async fn ffmpeg_ts_stream(
    probe: &CaptureProbe,
    diag: &Arc<StreamDiag>,
    params: &TsParams,
    monitor: u32,
    audio: bool,
) -> Option<SupervisedStream> {
    let Some(bin) = probe.ffmpeg_binary() else {
        diag.record(None, Some("ffmpeg_unavailable"));
        return None;
    };
    let encoders = probe.available_codec_encoders(params.codec).await;
    if encoders.is_empty() {
        diag.record(None, Some(&format!("ffmpeg_missing_encoder:{}", params.codec.as_str())));
        return None;
    }
    let input_sets = probe.ffmpeg_input_arg_sets(monitor, params.fps).await;
    if input_sets.is_empty() {
        if !cfg!(windows) && is_wayland_session() && !probe.ffmpeg_supports_pipewire().await {
            diag.record(None, Some("ffmpeg_missing_pipewire_support"));
        } else {
            diag.record(None, Some("ffmpeg_unsupported_or_capture_unavailable"));
        }
        return None;
    }

    let bin = bin.to_string_lossy().into_owned();
    let tuning = probe.tuning();
    let opts = SuperviseOptions {
        settle: Duration::from_millis(150),
        first_chunk_timeout: tuning.first_chunk_timeout(),
        gate: FirstChunkGate::AnyBytes,
        stderr_lines: 80,
        read_chunk: tuning.stdout_read_chunk(),
        queue_size: tuning.stdout_queue_size(),
        exit_tag: "ffmpeg_exited",
    };

    let winner_key = WinnerKey {
        codec: params.codec.as_str().to_owned(),
        monitor,
        fps: params.fps,
        width: params.max_w,
        low_latency: params.low_latency,
        audio,
    };
    if let Some(cached) = diag.winner(&winner_key) {
        if let Some(stream) = supervise(&cached, &opts, diag).await {
            return Some(stream);
        }
        diag.forget_winner(&winner_key);
    }

    let audio_sets =
        if audio { audio_input_arg_sets(tuning.audio_input_args.as_deref()) } else { Vec::new() };
    for input_args in &input_sets {
        for encoder in &encoders {
            for audio_args in &audio_sets {
                let cmd =
                    build_ts_command(&bin, input_args, Some(audio_args.as_slice()), encoder, params);
                if let Some(stream) = supervise(&cmd, &opts, diag).await {
                    diag.remember_winner(winner_key.clone(), cmd);
                    return Some(stream);
                }
            }
            let cmd = build_ts_command(&bin, input_args, None, encoder, params);
            if let Some(stream) = supervise(&cmd, &opts, diag).await {
                diag.remember_winner(winner_key.clone(), cmd);
                return Some(stream);
            }
        }
    }
    None
}

/// Build an owned string vector from literals.
pub(crate) fn svec<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

#[cfg(test)]
#[path = "ffmpeg_tests.rs"]
mod tests;
