// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MJPEG path: backend availability/order computation, the native
//! multipart generator, and the screenshot-loop stream.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::capture::ffmpeg::build_mjpeg_command;
use crate::capture::gst::build_gst_pipeline;
use crate::capture::native::NativeStreamer;
use crate::capture::probe::{is_wayland_session, CaptureProbe};
use crate::capture::{normalize_backend, BackendChoice, BackendKind, BackendStatus, StreamDiag, MJPEG_BACKENDS};
use crate::stream::supervisor::{supervise, FirstChunkGate, SupervisedStream, SuperviseOptions};
use crate::stream::MJPEG_BOUNDARY;

/// Compute the availability map for the four MJPEG backends.
///
/// `probe_mode = false` keeps this request-path cheap by using capability
/// checks only; `true` additionally runs the live capture probes.
pub async fn backend_status(
    probe: &CaptureProbe,
    native: &NativeStreamer,
    monitor: u32,
    fps: u32,
    probe_mode: bool,
) -> BackendStatus {
    let tuning = probe.tuning();
    let wayland = is_wayland_session();

    let native_ok = native.disabled_reason().is_none() && native.is_native_healthy();

    let gstreamer_capable =
        !cfg!(windows) && wayland && probe.gst_available() && probe.gst_supports_pipewire().await;
    let gstreamer_ok =
        gstreamer_capable && (!probe_mode || probe.gst_pipewire_capture_healthy().await);

    let screenshot_capable =
        !cfg!(windows) && wayland && (probe.grim_available() || probe.screenshot_tool_available());

    let ffmpeg_enabled = !tuning.disable_ffmpeg_mjpeg;
    let ffmpeg_capable = ffmpeg_enabled
        && probe.ffmpeg_available()
        && !probe.ffmpeg_input_arg_sets(monitor, fps).await.is_empty();
    let mut ffmpeg_ok =
        ffmpeg_capable && (!probe_mode || probe.ffmpeg_mjpeg_capture_healthy(monitor, fps).await);

    // Wayland with x11grab-only ffmpeg is unstable for mobile MJPEG
    // clients; mask it from auto selection when alternatives exist.
    if ffmpeg_ok
        && !cfg!(windows)
        && wayland
        && tuning.wayland_prefer_non_x11grab
        && !tuning.force_wayland_x11grab
        && !probe.ffmpeg_supports_pipewire().await
        && probe.ffmpeg_supports_x11grab().await
        && (gstreamer_capable || screenshot_capable)
    {
        ffmpeg_ok = false;
    }

    let screenshot_ok =
        screenshot_capable && (!probe_mode || probe.screenshot_capture_healthy().await);

    BackendStatus {
        native: native_ok,
        ffmpeg: ffmpeg_ok,
        gstreamer: gstreamer_ok,
        screenshot: screenshot_ok,
    }
}

/// Whether GStreamer should be preferred over ffmpeg for MJPEG.
pub async fn prefer_gst_over_ffmpeg(probe: &CaptureProbe) -> bool {
    !cfg!(windows)
        && is_wayland_session()
        && !probe.ffmpeg_wayland_capture_reliable().await
        && probe.gst_supports_pipewire().await
}

/// Compute the effective backend order, keeping only available backends.
///
/// Pure over its inputs: the env override string, the request hint, the
/// availability map, and the session flags.
pub fn backend_order(
    env_order: &str,
    preferred: BackendChoice,
    status: &BackendStatus,
    wayland_gnome: bool,
    prefer_gst: bool,
) -> Vec<BackendKind> {
    let parsed_env: Vec<BackendKind> = env_order
        .split(',')
        .filter_map(|item| match normalize_backend(Some(item)) {
            BackendChoice::Named(kind) => Some(kind),
            BackendChoice::Auto => None,
        })
        .collect();

    let base: Vec<BackendKind> = if !parsed_env.is_empty() {
        parsed_env
    } else if wayland_gnome {
        // GNOME screenshot capture is reliable but low-fps; keep realtime
        // pipelines first and screenshot as fallback.
        if prefer_gst {
            vec![BackendKind::Gstreamer, BackendKind::Ffmpeg, BackendKind::Screenshot, BackendKind::Native]
        } else {
            vec![BackendKind::Ffmpeg, BackendKind::Gstreamer, BackendKind::Screenshot, BackendKind::Native]
        }
    } else if prefer_gst {
        vec![BackendKind::Gstreamer, BackendKind::Screenshot, BackendKind::Ffmpeg, BackendKind::Native]
    } else {
        vec![BackendKind::Native, BackendKind::Ffmpeg, BackendKind::Gstreamer, BackendKind::Screenshot]
    };

    let mut ordered: Vec<BackendKind> = Vec::new();
    if let BackendChoice::Named(kind) = preferred {
        ordered.push(kind);
    }
    for kind in base {
        if !ordered.contains(&kind) {
            ordered.push(kind);
        }
    }
    for kind in MJPEG_BACKENDS {
        if !ordered.contains(&kind) {
            ordered.push(kind);
        }
    }
    ordered.into_iter().filter(|kind| status.get(*kind)).collect()
}

fn frame_part(frame: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(MJPEG_BOUNDARY.len() + frame.len() + 2);
    part.put_slice(MJPEG_BOUNDARY);
    part.put_slice(frame);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Multipart MJPEG body fed by the native capture cache, with stale-frame
/// keepalive so clients never observe an idle connection.
pub fn native_mjpeg_body(
    native: Arc<NativeStreamer>,
    width: u32,
    quality: u8,
    fps: u32,
    cursor: bool,
    monitor: u32,
    keepalive: Duration,
) -> axum::body::Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(2);
    tokio::spawn(async move {
        let min_dt = Duration::from_secs_f64(1.0 / fps.max(5) as f64);
        let mut last_frame = Bytes::new();
        let mut last_emit = tokio::time::Instant::now();
        loop {
            let t0 = tokio::time::Instant::now();
            let native = Arc::clone(&native);
            let frame = tokio::task::spawn_blocking(move || {
                native.get_jpeg(width, quality, cursor, monitor, Some(fps))
            })
            .await
            .unwrap_or_default();

            let emit = if !frame.is_empty() {
                last_frame = frame.clone();
                Some(frame)
            } else if !last_frame.is_empty() && t0.duration_since(last_emit) >= keepalive {
                Some(last_frame.clone())
            } else {
                None
            };
            if let Some(frame) = emit {
                if tx.send(Ok(frame_part(&frame))).await.is_err() {
                    debug!("native mjpeg client disconnected");
                    break;
                }
                last_emit = tokio::time::Instant::now();
            }
            let elapsed = t0.elapsed();
            if elapsed < min_dt {
                tokio::time::sleep(min_dt - elapsed).await;
            }
        }
    });
    axum::body::Body::from_stream(ReceiverStream::new(rx))
}

/// Screenshot-loop MJPEG body: re-capture at a low cadence, re-emitting
/// the last good frame between captures.
pub async fn screenshot_mjpeg_body(
    probe: Arc<CaptureProbe>,
    diag: &Arc<StreamDiag>,
    fps: u32,
    quality: u8,
    width: u32,
) -> Option<axum::body::Body> {
    if cfg!(windows) || !is_wayland_session() {
        return None;
    }
    if !probe.grim_available() && !probe.screenshot_tool_available() {
        return None;
    }
    let tuning = probe.tuning();
    let keepalive = tuning.stale_keepalive();
    let fps = fps.clamp(2, tuning.screenshot_max_fps(true));
    let quality = quality.min(tuning.screenshot_max_q()).max(20);
    let width =
        if width > 0 { width.min(tuning.screenshot_max_w()) } else { tuning.screenshot_max_w() };

    let mut first = probe.wayland_grim_frame(width, quality).await;
    if first.is_none() {
        first = probe.screenshot_tool_frame(width, quality).await;
    }
    let Some(first) = first else {
        diag.record(None, Some("screenshot_capture_no_output"));
        return None;
    };

    let diag = Arc::clone(diag);
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(2);
    tokio::spawn(async move {
        let min_dt = Duration::from_secs_f64(1.0 / fps.max(2) as f64);
        let mut last_frame = Bytes::from(first.clone());
        let mut last_emit = tokio::time::Instant::now();
        if tx.send(Ok(frame_part(&first))).await.is_err() {
            return;
        }
        loop {
            let t0 = tokio::time::Instant::now();
            let mut frame = probe.wayland_grim_frame(width, quality).await;
            if frame.is_none() {
                frame = probe.screenshot_tool_frame(width, quality).await;
            }
            match frame {
                Some(frame) => {
                    let frame = Bytes::from(frame);
                    if tx.send(Ok(frame_part(&frame))).await.is_err() {
                        break;
                    }
                    last_frame = frame;
                    last_emit = tokio::time::Instant::now();
                }
                None => {
                    diag.record(None, Some("screenshot_capture_failed"));
                    if !last_frame.is_empty()
                        && tokio::time::Instant::now().duration_since(last_emit) >= keepalive
                    {
                        if tx.send(Ok(frame_part(&last_frame))).await.is_err() {
                            break;
                        }
                        last_emit = tokio::time::Instant::now();
                    }
                }
            }
            let elapsed = t0.elapsed();
            if elapsed < min_dt {
                tokio::time::sleep(min_dt - elapsed).await;
            }
        }
    });
    Some(axum::body::Body::from_stream(ReceiverStream::new(rx)))
}

fn subprocess_options(probe: &CaptureProbe, exit_tag: &'static str, settle: Duration) -> SuperviseOptions {
    let tuning = probe.tuning();
    SuperviseOptions {
        settle,
        first_chunk_timeout: tuning.first_chunk_timeout(),
        gate: FirstChunkGate::JpegFrame,
        stderr_lines: 120,
        read_chunk: tuning.stdout_read_chunk(),
        queue_size: tuning.stdout_queue_size(),
        exit_tag,
    }
}

/// Start the ffmpeg MJPEG subprocess stream, trying each capture input
/// candidate until one produces a visible first frame.
pub async fn ffmpeg_mjpeg_stream(
    probe: &CaptureProbe,
    diag: &Arc<StreamDiag>,
    monitor: u32,
    fps: u32,
    quality: u8,
    width: u32,
) -> Option<SupervisedStream> {
    if probe.tuning().disable_ffmpeg_mjpeg {
        return None;
    }
    let Some(bin) = probe.ffmpeg_binary() else {
        diag.record(None, Some("ffmpeg_unavailable"));
        return None;
    };
    let input_sets = probe.ffmpeg_input_arg_sets(monitor, fps).await;
    if input_sets.is_empty() {
        if !cfg!(windows) && is_wayland_session() && !probe.ffmpeg_supports_pipewire().await {
            diag.record(None, Some("ffmpeg_missing_pipewire_support"));
        } else {
            diag.record(None, Some("ffmpeg_unsupported_or_capture_unavailable"));
        }
        return None;
    }

    let bin = bin.to_string_lossy().into_owned();
    let low_latency = probe.tuning().mjpeg_lowlat_default;
    let opts = subprocess_options(probe, "ffmpeg_exited", Duration::from_millis(200));
    for input_args in input_sets {
        let cmd = build_mjpeg_command(&bin, &input_args, quality, width, low_latency);
        if let Some(stream) = supervise(&cmd, &opts, diag).await {
            return Some(stream);
        }
    }
    None
}

/// Start the GStreamer MJPEG subprocess stream over pipewire.
pub async fn gst_mjpeg_stream(
    probe: &CaptureProbe,
    diag: &Arc<StreamDiag>,
    fps: u32,
    quality: u8,
    width: u32,
) -> Option<SupervisedStream> {
    if !is_wayland_session() || !probe.gst_available() {
        return None;
    }
    if !probe.gst_supports_pipewire().await {
        diag.record(None, Some("gstreamer_missing_pipewire_support"));
        return None;
    }
    let opts = subprocess_options(probe, "gstreamer_exited", Duration::from_millis(200));
    for node in probe.gst_pipewire_source_candidates().await {
        let cmd = build_gst_pipeline(&node, fps, quality, width);
        if let Some(stream) = supervise(&cmd, &opts, diag).await {
            return Some(stream);
        }
    }
    None
}

#[cfg(test)]
#[path = "mjpeg_tests.rs"]
mod tests;
