// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Native screen grabber: a dedicated worker thread pulling BGRA frames
//! and maintaining cached raw + encoded JPEG state for the MJPEG path.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use image::{DynamicImage, RgbImage};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use super::probe::is_wayland_session;
use crate::config::StreamTuning;
use crate::input::InputBackend;
use crate::protocol::epoch_s;
use crate::stream::jpeg::{encode_jpeg, resize_to_width};

/// Consecutive grab failures after which native capture disables itself.
const MAX_ERROR_STREAK: u32 = 10;

/// JPEG cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegKey {
    pub width: u32,
    pub quality: u8,
    pub cursor: bool,
    pub monitor: u32,
}

#[derive(Clone)]
struct RawFrame {
    bgra: Arc<Vec<u8>>,
    width: usize,
    height: usize,
    monitor: u32,
    seq: u64,
}

struct Shared {
    latest_raw: Option<RawFrame>,
    latest_jpeg: Option<Bytes>,
    jpeg_key: Option<JpegKey>,
    jpeg_seq: u64,
    desired: JpegKey,
    desired_fps: u32,
    last_raw_hash: Option<u64>,
    last_raw_size: Option<(usize, usize)>,
    encoded_frames: u64,
    reused_frames: u64,
    ts: f64,
    last_error: Option<String>,
    last_error_ts: f64,
    error_streak: u32,
    disabled_reason: Option<String>,
    ema_encode_ms: Option<f64>,
    ema_grab_ms: Option<f64>,
    ema_loop_fps: Option<f64>,
}

/// Capture-loop metrics surfaced by the diagnostics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct NativeStats {
    pub desired_w: u32,
    pub desired_q: u8,
    pub desired_cursor: bool,
    pub desired_monitor: u32,
    pub base_fps: u32,
    pub max_fps: u32,
    pub desired_fps: u32,
    pub ema_encode_ms: Option<f64>,
    pub ema_grab_ms: Option<f64>,
    pub ema_loop_fps: Option<f64>,
    pub ts: f64,
    pub disabled_reason: Option<String>,
    pub last_error: Option<String>,
    pub last_error_ts: Option<f64>,
    pub error_streak: u32,
    pub encoded_jpeg_frames: u64,
    pub reused_jpeg_frames: u64,
    pub jpeg_reuse_ratio: f64,
}

/// Native capture producer with cached latest raw frame and derived JPEG.
pub struct NativeStreamer {
    shared: Arc<Mutex<Shared>>,
    stop: Arc<AtomicBool>,
    input: Arc<dyn InputBackend>,
    base_fps: u32,
    max_fps: u32,
}

impl NativeStreamer {
    /// Start the capture worker thread.
    pub fn spawn(tuning: &StreamTuning, input: Arc<dyn InputBackend>) -> Arc<Self> {
        let streamer = Arc::new(Self::with_state(tuning, Arc::clone(&input), None));
        let shared = Arc::clone(&streamer.shared);
        let stop = Arc::clone(&streamer.stop);
        let max_fps = streamer.max_fps;
        let spawned = std::thread::Builder::new()
            .name("native-capture".to_owned())
            .spawn(move || capture_loop(shared, stop, input, max_fps));
        if let Err(e) = spawned {
            streamer.disable("thread_spawn_failed", &format!("native capture thread failed: {e}"));
        }
        streamer
    }

    /// Construct a permanently disabled streamer (tests, Wayland hosts).
    pub fn disabled(tuning: &StreamTuning, reason: &str) -> Arc<Self> {
        Arc::new(Self::with_state(
            tuning,
            Arc::new(crate::input::NullInputBackend),
            Some(reason.to_owned()),
        ))
    }

    fn with_state(
        tuning: &StreamTuning,
        input: Arc<dyn InputBackend>,
        disabled_reason: Option<String>,
    ) -> Self {
        let desired = JpegKey {
            width: tuning.native_w(),
            quality: tuning.native_q(),
            cursor: tuning.native_cursor,
            monitor: tuning.native_monitor(),
        };
        Self {
            shared: Arc::new(Mutex::new(Shared {
                latest_raw: None,
                latest_jpeg: None,
                jpeg_key: None,
                jpeg_seq: 0,
                desired,
                desired_fps: tuning.native_fps(),
                last_raw_hash: None,
                last_raw_size: None,
                encoded_frames: 0,
                reused_frames: 0,
                ts: 0.0,
                last_error: None,
                last_error_ts: 0.0,
                error_streak: 0,
                disabled_reason,
                ema_encode_ms: None,
                ema_grab_ms: None,
                ema_loop_fps: None,
            })),
            stop: Arc::new(AtomicBool::new(false)),
            input,
            base_fps: tuning.native_fps(),
            max_fps: tuning.native_max_fps(),
        }
    }

    /// Request graceful termination of the capture loop.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn disabled_reason(&self) -> Option<String> {
        self.shared.lock().disabled_reason.clone()
    }

    fn disable(&self, reason: &str, log_msg: &str) {
        self.shared.lock().disabled_reason = Some(reason.to_owned());
        warn!("{log_msg}");
    }

    /// Whether native capture is healthy enough to offer to clients.
    pub fn is_native_healthy(&self) -> bool {
        let (ts, streak, disabled) = {
            let shared = self.shared.lock();
            (shared.ts, shared.error_streak, shared.disabled_reason.is_some())
        };
        if disabled {
            return false;
        }
        // Startup grace: the loop has not produced anything yet.
        if ts <= 0.0 && streak == 0 {
            return true;
        }
        let stale = ts <= 0.0 || epoch_s() - ts > 2.5;
        !(stale && streak >= 3)
    }

    /// Latest JPEG for the requested parameters, re-encoding only when the
    /// cache key or sequence differs. Empty bytes mean no frame yet.
    pub fn get_jpeg(&self, width: u32, quality: u8, cursor: bool, monitor: u32, fps: Option<u32>) -> Bytes {
        let key = JpegKey { width, quality, cursor, monitor };
        let raw = {
            let mut shared = self.shared.lock();
            shared.desired = key;
            if let Some(fps) = fps {
                shared.desired_fps = fps.clamp(5, self.max_fps);
            }
            let Some(raw) = shared.latest_raw.clone() else {
                return Bytes::new();
            };
            if let Some(ref jpeg) = shared.latest_jpeg {
                if shared.jpeg_key == Some(key) && shared.jpeg_seq == raw.seq {
                    return jpeg.clone();
                }
            }
            if raw.monitor != monitor {
                return Bytes::new();
            }
            raw
        };

        // Encode outside the lock; drop the result if a newer raw landed.
        let fast = fps.unwrap_or(self.base_fps) >= 45;
        let cursor_pos = cursor.then(|| self.input.pointer_position()).flatten();
        let encoded = encode_frame(&raw, &key, fast, cursor_pos);
        let Some(encoded) = encoded else {
            return Bytes::new();
        };
        let encoded = Bytes::from(encoded);
        let mut shared = self.shared.lock();
        if shared.latest_raw.as_ref().map(|r| r.seq) == Some(raw.seq) {
            shared.latest_jpeg = Some(encoded.clone());
            shared.jpeg_key = Some(key);
            shared.jpeg_seq = raw.seq;
        }
        encoded
    }

    pub fn get_stats(&self) -> NativeStats {
        let shared = self.shared.lock();
        let total = shared.encoded_frames + shared.reused_frames;
        NativeStats {
            desired_w: shared.desired.width,
            desired_q: shared.desired.quality,
            desired_cursor: shared.desired.cursor,
            desired_monitor: shared.desired.monitor,
            base_fps: self.base_fps,
            max_fps: self.max_fps,
            desired_fps: shared.desired_fps,
            ema_encode_ms: shared.ema_encode_ms,
            ema_grab_ms: shared.ema_grab_ms,
            ema_loop_fps: shared.ema_loop_fps,
            ts: shared.ts,
            disabled_reason: shared.disabled_reason.clone(),
            last_error: shared.last_error.clone(),
            last_error_ts: (shared.last_error_ts > 0.0).then_some(shared.last_error_ts),
            error_streak: shared.error_streak,
            encoded_jpeg_frames: shared.encoded_frames,
            reused_jpeg_frames: shared.reused_frames,
            jpeg_reuse_ratio: if total > 0 { shared.reused_frames as f64 / total as f64 } else { 0.0 },
        }
    }
}

fn record_error(shared: &Mutex<Shared>, msg: &str) -> u32 {
    let mut shared = shared.lock();
    let mut msg = msg.to_owned();
    msg.truncate(400);
    shared.last_error = Some(msg);
    shared.last_error_ts = epoch_s();
    shared.error_streak += 1;
    shared.error_streak
}

fn capture_loop(
    shared: Arc<Mutex<Shared>>,
    stop: Arc<AtomicBool>,
    input: Arc<dyn InputBackend>,
    max_fps: u32,
) {
    if is_wayland_session() {
        shared.lock().disabled_reason = Some("wayland_session".to_owned());
        warn!("native screen capture disabled: Wayland session detected");
        return;
    }
    if cfg!(unix) && std::env::var("DISPLAY").map(|v| v.trim().is_empty()).unwrap_or(true) {
        shared.lock().disabled_reason = Some("no_display".to_owned());
        warn!("native screen capture disabled: DISPLAY is not set");
        return;
    }

    let mut backoff = Duration::from_millis(50);
    let mut seq: u64 = 0;
    let mut last_log: Option<Instant> = None;
    let mut last_loop: Option<Instant> = None;

    'capturer: while !stop.load(Ordering::Acquire) {
        let desired_monitor = shared.lock().desired.monitor.max(1);
        let displays = match scrap::Display::all() {
            Ok(displays) if !displays.is_empty() => displays,
            Ok(_) | Err(_) => {
                if record_error(&shared, "no_displays") >= MAX_ERROR_STREAK {
                    shared.lock().disabled_reason = Some("capture_failed".to_owned());
                    warn!("native capture disabled after repeated display enumeration failures");
                    return;
                }
                std::thread::sleep(backoff);
                backoff = (backoff * 3 / 2).min(Duration::from_secs(2));
                continue;
            }
        };
        let idx = (desired_monitor as usize - 1).min(displays.len() - 1);
        let effective_monitor = idx as u32 + 1;
        let Some(display) = displays.into_iter().nth(idx) else {
            continue;
        };
        let mut capturer = match scrap::Capturer::new(display) {
            Ok(capturer) => capturer,
            Err(e) => {
                if record_error(&shared, &format!("capturer: {e}")) >= MAX_ERROR_STREAK {
                    shared.lock().disabled_reason = Some("capture_failed".to_owned());
                    warn!("native capture disabled after repeated capturer failures");
                    return;
                }
                std::thread::sleep(backoff);
                backoff = (backoff * 3 / 2).min(Duration::from_secs(2));
                continue;
            }
        };
        let (width, height) = (capturer.width(), capturer.height());

        loop {
            if stop.load(Ordering::Acquire) {
                return;
            }
            let t0 = Instant::now();
            let (key, fps) = {
                let shared = shared.lock();
                (shared.desired, shared.desired_fps.clamp(5, max_fps))
            };
            if key.monitor.max(1) != effective_monitor && key.monitor.max(1) != desired_monitor {
                // Monitor switched; rebuild the capturer.
                continue 'capturer;
            }
            let min_dt = Duration::from_secs_f64(1.0 / fps as f64);

            let grab_start = Instant::now();
            let frame = match capturer.frame() {
                Ok(frame) => frame.to_vec(),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(4));
                    continue;
                }
                Err(e) => {
                    let streak = record_error(&shared, &format!("grab: {e}"));
                    if last_log.is_none_or(|t| t.elapsed() > Duration::from_secs(3)) {
                        last_log = Some(Instant::now());
                        warn!(err = %e, "native frame grab failed");
                    }
                    if streak >= MAX_ERROR_STREAK {
                        shared.lock().disabled_reason = Some("capture_failed".to_owned());
                        warn!("native capture disabled after repeated grab failures; subprocess fallback will be used");
                        return;
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 3 / 2).min(Duration::from_secs(2));
                    continue 'capturer;
                }
            };
            backoff = Duration::from_millis(50);
            let grab_ms = grab_start.elapsed().as_secs_f64() * 1000.0;

            // Reuse the previous JPEG when pixels did not change. Hashing
            // every frame is only worth it at moderate frame rates with no
            // cursor overlay.
            let allow_reuse = !key.cursor && fps <= 35;
            let raw_hash = allow_reuse.then(|| fnv1a(&frame));
            let stride = if height > 0 { frame.len() / height } else { 0 };
            if stride < width * 4 {
                if record_error(&shared, "short_frame") >= MAX_ERROR_STREAK {
                    shared.lock().disabled_reason = Some("capture_failed".to_owned());
                    return;
                }
                continue 'capturer;
            }

            seq += 1;
            let raw = RawFrame {
                bgra: Arc::new(frame),
                width,
                height,
                monitor: effective_monitor,
                seq,
            };

            let can_reuse = {
                let mut guard = shared.lock();
                guard.latest_raw = Some(raw.clone());
                allow_reuse
                    && guard.latest_jpeg.is_some()
                    && guard.jpeg_key == Some(key)
                    && guard.last_raw_hash == raw_hash
                    && guard.last_raw_size == Some((width, height))
            };

            let mut encode_ms = 0.0;
            let mut encoded: Option<Bytes> = None;
            if !can_reuse {
                let cursor_pos = key.cursor.then(|| input.pointer_position()).flatten();
                let enc_start = Instant::now();
                encoded = encode_frame(&raw, &key, fps >= 45, cursor_pos).map(Bytes::from);
                encode_ms = enc_start.elapsed().as_secs_f64() * 1000.0;
            }

            {
                let mut guard = shared.lock();
                if can_reuse {
                    guard.reused_frames += 1;
                    guard.jpeg_seq = seq;
                } else if let Some(jpeg) = encoded {
                    guard.latest_jpeg = Some(jpeg);
                    guard.jpeg_key = Some(key);
                    guard.encoded_frames += 1;
                    guard.jpeg_seq = seq;
                }
                guard.ts = epoch_s();
                guard.error_streak = 0;
                guard.last_raw_hash = if allow_reuse { raw_hash } else { None };
                guard.last_raw_size = allow_reuse.then_some((width, height));

                let a = 0.15;
                guard.ema_encode_ms =
                    Some(guard.ema_encode_ms.map_or(encode_ms, |prev| prev * (1.0 - a) + encode_ms * a));
                guard.ema_grab_ms =
                    Some(guard.ema_grab_ms.map_or(grab_ms, |prev| prev * (1.0 - a) + grab_ms * a));
                let now = Instant::now();
                if let Some(prev) = last_loop {
                    let dt = now.duration_since(prev).as_secs_f64().max(0.0001);
                    let fps_now = 1.0 / dt;
                    guard.ema_loop_fps =
                        Some(guard.ema_loop_fps.map_or(fps_now, |prev| prev * (1.0 - a) + fps_now * a));
                }
                last_loop = Some(now);
            }

            let elapsed = t0.elapsed();
            if elapsed < min_dt {
                std::thread::sleep(min_dt - elapsed);
            }
        }
    }
}

/// Encode one BGRA frame as JPEG: optional cursor overlay, downscale,
/// quality per the cache key.
fn encode_frame(raw: &RawFrame, key: &JpegKey, fast: bool, cursor_pos: Option<(i32, i32)>) -> Option<Vec<u8>> {
    let stride = raw.bgra.len() / raw.height.max(1);
    let mut img = RgbImage::new(raw.width as u32, raw.height as u32);
    for y in 0..raw.height {
        let row = &raw.bgra[y * stride..y * stride + raw.width * 4];
        for x in 0..raw.width {
            let px = &row[x * 4..x * 4 + 4];
            img.put_pixel(x as u32, y as u32, image::Rgb([px[2], px[1], px[0]]));
        }
    }
    if let Some((cx, cy)) = cursor_pos {
        draw_cursor_marker(&mut img, cx, cy);
    }
    let resized = resize_to_width(DynamicImage::ImageRgb8(img), key.width, fast);
    encode_jpeg(&resized.to_rgb8(), key.quality)
}

/// Ring plus tail marker at the pointer position, clipped to the frame.
fn draw_cursor_marker(img: &mut RgbImage, cx: i32, cy: i32) {
    let color = image::Rgb([0, 255, 65]);
    let (w, h) = (img.width() as i32, img.height() as i32);
    let mut put = |x: i32, y: i32| {
        if x >= 0 && y >= 0 && x < w && y < h {
            img.put_pixel(x as u32, y as u32, color);
        }
    };
    for deg in 0..360 {
        let rad = (deg as f64).to_radians();
        put(cx + (6.0 * rad.cos()).round() as i32, cy + (6.0 * rad.sin()).round() as i32);
        put(cx + (5.0 * rad.cos()).round() as i32, cy + (5.0 * rad.sin()).round() as i32);
    }
    for d in 0..=18 {
        put(cx + d, cy + d);
        put(cx + d + 1, cy + d);
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
#[path = "native_tests.rs"]
mod tests;
