// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;

use super::{encode_frame, fnv1a, JpegKey, NativeStreamer, RawFrame};
use crate::config::ServerConfig;

fn tuning() -> crate::config::StreamTuning {
    ServerConfig::parse_from(["cyberdeck"]).stream
}

fn gray_frame(width: usize, height: usize, value: u8) -> RawFrame {
    // BGRA rows, no padding.
    let mut bgra = Vec::with_capacity(width * height * 4);
    for _ in 0..width * height {
        bgra.extend_from_slice(&[value, value, value, 255]);
    }
    RawFrame { bgra: Arc::new(bgra), width, height, monitor: 1, seq: 1 }
}

#[test]
fn fnv1a_is_deterministic_and_sensitive() {
    let a = fnv1a(b"frame-data");
    assert_eq!(a, fnv1a(b"frame-data"));
    assert_ne!(a, fnv1a(b"frame-datb"));
    assert_ne!(fnv1a(b""), 0);
}

#[test]
fn encode_frame_produces_decodable_jpeg() {
    let raw = gray_frame(64, 48, 128);
    let key = JpegKey { width: 0, quality: 70, cursor: false, monitor: 1 };
    let jpeg = encode_frame(&raw, &key, false, None).expect("jpeg");
    let img = image::load_from_memory(&jpeg).expect("decodable");
    assert_eq!(img.width(), 64);
    assert_eq!(img.height(), 48);
}

#[test]
fn encode_frame_downscales_to_key_width() {
    let raw = gray_frame(128, 64, 90);
    let key = JpegKey { width: 64, quality: 70, cursor: false, monitor: 1 };
    let jpeg = encode_frame(&raw, &key, true, None).expect("jpeg");
    let img = image::load_from_memory(&jpeg).expect("decodable");
    assert_eq!(img.width(), 64);
    assert_eq!(img.height(), 32);
}

#[test]
fn encode_frame_draws_cursor_marker() {
    let raw = gray_frame(64, 64, 10);
    let key = JpegKey { width: 0, quality: 90, cursor: true, monitor: 1 };
    let plain = encode_frame(&raw, &key, false, None).expect("jpeg");
    let marked = encode_frame(&raw, &key, false, Some((32, 32))).expect("jpeg");
    assert_ne!(plain, marked);
}

#[test]
fn disabled_streamer_reports_reason_and_serves_nothing() {
    let streamer = NativeStreamer::disabled(&tuning(), "test");
    assert_eq!(streamer.disabled_reason().as_deref(), Some("test"));
    assert!(!streamer.is_native_healthy());
    let jpeg = streamer.get_jpeg(1280, 55, false, 1, Some(30));
    assert!(jpeg.is_empty());
    let stats = streamer.get_stats();
    assert_eq!(stats.disabled_reason.as_deref(), Some("test"));
    assert_eq!(stats.encoded_jpeg_frames, 0);
    assert_eq!(stats.jpeg_reuse_ratio, 0.0);
}

#[test]
fn get_jpeg_updates_desired_key() {
    let streamer = NativeStreamer::disabled(&tuning(), "test");
    let _ = streamer.get_jpeg(854, 42, true, 2, Some(24));
    let stats = streamer.get_stats();
    assert_eq!(stats.desired_w, 854);
    assert_eq!(stats.desired_q, 42);
    assert!(stats.desired_cursor);
    assert_eq!(stats.desired_monitor, 2);
    assert_eq!(stats.desired_fps, 24);
}
