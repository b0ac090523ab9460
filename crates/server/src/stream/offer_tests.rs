// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use serde_json::json;

use super::{build_offer_payload, EffectiveParams, OfferInputs};
use crate::capture::{BackendKind, BackendStatus};
use crate::config::ServerConfig;

fn tuning() -> crate::config::StreamTuning {
    ServerConfig::parse_from(["cyberdeck"]).stream
}

fn eff() -> EffectiveParams {
    EffectiveParams {
        monitor: 1,
        fps: 30,
        width: 1280,
        quality: 50,
        bitrate_k: 4200,
        gop: 60,
        preset: "veryfast".to_owned(),
        low_latency: true,
        cursor: false,
    }
}

fn ladder() -> Vec<u32> {
    vec![1920, 1280, 960, 640]
}

#[test]
fn screenshot_only_wayland_offer_shape() {
    // Wayland host where only the screenshot backend works: MJPEG first,
    // no TS candidates, encoder support reported false.
    let inputs = OfferInputs {
        can_capture: false,
        h264_ok: false,
        h265_ok: false,
        h264_encoder: false,
        h265_encoder: false,
        mjpeg_status: BackendStatus {
            native: false,
            ffmpeg: false,
            gstreamer: false,
            screenshot: true,
        },
        mjpeg_order: vec![BackendKind::Screenshot],
        prefer_mjpeg_offer: true,
    };
    let payload =
        build_offer_payload("http://192.168.1.5:8000", "tok", &eff(), &inputs, &tuning(), &ladder(), json!({}));

    assert_eq!(payload["recommended"], "mjpeg");
    let candidates = payload["candidates"].as_array().expect("candidates");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0]["codec"], "mjpeg");
    assert_eq!(candidates[0]["backend"], "screenshot");
    assert!(!candidates.iter().any(|c| c["id"] == "h264_ts" || c["id"] == "h265_ts"));
    assert_eq!(payload["support"]["h264_encoder"], false);
    assert_eq!(payload["support"]["mjpeg_grim"], true);
}

#[test]
fn full_stack_offer_orders_and_ids() {
    let inputs = OfferInputs {
        can_capture: true,
        h264_ok: true,
        h265_ok: true,
        h264_encoder: true,
        h265_encoder: true,
        mjpeg_status: BackendStatus { native: true, ffmpeg: true, gstreamer: false, screenshot: false },
        mjpeg_order: vec![BackendKind::Native, BackendKind::Ffmpeg],
        prefer_mjpeg_offer: false,
    };
    let payload =
        build_offer_payload("http://host:1", "tok", &eff(), &inputs, &tuning(), &ladder(), json!({}));
    let ids: Vec<&str> = payload["candidates"]
        .as_array()
        .expect("candidates")
        .iter()
        .filter_map(|c| c["id"].as_str())
        .collect();
    // TS-first ordering when MJPEG preference is off; h265 always last.
    assert_eq!(ids, vec!["h264_ts", "mjpeg", "mjpeg_ffmpeg", "h265_ts"]);
    assert_eq!(payload["recommended"], "h264_ts");
}

#[test]
fn candidate_urls_carry_request_parameters() {
    let inputs = OfferInputs {
        can_capture: true,
        h264_ok: true,
        h265_ok: false,
        h264_encoder: true,
        h265_encoder: false,
        mjpeg_status: BackendStatus { native: true, ffmpeg: false, gstreamer: false, screenshot: false },
        mjpeg_order: vec![BackendKind::Native],
        prefer_mjpeg_offer: true,
    };
    let payload =
        build_offer_payload("http://host:9", "SECRET", &eff(), &inputs, &tuning(), &ladder(), json!({}));
    let candidates = payload["candidates"].as_array().expect("candidates");
    let mjpeg_url = candidates[0]["url"].as_str().expect("url");
    assert!(mjpeg_url.starts_with("http://host:9/video_feed?"));
    assert!(mjpeg_url.contains("token=SECRET"));
    assert!(mjpeg_url.contains("max_w=1280"));
    assert!(mjpeg_url.contains("quality=50"));
    assert!(mjpeg_url.contains("low_latency=1"));
    assert!(mjpeg_url.contains("backend=native"));
    let ts_url = candidates[1]["url"].as_str().expect("url");
    assert!(ts_url.starts_with("http://host:9/video_h264?"));
    assert!(ts_url.contains("bitrate_k=4200"));
    assert!(ts_url.contains("gop=60"));
}

#[test]
fn h265_bitrate_is_scaled_down() {
    let inputs = OfferInputs {
        can_capture: true,
        h264_ok: false,
        h265_ok: true,
        h264_encoder: false,
        h265_encoder: true,
        mjpeg_status: BackendStatus::default(),
        mjpeg_order: vec![],
        prefer_mjpeg_offer: false,
    };
    let payload =
        build_offer_payload("http://h", "t", &eff(), &inputs, &tuning(), &ladder(), json!({}));
    let candidates = payload["candidates"].as_array().expect("candidates");
    assert_eq!(candidates.len(), 1);
    let url = candidates[0]["url"].as_str().expect("url");
    assert!(url.contains("bitrate_k=3360")); // 4200 * 0.8
}

#[test]
fn adaptive_hint_and_protocol_are_embedded() {
    let inputs = OfferInputs {
        can_capture: false,
        h264_ok: false,
        h265_ok: false,
        h264_encoder: false,
        h265_encoder: false,
        mjpeg_status: BackendStatus::default(),
        mjpeg_order: vec![],
        prefer_mjpeg_offer: true,
    };
    let payload =
        build_offer_payload("http://h", "t", &eff(), &inputs, &tuning(), &ladder(), json!({"x": 1}));
    assert_eq!(payload["recommended"], serde_json::Value::Null);
    assert_eq!(payload["fallback_policy"], "ordered_candidates");
    let hint = &payload["adaptive_hint"];
    assert_eq!(hint["rtt_high_ms"], 220);
    assert_eq!(hint["rtt_critical_ms"], 340);
    assert_eq!(hint["width_ladder"], json!([1920, 1280, 960, 640]));
    assert_eq!(hint["min_switch_interval_ms"], 8000);
    assert_eq!(hint["min_width_floor"], 1024);
    assert!(payload["protocol_version"].is_number());
    assert_eq!(payload["diag"]["x"], 1);
}
