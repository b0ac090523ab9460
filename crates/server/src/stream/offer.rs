// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream offer building: ordered transport candidates plus the adaptive
//! hint block clients use to drive their own feedback loop.

use serde_json::{json, Value};

use crate::capture::{BackendKind, BackendStatus};
use crate::config::StreamTuning;

/// Effective (capped, stabilized) parameters for one offer request.
#[derive(Debug, Clone)]
pub struct EffectiveParams {
    pub monitor: u32,
    pub fps: u32,
    pub width: u32,
    pub quality: u8,
    pub bitrate_k: u32,
    pub gop: u32,
    pub preset: String,
    pub low_latency: bool,
    pub cursor: bool,
}

/// Facts resolved from probes before the payload is assembled.
#[derive(Debug, Clone)]
pub struct OfferInputs {
    pub can_capture: bool,
    pub h264_ok: bool,
    pub h265_ok: bool,
    pub h264_encoder: bool,
    pub h265_encoder: bool,
    pub mjpeg_status: BackendStatus,
    pub mjpeg_order: Vec<BackendKind>,
    pub prefer_mjpeg_offer: bool,
}

fn query_url(base: &str, path: &str, params: &[(&str, String)]) -> String {
    let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{}{}?{}", base.trim_end_matches('/'), path, query.join("&"))
}

fn mjpeg_candidates(
    base: &str,
    token: &str,
    eff: &EffectiveParams,
    inputs: &OfferInputs,
) -> Vec<Value> {
    if !inputs.mjpeg_status.any() {
        return Vec::new();
    }
    let order: Vec<BackendKind> = if inputs.mjpeg_order.is_empty() {
        crate::capture::MJPEG_BACKENDS
            .into_iter()
            .filter(|kind| inputs.mjpeg_status.get(*kind))
            .collect()
    } else {
        inputs.mjpeg_order.clone()
    };
    order
        .iter()
        .enumerate()
        .map(|(i, backend)| {
            let id =
                if i == 0 { "mjpeg".to_owned() } else { format!("mjpeg_{}", backend.as_str()) };
            json!({
                "id": id,
                "codec": "mjpeg",
                "container": "multipart",
                "mime": crate::stream::MJPEG_MEDIA_TYPE,
                "backend": backend.as_str(),
                "url": query_url(base, "/video_feed", &[
                    ("token", token.to_owned()),
                    ("monitor", eff.monitor.to_string()),
                    ("fps", eff.fps.to_string()),
                    ("max_w", eff.width.to_string()),
                    ("quality", eff.quality.to_string()),
                    ("cursor", (eff.cursor as u8).to_string()),
                    ("low_latency", (eff.low_latency as u8).to_string()),
                    ("backend", backend.as_str().to_owned()),
                ]),
            })
        })
        .collect()
}

fn ts_candidate(base: &str, token: &str, eff: &EffectiveParams, codec: &str, bitrate_k: u32) -> Value {
    json!({
        "id": format!("{codec}_ts"),
        "codec": codec,
        "container": "mpegts",
        "mime": crate::stream::TS_MEDIA_TYPE,
        "url": query_url(base, &format!("/video_{codec}"), &[
            ("token", token.to_owned()),
            ("monitor", eff.monitor.to_string()),
            ("fps", eff.fps.to_string()),
            ("bitrate_k", bitrate_k.to_string()),
            ("gop", eff.gop.to_string()),
            ("preset", eff.preset.clone()),
            ("max_w", eff.width.to_string()),
            ("low_latency", (eff.low_latency as u8).to_string()),
        ]),
    })
}

/// Adaptive tuning hint advertised alongside the candidates.
pub fn adaptive_hint(tuning: &StreamTuning, ladder: &[u32]) -> Value {
    json!({
        "rtt_high_ms": tuning.adapt_rtt_high_ms(),
        "rtt_critical_ms": tuning.adapt_rtt_crit_ms(),
        "fps_drop_threshold": tuning.adapt_fps_drop_threshold(),
        "decrease_step": {
            "fps": tuning.adapt_dec_fps_step,
            "max_w": tuning.adapt_dec_w_step,
            "quality": tuning.adapt_dec_q_step,
        },
        "increase_step": {
            "fps": tuning.adapt_inc_fps_step,
            "max_w": tuning.adapt_inc_w_step,
            "quality": tuning.adapt_inc_q_step,
        },
        "width_ladder": ladder,
        "min_switch_interval_ms": (tuning.adapt_min_switch_s() * 1000.0) as u64,
        "hysteresis_ratio": tuning.adapt_hyst_ratio(),
        "min_width_floor": tuning.min_w_floor,
        "prefer_low_latency_default": tuning.offer_low_latency_default,
        "prefer_quality_before_resize": true,
        "recommended_stream_cursor": tuning.offer_cursor_default as u8,
    })
}

/// Assemble the full stream-offer payload.
pub fn build_offer_payload(
    base: &str,
    token: &str,
    eff: &EffectiveParams,
    inputs: &OfferInputs,
    tuning: &StreamTuning,
    ladder: &[u32],
    diag: Value,
) -> Value {
    let mut candidates: Vec<Value> = Vec::new();
    if inputs.prefer_mjpeg_offer {
        candidates.extend(mjpeg_candidates(base, token, eff, inputs));
        if inputs.h264_ok {
            candidates.push(ts_candidate(base, token, eff, "h264", eff.bitrate_k));
        }
    } else {
        if inputs.h264_ok {
            candidates.push(ts_candidate(base, token, eff, "h264", eff.bitrate_k));
        }
        candidates.extend(mjpeg_candidates(base, token, eff, inputs));
    }
    if inputs.h265_ok {
        let bitrate = ((eff.bitrate_k as f64) * 0.8).round().max(300.0) as u32;
        candidates.push(ts_candidate(base, token, eff, "h265", bitrate));
    }

    let recommended = candidates.first().and_then(|c| c.get("id")).cloned().unwrap_or(Value::Null);
    let mut payload = json!({
        "recommended": recommended,
        "candidates": candidates,
        "fallback_policy": "ordered_candidates",
        "reconnect_hint_ms": tuning.reconnect_hint_ms(),
        "adaptive_hint": adaptive_hint(tuning, ladder),
        "support": {
            "capture_input": inputs.can_capture,
            "h264_encoder": inputs.h264_encoder,
            "h265_encoder": inputs.h265_encoder,
            "mjpeg_native": inputs.mjpeg_status.native,
            "mjpeg_ffmpeg": inputs.mjpeg_status.ffmpeg,
            "mjpeg_gstreamer": inputs.mjpeg_status.gstreamer,
            "mjpeg_grim": inputs.mjpeg_status.screenshot,
            "mjpeg_order": inputs.mjpeg_order.iter().map(|b| b.as_str()).collect::<Vec<_>>(),
        },
        "diag": diag,
    });
    if let Some(map) = payload.as_object_mut() {
        crate::protocol::merge_protocol(map);
    }
    payload
}

#[cfg(test)]
#[path = "offer_tests.rs"]
mod tests;
