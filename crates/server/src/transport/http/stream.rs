// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming endpoints: MJPEG feed, H.264/H.265 MPEG-TS feeds, the
//! stream offer negotiation, and stream diagnostics.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::capture::ffmpeg::{ffmpeg_ts_stream, lowlat_bitrate_cap_k, Codec, TsParams};
use crate::capture::probe::{is_gnome_session, is_wayland_session};
use crate::capture::{list_monitors as capture_monitors, normalize_backend, BackendChoice, BackendKind};
use crate::error::{ApiResult, ErrorCode};
use crate::protocol::epoch_s;
use crate::stream::mjpeg::{
    backend_order, backend_status, ffmpeg_mjpeg_stream, gst_mjpeg_stream, native_mjpeg_body,
    prefer_gst_over_ffmpeg, screenshot_mjpeg_body,
};
use crate::stream::offer::{build_offer_payload, EffectiveParams, OfferInputs};
use crate::stream::{apply_stream_headers, MJPEG_MEDIA_TYPE, TS_MEDIA_TYPE};
use crate::transport::auth::{require_perm, AuthedToken};
use crate::transport::http::{base_url, with_protocol};
use crate::transport::state::AppState;

fn stream_response(body: axum::body::Body, media_type: &'static str) -> Response {
    let mut response = Response::new(body);
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static(media_type));
    apply_stream_headers(&mut response);
    response
}

#[derive(Debug, Deserialize)]
pub struct VideoFeedQuery {
    #[serde(default)]
    pub w: Option<u32>,
    #[serde(default)]
    pub q: Option<u8>,
    #[serde(default)]
    pub max_w: Option<u32>,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub cursor: Option<u8>,
    #[serde(default)]
    pub low_latency: Option<u8>,
    #[serde(default)]
    pub monitor: Option<u32>,
    #[serde(default)]
    pub backend: Option<String>,
}

async fn mjpeg_stream_for_backend(
    state: &Arc<AppState>,
    kind: BackendKind,
    monitor: u32,
    fps: u32,
    quality: u8,
    width: u32,
    cursor: bool,
) -> Option<Response> {
    match kind {
        BackendKind::Native => {
            let keepalive = state.probe.tuning().stale_keepalive();
            let body = native_mjpeg_body(
                Arc::clone(&state.native),
                width,
                quality,
                fps,
                cursor,
                monitor,
                keepalive,
            );
            Some(stream_response(body, MJPEG_MEDIA_TYPE))
        }
        BackendKind::Ffmpeg => {
            ffmpeg_mjpeg_stream(&state.probe, &state.diag, monitor, fps, quality, width)
                .await
                .map(|s| stream_response(s.into_body(), MJPEG_MEDIA_TYPE))
        }
        BackendKind::Gstreamer => gst_mjpeg_stream(&state.probe, &state.diag, fps, quality, width)
            .await
            .map(|s| stream_response(s.into_body(), MJPEG_MEDIA_TYPE)),
        BackendKind::Screenshot => {
            screenshot_mjpeg_body(Arc::clone(&state.probe), &state.diag, fps, quality, width)
                .await
                .map(|body| stream_response(body, MJPEG_MEDIA_TYPE))
        }
    }
}

/// `GET /video_feed` — MJPEG stream via the best available backend.
pub async fn video_feed(
    State(state): State<Arc<AppState>>,
    AuthedToken(token): AuthedToken,
    Query(query): Query<VideoFeedQuery>,
) -> ApiResult<Response> {
    require_perm(&state, &token, "perm_stream")?;
    let tuning = state.probe.tuning().clone();
    let wayland = is_wayland_session();

    let requested_w =
        query.max_w.or(query.w).unwrap_or_else(|| tuning.mjpeg_default_w());
    let mut eff_w = state.stabilizer.decide(&token, requested_w, epoch_s());
    let mut eff_q = query.quality.or(query.q).unwrap_or_else(|| tuning.mjpeg_default_q());
    eff_q = eff_q.max(tuning.mjpeg_min_q());
    let mut eff_fps = query.fps.unwrap_or(30).max(5);
    let eff_monitor = query.monitor.unwrap_or(1).max(1);
    let cursor = query.cursor.unwrap_or(1) == 1;
    let low_latency = query.low_latency.map(|v| v == 1).unwrap_or(tuning.mjpeg_lowlat_default);
    if low_latency {
        eff_w = eff_w.min(tuning.lowlat_max_w());
        eff_q = eff_q.clamp(tuning.mjpeg_min_q_lowlat(), tuning.lowlat_max_q());
        eff_fps = eff_fps.min(tuning.lowlat_max_fps(wayland));
    }

    let preferred = normalize_backend(query.backend.as_deref());
    let status = backend_status(&state.probe, &state.native, eff_monitor, eff_fps, false).await;
    let prefer_gst = prefer_gst_over_ffmpeg(&state.probe).await;
    let mut order = backend_order(
        &tuning.mjpeg_backend_order,
        preferred,
        &status,
        wayland && is_gnome_session(),
        prefer_gst,
    );
    info!(
        backend = preferred.as_str(),
        monitor = eff_monitor,
        fps = eff_fps,
        req_w = requested_w,
        eff_w,
        q = eff_q,
        low_latency,
        order = %order.iter().map(|b| b.as_str()).collect::<Vec<_>>().join(","),
        "video_feed request"
    );
    if order.is_empty() {
        // Nothing probed available; attempt everything in declared
        // order, except a native backend that disabled itself.
        if let BackendChoice::Named(kind) = preferred {
            order.push(kind);
        }
        for kind in crate::capture::MJPEG_BACKENDS {
            if kind == BackendKind::Native && state.native.disabled_reason().is_some() {
                continue;
            }
            if !order.contains(&kind) {
                order.push(kind);
            }
        }
    }

    for kind in order {
        if let Some(response) =
            mjpeg_stream_for_backend(&state, kind, eff_monitor, eff_fps, eff_q, eff_w, cursor).await
        {
            info!(backend = kind.as_str(), monitor = eff_monitor, "video_feed selected backend");
            return Ok(response);
        }
        warn!(backend = kind.as_str(), "video_feed backend failed");
    }

    let reason = state
        .native
        .disabled_reason()
        .unwrap_or_else(|| "mjpeg_backends_failed".to_owned());
    let detail =
        state.diag.last_error().unwrap_or_else(|| format!("stream_unavailable:{reason}"));
    Err(ErrorCode::BackendUnavailable.with(detail))
}

#[derive(Debug, Deserialize)]
pub struct VideoTsQuery {
    #[serde(default)]
    pub monitor: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub bitrate_k: Option<u32>,
    #[serde(default)]
    pub gop: Option<u32>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub max_w: Option<u32>,
    #[serde(default)]
    pub low_latency: Option<u8>,
    #[serde(default)]
    pub audio: Option<u8>,
}

async fn video_ts(
    state: Arc<AppState>,
    token: String,
    codec: Codec,
    query: VideoTsQuery,
) -> ApiResult<Response> {
    require_perm(&state, &token, "perm_stream")?;
    let tuning = state.probe.tuning().clone();
    let wayland = is_wayland_session();

    let default_bitrate = match codec {
        Codec::H265 => tuning.h265_bitrate_k(),
        _ => tuning.h264_bitrate_k(),
    };
    let monitor = query.monitor.unwrap_or(1).max(1);
    let mut fps = query.fps.unwrap_or(30);
    let mut bitrate_k = query.bitrate_k.unwrap_or(default_bitrate);
    let mut gop = query.gop.unwrap_or(60);
    let mut preset = query.preset.unwrap_or_else(|| "veryfast".to_owned());
    let mut max_w = query.max_w.unwrap_or_else(|| tuning.offer_max_w());
    let low_latency = query.low_latency.unwrap_or(1) == 1;
    let audio = query.audio.unwrap_or(0) == 1;
    if low_latency {
        fps = fps.max(10).min(tuning.lowlat_max_fps(wayland));
        max_w = max_w.min(tuning.lowlat_max_w());
        bitrate_k = bitrate_k.min(lowlat_bitrate_cap_k(max_w, fps, codec));
        gop = gop.min(fps.max(10));
        preset = "ultrafast".to_owned();
    }

    let params = TsParams {
        codec,
        fps,
        bitrate_k,
        gop,
        preset,
        max_w,
        low_latency,
        audio_bitrate_k: tuning.audio_bitrate_k(),
    };
    match ffmpeg_ts_stream(&state.probe, &state.diag, &params, monitor, audio).await {
        Some(stream) => Ok(stream_response(stream.into_body(), TS_MEDIA_TYPE)),
        None => {
            let detail = state
                .diag
                .last_error()
                .unwrap_or_else(|| "ffmpeg_unavailable_or_unsupported".to_owned());
            Err(ErrorCode::UpstreamFailed.with(detail))
        }
    }
}

/// `GET /video_h264` — H.264 MPEG-TS stream with low-latency caps.
pub async fn video_h264(
    State(state): State<Arc<AppState>>,
    AuthedToken(token): AuthedToken,
    Query(query): Query<VideoTsQuery>,
) -> ApiResult<Response> {
    video_ts(state, token, Codec::H264, query).await
}

/// `GET /video_h265` — H.265 MPEG-TS stream with low-latency caps.
pub async fn video_h265(
    State(state): State<Arc<AppState>>,
    AuthedToken(token): AuthedToken,
    Query(query): Query<VideoTsQuery>,
) -> ApiResult<Response> {
    video_ts(state, token, Codec::H265, query).await
}

#[derive(Debug, Deserialize)]
pub struct StreamOfferQuery {
    #[serde(default)]
    pub monitor: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub max_w: Option<u32>,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub bitrate_k: Option<u32>,
    #[serde(default)]
    pub gop: Option<u32>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub low_latency: Option<u8>,
    #[serde(default)]
    pub cursor: Option<u8>,
    #[serde(default)]
    pub backend: Option<String>,
}

/// `GET /api/stream_offer` — ordered transport candidates for adaptive
/// client negotiation.
pub async fn stream_offer(
    State(state): State<Arc<AppState>>,
    AuthedToken(token): AuthedToken,
    headers: HeaderMap,
    Query(query): Query<StreamOfferQuery>,
) -> ApiResult<Json<Value>> {
    require_perm(&state, &token, "perm_stream")?;
    let tuning = state.probe.tuning().clone();
    let wayland = is_wayland_session();

    let monitor = query.monitor.unwrap_or(1).max(1);
    let mut fps = query.fps.unwrap_or(30).max(5);
    let req_w = query.max_w.unwrap_or(0);
    let mut width = state.stabilizer.decide(
        &token,
        if req_w > 0 { req_w } else { tuning.offer_max_w() },
        epoch_s(),
    );
    let quality = query.quality.unwrap_or_else(|| tuning.offer_q()).clamp(10, 95);
    let mut bitrate_k = query.bitrate_k.unwrap_or_else(|| tuning.h264_bitrate_k()).max(200);
    let gop = query.gop.unwrap_or(60).max(10);
    let preset = query.preset.unwrap_or_else(|| "veryfast".to_owned());
    let low_latency = query.low_latency.map(|v| v == 1).unwrap_or(tuning.offer_low_latency_default);
    let cursor = query.cursor.map(|v| v == 1).unwrap_or(tuning.offer_cursor_default);
    if low_latency {
        fps = fps.min(tuning.lowlat_max_fps(wayland));
        width = width.min(tuning.lowlat_max_w());
        bitrate_k = bitrate_k.min(lowlat_bitrate_cap_k(width, fps, Codec::H264));
    }

    let can_capture = state.probe.capture_input_available(monitor, fps).await;
    let codec_capture_ok = can_capture && state.probe.ffmpeg_wayland_capture_reliable().await;
    let h264_encoder = state.probe.codec_encoder_available(Codec::H264).await;
    let h265_encoder = state.probe.codec_encoder_available(Codec::H265).await;
    let mjpeg_status = backend_status(&state.probe, &state.native, monitor, fps, false).await;
    let prefer_gst = prefer_gst_over_ffmpeg(&state.probe).await;
    let mjpeg_order = backend_order(
        &tuning.mjpeg_backend_order,
        normalize_backend(query.backend.as_deref()),
        &mjpeg_status,
        wayland && is_gnome_session(),
        prefer_gst,
    );
    let inputs = OfferInputs {
        can_capture,
        h264_ok: codec_capture_ok && h264_encoder,
        h265_ok: codec_capture_ok && h265_encoder,
        h264_encoder,
        h265_encoder,
        mjpeg_status,
        mjpeg_order,
        prefer_mjpeg_offer: !cfg!(windows) && wayland && tuning.prefer_mjpeg_offer,
    };
    let eff = EffectiveParams {
        monitor,
        fps,
        width,
        quality,
        bitrate_k,
        gop,
        preset,
        low_latency,
        cursor,
    };

    let base = base_url(&state, &headers);
    let diag = diag_value(&state).await;
    let payload = build_offer_payload(
        &base,
        &token,
        &eff,
        &inputs,
        &tuning,
        state.stabilizer.ladder(),
        diag,
    );
    Ok(Json(payload))
}

/// Backend availability and toolchain diagnostics block.
pub(crate) async fn diag_value(state: &Arc<AppState>) -> Value {
    let probe = &state.probe;
    let mut diag = json!({
        "ffmpeg_available": probe.ffmpeg_available(),
        "ffmpeg_bin": probe.ffmpeg_binary().map(|p| p.to_string_lossy().into_owned()),
        "ffmpeg_pipewire": probe.ffmpeg_supports_pipewire().await,
        "ffmpeg_libx264": probe.ffmpeg_supports_encoder("libx264").await,
        "ffmpeg_libx265": probe.ffmpeg_supports_encoder("libx265").await,
        "ffmpeg_h264_encoder": probe.preferred_codec_encoder(Codec::H264).await,
        "ffmpeg_h265_encoder": probe.preferred_codec_encoder(Codec::H265).await,
        "gst_available": probe.gst_available(),
        "gst_pipewire": probe.gst_supports_pipewire().await,
        "grim_available": probe.grim_available(),
        "screenshot_tool_available": probe.screenshot_tool_available(),
        "screenshot_tool_selected": probe.selected_screenshot_tool(),
        "pipewire_sources": probe.pipewire_source_candidates().await.into_iter().take(8).collect::<Vec<_>>(),
    });
    if let (Some(map), Value::Object(extra)) = (diag.as_object_mut(), state.diag.snapshot()) {
        for (k, v) in extra {
            map.insert(k, v);
        }
    }
    diag
}

/// Stream subsystem statistics shared by `/api/stream_stats` and
/// `/api/diag`.
pub(crate) async fn stream_stats_value(state: &Arc<AppState>) -> Value {
    let stats = state.native.get_stats();
    let monitor = stats.desired_monitor;
    let fps = stats.base_fps;
    let mut out = serde_json::to_value(&stats).unwrap_or_default();
    let status = backend_status(&state.probe, &state.native, monitor, fps, false).await;
    let prefer_gst = prefer_gst_over_ffmpeg(&state.probe).await;
    let order = backend_order(
        &state.probe.tuning().mjpeg_backend_order,
        BackendChoice::Auto,
        &status,
        is_wayland_session() && is_gnome_session(),
        prefer_gst,
    );
    if let Some(map) = out.as_object_mut() {
        if let Value::Object(extra) = diag_value(state).await {
            for (k, v) in extra {
                map.insert(k, v);
            }
        }
        map.insert("mjpeg_backends".to_owned(), serde_json::to_value(status).unwrap_or_default());
        map.insert(
            "mjpeg_order_auto".to_owned(),
            order.iter().map(|b| b.as_str()).collect::<Vec<_>>().into(),
        );
        map.insert("input_backend".to_owned(), state.input.name().into());
        map.insert("input_can_pointer".to_owned(), state.input.can_pointer().into());
        map.insert("input_can_keyboard".to_owned(), state.input.can_keyboard().into());
        map.insert("wayland_session".to_owned(), is_wayland_session().into());
    }
    out
}

/// `GET /api/stream_stats` — stream subsystem statistics and backend
/// diagnostics.
pub async fn stream_stats(
    State(state): State<Arc<AppState>>,
    AuthedToken(token): AuthedToken,
) -> ApiResult<Json<Value>> {
    require_perm(&state, &token, "perm_stream")?;
    Ok(with_protocol(stream_stats_value(&state).await))
}

#[derive(Debug, Deserialize)]
pub struct StreamBackendsQuery {
    #[serde(default)]
    pub monitor: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub backend: Option<String>,
}

/// `GET /api/stream_backends` — availability matrix and effective order.
pub async fn stream_backends(
    State(state): State<Arc<AppState>>,
    AuthedToken(token): AuthedToken,
    Query(query): Query<StreamBackendsQuery>,
) -> ApiResult<Json<Value>> {
    require_perm(&state, &token, "perm_stream")?;
    let monitor = query.monitor.unwrap_or(1).max(1);
    let fps = query.fps.unwrap_or(30).max(5);
    let selected = normalize_backend(query.backend.as_deref());
    let status = backend_status(&state.probe, &state.native, monitor, fps, false).await;
    let prefer_gst = prefer_gst_over_ffmpeg(&state.probe).await;
    let order = backend_order(
        &state.probe.tuning().mjpeg_backend_order,
        selected,
        &status,
        is_wayland_session() && is_gnome_session(),
        prefer_gst,
    );
    let mut supported = vec!["auto"];
    supported.extend(crate::capture::MJPEG_BACKENDS.iter().map(|b| b.as_str()));
    Ok(with_protocol(json!({
        "selected": selected.as_str(),
        "available": status,
        "order": order.iter().map(|b| b.as_str()).collect::<Vec<_>>(),
        "supported_values": supported,
        "diag": diag_value(&state).await,
    })))
}

/// `GET /api/monitors` — monitor geometry available to capture.
pub async fn list_monitors(
    State(state): State<Arc<AppState>>,
    AuthedToken(token): AuthedToken,
) -> ApiResult<Json<Value>> {
    require_perm(&state, &token, "perm_stream")?;
    Ok(Json(json!({ "monitors": capture_monitors() })))
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
