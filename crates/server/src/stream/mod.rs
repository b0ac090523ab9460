// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream negotiation, MJPEG generation, and subprocess supervision.

pub mod adapt;
pub mod jpeg;
pub mod mjpeg;
pub mod offer;
pub mod supervisor;

use axum::http::header::{self, HeaderValue};
use axum::response::Response;

/// Multipart boundary separating MJPEG frames.
pub const MJPEG_BOUNDARY: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

/// Media type for multipart MJPEG responses.
pub const MJPEG_MEDIA_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Media type for MPEG-TS responses.
pub const TS_MEDIA_TYPE: &str = "video/mp2t";

/// Apply the no-buffering header set every streaming response carries.
pub fn apply_stream_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
}
