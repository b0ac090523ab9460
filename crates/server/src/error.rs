// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error codes shared across the HTTP surface and the input socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidInput,
    Unauthorized,
    PermissionDenied,
    RateLimited,
    PairingExpired,
    NotFound,
    UploadTooLarge,
    UploadRejected,
    BackendUnavailable,
    UpstreamFailed,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::Unauthorized => 403,
            Self::PermissionDenied => 403,
            Self::RateLimited => 429,
            Self::PairingExpired => 403,
            Self::NotFound => 404,
            Self::UploadTooLarge => 413,
            Self::UploadRejected => 415,
            Self::BackendUnavailable => 501,
            Self::UpstreamFailed => 502,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::RateLimited => "RATE_LIMITED",
            Self::PairingExpired => "PAIRING_EXPIRED",
            Self::NotFound => "NOT_FOUND",
            Self::UploadTooLarge => "UPLOAD_TOO_LARGE",
            Self::UploadRejected => "UPLOAD_REJECTED",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::UpstreamFailed => "UPSTREAM_FAILED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Attach a machine-readable detail message to this code.
    pub fn with(self, message: impl Into<String>) -> ApiError {
        ApiError { code: self, message: message.into(), retry_after_s: None }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error carried by fallible handlers; converts into the JSON error envelope.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    /// Populated only for `RateLimited`; emitted as a `Retry-After` header.
    pub retry_after_s: Option<u64>,
}

impl ApiError {
    pub fn rate_limited(retry_after_s: u64) -> Self {
        Self {
            code: ErrorCode::RateLimited,
            message: "pin_rate_limited".to_owned(),
            retry_after_s: Some(retry_after_s),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: ErrorBody { code: self.code.as_str().to_owned(), message: self.message } };
        let mut response = (status, Json(body)).into_response();
        if let Some(retry) = self.retry_after_s {
            if let Ok(value) = header::HeaderValue::from_str(&retry.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result alias used by every fallible request handler.
pub type ApiResult<T> = Result<T, ApiError>;

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
