// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for the proxy API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    NoCredentials,
    UpstreamError,
    UpstreamUnavailable,
    Timeout,
    StoreError,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::NoCredentials => 500,
            Self::UpstreamError => 502,
            Self::UpstreamUnavailable => 502,
            Self::Timeout => 504,
            Self::StoreError => 503,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::NoCredentials => "NO_CREDENTIALS",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::StoreError => "STORE_ERROR",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

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

/// Failure of a proxied operation, convertible into an HTTP response.
///
/// Upstream errors keep the upstream status so the client sees what the
/// synthesis service said rather than a generic gateway error.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("no credentials available")]
    NoCredentials,
    #[error("API response not OK: {status} {message}")]
    Upstream { status: u16, message: String },
    #[error("upstream unreachable: {0}")]
    UpstreamUnavailable(String),
    #[error("upstream timed out: {0}")]
    Timeout(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProxyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadRequest(_) => ErrorCode::BadRequest,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::NoCredentials => ErrorCode::NoCredentials,
            Self::Upstream { .. } => ErrorCode::UpstreamError,
            Self::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Store(_) => ErrorCode::StoreError,
        }
    }

    /// HTTP status for this error. Upstream statuses pass through when valid.
    pub fn status(&self) -> StatusCode {
        if let Self::Upstream { status, .. } = self {
            if let Ok(code) = StatusCode::from_u16(*status) {
                return code;
            }
        }
        StatusCode::from_u16(self.code().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (_, body) = self.code().to_http_response(self.to_string());
        (self.status(), body).into_response()
    }
}

/// Durable store failure.
///
/// `RateLimited` is classified by the backend so callers can choose a
/// fallback by variant instead of by message text.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store data corrupt: {0}")]
    Corrupt(String),
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}
