//! Error types for the proxy.

use crate::translate::types::ErrorResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Upstream API error: {status} - {message}")]
    Upstream { status: u16, message: String },

    #[error("Upstream request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Invalid upstream response: {message}")]
    BadUpstreamResponse { message: String },

    #[error("Normalization error: {message}")]
    Normalization { message: String },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn upstream(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }

    pub fn bad_upstream_response(msg: impl Into<String>) -> Self {
        Self::BadUpstreamResponse {
            message: msg.into(),
        }
    }

    pub fn normalization(msg: impl Into<String>) -> Self {
        Self::Normalization {
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify a reqwest failure: timeouts are reported separately from
    /// other transport errors.
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                seconds: timeout_secs,
            }
        } else {
            Self::Request(err)
        }
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Request(_) | Self::BadUpstreamResponse { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Timeout { .. } => "timeout_error",
            Self::Request(_) => "request_failed",
            Self::BadUpstreamResponse { .. } => "bad_upstream_response",
            _ => "internal_error",
        }
    }

    /// The OpenAI-style error body for this error.
    #[must_use]
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse::new(
            self.error_type(),
            self.to_string(),
            self.status_code().as_u16(),
        )
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_error_response())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
