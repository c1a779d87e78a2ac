//! Centralized error types for the relay hub.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses
//!
//! Per-message protocol violations (§4.8 Failure semantics) are not part of
//! this enum: they are reported as typed WebSocket reply payloads, since the
//! failing request is usually fire-and-forget or expects a structured
//! `{ok:false, message}` reply rather than an HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the relay hub.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum RelayError {
    /// The hub could not bind its listening socket.
    #[error("bind failed: {0}")]
    Bind(String),

    /// Requested source does not exist.
    #[error("source not found: {0}")]
    SourceNotFound(String),

    /// Client sent a malformed or out-of-range request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An unexpected internal condition.
    #[error("internal error: {0}")]
    Internal(String),

    /// Hub configuration is invalid or incomplete.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ErrorCode for RelayError {
    fn code(&self) -> &'static str {
        match self {
            Self::Bind(_) => "bind_failed",
            Self::SourceNotFound(_) => "source_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

impl RelayError {
    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SourceNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Bind(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for hub-wide operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Bind(err.to_string())
    }
}
