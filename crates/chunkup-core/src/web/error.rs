//! HTTP error handling for the upload API.
//!
//! Core errors become JSON bodies shaped like [`ErrorBody`](crate::protocol::ErrorBody)
//! with a status code derived from the error code.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Human-readable error message
    #[serde(rename = "error")]
    pub message: String,
    /// Error code (e.g., "E103" for an out-of-order chunk)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Index the server expects next
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_chunk: Option<u64>,
    /// Index that was submitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_chunk: Option<u64>,
    /// Additional details about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// Create a new API error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            expected_chunk: None,
            received_chunk: None,
            details: None,
        }
    }

    /// Create a new API error with code and message.
    #[must_use]
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::new(message)
        }
    }

    /// Add details to the error.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Malformed request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code("E101", message)
    }

    /// Unknown catalog record.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code("E105", message)
    }

    /// Server-side failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(message)
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self.code.as_deref() {
            Some("E101" | "E102" | "E103") => StatusCode::BAD_REQUEST,
            Some("E105") => StatusCode::NOT_FOUND,
            Some("E106") => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let mut api = Self {
            code: err.code().map(String::from),
            ..Self::new(err.to_string())
        };
        match err {
            Error::OutOfOrder { expected, received } => {
                api.expected_chunk = Some(expected);
                api.received_chunk = Some(received);
            }
            Error::ChecksumMismatch { chunk, .. } => api.received_chunk = Some(chunk),
            Error::InvalidPath(_) => api.code = Some("E101".into()),
            _ => {}
        }
        if let Some(hint) = api_hint(&api) {
            api.details = Some(hint.to_string());
        }
        api
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

fn api_hint(api: &ApiError) -> Option<&'static str> {
    match api.code.as_deref() {
        Some("E102") => Some("Resend the chunk"),
        Some("E103") => Some("Resume from expectedChunk"),
        _ => None,
    }
}

/// Result type for web handlers.
pub type ApiResult<T> = Result<T, ApiError>;
