//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors returned to HTTP clients as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Invalid request headers or body.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or wrong bearer token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown route or subscription.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The processor failed.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, axum::Json(ErrorBody { error: message })).into_response()
    }
}

impl From<eko_core::Error> for HttpError {
    fn from(err: eko_core::Error) -> Self {
        match err {
            eko_core::Error::NotSubscribed(msg) => Self::NotFound(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}
