//! Request guards: bearer token and JSON content type.

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::HttpError;
use crate::state::AppState;

/// Media types accepted by body-carrying routes.
pub const ALLOWED_CONTENT_TYPES: &[&str] = &["application/json"];

/// Reject requests without the configured bearer token.
pub async fn authenticate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| HttpError::Unauthorized("Authorization header isn't set".into()))?;

    if bearer.strip_prefix("Bearer ") != Some(state.token.as_str()) {
        return Err(HttpError::Unauthorized("Bearer token is invalid".into()));
    }

    Ok(next.run(request).await)
}

/// Reject requests whose content type is not JSON.
pub async fn require_json(request: Request, next: Next) -> Result<Response, HttpError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| HttpError::BadRequest("Content-Type header is missing".into()))?;

    check_content_type(content_type)?;
    Ok(next.run(request).await)
}

fn check_content_type(content_type: &str) -> Result<(), HttpError> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if ALLOWED_CONTENT_TYPES.contains(&media_type.as_str()) {
        Ok(())
    } else {
        Err(HttpError::BadRequest(format!(
            "Content-Type {content_type} isn't supported. Please use one of {}",
            ALLOWED_CONTENT_TYPES.join(",")
        )))
    }
}
