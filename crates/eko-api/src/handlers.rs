//! Log subscription handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use eko_processor::Subscription;
use serde::Deserialize;

use crate::error::HttpError;
use crate::state::AppState;

/// Body of arrange and cancel requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrangeLogsRequest {
    /// Docker endpoint, as a URL.
    pub docker_address: String,
    /// Container filter, e.g. `label=env=prod`.
    pub container_filter: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArrangeLogsRequest {
    docker_address: Option<String>,
    container_filter: Option<String>,
}

impl ArrangeLogsRequest {
    /// Parse and validate a JSON body.
    pub fn from_json(body: &[u8]) -> Result<Self, HttpError> {
        let raw: RawArrangeLogsRequest = serde_json::from_slice(body)
            .map_err(|e| HttpError::BadRequest(format!("Invalid JSON body: {e}")))?;

        let docker_address = raw
            .docker_address
            .ok_or_else(|| HttpError::BadRequest("Docker Address is required".into()))?;
        let container_filter = raw
            .container_filter
            .ok_or_else(|| HttpError::BadRequest("Container filter is required".into()))?;

        url::Url::parse(&docker_address).map_err(|e| {
            HttpError::BadRequest(format!("Docker Address must be a valid URL: {e}"))
        })?;

        Ok(Self {
            docker_address,
            container_filter,
        })
    }
}

/// Subscribe a container filter on a Docker endpoint.
pub async fn arrange(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, HttpError> {
    let request = ArrangeLogsRequest::from_json(&body)?;

    state
        .processor
        .subscribe(&request.docker_address, &request.container_filter)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, endpoint = %request.docker_address, "subscribe failed");
            HttpError::Internal(e.to_string())
        })?;

    Ok(StatusCode::CREATED)
}

/// Remove a container filter from a Docker endpoint.
pub async fn cancel(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, HttpError> {
    let request = ArrangeLogsRequest::from_json(&body)?;

    state
        .processor
        .unsubscribe(&request.docker_address, &request.container_filter)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// List endpoints with their filters and tracked containers.
pub async fn subscriptions(
    State(state): State<AppState>,
) -> Result<Json<Vec<Subscription>>, HttpError> {
    Ok(Json(state.processor.subscriptions().await?))
}

/// Fallback for unknown routes.
pub async fn not_found() -> HttpError {
    HttpError::NotFound("Not Found".into())
}
