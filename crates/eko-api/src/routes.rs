//! Route definitions and router construction.

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};

use crate::handlers;
use crate::middleware::{authenticate, require_json};
use crate::state::AppState;

/// Build the `/api/v1` routes.
fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/logs/arrange",
            post(handlers::arrange)
                .delete(handlers::cancel)
                .route_layer(from_fn(require_json)),
        )
        .route("/logs/subscriptions", get(handlers::subscriptions))
        .route_layer(from_fn_with_state(state.clone(), authenticate))
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes(&state))
        .fallback(handlers::not_found)
        .with_state(state)
}
