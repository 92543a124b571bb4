//! HTTP API in front of the eko processor.
//!
//! `POST /api/v1/logs/arrange` subscribes a container filter on a Docker
//! endpoint; the processor does the rest.

mod error;
mod handlers;
mod middleware;
mod routes;
mod state;

use std::future::Future;

use tokio::net::TcpListener;

pub use error::HttpError;
pub use handlers::ArrangeLogsRequest;
pub use routes::create_router;
pub use state::{ApiContext, AppState};

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> eko_core::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "server has started");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
