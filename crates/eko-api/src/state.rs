//! Shared application state.

use std::sync::Arc;

use eko_processor::Processor;

/// Services needed by the handlers.
#[derive(Debug)]
pub struct ApiContext {
    /// Processor receiving subscriptions.
    pub processor: Processor,
    /// Bearer token clients must present.
    pub token: String,
}

/// Application state shared across all handlers.
pub type AppState = Arc<ApiContext>;
