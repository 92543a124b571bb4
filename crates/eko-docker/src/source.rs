//! The container-runtime abstraction the processor depends on.

use std::sync::Arc;

use async_trait::async_trait;
use eko_core::{Container, LogStream, Result, TimestampMs};

/// A container runtime that can be polled for containers and their logs.
#[async_trait]
pub trait ContainerSource: Send + Sync {
    /// List running containers matching `filter`.
    ///
    /// An empty listing is `Ok(vec![])`, never an error.
    async fn list_active(&self, filter: &str) -> Result<Vec<Container>>;

    /// Open a follow-mode, timestamp-prefixed log stream for a container.
    ///
    /// With `since`, the stream starts at or slightly before that cursor, so the
    /// boundary line may be delivered a second time.
    async fn open_log_stream(
        &self,
        container_id: &str,
        since: Option<TimestampMs>,
    ) -> Result<LogStream>;

    /// Cheap liveness check.
    async fn is_healthy(&self) -> bool;
}

/// Builds a [`ContainerSource`] for an endpoint address.
pub type SourceFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn ContainerSource>> + Send + Sync>;
