//! The storage contract shared by every backend.

use async_trait::async_trait;
use eko_core::{LogStream, Result, StorageMetadata, StreamHandle, TimestampMs};

/// Durable sink and source of per-container log bytes.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Start persisting `logs` under `container_id`.
    ///
    /// Returns as soon as the pipeline runs; the handle reports when it ends.
    async fn save_logs(&self, container_id: &str, logs: LogStream) -> Result<StreamHandle>;

    /// Stored logs of a container, or `None` if nothing was persisted yet.
    async fn read_logs(&self, container_id: &str) -> Result<Option<LogStream>>;

    /// Timestamp of the last persisted line.
    ///
    /// `None` when nothing is stored or the last line cannot be parsed, so a
    /// corrupt line resets the container to a full re-read instead of failing.
    async fn latest_log_timestamp(&self, container_id: &str) -> Result<Option<TimestampMs>>;

    /// Ids of every container with persisted logs.
    async fn logged_containers(&self) -> Result<Vec<String>>;

    /// Whether the backend can currently accept writes.
    async fn is_healthy(&self) -> bool;

    /// Diagnostic description of this backend.
    fn metadata(&self) -> StorageMetadata;

    /// Release backend resources. Safe to call more than once.
    async fn destroy(&self);
}
