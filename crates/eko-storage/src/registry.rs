//! Backend selection by storage definition name.

use std::sync::Arc;
use std::time::Duration;

use eko_core::{ConnectionString, Error, Result};

use crate::backend::StorageBackend;
use crate::fs::FsStorage;
use crate::mongo::MongoStorage;

/// Description of a storage backend that can be selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedStorage {
    /// Name used in storage definitions.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Connection string template.
    pub connection_string: &'static str,
    /// Example definition.
    pub example: &'static str,
}

/// Every backend [`connect`] knows how to build.
pub const SUPPORTED_STORAGES: &[SupportedStorage] = &[
    SupportedStorage {
        name: "fs",
        description: "File System",
        connection_string: "fs::/folder/where/to/save",
        example: "fs::./logs",
    },
    SupportedStorage {
        name: "mongo",
        description: "MongoDB",
        connection_string: "mongo::mongodb://<host>:<port>/<database>",
        example: "mongo::mongodb://localhost:27017/eko",
    },
];

/// Options applied to backends at construction.
#[derive(Debug, Clone, Copy)]
pub struct StorageOptions {
    /// Poll interval of filesystem tailers.
    pub tail_poll_interval: Duration,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            tail_poll_interval: crate::tailer::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Build the backend named by a `name::connection` storage definition.
pub async fn connect(definition: &str, options: StorageOptions) -> Result<Arc<dyn StorageBackend>> {
    let definition = ConnectionString::parse(definition)?;
    tracing::debug!(storage = %definition.name, "connecting storage");

    match definition.name.as_str() {
        "fs" => Ok(Arc::new(
            FsStorage::open(&definition.remainder)
                .await?
                .with_tail_poll_interval(options.tail_poll_interval),
        )),
        "mongo" => Ok(Arc::new(MongoStorage::connect(&definition.remainder).await?)),
        other => Err(Error::Config(format!(
            "failed to find supported storage by name {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_fs() {
        let dir = tempfile::tempdir().unwrap();
        let definition = format!("fs::{}", dir.path().join("logs").display());

        let storage = connect(&definition, StorageOptions::default()).await.unwrap();
        assert_eq!(storage.metadata().name, "fs");
        assert!(storage.is_healthy().await);
    }

    #[tokio::test]
    async fn test_unknown_storage_is_config_error() {
        assert!(matches!(
            connect("s3::bucket", StorageOptions::default()).await,
            Err(Error::Config(_))
        ));
        assert!(matches!(
            connect("no-separator", StorageOptions::default()).await,
            Err(Error::InvalidConnection(_))
        ));
    }

    #[test]
    fn test_supported_names_are_unique() {
        let mut names: Vec<_> = SUPPORTED_STORAGES.iter().map(|s| s.name).collect();
        names.dedup();
        assert_eq!(names.len(), SUPPORTED_STORAGES.len());
    }
}
