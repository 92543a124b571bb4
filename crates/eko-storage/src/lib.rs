//! Storage backends for persisted container logs.
//!
//! Every backend implements [`StorageBackend`]; [`connect`] picks one from a
//! `name::connection` storage definition.

mod backend;
mod fs;
mod mongo;
mod registry;
mod tailer;

pub use backend::StorageBackend;
pub use fs::{FsStorage, LOG_FILE_NAME};
pub use mongo::{BATCH_SIZE, MongoStorage, container_object_id};
pub use registry::{SUPPORTED_STORAGES, StorageOptions, SupportedStorage, connect};
pub use tailer::{DEFAULT_POLL_INTERVAL, Tailer};
