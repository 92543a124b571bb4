//! Error types for eko.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in eko.
#[derive(Debug, Error)]
pub enum Error {
    /// Container runtime error.
    #[error("docker error: {0}")]
    Docker(String),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed storage or runtime connection string.
    #[error("invalid connection string: {0}")]
    InvalidConnection(String),

    /// Endpoint or filter is not subscribed.
    #[error("not subscribed: {0}")]
    NotSubscribed(String),

    /// Log stream failed mid-flight.
    #[error("stream error: {0}")]
    Stream(String),

    /// An I/O bound call did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The processor driver is no longer running.
    #[error("processor is stopped")]
    ProcessorStopped,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
