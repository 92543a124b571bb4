//! Core types and configuration for eko.
//!
//! This crate provides the shared data structures, configuration management,
//! connection-string parsing, resume cursors and error types used across the
//! eko workspace.

mod config;
mod connection;
mod container;
pub mod cursor;
mod error;
mod stream;

pub use config::{API_TOKEN_ENV, Config, DOCKER_ENV, STORAGE_ENV};
pub use connection::ConnectionString;
pub use container::{Container, StorageMetadata};
pub use cursor::TimestampMs;
pub use error::{Error, Result};
pub use stream::{LogStream, StreamHandle, next_chunk};
