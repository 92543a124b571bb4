//! Docker discovery and log streaming for eko.
//!
//! This crate defines the [`ContainerSource`] contract the processor polls and
//! its bollard-backed implementation.

mod container;
mod endpoint;
mod logs;
mod source;

pub use container::{DockerSource, parse_filter};
pub use endpoint::Endpoint;
pub use logs::LogFollower;
pub use source::{ContainerSource, SourceFactory};
