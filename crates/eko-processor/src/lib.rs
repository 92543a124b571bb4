//! Subscription registry and reconciliation loop for eko.
//!
//! [`Processor`] discovers containers matching subscribed filters on each
//! Docker endpoint and keeps exactly one save pipeline per container running
//! until its stream ends.

mod config;
mod cycle;
mod processor;
mod registry;

pub use config::ProcessorConfig;
pub use processor::Processor;
pub use registry::Subscription;
