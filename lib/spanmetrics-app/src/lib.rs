//! High-level application primitives.
//!
//! This crate provides the pieces needed to bootstrap a process hosting the span metrics engine, such as initializing
//! logging and internal metrics.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod logging;
pub mod metrics;

/// A generic error.
pub type GenericError = anyhow::Error;

/// Common imports.
pub mod prelude {
    pub use super::logging::{fatal_and_exit, initialize_logging, LoggingConfiguration};
    pub use super::metrics::{initialize_metrics, log_internal_metrics};
}
