//! Runtime management for running pipelines
//!
//! Provides dual Tokio runtimes for stage plumbing and user compute, plus
//! the cooperative shutdown signal every worker watches.

pub mod executor;
pub mod shutdown;

pub use executor::{PipelineRuntime, RuntimeConfig};
pub use shutdown::ShutdownSignal;
