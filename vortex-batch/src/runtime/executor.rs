//! Tokio runtime executor configuration
//!
//! Provides separate I/O and compute runtimes so that heavy user transforms
//! never stall the channel plumbing between stages.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

use crate::error::{PipelineError, Result};

/// Configuration for the pipeline runtimes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of threads for the source and stage dispatchers
    pub io_threads: usize,
    /// Number of threads running user transforms
    pub compute_threads: usize,
    /// How long `close` waits for in-flight transforms before abandoning them
    pub shutdown_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            io_threads: 2,
            compute_threads: cpus.max(2),
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl RuntimeConfig {
    /// Check thread counts
    pub fn validate(&self) -> Result<()> {
        if self.io_threads == 0 {
            return Err(PipelineError::invalid("io_threads must be positive"));
        }
        if self.compute_threads == 0 {
            return Err(PipelineError::invalid("compute_threads must be positive"));
        }
        Ok(())
    }
}

/// Dual-runtime executor owned by a running pipeline
///
/// Stage dispatchers and the source live on the I/O runtime and spend
/// their time waiting on channels. User transforms run on the compute
/// runtime, one task per in-flight item.
pub struct PipelineRuntime {
    /// Channel plumbing runtime
    io_runtime: Runtime,
    /// CPU-bound transform runtime
    compute_runtime: Runtime,
    /// Shared configuration
    config: RuntimeConfig,
}

impl PipelineRuntime {
    /// Create a new runtime with the given configuration
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let io_runtime = Builder::new_multi_thread()
            .worker_threads(config.io_threads)
            .thread_name("vortex-batch-io")
            .enable_all()
            .build()
            .map_err(|e| PipelineError::Internal {
                message: format!("Failed to create I/O runtime: {}", e),
            })?;

        let compute_runtime = Builder::new_multi_thread()
            .worker_threads(config.compute_threads)
            .thread_name("vortex-batch-compute")
            .enable_all()
            .build()
            .map_err(|e| PipelineError::Internal {
                message: format!("Failed to create compute runtime: {}", e),
            })?;

        Ok(Self {
            io_runtime,
            compute_runtime,
            config,
        })
    }

    /// Spawn a task on the I/O runtime
    pub fn spawn_io<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.io_runtime.spawn(future)
    }

    /// Run a future on the I/O runtime, blocking until complete
    pub fn block_on_io<F: Future>(&self, future: F) -> F::Output {
        self.io_runtime.block_on(future)
    }

    /// Get the compute runtime handle
    pub fn compute_handle(&self) -> tokio::runtime::Handle {
        self.compute_runtime.handle().clone()
    }

    /// Get the configuration this runtime was built with
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Graceful shutdown of both runtimes
    pub fn shutdown(self) {
        let timeout = Duration::from_millis(self.config.shutdown_timeout_ms);
        // Dispatchers have already been joined; only stragglers remain
        self.io_runtime.shutdown_timeout(timeout);
        self.compute_runtime.shutdown_timeout(timeout);
    }

    /// Shutdown without waiting, safe to call from async contexts
    pub fn shutdown_background(self) {
        self.io_runtime.shutdown_background();
        self.compute_runtime.shutdown_background();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_creation() {
        let runtime = PipelineRuntime::new(RuntimeConfig::default()).unwrap();

        let compute = runtime.compute_handle();
        let result = runtime.block_on_io(async move {
            compute.spawn(async { 40 + 2 }).await.unwrap()
        });

        assert_eq!(result, 42);
        runtime.shutdown();
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = RuntimeConfig {
            compute_threads: 0,
            ..Default::default()
        };
        let err = PipelineRuntime::new(config).err().unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"io_threads": 3}"#).unwrap();
        assert_eq!(config.io_threads, 3);
        assert_eq!(config.shutdown_timeout_ms, 30_000);
    }
}
