//! Error types for the batch pipeline
//!
//! Covers configuration, shape/length, worker and runtime errors.

use thiserror::Error;

/// Error type accepted from user-supplied closures (transforms, combiners, predictors)
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Primary error type for all pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    // ========== Configuration Errors ==========

    /// Batches per epoch must be positive
    #[error("Expected a positive amount of batches per epoch, but got {value}")]
    InvalidBatchesPerEpoch { value: usize },

    /// Fixed batch size must be positive
    #[error("Expected a positive batch size, but got {value}")]
    InvalidBatchSize { value: usize },

    /// Any other invalid parameter
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // ========== Shape Errors ==========

    /// Samples of a chunk have different arity
    #[error("Samples have different arity: expected {expected}, got {actual} at index {index}")]
    ArityMismatch { expected: usize, actual: usize, index: usize },

    /// Arrays cannot be stacked, padded or placed together
    #[error("Shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    /// Sequences that must exhaust simultaneously did not
    #[error("Length mismatch: {reason}")]
    LengthMismatch { reason: String },

    /// An operation needs at least one element
    #[error("Empty input: {what}")]
    EmptyInput { what: String },

    // ========== Worker Errors ==========

    /// A user transform returned an error
    #[error("Stage '{stage}' failed: {message}")]
    Transform { stage: String, message: String },

    /// A user transform panicked
    #[error("Stage '{stage}' worker panicked")]
    WorkerPanicked { stage: String },

    // ========== Runtime Errors ==========

    /// Pipeline has been closed while waiting
    #[error("Shutdown in progress")]
    ShutdownInProgress,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PipelineError {
    /// Returns true if this error was raised while validating configuration
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidBatchesPerEpoch { .. }
                | PipelineError::InvalidBatchSize { .. }
                | PipelineError::InvalidConfig { .. }
        )
    }

    /// Returns true if this error indicates mismatched shapes or lengths
    pub fn is_shape(&self) -> bool {
        matches!(
            self,
            PipelineError::ArityMismatch { .. }
                | PipelineError::ShapeMismatch { .. }
                | PipelineError::LengthMismatch { .. }
                | PipelineError::EmptyInput { .. }
        )
    }

    /// Convert an error returned by a user closure running in `stage`.
    ///
    /// Errors that already are a `PipelineError` are kept as is.
    pub fn from_worker(stage: &str, err: BoxError) -> Self {
        match err.downcast::<PipelineError>() {
            Ok(inner) => *inner,
            Err(other) => PipelineError::Transform {
                stage: stage.to_string(),
                message: other.to_string(),
            },
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        PipelineError::InvalidConfig { reason: reason.into() }
    }

    pub(crate) fn shape(reason: impl Into<String>) -> Self {
        PipelineError::ShapeMismatch { reason: reason.into() }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(PipelineError::InvalidBatchesPerEpoch { value: 0 }.is_config());
        assert!(PipelineError::InvalidBatchSize { value: 0 }.is_config());
        assert!(!PipelineError::ShutdownInProgress.is_config());

        assert!(PipelineError::shape("x").is_shape());
        assert!(PipelineError::LengthMismatch { reason: "x".into() }.is_shape());
        assert!(!PipelineError::WorkerPanicked { stage: "s".into() }.is_shape());
    }

    #[test]
    fn test_from_worker_keeps_pipeline_errors() {
        let err: BoxError = Box::new(PipelineError::shape("bad stack"));
        match PipelineError::from_worker("combine", err) {
            PipelineError::ShapeMismatch { reason } => assert_eq!(reason, "bad stack"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_worker_wraps_foreign_errors() {
        let err: BoxError = "disk on fire".into();
        match PipelineError::from_worker("load", err) {
            PipelineError::Transform { stage, message } => {
                assert_eq!(stage, "load");
                assert_eq!(message, "disk on fire");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_display() {
        let err = PipelineError::InvalidBatchesPerEpoch { value: 0 };
        assert_eq!(
            err.to_string(),
            "Expected a positive amount of batches per epoch, but got 0"
        );
    }
}
