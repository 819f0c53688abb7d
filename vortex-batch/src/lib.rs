//! Vortex Batch - Infinite parallel batch iteration for training
//!
//! This crate provides:
//! - Combining primitives turning samples into stacked (or padded) batches
//! - A backpressured multi-stage pipeline yielding bounded epochs of batches
//! - Grid patch divide/combine for patch-wise inference on large arrays
//! - Seeded id-based sources

pub mod combine;
pub mod error;
pub mod grid;
pub mod iter;
pub mod metrics;
pub mod pipeline;
pub mod predict;
pub mod runtime;
pub mod shape;
pub mod sources;

pub use combine::{combine_batches, combine_pad, combine_to_arrays, Batch, CombinePad, Sample};
pub use error::{BoxError, PipelineError, Result};
pub use pipeline::{BatchSize, Infinite, InfiniteBuilder, PipelineConfig, Source, Stage, Transformer};
pub use predict::{add_extract_dims, predict_slices, PatchesGrid};
pub use runtime::{PipelineRuntime, RuntimeConfig};

/// Default capacity of the queues between stages
pub const DEFAULT_BUFFER_SIZE: usize = 3;

/// Default share of the padding placed before the data
pub const DEFAULT_PAD_RATIO: f64 = 0.5;
