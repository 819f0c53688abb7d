//! Infinite parallel batch pipeline
//!
//! Source, transform stages, dynamic combiner and the epoch-based
//! orchestrator tying them together.

pub mod combiner;
pub mod infinite;
pub mod stage;
mod worker;

pub use combiner::{BatchSize, Combiner};
pub use infinite::{Epoch, Infinite, InfiniteBuilder, PipelineConfig};
pub use stage::{
    ChunkPredicate, CombineFn, FanOutFn, Source, SourceInput, Stage, StageKind, TransformFn,
    Transformer,
};
