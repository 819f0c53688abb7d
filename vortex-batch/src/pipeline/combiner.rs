//! Dynamic combiner
//!
//! Stateful many-to-one stage grouping items into chunks, either by a fixed
//! size or by a user predicate deciding whether the next item still fits.

use std::fmt;
use std::sync::Arc;

use super::stage::ChunkPredicate;
use crate::error::{PipelineError, Result};

/// How the combiner decides where a chunk ends
pub enum BatchSize<T> {
    /// Emit a chunk as soon as it holds this many items
    Fixed(usize),
    /// Keep appending while `predicate(chunk, item)` approves
    Predicate(ChunkPredicate<T>),
}

impl<T> BatchSize<T> {
    /// Predicate-driven batch size
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&[T], &T) -> bool + Send + Sync + 'static,
    {
        BatchSize::Predicate(Arc::new(predicate))
    }
}

impl<T> From<usize> for BatchSize<T> {
    fn from(size: usize) -> Self {
        BatchSize::Fixed(size)
    }
}

impl<T> Clone for BatchSize<T> {
    fn clone(&self) -> Self {
        match self {
            BatchSize::Fixed(size) => BatchSize::Fixed(*size),
            BatchSize::Predicate(predicate) => BatchSize::Predicate(predicate.clone()),
        }
    }
}

impl<T> fmt::Debug for BatchSize<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchSize::Fixed(size) => f.debug_tuple("Fixed").field(size).finish(),
            BatchSize::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Chunk accumulator
pub struct Combiner<T> {
    batch_size: BatchSize<T>,
    chunk: Vec<T>,
}

impl<T> Combiner<T> {
    /// Create a combiner; a fixed size of zero is rejected
    pub fn new(batch_size: BatchSize<T>) -> Result<Self> {
        let capacity = match batch_size {
            BatchSize::Fixed(0) => return Err(PipelineError::InvalidBatchSize { value: 0 }),
            BatchSize::Fixed(size) => size,
            BatchSize::Predicate(_) => 0,
        };
        Ok(Self {
            batch_size,
            chunk: Vec::with_capacity(capacity),
        })
    }

    /// Feed one item, returning a chunk if one was completed
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        match &self.batch_size {
            BatchSize::Fixed(size) => {
                self.chunk.push(item);
                if self.chunk.len() < *size {
                    return None;
                }
                Some(std::mem::replace(&mut self.chunk, Vec::with_capacity(*size)))
            }
            BatchSize::Predicate(fits) => {
                if self.chunk.is_empty() || fits(&self.chunk, &item) {
                    self.chunk.push(item);
                    None
                } else {
                    Some(std::mem::replace(&mut self.chunk, vec![item]))
                }
            }
        }
    }

    /// Take the partial chunk, if any
    pub fn flush(&mut self) -> Option<Vec<T>> {
        if self.chunk.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.chunk))
        }
    }

    /// Number of items in the chunk in progress
    pub fn pending(&self) -> usize {
        self.chunk.len()
    }

    /// The batch size this combiner was built with
    pub fn batch_size(&self) -> &BatchSize<T> {
        &self.batch_size
    }
}
