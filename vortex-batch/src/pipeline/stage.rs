//! Stage and source descriptions
//!
//! A plain closure passed to the builder becomes a one-to-one stage with a
//! single worker. A [`Stage`] carries explicit settings: name, worker count,
//! buffer size, or one-to-many fan-out.

use std::fmt;
use std::sync::Arc;

use crate::error::{BoxError, PipelineError, Result};

/// One-to-one user transform
pub type TransformFn<T> = Arc<dyn Fn(T) -> std::result::Result<T, BoxError> + Send + Sync>;

/// One-to-many user transform
pub type FanOutFn<T> = Arc<dyn Fn(T) -> std::result::Result<Vec<T>, BoxError> + Send + Sync>;

/// Turns a chunk of items into a batch
pub type CombineFn<T, B> = Arc<dyn Fn(Vec<T>) -> std::result::Result<B, BoxError> + Send + Sync>;

/// Decides whether an item may join the chunk in progress
pub type ChunkPredicate<T> = Arc<dyn Fn(&[T], &T) -> bool + Send + Sync>;

/// Uniform shape every stage function is lowered to before it runs
pub(crate) type StageFn<I, O> =
    Arc<dyn Fn(I) -> std::result::Result<Vec<O>, BoxError> + Send + Sync>;

/// Boxed source iterator
pub(crate) type BoxIter<T> = Box<dyn Iterator<Item = T> + Send>;

/// What a stage does with each item
pub enum StageKind<T> {
    /// Exactly one output per input
    OneToOne(TransformFn<T>),
    /// Any number of outputs per input, released in order
    OneToMany(FanOutFn<T>),
}

impl<T: 'static> StageKind<T> {
    pub(crate) fn into_fn(self) -> StageFn<T, T> {
        match self {
            StageKind::OneToOne(f) => Arc::new(move |item: T| f(item).map(|out| vec![out])),
            StageKind::OneToMany(f) => f,
        }
    }
}

/// Configured pipeline stage
pub struct Stage<T> {
    /// Name used in logs and metrics; assigned from the position when `None`
    pub name: Option<String>,
    /// Transform to run
    pub kind: StageKind<T>,
    /// Maximum number of items transformed concurrently
    pub workers: usize,
    /// Output queue capacity; the pipeline default when `None`
    pub buffer_size: Option<usize>,
}

impl<T: 'static> Stage<T> {
    /// Stage producing one item per input
    pub fn one_to_one<F, E>(transform: F) -> Self
    where
        F: Fn(T) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::from_kind(StageKind::OneToOne(Arc::new(
            move |item: T| -> std::result::Result<T, BoxError> { transform(item).map_err(Into::into) },
        )))
    }

    /// Stage producing any number of items per input
    pub fn one_to_many<F, E>(transform: F) -> Self
    where
        F: Fn(T) -> std::result::Result<Vec<T>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::from_kind(StageKind::OneToMany(Arc::new(
            move |item: T| -> std::result::Result<Vec<T>, BoxError> {
                transform(item).map_err(Into::into)
            },
        )))
    }

    fn from_kind(kind: StageKind<T>) -> Self {
        Self {
            name: None,
            kind,
            workers: 1,
            buffer_size: None,
        }
    }

    /// Set the stage name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the number of parallel workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the output queue capacity
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::invalid(format!(
                "stage '{}' needs at least one worker",
                name
            )));
        }
        if self.buffer_size == Some(0) {
            return Err(PipelineError::invalid(format!(
                "stage '{}' needs a positive buffer size",
                name
            )));
        }
        Ok(())
    }
}

impl<T> fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            StageKind::OneToOne(_) => "one-to-one",
            StageKind::OneToMany(_) => "one-to-many",
        };
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("kind", &kind)
            .field("workers", &self.workers)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

/// A transformer handed to the pipeline builder
pub enum Transformer<T> {
    /// Plain function, run as a one-to-one single-worker stage
    Raw(TransformFn<T>),
    /// Stage with explicit settings, used as is
    Configured(Stage<T>),
}

impl<T: 'static> Transformer<T> {
    /// Wrap a plain function
    pub fn raw<F, E>(transform: F) -> Self
    where
        F: Fn(T) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Transformer::Raw(Arc::new(
            move |item: T| -> std::result::Result<T, BoxError> { transform(item).map_err(Into::into) },
        ))
    }

    pub(crate) fn into_stage(self) -> Stage<T> {
        match self {
            Transformer::Raw(f) => Stage::from_kind(StageKind::OneToOne(f)),
            Transformer::Configured(stage) => stage,
        }
    }
}

impl<T> From<Stage<T>> for Transformer<T> {
    fn from(stage: Stage<T>) -> Self {
        Transformer::Configured(stage)
    }
}

/// Configured source of items
pub struct Source<T> {
    pub(crate) iter: BoxIter<T>,
    /// Output queue capacity; the pipeline default when `None`
    pub buffer_size: Option<usize>,
}

impl<T> Source<T> {
    /// Wrap an iterator
    pub fn new<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self {
            iter: Box::new(iter.into_iter()),
            buffer_size: None,
        }
    }

    /// Set the output queue capacity
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }
}

/// A source handed to the pipeline builder
pub enum SourceInput<T> {
    /// Plain iterator, buffered with the pipeline default
    Raw(BoxIter<T>),
    /// Source with explicit settings
    Configured(Source<T>),
}

impl<T> SourceInput<T> {
    pub(crate) fn into_source(self) -> Source<T> {
        match self {
            SourceInput::Raw(iter) => Source {
                iter,
                buffer_size: None,
            },
            SourceInput::Configured(source) => source,
        }
    }
}

impl<T> From<Source<T>> for SourceInput<T> {
    fn from(source: Source<T>) -> Self {
        SourceInput::Configured(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_to_one_lowers_to_single_output() {
        let stage = Stage::one_to_one(|x: u32| Ok::<_, BoxError>(x + 1));
        let f = stage.kind.into_fn();
        assert_eq!(f(1).unwrap(), vec![2]);
    }

    #[test]
    fn test_one_to_many_keeps_outputs() {
        let stage = Stage::one_to_many(|x: u32| Ok::<_, BoxError>(vec![x; x as usize]));
        let f = stage.kind.into_fn();
        assert_eq!(f(3).unwrap(), vec![3, 3, 3]);
        assert!(f(0).unwrap().is_empty());
    }

    #[test]
    fn test_raw_transformer_becomes_default_stage() {
        let stage = Transformer::raw(|x: u8| Ok::<_, BoxError>(x)).into_stage();
        assert_eq!(stage.workers, 1);
        assert_eq!(stage.buffer_size, None);
        assert_eq!(stage.name, None);
    }

    #[test]
    fn test_stage_validation() {
        let stage = Stage::one_to_one(|x: u8| Ok::<_, BoxError>(x)).with_workers(0);
        assert!(stage.validate("s").unwrap_err().is_config());

        let stage = Stage::one_to_one(|x: u8| Ok::<_, BoxError>(x)).with_buffer_size(0);
        assert!(stage.validate("s").unwrap_err().is_config());
    }

    #[test]
    fn test_configured_stage_passes_through() {
        let stage = Stage::one_to_one(|x: u8| Ok::<_, BoxError>(x))
            .with_name("augment")
            .with_workers(4)
            .with_buffer_size(8);
        let stage = Transformer::from(stage).into_stage();
        assert_eq!(stage.name.as_deref(), Some("augment"));
        assert_eq!((stage.workers, stage.buffer_size), (4, Some(8)));
    }
}
