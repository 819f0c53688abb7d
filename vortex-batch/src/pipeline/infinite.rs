//! Infinite batch iterator
//!
//! Main interface for training loops: assembles the source, the transform
//! stages, the combiner and the final combine stage into one backpressured
//! pipeline and hands out bounded epochs of batches.
//!
//! ```text
//! source -> stage 0 -> ... -> stage n -> combiner -> combine -> epoch()
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::combiner::{BatchSize, Combiner};
use super::stage::{BoxIter, CombineFn, Source, SourceInput, Stage, StageFn, Transformer};
use super::worker::{run_combiner, run_ordered, run_source, Message, StageContext};
use crate::combine::{combine_to_arrays, Batch, Sample};
use crate::error::{BoxError, PipelineError, Result};
use crate::metrics::PipelineMetrics;
use crate::runtime::{PipelineRuntime, RuntimeConfig, ShutdownSignal};
use crate::DEFAULT_BUFFER_SIZE;

/// Configuration for the infinite pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Batches yielded by every call to `epoch`
    pub batches_per_epoch: usize,
    /// Default queue capacity between stages
    pub buffer_size: usize,
    /// Runtime configuration
    pub runtime: RuntimeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batches_per_epoch: 100,
            buffer_size: DEFAULT_BUFFER_SIZE,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Check every field
    pub fn validate(&self) -> Result<()> {
        if self.batches_per_epoch == 0 {
            return Err(PipelineError::InvalidBatchesPerEpoch { value: 0 });
        }
        if self.buffer_size == 0 {
            return Err(PipelineError::invalid("buffer_size must be positive"));
        }
        self.runtime.validate()
    }
}

/// A transform stage ready to be spawned
struct StagePlan<T> {
    name: String,
    func: StageFn<T, T>,
    workers: usize,
    buffer_size: usize,
}

/// Builder for [`Infinite`]
pub struct InfiniteBuilder<T> {
    source: Option<SourceInput<T>>,
    transformers: Vec<Transformer<T>>,
    batch_size: Option<BatchSize<T>>,
    config: PipelineConfig,
}

impl<T: Send + 'static> InfiniteBuilder<T> {
    /// Empty builder with the default configuration
    pub fn new() -> Self {
        Self {
            source: None,
            transformers: Vec::new(),
            batch_size: None,
            config: PipelineConfig::default(),
        }
    }

    /// Use a plain iterator as the source
    pub fn source<I>(mut self, iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        self.source = Some(SourceInput::Raw(Box::new(iter.into_iter())));
        self
    }

    /// Use a configured source
    pub fn source_stage(mut self, source: Source<T>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Append a plain one-to-one transform
    pub fn transform<F, E>(self, transform: F) -> Self
    where
        F: Fn(T) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.transformer(Transformer::raw(transform))
    }

    /// Append a configured stage
    pub fn stage(self, stage: Stage<T>) -> Self {
        self.transformer(stage.into())
    }

    /// Append a transformer of either kind
    pub fn transformer(mut self, transformer: Transformer<T>) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// Emit batches of exactly `batch_size` items
    pub fn batch_size(self, batch_size: usize) -> Self {
        self.batching(BatchSize::Fixed(batch_size))
    }

    /// Choose how chunks are cut, by size or by predicate
    pub fn batching(mut self, batch_size: BatchSize<T>) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Set the number of batches per epoch
    pub fn batches_per_epoch(mut self, batches_per_epoch: usize) -> Self {
        self.config.batches_per_epoch = batches_per_epoch;
        self
    }

    /// Set the default queue capacity
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.config.buffer_size = buffer_size;
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the pipeline with a custom chunk-to-batch combiner.
    ///
    /// All configuration is checked here; nothing is spawned until the
    /// first epoch.
    pub fn build_with<B, F, E>(self, combine: F) -> Result<Infinite<T, B>>
    where
        B: Send + 'static,
        F: Fn(Vec<T>) -> std::result::Result<B, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.config.validate()?;

        let source = self
            .source
            .ok_or_else(|| PipelineError::invalid("a source is required"))?
            .into_source();
        if source.buffer_size == Some(0) {
            return Err(PipelineError::invalid("source needs a positive buffer size"));
        }

        let batch_size = self
            .batch_size
            .ok_or_else(|| PipelineError::invalid("a batch size is required"))?;
        // Rejects a fixed size of zero
        Combiner::new(batch_size.clone())?;

        let default_buffer = self.config.buffer_size;
        let stages = self
            .transformers
            .into_iter()
            .enumerate()
            .map(|(index, transformer)| -> Result<StagePlan<T>> {
                let stage = transformer.into_stage();
                let name = stage
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("transform-{}", index));
                stage.validate(&name)?;
                Ok(StagePlan {
                    name,
                    workers: stage.workers,
                    buffer_size: stage.buffer_size.unwrap_or(default_buffer),
                    func: stage.kind.into_fn(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let combine: CombineFn<T, B> = Arc::new(
            move |chunk: Vec<T>| -> std::result::Result<B, BoxError> { combine(chunk).map_err(Into::into) },
        );

        debug!(
            stages = stages.len(),
            batch_size = ?batch_size,
            batches_per_epoch = self.config.batches_per_epoch,
            "Pipeline built"
        );

        Ok(Infinite {
            source: Some(source.iter),
            source_buffer: source.buffer_size.unwrap_or(default_buffer),
            stages,
            batch_size,
            combine,
            config: self.config,
            metrics: Arc::new(PipelineMetrics::new()),
            running: None,
        })
    }
}

impl<A> InfiniteBuilder<Sample<A>>
where
    A: Clone + Send + Sync + 'static,
{
    /// Build the pipeline, stacking every chunk into one array per position
    pub fn build(self) -> Result<Infinite<Sample<A>, Batch<A>>> {
        self.build_with(combine_to_arrays)
    }
}

impl<T: Send + 'static> Default for InfiniteBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything that only exists while the pipeline runs
struct Running<T, B> {
    runtime: PipelineRuntime,
    shutdown: ShutdownSignal,
    output: mpsc::Receiver<Message<B>>,
    source: JoinHandle<BoxIter<T>>,
    workers: Vec<JoinHandle<()>>,
    exhausted: bool,
}

/// Infinite parallel batch iterator
///
/// Background workers start on the first [`epoch`](Infinite::epoch) (or an
/// explicit [`start`](Infinite::start)) and keep running across epochs until
/// [`close`](Infinite::close) or drop. Closing hands the source back, so a
/// closed pipeline can be started again and continues where it stopped.
///
/// The consuming methods block the calling thread and must not be called
/// from inside an async context.
pub struct Infinite<T, B> {
    source: Option<BoxIter<T>>,
    source_buffer: usize,
    stages: Vec<StagePlan<T>>,
    batch_size: BatchSize<T>,
    combine: CombineFn<T, B>,
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    running: Option<Running<T, B>>,
}

impl<T, B> Infinite<T, B>
where
    T: Send + 'static,
    B: Send + 'static,
{
    /// Start with a fresh [`InfiniteBuilder`]
    pub fn builder() -> InfiniteBuilder<T> {
        InfiniteBuilder::new()
    }

    /// Spawn the background workers; a no-op while already running.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        if self.source.is_none() {
            return Err(PipelineError::Internal {
                message: "the source was not recovered by the last close".into(),
            });
        }

        // Built before anything is spawned so that a failure leaves the
        // pipeline untouched
        let runtime = PipelineRuntime::new(self.config.runtime.clone())?;
        let combiner = Combiner::new(self.batch_size.clone())?;
        let Some(source) = self.source.take() else {
            return Err(PipelineError::Internal {
                message: "the source disappeared".into(),
            });
        };

        let shutdown = ShutdownSignal::new();
        let compute = runtime.compute_handle();
        let mut workers = Vec::with_capacity(self.stages.len() + 2);

        let (sender, mut receiver) = mpsc::channel(self.source_buffer);
        let source = runtime.spawn_io(run_source(
            source,
            sender,
            shutdown.clone(),
            self.metrics.clone(),
        ));

        for plan in &self.stages {
            let (sender, next) = mpsc::channel(plan.buffer_size);
            let ctx = StageContext {
                name: plan.name.clone(),
                workers: plan.workers,
                shutdown: shutdown.clone(),
                compute: compute.clone(),
                metrics: self.metrics.stage(&plan.name),
            };
            workers.push(runtime.spawn_io(run_ordered(ctx, plan.func.clone(), receiver, sender)));
            receiver = next;
        }

        // Single slot: chunks are cheap to hold back, batches are not
        let (chunk_sender, chunk_receiver) = mpsc::channel(1);
        workers.push(runtime.spawn_io(run_combiner(
            combiner,
            receiver,
            chunk_sender,
            shutdown.clone(),
            self.metrics.clone(),
        )));

        let combine = self.combine.clone();
        let combine: StageFn<Vec<T>, B> = Arc::new(
            move |chunk: Vec<T>| -> std::result::Result<Vec<B>, BoxError> {
                combine(chunk).map(|batch| vec![batch])
            },
        );
        let (batch_sender, output) = mpsc::channel(self.config.buffer_size);
        let ctx = StageContext {
            name: "combine".into(),
            workers: 1,
            shutdown: shutdown.clone(),
            compute,
            metrics: self.metrics.stage("combine"),
        };
        workers.push(runtime.spawn_io(run_ordered(ctx, combine, chunk_receiver, batch_sender)));

        info!(
            stages = self.stages.len(),
            batches_per_epoch = self.config.batches_per_epoch,
            "Pipeline started"
        );

        self.running = Some(Running {
            runtime,
            shutdown,
            output,
            source,
            workers,
            exhausted: false,
        });
        Ok(())
    }

    /// Iterate over the next `batches_per_epoch` batches, starting the
    /// pipeline if needed.
    ///
    /// Yields fewer batches only when the source ran dry. After a failed
    /// item the epoch ends early; the pipeline keeps running.
    pub fn epoch(&mut self) -> Result<Epoch<'_, T, B>> {
        self.start()?;
        self.metrics.epochs.inc();
        Ok(Epoch {
            remaining: self.config.batches_per_epoch,
            pipeline: self,
        })
    }

    /// Run `body` with the pipeline started, closing it on every exit path.
    pub fn scope<R>(&mut self, body: impl FnOnce(&mut Self) -> R) -> Result<R> {
        struct CloseOnExit<'a, T, B>(&'a mut Infinite<T, B>);

        impl<T, B> Drop for CloseOnExit<'_, T, B> {
            fn drop(&mut self) {
                self.0.close();
            }
        }

        self.start()?;
        let guard = CloseOnExit(self);
        Ok(body(&mut *guard.0))
    }
}

impl<T, B> Infinite<T, B> {
    /// Whether background workers are running
    pub fn is_active(&self) -> bool {
        self.running.is_some()
    }

    /// Stop every worker and release the runtimes.
    ///
    /// Idempotent and infallible. Batches produced but not consumed are
    /// discarded.
    pub fn close(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let Running {
            runtime,
            shutdown,
            output,
            source,
            workers,
            ..
        } = running;

        debug!("Closing pipeline");
        shutdown.shutdown();
        drop(output);

        if tokio::runtime::Handle::try_current().is_ok() {
            // Blocking is not allowed here; the source is lost
            warn!("Pipeline closed from an async context, shutting down in the background");
            runtime.shutdown_background();
            return;
        }

        let recovered = runtime.block_on_io(async move {
            for worker in workers {
                if let Err(e) = worker.await {
                    warn!(error = %e, "Stage worker ended abnormally");
                }
            }
            source.await
        });
        match recovered {
            Ok(iter) => self.source = Some(iter),
            Err(e) => error!(error = %e, "Source worker ended abnormally"),
        }

        runtime.shutdown();
        info!(
            batches = self.metrics.batches.get(),
            epochs = self.metrics.epochs.get(),
            "Pipeline closed"
        );
    }

    /// Pipeline metrics
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Batches yielded by every epoch
    pub fn batches_per_epoch(&self) -> usize {
        self.config.batches_per_epoch
    }

    /// Configuration the pipeline was built with
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl<T, B> Drop for Infinite<T, B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// One bounded pass over the pipeline, returned by [`Infinite::epoch`]
pub struct Epoch<'a, T, B> {
    pipeline: &'a mut Infinite<T, B>,
    remaining: usize,
}

impl<T, B> Epoch<'_, T, B> {
    /// Batches still to come in this epoch
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<T, B> Iterator for Epoch<'_, T, B> {
    type Item = Result<B>;

    fn next(&mut self) -> Option<Result<B>> {
        if self.remaining == 0 {
            return None;
        }
        let running = self.pipeline.running.as_mut()?;
        if running.exhausted {
            self.remaining = 0;
            return None;
        }

        match running.output.blocking_recv() {
            Some(Ok(batch)) => {
                self.remaining -= 1;
                self.pipeline.metrics.batches.inc();
                if self.remaining == 0 {
                    debug!("Epoch finished");
                }
                Some(Ok(batch))
            }
            Some(Err(e)) => {
                error!(error = %e, "Epoch ended by a failed item");
                self.remaining = 0;
                Some(Err(e))
            }
            None => {
                warn!(missing = self.remaining, "Pipeline exhausted before the epoch was complete");
                running.exhausted = true;
                self.remaining = 0;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig {
            batches_per_epoch: 2,
            buffer_size: 2,
            runtime: RuntimeConfig {
                io_threads: 2,
                compute_threads: 2,
                shutdown_timeout_ms: 5_000,
            },
        }
    }

    fn chunks(range: std::ops::Range<u32>, batch_size: usize) -> Result<Infinite<u32, Vec<u32>>> {
        InfiniteBuilder::new()
            .source(range)
            .batch_size(batch_size)
            .config(config())
            .build_with(|chunk: Vec<u32>| Ok::<_, BoxError>(chunk))
    }

    #[test]
    fn test_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.validate().is_ok());

        let parsed: PipelineConfig = serde_json::from_str(r#"{"batches_per_epoch": 7}"#).unwrap();
        assert_eq!(parsed.batches_per_epoch, 7);
        assert_eq!(parsed.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_build_validation() {
        let err = InfiniteBuilder::new()
            .source(0..10u32)
            .batch_size(2)
            .batches_per_epoch(0)
            .build_with(|chunk: Vec<u32>| Ok::<_, BoxError>(chunk))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::InvalidBatchesPerEpoch { value: 0 }));

        assert!(chunks(0..10, 0).err().unwrap().is_config());

        let missing_source = InfiniteBuilder::<u32>::new()
            .batch_size(2)
            .build_with(|chunk: Vec<u32>| Ok::<_, BoxError>(chunk));
        assert!(missing_source.err().unwrap().is_config());
    }

    #[test]
    fn test_nothing_runs_before_first_epoch() {
        let pipeline = chunks(0..100, 5).unwrap();
        assert!(!pipeline.is_active());
        assert_eq!(pipeline.metrics().source_items.get(), 0);
    }

    #[test]
    fn test_epoch_yields_batches_in_order() {
        let mut pipeline = chunks(0..100, 5).unwrap();
        let batches: Vec<Vec<u32>> = pipeline.epoch().unwrap().map(|b| b.unwrap()).collect();
        assert_eq!(batches, vec![vec![0, 1, 2, 3, 4], vec![5, 6, 7, 8, 9]]);
        assert!(pipeline.is_active());
        pipeline.close();
        assert!(!pipeline.is_active());
    }

    #[test]
    fn test_short_source_ends_epoch_early() {
        let mut pipeline = chunks(0..7, 3).unwrap();
        let first: Vec<Vec<u32>> = pipeline.epoch().unwrap().map(|b| b.unwrap()).collect();
        assert_eq!(first, vec![vec![0, 1, 2], vec![3, 4, 5]]);

        // Trailing partial chunk is flushed once the source is exhausted
        let second: Vec<Vec<u32>> = pipeline.epoch().unwrap().map(|b| b.unwrap()).collect();
        assert_eq!(second, vec![vec![6]]);
        assert_eq!(pipeline.epoch().unwrap().count(), 0);
    }

    #[test]
    fn test_scope_closes() {
        let mut pipeline = chunks(0..100, 4).unwrap();
        let first = pipeline
            .scope(|p| p.epoch().unwrap().next().unwrap().unwrap())
            .unwrap();
        assert_eq!(first, vec![0, 1, 2, 3]);
        assert!(!pipeline.is_active());
    }

    #[test]
    fn test_scope_closes_on_panic() {
        let mut pipeline = chunks(0..100, 4).unwrap();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pipeline.scope(|p| {
                let batch = p.epoch().unwrap().next().unwrap().unwrap();
                assert!(p.is_active());
                if batch.len() == 4 {
                    panic!("training step failed");
                }
            })
        }));

        assert!(outcome.is_err());
        assert!(!pipeline.is_active());
    }
}
