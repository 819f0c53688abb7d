//! Stage workers
//!
//! Every worker is an async task on the I/O runtime connected to its
//! neighbours by bounded channels. Messages carry `Result` so that failures
//! travel downstream in stream order. Every wait is raced against the
//! shutdown signal.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use super::combiner::Combiner;
use super::stage::{BoxIter, StageFn};
use crate::error::{PipelineError, Result};
use crate::metrics::{PipelineMetrics, StageMetrics};
use crate::runtime::ShutdownSignal;

/// Message flowing between stages
pub(crate) type Message<T> = Result<T>;

/// Pull items from the source iterator until it ends, the pipeline shuts
/// down or nobody listens anymore. Hands the iterator back so the pipeline
/// can be restarted where it stopped.
pub(crate) async fn run_source<T: Send + 'static>(
    mut iter: BoxIter<T>,
    sender: mpsc::Sender<Message<T>>,
    shutdown: ShutdownSignal,
    metrics: Arc<PipelineMetrics>,
) -> BoxIter<T> {
    debug!("Source worker started");

    while !shutdown.is_shutdown() {
        // Sources may block on disk or network
        let next = tokio::task::block_in_place(|| catch_unwind(AssertUnwindSafe(|| iter.next())));
        let message = match next {
            Ok(Some(item)) => Ok(item),
            Ok(None) => {
                info!("Source exhausted");
                break;
            }
            Err(_) => {
                warn!("Source panicked");
                let _ = shutdown
                    .send(&sender, Err(PipelineError::WorkerPanicked { stage: "source".into() }))
                    .await;
                break;
            }
        };

        metrics.source_items.inc();
        if !shutdown.send(&sender, message).await {
            break;
        }
    }

    debug!("Source worker stopped");
    iter
}

/// Settings shared by the ordered stage workers
pub(crate) struct StageContext {
    pub name: String,
    pub workers: usize,
    pub shutdown: ShutdownSignal,
    pub compute: Handle,
    pub metrics: Arc<StageMetrics>,
}

type Pending<O> = VecDeque<JoinHandle<Result<Vec<O>>>>;

/// Wait for the oldest in-flight call; never resolves when nothing is in flight.
async fn next_completed<O>(
    pending: &mut Pending<O>,
) -> std::result::Result<Result<Vec<O>>, JoinError> {
    match pending.front_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Run `func` over every incoming item with up to `ctx.workers` calls in
/// flight on the compute runtime. Results are released strictly in the order
/// the inputs arrived.
pub(crate) async fn run_ordered<I, O>(
    ctx: StageContext,
    func: StageFn<I, O>,
    mut receiver: mpsc::Receiver<Message<I>>,
    sender: mpsc::Sender<Message<O>>,
) where
    I: Send + 'static,
    O: Send + 'static,
{
    debug!(stage = %ctx.name, workers = ctx.workers, "Stage worker started");

    let mut pending: Pending<O> = VecDeque::with_capacity(ctx.workers);
    let mut upstream_open = true;

    'run: while upstream_open || !pending.is_empty() {
        let accepting = upstream_open && pending.len() < ctx.workers;

        tokio::select! {
            biased;

            _ = ctx.shutdown.cancelled() => break 'run,

            joined = next_completed(&mut pending) => {
                pending.pop_front();
                ctx.metrics.in_flight.dec();

                let outputs = joined.unwrap_or_else(|e| {
                    if e.is_panic() {
                        Err(PipelineError::WorkerPanicked { stage: ctx.name.clone() })
                    } else {
                        Err(PipelineError::ShutdownInProgress)
                    }
                });

                match outputs {
                    Ok(items) => {
                        for item in items {
                            ctx.metrics.processed.inc();
                            if !ctx.shutdown.send(&sender, Ok(item)).await {
                                break 'run;
                            }
                        }
                    }
                    Err(e) => {
                        ctx.metrics.failures.inc();
                        warn!(stage = %ctx.name, error = %e, "Stage call failed");
                        if !ctx.shutdown.send(&sender, Err(e)).await {
                            break 'run;
                        }
                    }
                }
            }

            message = receiver.recv(), if accepting => match message {
                Some(Ok(item)) => {
                    let func = func.clone();
                    let metrics = ctx.metrics.clone();
                    let stage = ctx.name.clone();
                    ctx.metrics.in_flight.inc();
                    pending.push_back(ctx.compute.spawn(async move {
                        metrics
                            .latency
                            .time(|| func(item))
                            .map_err(|e| PipelineError::from_worker(&stage, e))
                    }));
                }
                // Upstream failures keep their place in the stream
                Some(Err(e)) => {
                    ctx.metrics.in_flight.inc();
                    pending.push_back(ctx.compute.spawn(async move { Err(e) }));
                }
                None => upstream_open = false,
            },
        }
    }

    for handle in pending.drain(..) {
        handle.abort();
        ctx.metrics.in_flight.dec();
    }
    debug!(stage = %ctx.name, "Stage worker stopped");
}

/// Group incoming items into chunks.
///
/// An upstream error that arrives while a chunk is in progress is held back
/// until that chunk is emitted, so the consumer never sees a failure before
/// the items that preceded it. The trailing partial chunk is flushed when the
/// upstream ends and dropped on shutdown.
pub(crate) async fn run_combiner<T: Send + 'static>(
    mut combiner: Combiner<T>,
    mut receiver: mpsc::Receiver<Message<T>>,
    sender: mpsc::Sender<Message<Vec<T>>>,
    shutdown: ShutdownSignal,
    metrics: Arc<PipelineMetrics>,
) {
    debug!(batch_size = ?combiner.batch_size(), "Combiner started");

    let mut held: Vec<PipelineError> = Vec::new();

    loop {
        let Some(message) = shutdown.guard(receiver.recv()).await else {
            debug!(
                pending = combiner.pending(),
                held = held.len(),
                "Combiner dropping partial chunk on shutdown"
            );
            return;
        };

        let chunk = match message {
            Some(Ok(item)) => match combiner.push(item) {
                Some(chunk) => chunk,
                None => continue,
            },
            Some(Err(e)) if combiner.pending() > 0 => {
                debug!(pending = combiner.pending(), "Holding error until the chunk completes");
                held.push(e);
                continue;
            }
            Some(Err(e)) => {
                if !shutdown.send(&sender, Err(e)).await {
                    return;
                }
                continue;
            }
            None => {
                if let Some(chunk) = combiner.flush() {
                    debug!(len = chunk.len(), "Flushing trailing chunk");
                    metrics.chunks.inc();
                    if !shutdown.send(&sender, Ok(chunk)).await {
                        return;
                    }
                }
                for e in held.drain(..) {
                    if !shutdown.send(&sender, Err(e)).await {
                        return;
                    }
                }
                debug!("Combiner stopped, upstream ended");
                return;
            }
        };

        metrics.chunks.inc();
        if !shutdown.send(&sender, Ok(chunk)).await {
            return;
        }
        for e in held.drain(..) {
            if !shutdown.send(&sender, Err(e)).await {
                return;
            }
        }
    }
}
