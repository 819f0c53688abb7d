//! Prometheus metrics for monitoring
//!
//! Counters, gauges and histograms describing pipeline throughput, plus a
//! per-pipeline registry with one set of stage metrics per stage.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Format an optional `stage` label
fn label(stage: Option<&str>) -> String {
    match stage {
        Some(stage) => format!("{{stage=\"{}\"}}", stage),
        None => String::new(),
    }
}

/// Exposition split so that several labelled series share one header
trait Metric {
    /// `# HELP` and `# TYPE` lines of the metric family
    fn header(&self) -> String;
    /// Sample lines, labelled with `stage` when given
    fn samples(&self, stage: Option<&str>) -> String;
}

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: String,
    help: String,
}

impl Counter {
    /// Create a new counter
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by delta
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self, stage: Option<&str>) -> String {
        self.header() + &self.samples(stage)
    }
}

impl Metric for Counter {
    fn header(&self) -> String {
        format!("# HELP {} {}\n# TYPE {} counter\n", self.name, self.help, self.name)
    }

    fn samples(&self, stage: Option<&str>) -> String {
        format!("{}{} {}\n", self.name, label(stage), self.get())
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: String,
    help: String,
}

impl Gauge {
    /// Create a new gauge
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Set value
    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by 1
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self, stage: Option<&str>) -> String {
        self.header() + &self.samples(stage)
    }
}

impl Metric for Gauge {
    fn header(&self) -> String {
        format!("# HELP {} {}\n# TYPE {} gauge\n", self.name, self.help, self.name)
    }

    fn samples(&self, stage: Option<&str>) -> String {
        format!("{}{} {}\n", self.name, label(stage), self.get())
    }
}

/// Histogram for latency measurements
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum: AtomicU64,
    count: AtomicU64,
    name: String,
    help: String,
}

impl Histogram {
    /// Create with default buckets
    pub fn new(name: &str, help: &str) -> Self {
        Self::with_buckets(
            name,
            help,
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
    }

    /// Create with custom buckets
    pub fn with_buckets(name: &str, help: &str, bounds: Vec<f64>) -> Self {
        let buckets = bounds
            .into_iter()
            .map(|b| (b, AtomicU64::new(0)))
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Observe a value
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);

        // Sum kept as u64 micros
        let micros = (value * 1_000_000.0) as u64;
        self.sum.fetch_add(micros, Ordering::Relaxed);

        for (bound, count) in &self.buckets {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Time a closure and record the duration
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }

    /// Number of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self, stage: Option<&str>) -> String {
        self.header() + &self.samples(stage)
    }
}

impl Metric for Histogram {
    fn header(&self) -> String {
        format!("# HELP {} {}\n# TYPE {} histogram\n", self.name, self.help, self.name)
    }

    fn samples(&self, stage: Option<&str>) -> String {
        let extra = stage
            .map(|stage| format!("stage=\"{}\",", stage))
            .unwrap_or_default();
        let mut output = String::new();
        for (bound, count) in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{{}le=\"{}\"}} {}\n",
                self.name,
                extra,
                bound,
                count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "{}_bucket{{{}le=\"+Inf\"}} {}\n",
            self.name,
            extra,
            self.count()
        ));

        let sum_secs = self.sum.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!("{}_sum{} {}\n", self.name, label(stage), sum_secs));
        output.push_str(&format!(
            "{}_count{} {}\n",
            self.name,
            label(stage),
            self.count()
        ));

        output
    }
}

/// Metrics of a single pipeline stage
pub struct StageMetrics {
    /// Stage name used as label
    pub name: String,
    /// Items emitted downstream
    pub processed: Counter,
    /// Items whose transform failed or panicked
    pub failures: Counter,
    /// Items currently being transformed
    pub in_flight: Gauge,
    /// Per-item transform latency
    pub latency: Histogram,
}

impl StageMetrics {
    fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            processed: Counter::new("vortex_stage_items_total", "Items emitted by the stage"),
            failures: Counter::new("vortex_stage_failures_total", "Failed stage invocations"),
            in_flight: Gauge::new("vortex_stage_in_flight", "Items currently being processed"),
            latency: Histogram::new("vortex_stage_latency_seconds", "Per-item stage latency"),
        }
    }
}

/// Append one metric family with a sample per stage
fn export_family<M: Metric>(
    output: &mut String,
    stages: &[Arc<StageMetrics>],
    metric: impl Fn(&StageMetrics) -> &M,
) {
    let Some(first) = stages.first() else {
        return;
    };
    output.push_str(&metric(first).header());
    for stage in stages {
        output.push_str(&metric(stage).samples(Some(&stage.name)));
    }
}

/// Metrics registry of one pipeline
pub struct PipelineMetrics {
    /// Items pulled from the source
    pub source_items: Counter,
    /// Chunks emitted by the combiner
    pub chunks: Counter,
    /// Batches handed to the consumer
    pub batches: Counter,
    /// Epochs requested by the consumer
    pub epochs: Counter,
    stages: RwLock<Vec<Arc<StageMetrics>>>,
}

impl PipelineMetrics {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            source_items: Counter::new("vortex_source_items_total", "Items pulled from the source"),
            chunks: Counter::new("vortex_chunks_total", "Chunks emitted by the combiner"),
            batches: Counter::new("vortex_batches_total", "Batches yielded to the consumer"),
            epochs: Counter::new("vortex_epochs_total", "Epochs started by the consumer"),
            stages: RwLock::new(Vec::new()),
        }
    }

    /// Get or register the metrics of the stage called `name`
    pub fn stage(&self, name: &str) -> Arc<StageMetrics> {
        if let Some(existing) = self.stages.read().iter().find(|s| s.name == name) {
            return existing.clone();
        }

        let mut stages = self.stages.write();
        // Another thread may have registered it in between
        if let Some(existing) = stages.iter().find(|s| s.name == name) {
            return existing.clone();
        }
        let created = Arc::new(StageMetrics::new(name));
        stages.push(created.clone());
        created
    }

    /// Names of the registered stages, in registration order
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.read().iter().map(|s| s.name.clone()).collect()
    }

    /// Export all metrics in Prometheus format
    pub fn export(&self) -> String {
        let mut output = String::new();
        output.push_str(&self.source_items.to_prometheus(None));
        output.push_str(&self.chunks.to_prometheus(None));
        output.push_str(&self.batches.to_prometheus(None));
        output.push_str(&self.epochs.to_prometheus(None));

        let stages = self.stages.read();
        export_family(&mut output, &stages, |s| &s.processed);
        export_family(&mut output, &stages, |s| &s.failures);
        export_family(&mut output, &stages, |s| &s.in_flight);
        export_family(&mut output, &stages, |s| &s.latency);

        output
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
