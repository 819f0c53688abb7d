//! Pipeline benchmark binary
//!
//! Feeds synthetic volumes through a crop + normalize pipeline and reports
//! throughput, then runs a patch-wise prediction over one full volume.

use ndarray::{Array, ArrayD, ArrayViewD, IxDyn, Slice};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vortex_batch::sources::shuffle_ids;
use vortex_batch::{
    add_extract_dims, BoxError, InfiniteBuilder, PatchesGrid, PipelineConfig, Sample, Stage,
};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Deterministic synthetic volume with a scalar label
fn load_volume(id: &usize, side: usize) -> Sample<f32> {
    let offset = *id as f32;
    let image = Array::from_shape_fn(IxDyn(&[1, side, side, side]), |i| {
        ((i[1] * 31 + i[2] * 17 + i[3] * 7) % 255) as f32 + offset
    });
    let label = ndarray::arr0((*id % 2) as f32).into_dyn();
    vec![image, label]
}

/// Central crop of the image to `size` along the spatial axes
fn crop(mut sample: Sample<f32>, size: usize) -> Result<Sample<f32>, BoxError> {
    let image = &sample[0];
    let side = image.shape()[1];
    if side < size {
        return Err(format!("cannot crop {} voxels out of {}", size, side).into());
    }
    let start = (side - size) / 2;
    let end = start + size;
    sample[0] = image
        .slice_each_axis(|ax| match ax.axis.index() {
            0 => Slice::from(..),
            _ => Slice::from(start..end),
        })
        .to_owned();
    Ok(sample)
}

fn normalize(mut sample: Sample<f32>) -> Result<Sample<f32>, BoxError> {
    let image = &mut sample[0];
    let mean = image.mean().unwrap_or(0.0);
    let std = image.std(0.0).max(f32::EPSILON);
    image.mapv_inplace(|v| (v - mean) / std);
    Ok(sample)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Vortex pipeline benchmark");

    // Load configuration
    let volumes: usize = env_or("BENCH_VOLUMES", 32);
    let side: usize = env_or("BENCH_SIDE", 64);
    let crop_size: usize = env_or("BENCH_CROP", 48);
    let epochs: usize = env_or("BENCH_EPOCHS", 3);
    let workers: usize = env_or("BENCH_WORKERS", num_cpus::get());
    let config = PipelineConfig {
        batches_per_epoch: env_or("BENCH_BATCHES_PER_EPOCH", 20),
        buffer_size: env_or("BENCH_BUFFER_SIZE", vortex_batch::DEFAULT_BUFFER_SIZE),
        ..Default::default()
    };
    let batch_size: usize = env_or("BENCH_BATCH_SIZE", 4);

    info!(
        volumes,
        side,
        crop_size,
        workers,
        batch_size,
        batches_per_epoch = config.batches_per_epoch,
        "Benchmark configuration"
    );

    let source = shuffle_ids((0..volumes).collect(), move |id| load_volume(id, side), 0)?;
    let mut pipeline = InfiniteBuilder::new()
        .source(source)
        .stage(
            Stage::one_to_one(move |sample| crop(sample, crop_size))
                .with_name("crop")
                .with_workers(workers),
        )
        .transform(normalize)
        .batch_size(batch_size)
        .config(config)
        .build()?;

    for epoch in 0..epochs {
        let started = Instant::now();
        let mut voxels = 0usize;
        for batch in pipeline.epoch()? {
            let batch = batch?;
            voxels += batch[0].len();
        }
        let elapsed = started.elapsed().as_secs_f64();
        info!(
            epoch,
            seconds = elapsed,
            mvoxels_per_sec = voxels as f64 / elapsed / 1e6,
            "Epoch done"
        );
    }
    pipeline.close();

    // Patch-wise prediction over a full volume
    let volume: ArrayD<f32> = load_volume(&0, side).swap_remove(0);
    let grid = PatchesGrid::new(vec![crop_size], vec![crop_size / 2]).with_axes(vec![1, 2, 3]);
    let predictor = add_extract_dims(1, 1, |x: ArrayViewD<'_, f32>| Ok(x.mapv(|v| v * 0.5)));
    let started = Instant::now();
    let prediction = grid.apply(&volume, predictor)?;
    info!(
        shape = ?prediction.shape(),
        seconds = started.elapsed().as_secs_f64(),
        "Patch-wise prediction done"
    );

    println!("{}", pipeline.metrics().export());
    Ok(())
}
