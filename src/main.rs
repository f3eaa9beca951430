//! tile-pager demo driver.
//!
//! Fills a large gridded field through a tiled 2D array while reader tasks
//! sample it concurrently, then verifies the field and reports store
//! diagnostics. With the default config the grid is far larger than the
//! resident tile budget, so most tiles make at least one trip to disk.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::{debug, info, warn};

use tile_pager::array::{new_array_2d, Array2D};
use tile_pager::cache::store::new_shared_store;
use tile_pager::config::{Cli, Config};

/// Background of the demo field.
const BACKGROUND: f32 = -99_900.0;

/// Synthetic sparse field: a ring of values around the grid center, background elsewhere.
fn field(x: usize, y: usize, width: usize, height: usize) -> f32 {
    let dx = x as f32 - width as f32 / 2.0;
    let dy = y as f32 - height as f32 / 2.0;
    let r = (dx * dx + dy * dy).sqrt();
    let radius = width.min(height) as f32 / 3.0;
    if (r - radius).abs() < 20.0 {
        (x % 97) as f32 - (y % 13) as f32
    } else {
        BACKGROUND
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "tile_pager=debug"
    } else {
        "tile_pager=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("tile-pager v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Arc::new(Config::load(&cli.config)?);

    info!(
        tile_size = config.store.tile_size,
        tile_side = config.arrays.tile_side,
        capacity = config.cache.current_tiles,
        compression = config.compression.enabled,
        "Configuration loaded"
    );

    let store = new_shared_store(config.clone())?;
    let (width, height) = (cli.width, cli.height);
    let grid: Arc<dyn Array2D> = Arc::from(new_array_2d(&store, width, height, BACKGROUND));

    info!(
        width,
        height,
        cells = grid.len(),
        dir = %store.dir().display(),
        "Grid created"
    );

    let done = Arc::new(AtomicBool::new(false));
    let samples = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    // Builder: one row-major pass under a row-ordered batch.
    let builder = {
        let grid = grid.clone();
        let done = done.clone();
        tokio::task::spawn_blocking(move || {
            grid.begin_row_ordered();
            for y in 0..height {
                for x in 0..width {
                    grid.set(x, y, field(x, y, width, height));
                }
            }
            grid.end_row_ordered();
            done.store(true, Ordering::Release);
        })
    };

    // Readers: stride across the grid until the builder finishes.
    let mut readers = Vec::with_capacity(cli.readers);
    for reader in 0..cli.readers {
        let grid = grid.clone();
        let done = done.clone();
        let samples = samples.clone();
        readers.push(tokio::task::spawn_blocking(move || {
            let mut at = reader * 7919;
            let cells = width * height;
            while !done.load(Ordering::Acquire) && cells > 0 {
                at = (at + 104_729) % cells;
                let _ = grid.get(at % width, at / width);
                samples.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    builder.await?;
    for reader in readers {
        reader.await?;
    }
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        reader_samples = samples.load(Ordering::Relaxed),
        "Grid filled"
    );

    // Verify a sparse sample of the field.
    let verify = {
        let grid = grid.clone();
        tokio::task::spawn_blocking(move || {
            let mut mismatches = 0usize;
            for y in (0..height).step_by(7) {
                for x in (0..width).step_by(5) {
                    if grid.get(x, y) != field(x, y, width, height) {
                        mismatches += 1;
                    }
                }
            }
            mismatches
        })
    };
    let mismatches = verify.await?;
    if mismatches > 0 {
        warn!(mismatches, "Grid verification found differences");
    } else {
        info!("Grid verification passed");
    }

    let stats = store.stats();
    let disk = store.disk_stats();
    info!(
        resident = store.resident_count(),
        live_mb = stats.live_bytes / (1024 * 1024),
        hit_rate = %format!("{:.3}", stats.hit_rate()),
        tiles_written = stats.tiles_written,
        writes_skipped = stats.writes_skipped,
        tiles_hydrated = stats.tiles_hydrated,
        disk_written_mb = disk.total_bytes_written / (1024 * 1024),
        disk_usage_mb = store.disk_usage() / (1024 * 1024),
        "Store statistics"
    );
    debug!("Metrics:\n{}", store.metrics_text());

    Ok(())
}
