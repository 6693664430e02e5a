//! pyramid-fetch - inspect, benchmark and export multi-resolution images.

use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pyramid_fetch::{
    backend::{BackendDriver, SyntheticImage},
    config::{BenchConfig, Cli, Command, ExportConfig, InspectConfig},
    create_s3_client,
    grid::{CellCache, CellKey},
    io::S3ObjectStore,
    source::{
        ImageSession, LocalOpener, S3Opener, SourceKey, SourceOpener, SourceRegistry,
        SyntheticOpener,
    },
    tile::{BlockRequest, DisplayPixels},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match (&cli.command, &cli.source.s3_bucket) {
        (Command::Bench(config), _) if config.synthetic => {
            let mut opener = SyntheticOpener::new(SyntheticImage::default());
            if let Some(latency) = config.read_latency() {
                opener = opener.with_read_latency(latency);
            }
            run(opener, &cli, config.location()).await
        }
        (command, Some(bucket)) => {
            let client =
                create_s3_client(cli.source.s3_endpoint.as_deref(), &cli.source.s3_region).await;
            let opener = S3Opener::new(S3ObjectStore::new(client, bucket.clone()));
            run(opener, &cli, location_of(command)).await
        }
        (command, None) => run(LocalOpener, &cli, location_of(command)).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn location_of(command: &Command) -> &str {
    match command {
        Command::Inspect(config) => &config.location,
        Command::Bench(config) => config.location(),
        Command::Export(config) => &config.location,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "pyramid_fetch=debug"
    } else {
        "pyramid_fetch=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Open `location` through `opener` and run the selected command on it.
async fn run<O: SourceOpener>(opener: O, cli: &Cli, location: &str) -> Result<(), String> {
    let registry = SourceRegistry::with_capacity(opener, 1);
    let key = SourceKey::new(location, cli.source.open_options());
    let session = registry
        .get(&key)
        .await
        .map_err(|e| format!("Failed to open {}: {}", location, e))?;

    let result = match &cli.command {
        Command::Inspect(config) => run_inspect(&session, config),
        Command::Bench(config) => run_bench(session.clone(), cli.source.series, config).await,
        Command::Export(config) => run_export(&session, cli.source.series, config).await,
    };

    registry.clear().await;
    result
}

// =============================================================================
// Inspect Command
// =============================================================================

fn run_inspect<D: BackendDriver>(
    session: &ImageSession<D>,
    config: &InspectConfig,
) -> Result<(), String> {
    let metadata = session.metadata();

    if config.json {
        let json = serde_json::to_string_pretty(metadata).map_err(|e| e.to_string())?;
        println!("{}", json);
        return Ok(());
    }

    println!("Image: {}", metadata.name);
    println!("─────────────────────────────────");
    println!("  Backend:         {}", session.driver().kind());
    println!("  Sample format:   {}", metadata.format.describe());
    println!("  Byte order:      {:?}", metadata.byte_order);
    println!("  Channels:        {}", metadata.size_c);
    println!("  Timepoints:      {}", metadata.size_t);
    println!("  Dimension order: {:?}", metadata.dimension_order);
    println!("  Series:          {}", metadata.series.len());

    for (index, series) in metadata.series.iter().enumerate() {
        let geometry = session.geometry(index).map_err(|e| e.to_string())?;
        println!();
        println!(
            "Series {}{}",
            index,
            series
                .name
                .as_deref()
                .map(|name| format!(" ({})", name))
                .unwrap_or_default()
        );
        println!("  Voxel size: {:?}", geometry.voxel_size());
        println!(
            "  {:>5}  {:>24}  {:>14}  {:>18}  {:>14}",
            "level", "dimensions", "block", "downsampling", "grid"
        );
        for (level, info) in geometry.levels().iter().enumerate() {
            let grid = pyramid_fetch::grid::CellGrid::for_level(info);
            let [gx, gy, gz] = grid.grid_dimensions();
            let [fx, fy, fz] = info.downsampling;
            println!(
                "  {:>5}  {:>24}  {:>14}  {:>18}  {:>14}",
                level,
                format!(
                    "{}x{}x{}",
                    info.dimensions[0], info.dimensions[1], info.dimensions[2]
                ),
                format!(
                    "{}x{}x{}",
                    info.block_shape[0], info.block_shape[1], info.block_shape[2]
                ),
                format!("{}/{}/{}", fx, fy, fz),
                format!("{}x{}x{}", gx, gy, gz),
            );
        }
    }

    Ok(())
}

// =============================================================================
// Bench Command
// =============================================================================

#[derive(Default)]
struct BenchCounters {
    loaded: AtomicUsize,
    interrupted: AtomicUsize,
    failed: AtomicUsize,
    pixels: AtomicUsize,
}

async fn run_bench<D: BackendDriver>(
    session: Arc<ImageSession<D>>,
    series: usize,
    config: &BenchConfig,
) -> Result<(), String> {
    session
        .check_selection(series, config.channel)
        .map_err(|e| e.to_string())?;

    let mut bridge = session.bridge(series).map_err(|e| e.to_string())?;
    if let Some(cache_mb) = config.cache_mb {
        bridge = bridge.with_cache(Arc::new(CellCache::with_capacity(cache_mb * 1024 * 1024)));
    }
    bridge.set_viewed_level(config.level);

    let cells = bridge
        .grid(config.level)
        .map_err(|e| e.to_string())?
        .num_cells();
    if cells == 0 {
        return Err(format!("level {} has no cells", config.level));
    }
    let bridge = Arc::new(bridge);
    let counters = Arc::new(BenchCounters::default());

    info!(
        workers = config.workers,
        requests = config.requests,
        level = config.level,
        cells,
        "starting bench"
    );

    let started = Instant::now();
    let tasks: Vec<_> = (0..config.workers)
        .map(|worker| {
            let bridge = bridge.clone();
            let counters = counters.clone();
            let requests = config.requests;
            let level = config.level;
            let channel = config.channel;
            tokio::spawn(async move {
                for i in 0..requests {
                    let key = CellKey {
                        timepoint: 0,
                        level,
                        channel,
                        cell_index: ((worker * requests + i) as u64) % cells,
                    };
                    match bridge.load_cell(key).await {
                        Ok(cell) => {
                            counters.loaded.fetch_add(1, Ordering::Relaxed);
                            counters.pixels.fetch_add(cell.data.len(), Ordering::Relaxed);
                        }
                        Err(e) if e.is_transient() => {
                            counters.interrupted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!(?key, error = %e, "cell load failed");
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.map_err(|e| format!("bench worker panicked: {}", e))?;
    }
    let elapsed = started.elapsed();

    let loaded = counters.loaded.load(Ordering::Relaxed);
    let stats = session.pool_stats();
    let seconds = elapsed.as_secs_f64().max(f64::EPSILON);

    println!("Bench results");
    println!("─────────────────────────────────");
    println!("  Elapsed:      {:.3}s", elapsed.as_secs_f64());
    println!("  Loaded:       {}", loaded);
    println!("  Interrupted:  {}", counters.interrupted.load(Ordering::Relaxed));
    println!("  Failed:       {}", counters.failed.load(Ordering::Relaxed));
    println!("  Throughput:   {:.1} cells/s", loaded as f64 / seconds);
    println!(
        "  Pixels/s:     {:.0}",
        counters.pixels.load(Ordering::Relaxed) as f64 / seconds
    );
    println!(
        "  Pool:         {} created / {} capacity, {} free, {} checked out",
        stats.created, stats.capacity, stats.free, stats.checked_out
    );

    Ok(())
}

// =============================================================================
// Export Command
// =============================================================================

async fn run_export<D: BackendDriver>(
    session: &ImageSession<D>,
    series: usize,
    config: &ExportConfig,
) -> Result<(), String> {
    session
        .check_selection(series, config.channel)
        .map_err(|e| e.to_string())?;
    let loader = session.loader(series).map_err(|e| e.to_string())?;

    let origin = [config.x, config.y, config.z];
    let shape = [config.width, config.height, 1];
    let [width, height, _] = loader
        .geometry()
        .clamp_block(config.level, origin, shape)
        .map_err(|e| e.to_string())?;
    if width == 0 || height == 0 {
        return Err(format!(
            "region at {:?} lies outside level {}",
            origin, config.level
        ));
    }

    let pixels = loader
        .load(&BlockRequest {
            timepoint: config.timepoint,
            level: config.level,
            channel: config.channel,
            origin,
            shape,
        })
        .await
        .map_err(|e| e.to_string())?;

    write_png(&config.output, &pixels.to_display(), width, height)?;

    info!(
        output = %config.output.display(),
        width,
        height,
        pixel_type = pixels.pixel_type().as_str(),
        "exported block"
    );
    Ok(())
}

fn write_png(path: &Path, pixels: &DisplayPixels, width: u32, height: u32) -> Result<(), String> {
    let (buf, color) = match pixels {
        DisplayPixels::Gray(buf) => (buf, image::ColorType::L8),
        DisplayPixels::Rgba(buf) => (buf, image::ColorType::Rgba8),
    };
    image::save_buffer(path, buf, width, height, color)
        .map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}
