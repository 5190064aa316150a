//! photocache - cache and prefetch pipeline for browsing large photo folders.
//!
//! This binary wires the pipeline together and exposes it as three tools:
//! warming thumbnails around a position in a folder, loading the visible
//! tiles of one image, and checking the resolved configuration.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use photocache::{
    cache::DiskShadow,
    config::{
        CacheSettings, CheckConfig, CheckOutputFormat, Cli, Command, PipelineConfig, TilesConfig,
        WarmConfig,
    },
    io::DEFAULT_SHUTDOWN_TIMEOUT,
    DirectoryListing, FileList, ImageCache, ImageDecoder, Prefetcher, SequentialReader,
    TileLoader, TiledView, Viewport,
};

/// How long `tiles` waits for the next tile before giving up.
const TILE_WAIT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Warm(config) => run_warm(config).await,
        Command::Tiles(config) => run_tiles(config).await,
        Command::Check(config) => run_check(config),
    }
}

// =============================================================================
// Pipeline Setup
// =============================================================================

/// Resolve and validate the pipeline configuration, logging the outcome.
fn resolve_pipeline(args: &photocache::PipelineArgs) -> Option<PipelineConfig> {
    let pipeline = args.resolve();
    if let Err(e) = pipeline.validate() {
        error!("Configuration error: {}", e);
        return None;
    }

    info!("Configuration:");
    info!("  Storage: {:?}", pipeline.storage);
    info!("  Decode threads: {}", pipeline.decode_threads);
    log_cache("Thumbnails", &pipeline.thumbs);
    log_cache("Tiles", &pipeline.tiles);
    if pipeline.storage.is_rotational() {
        info!(
            "  Read-ahead budget: {}MB",
            pipeline.prefetch_budget / (1024 * 1024)
        );
    }
    Some(pipeline)
}

fn log_cache(name: &str, settings: &CacheSettings) {
    match (&settings.disk_dir, settings.has_disk()) {
        (Some(dir), true) => info!(
            "  {}: {} items, {}MB, disk {} ({} entries)",
            name,
            settings.max_items,
            settings.max_bytes / (1024 * 1024),
            dir.display(),
            settings.max_disk_entries
        ),
        _ => info!(
            "  {}: {} items, {}MB, memory only",
            name,
            settings.max_items,
            settings.max_bytes / (1024 * 1024)
        ),
    }
}

/// Build the decoder; on rotational storage it reads through a sequential reader.
fn build_decoder(pipeline: &PipelineConfig) -> (Arc<ImageDecoder>, Option<Arc<SequentialReader>>) {
    if pipeline.storage.is_rotational() {
        let reader = Arc::new(SequentialReader::new());
        let decoder = ImageDecoder::with_sequential_reader(Arc::clone(&reader));
        (Arc::new(decoder), Some(reader))
    } else {
        (Arc::new(ImageDecoder::new()), None)
    }
}

/// Stop the sequential reader without blocking the runtime.
async fn shutdown_reader(reader: Option<Arc<SequentialReader>>) {
    let Some(reader) = reader else {
        return;
    };
    match tokio::task::spawn_blocking(move || reader.shutdown(DEFAULT_SHUTDOWN_TIMEOUT)).await {
        Ok(true) => debug!("Sequential reader stopped"),
        Ok(false) => warn!("Sequential reader did not stop in time"),
        Err(e) => warn!("Sequential reader shutdown failed: {}", e),
    }
}

// =============================================================================
// Warm Command
// =============================================================================

async fn run_warm(config: WarmConfig) -> ExitCode {
    init_logging(config.pipeline.verbose);

    let Some(pipeline) = resolve_pipeline(&config.pipeline) else {
        return ExitCode::FAILURE;
    };

    let files = match DirectoryListing::open(&config.dir) {
        Ok(files) => files,
        Err(e) => {
            error!("Failed to list {}: {}", config.dir.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if files.is_empty() {
        warn!("No images found in {}", config.dir.display());
        return ExitCode::SUCCESS;
    }
    info!("Found {} image(s) in {}", files.len(), files.folder().display());

    let thumbs = Arc::new(ImageCache::from_settings("thumbs", &pipeline.thumbs));
    let (decoder, reader) = build_decoder(&pipeline);

    let mut prefetcher = Prefetcher::new(
        Arc::clone(&thumbs),
        decoder,
        Arc::new(files),
        pipeline.decode_threads,
    );
    if let Some(reader) = &reader {
        prefetcher = prefetcher.with_read_ahead(Arc::clone(reader), pipeline.prefetch_budget);
    }

    let started = Instant::now();
    let report = prefetcher
        .prefetch_around(config.center, config.radius, config.edge)
        .await
        .wait()
        .await;
    thumbs.flush_disk().await;

    info!(
        "Warmed {} thumbnail(s) at edge {} in {:.2?} ({} already cached, {} failed)",
        report.warmed,
        config.edge,
        started.elapsed(),
        report.skipped,
        report.failed
    );
    info!(
        "Thumbnail cache: {} entries, {}KB",
        thumbs.len().await,
        thumbs.size().await / 1024
    );

    shutdown_reader(reader).await;
    ExitCode::SUCCESS
}

// =============================================================================
// Tiles Command
// =============================================================================

async fn run_tiles(config: TilesConfig) -> ExitCode {
    init_logging(config.pipeline.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let Some(pipeline) = resolve_pipeline(&config.pipeline) else {
        return ExitCode::FAILURE;
    };

    let tiles = Arc::new(ImageCache::from_settings("tiles", &pipeline.tiles));
    let (decoder, reader) = build_decoder(&pipeline);
    let (loader, mut events) = TileLoader::spawn(Arc::clone(&tiles), decoder, pipeline.storage);

    let viewport = Viewport::new(f64::from(config.width), f64::from(config.height))
        .with_zoom(config.zoom)
        .with_tile_size(config.tile_size);
    let mut view = TiledView::new(&loader, viewport);

    let started = Instant::now();
    let summary = match view.set_source(&config.image).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let Some((width, height)) = view.full_size() else {
        warn!("{} has no pixels", config.image.display());
        return ExitCode::SUCCESS;
    };
    info!(
        "{}: {}x{}, level {}, {} visible tile(s) ({} cached)",
        config.image.display(),
        width,
        height,
        view.level(),
        summary.served + summary.queued,
        summary.served
    );

    let expected = summary.served + summary.queued;
    while view.tile_count() < expected {
        match tokio::time::timeout(TILE_WAIT, events.recv()).await {
            Ok(Some(ready)) => {
                view.accept(ready);
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    "Timed out after {} of {} tile(s)",
                    view.tile_count(),
                    expected
                );
                break;
            }
        }
    }

    info!(
        "Received {} tile(s) in {:.2?}",
        view.tile_count(),
        started.elapsed()
    );

    drop(view);
    if !loader.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await {
        warn!("Tile loader did not stop in time");
    }
    tiles.flush_disk().await;
    shutdown_reader(reader).await;

    ExitCode::SUCCESS
}

// =============================================================================
// Check Command
// =============================================================================

fn run_check(config: CheckConfig) -> ExitCode {
    // Initialize minimal logging for check command
    if config.pipeline.verbose {
        init_logging(true);
    }

    let pipeline = config.pipeline.resolve();
    let validation = pipeline.validate();
    let thumb_entries = disk_entries(&pipeline.thumbs);
    let tile_entries = disk_entries(&pipeline.tiles);

    match config.format {
        CheckOutputFormat::Text => {
            println!("photocache Configuration Check");
            println!("══════════════════════════════");
            println!();
            match &validation {
                Ok(()) => println!("✓ Configuration valid"),
                Err(e) => println!("✗ Configuration: {}", e),
            }
            println!("  Storage: {:?}", pipeline.storage);
            println!("  Decode threads: {}", pipeline.decode_threads);
            println!(
                "  Read-ahead budget: {}MB",
                pipeline.prefetch_budget / (1024 * 1024)
            );
            println!();
            print_cache("Thumbnail cache", &pipeline.thumbs, &thumb_entries);
            print_cache("Tile cache", &pipeline.tiles, &tile_entries);
        }
        CheckOutputFormat::Json => {
            let json = serde_json::json!({
                "valid": validation.is_ok(),
                "error": validation.as_ref().err(),
                "config": &pipeline,
                "disk_entries": {
                    "thumbs": thumb_entries.as_ref().and_then(|r| r.as_ref().ok()),
                    "tiles": tile_entries.as_ref().and_then(|r| r.as_ref().ok()),
                },
            });
            match serde_json::to_string_pretty(&json) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    if validation.is_err() {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Count persisted entries of a cache's disk tier, if it has one.
fn disk_entries(settings: &CacheSettings) -> Option<Result<usize, String>> {
    if !settings.has_disk() {
        return None;
    }
    let dir = settings.disk_dir.as_ref()?;
    let disk = DiskShadow::new(dir, settings.max_disk_entries);
    Some(disk.entry_count().map_err(|e| e.to_string()))
}

fn print_cache(name: &str, settings: &CacheSettings, entries: &Option<Result<usize, String>>) {
    println!("{}:", name);
    println!(
        "  Memory: {} items, {}MB",
        settings.max_items,
        settings.max_bytes / (1024 * 1024)
    );
    match (&settings.disk_dir, entries) {
        (Some(dir), Some(Ok(count))) => println!(
            "✓ Disk: {} ({} of {} entries)",
            dir.display(),
            count,
            settings.max_disk_entries
        ),
        (Some(dir), Some(Err(e))) => println!("✗ Disk: {} ({})", dir.display(), e),
        _ => println!("  Disk: disabled"),
    }
    println!();
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "photocache=debug"
    } else {
        "photocache=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
