//! Subsampling demo - zooms a simulated viewport into an image.
//!
//! Opens the image with the reference decoder, lays out a thumbnail, then
//! steps through the configured scales and reports which tiles the engine
//! decoded at each step.

use clap::Parser;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subsampling::{
    config::Config,
    source::{FileImageSource, ImageRegionDecoderFactory, ImageSource, RegionDecoderFactory},
    tile::{BufferReusePool, TileCache, TileImagePool, TileServiceHandle, TileState, TileStats},
    IntRect, IntSize, RefreshStatus, SubsamplingEngine, TransformKind,
};

/// How long one zoom step may wait for its tiles.
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    run(config).await
}

// =============================================================================
// Zoom Sweep
// =============================================================================

/// Result of one zoom step.
#[derive(Debug, Serialize)]
struct StepReport {
    scale: f32,
    status: RefreshStatus,
    status_code: i32,
    sample_size: u32,
    visible_rect: IntRect,
    image_load_rect: IntRect,
    foreground_loaded: usize,
    foreground_failed: usize,
    foreground_total: usize,
    background: usize,
    timed_out: bool,
    stats: Option<TileStats>,
}

async fn run(config: Config) -> ExitCode {
    let factory = Arc::new(ImageRegionDecoderFactory::new());
    let source = Arc::new(FileImageSource::new(config.image.clone()));

    let image_size = match read_image_size(source.as_ref(), factory.as_ref()) {
        Ok(size) => size,
        Err(e) => {
            error!("Failed to read {}: {}", config.image.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let content_size = fit_thumbnail(image_size, config.thumbnail_max);

    info!("Configuration:");
    info!("  Image: {} ({})", config.image.display(), image_size);
    info!("  Thumbnail: {}", content_size);
    info!("  Scales: {:?}", config.scales);
    info!(
        "  Cache: {}, reuse: {}, decode parallelism: {}",
        if config.no_memory_cache {
            "disabled".to_string()
        } else {
            format!("{}MB", config.cache_bytes / (1024 * 1024))
        },
        !config.no_reuse,
        config.decode_parallelism
    );

    let tile_config = config.tile_config();
    let pool: Arc<dyn BufferReusePool> = if tile_config.buffer_reuse {
        Arc::new(TileImagePool::new())
    } else {
        Arc::new(TileImagePool::disabled())
    };
    let cache = tile_config.memory_cache.then(|| {
        Arc::new(TileCache::with_capacity(config.cache_bytes).with_reuse_pool(Arc::clone(&pool)))
    });
    let mut engine = SubsamplingEngine::with_shared(tile_config, factory, cache.clone(), pool);

    let handle = match engine.set_image(source, content_size, content_size).await {
        Ok(handle) => handle,
        Err(e) if e.is_skipped() => {
            info!("Subsampling not needed: {}", e);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("Failed to build tile pyramid: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for &scale in &config.scales {
        let report = zoom_step(&handle, content_size, scale).await;
        if config.json {
            match serde_json::to_string(&report) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize report: {}", e),
            }
        } else {
            info!(
                "scale={:<6} status={:?} sampleSize={} loaded={}/{} failed={} background={} loadRect={}",
                report.scale,
                report.status,
                report.sample_size,
                report.foreground_loaded,
                report.foreground_total,
                report.foreground_failed,
                report.background,
                report.image_load_rect
            );
            if report.timed_out {
                warn!("  Timed out after {:?} waiting for tiles", STEP_TIMEOUT);
            }
        }
    }

    if let Some(stats) = handle.stats().await {
        info!(
            "Totals: dispatched={}, decoded={}, cacheHits={}, failed={}, freed={}, stale={}",
            stats.decodes_dispatched,
            stats.decoded,
            stats.cache_hits,
            stats.failed,
            stats.freed,
            stats.stale_results
        );
    }
    if let Some(cache) = &cache {
        info!(
            "Cache: {} tiles, {}KB of {}MB",
            cache.len(),
            cache.size() / 1024,
            cache.capacity() / (1024 * 1024)
        );
    }

    engine.destroy("demo").await;
    ExitCode::SUCCESS
}

/// Refresh at `scale` with the viewport centered, then wait for the tiles.
async fn zoom_step(handle: &TileServiceHandle, content_size: IntSize, scale: f32) -> StepReport {
    let visible_rect = centered_visible_rect(content_size, scale);
    let status = handle
        .refresh_tiles(scale, visible_rect, 0, TransformKind::empty(), "demo")
        .await;

    let mut receivers = handle.subscribe();
    let timed_out = tokio::time::timeout(
        STEP_TIMEOUT,
        receivers
            .foreground_tiles
            .wait_for(|tiles| tiles.iter().all(|t| t.state != TileState::Loading)),
    )
    .await
    .is_err();

    let foreground = receivers.foreground_tiles.borrow().clone();
    let background = receivers.background_tiles.borrow().len();
    let count = |state: TileState| foreground.iter().filter(|t| t.state == state).count();
    let sample_size = *receivers.sample_size.borrow();
    let image_load_rect = *receivers.image_load_rect.borrow();

    StepReport {
        scale,
        status,
        status_code: status.code(),
        sample_size,
        visible_rect,
        image_load_rect,
        foreground_loaded: count(TileState::Loaded),
        foreground_failed: count(TileState::Error),
        foreground_total: foreground.len(),
        background,
        timed_out,
        stats: handle.stats().await,
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn read_image_size(
    source: &dyn ImageSource,
    factory: &dyn RegionDecoderFactory,
) -> Result<IntSize, String> {
    let stream = source.open_source().map_err(|e| e.to_string())?;
    let info = factory.decode_image_info(stream).map_err(|e| e.to_string())?;
    Ok(info.size)
}

/// Scale `image_size` down so its longest edge is at most `max_edge`.
fn fit_thumbnail(image_size: IntSize, max_edge: u32) -> IntSize {
    let longest = image_size.width.max(image_size.height);
    if longest <= max_edge {
        return image_size;
    }
    let ratio = max_edge as f64 / longest as f64;
    IntSize::new(
        ((image_size.width as f64 * ratio).round() as u32).max(1),
        ((image_size.height as f64 * ratio).round() as u32).max(1),
    )
}

/// Visible part of the content when zoomed by `scale` around its center.
fn centered_visible_rect(content_size: IntSize, scale: f32) -> IntRect {
    let scale = scale.max(1.0) as f64;
    let width = (content_size.width as f64 / scale).round() as i32;
    let height = (content_size.height as f64 / scale).round() as i32;
    let left = (content_size.width as i32 - width) / 2;
    let top = (content_size.height as i32 - height) / 2;
    IntRect::new(left, top, left + width.max(1), top + height.max(1))
}

/// Initialize the tracing subscriber for logging.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "subsampling=debug,subsampling_demo=debug"
    } else {
        "subsampling=info,subsampling_demo=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
