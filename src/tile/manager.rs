//! Tile manager: the subsampling state machine.
//!
//! The manager owns the tile pyramid of one image and decides, on every
//! viewport change, which tiles to load and which to free.
//!
//! # Refresh Protocol
//!
//! ```text
//! refresh_tiles(scale, visible_rect, rotation, transform)
//!   1. rotation not a multiple of 90      → InvalidRotation
//!   2. transform in paused mask           → Paused
//!   3. recompute sample size / load rect  (memoized)
//!   4. ≤1 tile or empty load rect         → free everything
//!   5. per level:
//!        current level     overlapping → load, else free
//!        background level  overlapping → keep, else free
//!        any other level               → free
//!   6. publish snapshots if anything changed
//! ```
//!
//! # Confinement
//!
//! Every method takes `&mut self`: tile state has exactly one writer. Decodes
//! run on tokio's blocking pool, bounded by a semaphore, and report back over
//! a channel; [`TileManager::handle_completion`] applies a result only if the
//! tile still waits for that exact job. Methods that load tiles must be called
//! from within a tokio runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::{TileConfig, TransformKind};
use crate::error::DecodeError;
use crate::geometry::{IntOffset, IntRect, IntSize};
use crate::source::ImageInfo;

use super::cache::{TileCache, TileCacheKey};
use super::decoder::TileDecoder;
use super::grid::{
    calculate_max_sample_size, calculate_preferred_tile_size, plan_tile_grid_map,
    tile_grid_size_map, TileGrid,
};
use super::image::TileImage;
use super::model::{LoadJob, TileSnapshot, TileState};
use super::pool::BufferReusePool;
use super::sampling::{calculate_image_load_rect, select_sample_size, NO_SUBSAMPLING};

// =============================================================================
// Refresh Status
// =============================================================================

/// Outcome of [`TileManager::refresh_tiles`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RefreshStatus {
    /// Tiles were reconciled with the viewport
    Refreshed,
    /// Rotation is not a multiple of 90 degrees
    InvalidRotation,
    /// A paused continuous transform is in progress
    Paused,
    /// The selected level has at most one tile; all tiles were freed
    NoSubsampling,
    /// Nothing of the image is visible; all tiles were freed
    EmptyLoadRect,
    /// The manager has been closed
    Closed,
}

impl RefreshStatus {
    /// Stable status code: 0 on success, a distinct negative value otherwise.
    pub fn code(&self) -> i32 {
        match self {
            RefreshStatus::Refreshed => 0,
            RefreshStatus::InvalidRotation => -1,
            RefreshStatus::Paused => -2,
            RefreshStatus::NoSubsampling => -3,
            RefreshStatus::EmptyLoadRect => -4,
            RefreshStatus::Closed => -5,
        }
    }

    pub fn is_refreshed(&self) -> bool {
        matches!(self, RefreshStatus::Refreshed)
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Cumulative counters of tile transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TileStats {
    /// Decode jobs spawned
    pub decodes_dispatched: u64,
    /// Loads satisfied synchronously from the memory cache
    pub cache_hits: u64,
    /// Decodes that completed and were attached
    pub decoded: u64,
    /// Decodes that failed
    pub failed: u64,
    /// Tiles returned to `None`
    pub freed: u64,
    /// Completions discarded because the tile moved on
    pub stale_results: u64,
}

/// Number of tiles currently in each state, across all levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TileStateCounts {
    pub none: usize,
    pub loading: usize,
    pub loaded: usize,
    pub error: usize,
}

// =============================================================================
// Observers
// =============================================================================

/// Receivers for every observable property of a tile manager.
///
/// Each receiver sees the latest value and can await changes.
#[derive(Debug, Clone)]
pub struct TileReceivers {
    pub sample_size: watch::Receiver<u32>,
    pub image_load_rect: watch::Receiver<IntRect>,
    pub foreground_tiles: watch::Receiver<Vec<TileSnapshot>>,
    pub background_tiles: watch::Receiver<Vec<TileSnapshot>>,
    pub ready: watch::Receiver<bool>,
}

struct TileObservers {
    sample_size: watch::Sender<u32>,
    image_load_rect: watch::Sender<IntRect>,
    foreground_tiles: watch::Sender<Vec<TileSnapshot>>,
    background_tiles: watch::Sender<Vec<TileSnapshot>>,
    ready: watch::Sender<bool>,
}

impl TileObservers {
    fn new() -> Self {
        Self {
            sample_size: watch::Sender::new(NO_SUBSAMPLING),
            image_load_rect: watch::Sender::new(IntRect::ZERO),
            foreground_tiles: watch::Sender::new(Vec::new()),
            background_tiles: watch::Sender::new(Vec::new()),
            ready: watch::Sender::new(true),
        }
    }

    fn subscribe(&self) -> TileReceivers {
        TileReceivers {
            sample_size: self.sample_size.subscribe(),
            image_load_rect: self.image_load_rect.subscribe(),
            foreground_tiles: self.foreground_tiles.subscribe(),
            background_tiles: self.background_tiles.subscribe(),
            ready: self.ready.subscribe(),
        }
    }
}

// =============================================================================
// Decode Completion
// =============================================================================

/// Result of one decode job, sent back to the manager.
pub(crate) struct DecodeCompletion {
    job_id: u64,
    sample_size: u32,
    tile_index: usize,
    result: Result<RgbaImage, DecodeError>,
}

/// Send a completion, or recycle its buffer if the manager is gone.
fn deliver(
    tx: &mpsc::UnboundedSender<DecodeCompletion>,
    pool: &dyn BufferReusePool,
    completion: DecodeCompletion,
) {
    if let Err(rejected) = tx.send(completion) {
        if let Ok(buffer) = rejected.0.result {
            pool.free(buffer, "manager dropped");
        }
    }
}

// =============================================================================
// Tile Manager
// =============================================================================

/// Owns the tile pyramid of one image and keeps it in step with the viewport.
pub struct TileManager {
    image_key: Arc<str>,
    image_info: ImageInfo,
    content_size: IntSize,
    preferred_tile_size: IntSize,
    config: TileConfig,

    decoder: Arc<TileDecoder>,
    cache: Option<Arc<TileCache>>,
    pool: Arc<dyn BufferReusePool>,

    /// Pyramid, coarsest level first
    grids: Vec<TileGrid>,

    decode_permits: Arc<Semaphore>,
    completion_tx: mpsc::UnboundedSender<DecodeCompletion>,
    completion_rx: Option<mpsc::UnboundedReceiver<DecodeCompletion>>,
    next_job_id: u64,

    last_scale: Option<f32>,
    last_visible_rect: Option<IntRect>,
    sample_size: u32,
    /// Previous distinct sample size, for background tiles
    last_sample_size: u32,
    image_load_rect: IntRect,

    animating: bool,
    closed: bool,
    stats: TileStats,
    observers: TileObservers,
}

impl TileManager {
    /// Build the pyramid for the image behind `decoder`.
    ///
    /// # Arguments
    ///
    /// * `decoder` - Decoder pool for the image
    /// * `content_size` - Size of the base thumbnail as laid out on screen
    /// * `container_size` - Size of the viewport, used to derive the tile
    ///   size when the config does not specify one
    /// * `config` - Engine knobs
    /// * `cache` - Shared memory cache, ignored if `config.memory_cache` is off
    /// * `pool` - Shared buffer reuse pool
    pub fn new(
        decoder: Arc<TileDecoder>,
        content_size: IntSize,
        container_size: IntSize,
        config: TileConfig,
        cache: Option<Arc<TileCache>>,
        pool: Arc<dyn BufferReusePool>,
    ) -> Self {
        let image_info = decoder.image_info().clone();
        let image_key: Arc<str> = Arc::from(decoder.image_key());
        let preferred_tile_size = config
            .preferred_tile_size
            .unwrap_or_else(|| calculate_preferred_tile_size(container_size));
        let max_sample_size = calculate_max_sample_size(image_info.size, content_size);
        let grids = plan_tile_grid_map(image_info.size, preferred_tile_size, max_sample_size);
        let cache = if config.memory_cache { cache } else { None };
        let decode_permits = Arc::new(Semaphore::new(config.decode_parallelism.max(1)));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let manager = Self {
            image_key,
            image_info,
            content_size,
            preferred_tile_size,
            config,
            decoder,
            cache,
            pool,
            grids,
            decode_permits,
            completion_tx,
            completion_rx: Some(completion_rx),
            next_job_id: 0,
            last_scale: None,
            last_visible_rect: None,
            sample_size: NO_SUBSAMPLING,
            last_sample_size: NO_SUBSAMPLING,
            image_load_rect: IntRect::ZERO,
            animating: false,
            closed: false,
            stats: TileStats::default(),
            observers: TileObservers::new(),
        };
        debug!(
            "Created. maxSampleSize={}, gridSizeMap={:?}. {}",
            max_sample_size,
            manager.tile_grid_size_map(),
            manager
        );
        manager
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn image_info(&self) -> &ImageInfo {
        &self.image_info
    }

    pub fn content_size(&self) -> IntSize {
        self.content_size
    }

    pub fn preferred_tile_size(&self) -> IntSize {
        self.preferred_tile_size
    }

    pub fn config(&self) -> &TileConfig {
        &self.config
    }

    /// Current sample size, or 0 when not subsampling.
    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    /// Region of the image, in image pixels, that should be resident.
    pub fn image_load_rect(&self) -> IntRect {
        self.image_load_rect
    }

    /// The pyramid, coarsest level first.
    pub fn grids(&self) -> &[TileGrid] {
        &self.grids
    }

    /// Columns × rows per sample size.
    pub fn tile_grid_size_map(&self) -> BTreeMap<u32, IntOffset> {
        tile_grid_size_map(&self.grids)
    }

    /// Latest published foreground snapshot.
    pub fn foreground_tiles(&self) -> Vec<TileSnapshot> {
        self.observers.foreground_tiles.borrow().clone()
    }

    /// Latest published background snapshot.
    pub fn background_tiles(&self) -> Vec<TileSnapshot> {
        self.observers.background_tiles.borrow().clone()
    }

    pub fn subscribe(&self) -> TileReceivers {
        self.observers.subscribe()
    }

    pub fn stats(&self) -> TileStats {
        self.stats
    }

    pub fn state_counts(&self) -> TileStateCounts {
        let mut counts = TileStateCounts::default();
        for tile in self.grids.iter().flat_map(|g| g.tiles.iter()) {
            match tile.state() {
                TileState::None => counts.none += 1,
                TileState::Loading => counts.loading += 1,
                TileState::Loaded => counts.loaded += 1,
                TileState::Error => counts.error += 1,
            }
        }
        counts
    }

    /// True while a fade-in animation still needs frames.
    pub fn is_animating(&self) -> bool {
        self.animating
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn has_loading_tiles(&self) -> bool {
        self.grids
            .iter()
            .flat_map(|g| g.tiles.iter())
            .any(|t| t.state() == TileState::Loading)
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Reconcile tiles with the current viewport.
    ///
    /// # Arguments
    ///
    /// * `scale` - Zoom of the content relative to its laid-out size
    /// * `visible_rect` - Visible part of the content, in content pixels
    /// * `rotation` - Viewport rotation in degrees
    /// * `transform` - Continuous transforms currently in progress
    /// * `caller` - Label for log lines
    pub fn refresh_tiles(
        &mut self,
        scale: f32,
        visible_rect: IntRect,
        rotation: i32,
        transform: TransformKind,
        caller: &str,
    ) -> RefreshStatus {
        if self.closed {
            return RefreshStatus::Closed;
        }
        if rotation % 90 != 0 {
            debug!(
                "refreshTiles:{}. interrupted, rotation is not a multiple of 90: {}. {}",
                caller, rotation, self
            );
            return RefreshStatus::InvalidRotation;
        }
        if transform.intersects(self.config.paused_transforms) {
            trace!(
                "refreshTiles:{}. interrupted, continuous transform {:?} in progress. {}",
                caller,
                transform,
                self
            );
            return RefreshStatus::Paused;
        }

        let mut changed = self.update_sample_size(scale, caller);
        changed |= self.update_image_load_rect(visible_rect);

        let current_tile_count = self
            .grid_index(self.sample_size)
            .map(|i| self.grids[i].len())
            .unwrap_or(0);
        if self.sample_size == NO_SUBSAMPLING || current_tile_count <= 1 {
            let freed = self.free_all_tiles(caller);
            if changed || freed > 0 {
                debug!(
                    "refreshTiles:{}. no subsampling, freed {} tiles. scale={}, sampleSize={}",
                    caller, freed, scale, self.sample_size
                );
                self.publish_snapshots(Instant::now());
            }
            return RefreshStatus::NoSubsampling;
        }
        if self.image_load_rect.is_empty() {
            let freed = self.free_all_tiles(caller);
            if changed || freed > 0 {
                debug!(
                    "refreshTiles:{}. load rect is empty, freed {} tiles. visibleRect={}",
                    caller, freed, visible_rect
                );
                self.publish_snapshots(Instant::now());
            }
            return RefreshStatus::EmptyLoadRect;
        }

        let load_rect = self.image_load_rect;
        let current = self.sample_size;
        let mut loaded = 0usize;
        let mut freed = 0usize;
        for gi in 0..self.grids.len() {
            let level = self.grids[gi].sample_size;
            let background = level != current && self.is_background_level(level);
            for ti in 0..self.grids[gi].tiles.len() {
                let overlaps = self.grids[gi].tiles[ti].src_rect.overlaps(&load_rect);
                if level == current && overlaps {
                    if self.load_tile(gi, ti, caller) {
                        loaded += 1;
                    }
                } else if background && overlaps {
                    // Kept visible underneath until the current level is complete
                } else if self.free_tile(gi, ti, caller) {
                    freed += 1;
                }
            }
        }

        if changed || loaded > 0 || freed > 0 {
            debug!(
                "refreshTiles:{}. loaded={}, freed={}, scale={}, sampleSize={}, lastSampleSize={}, loadRect={}",
                caller, loaded, freed, scale, self.sample_size, self.last_sample_size, load_rect
            );
            self.publish_snapshots(Instant::now());
        }
        RefreshStatus::Refreshed
    }

    fn update_sample_size(&mut self, scale: f32, caller: &str) -> bool {
        if self.last_scale == Some(scale) {
            return false;
        }
        self.last_scale = Some(scale);

        let raw = select_sample_size(self.image_info.size, self.content_size, scale);
        let sample_size = self.resolve_sample_size(raw);
        if sample_size == self.sample_size {
            return false;
        }
        debug!(
            "refreshTiles:{}. sampleSize changed {} -> {}, scale={}",
            caller, self.sample_size, sample_size, scale
        );
        self.last_sample_size = self.sample_size;
        self.sample_size = sample_size;
        self.observers.sample_size.send_replace(sample_size);
        true
    }

    fn update_image_load_rect(&mut self, visible_rect: IntRect) -> bool {
        if self.last_visible_rect == Some(visible_rect) {
            return false;
        }
        self.last_visible_rect = Some(visible_rect);

        let load_rect = calculate_image_load_rect(
            self.image_info.size,
            self.content_size,
            self.preferred_tile_size,
            visible_rect,
        );
        if load_rect == self.image_load_rect {
            return false;
        }
        self.image_load_rect = load_rect;
        self.observers.image_load_rect.send_replace(load_rect);
        true
    }

    /// Snap a raw sample size onto the pyramid: the coarsest level not
    /// coarser than `raw`, or the finest level if none qualifies.
    fn resolve_sample_size(&self, raw: u32) -> u32 {
        if raw == NO_SUBSAMPLING {
            return NO_SUBSAMPLING;
        }
        let levels = || self.grids.iter().map(|g| g.sample_size);
        levels()
            .filter(|s| *s <= raw)
            .max()
            .or_else(|| levels().min())
            .unwrap_or(NO_SUBSAMPLING)
    }

    /// A level is background when it lies between the previous and the
    /// current sample size, both ends included.
    fn is_background_level(&self, level: u32) -> bool {
        if !self.config.background_tiles
            || self.last_sample_size == NO_SUBSAMPLING
            || self.sample_size == NO_SUBSAMPLING
        {
            return false;
        }
        let low = self.last_sample_size.min(self.sample_size);
        let high = self.last_sample_size.max(self.sample_size);
        (low..=high).contains(&level)
    }

    fn grid_index(&self, sample_size: u32) -> Option<usize> {
        if sample_size == NO_SUBSAMPLING {
            return None;
        }
        self.grids.iter().position(|g| g.sample_size == sample_size)
    }

    fn cache_key(&self, src_rect: IntRect, sample_size: u32) -> TileCacheKey {
        TileCacheKey::new(
            Arc::clone(&self.image_key),
            src_rect,
            self.decoder.exif_orientation(),
            sample_size,
        )
    }

    // =========================================================================
    // Load / Free
    // =========================================================================

    /// Returns true if the tile changed state.
    fn load_tile(&mut self, gi: usize, ti: usize, caller: &str) -> bool {
        let (state, src_rect, sample_size) = {
            let tile = &self.grids[gi].tiles[ti];
            (tile.state(), tile.src_rect, tile.sample_size)
        };
        // Failed tiles are retried only after they have been freed
        if state != TileState::None {
            return false;
        }

        if let Some(cache) = &self.cache {
            if let Some(image) = cache.get(&self.cache_key(src_rect, sample_size)) {
                let tile = &mut self.grids[gi].tiles[ti];
                tile.set_image(image, false, &self.config.animation, Instant::now());
                self.stats.cache_hits += 1;
                trace!("loadTile:{}. successful, from memory cache. {}", caller, tile);
                return true;
            }
        }

        let job = self.dispatch_decode(ti, src_rect, sample_size);
        let tile = &mut self.grids[gi].tiles[ti];
        tile.mark_loading(job);
        self.stats.decodes_dispatched += 1;
        trace!("loadTile:{}. started. {}", caller, tile);
        true
    }

    fn dispatch_decode(&mut self, ti: usize, src_rect: IntRect, sample_size: u32) -> LoadJob {
        let job_id = self.next_job_id;
        self.next_job_id += 1;

        let canceled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&canceled);
        let permits = Arc::clone(&self.decode_permits);
        let decoder = Arc::clone(&self.decoder);
        let pool = Arc::clone(&self.pool);
        let completion_tx = self.completion_tx.clone();

        let handle = tokio::spawn(async move {
            let Ok(permit) = permits.acquire_owned().await else {
                return;
            };
            let worker_tx = completion_tx.clone();
            let worker_pool = Arc::clone(&pool);
            // Delivered from the worker, so an abort past this point keeps the buffer
            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let result = if flag.load(Ordering::Acquire) {
                    Err(DecodeError::Canceled)
                } else {
                    decoder.decode(src_rect, sample_size, worker_pool.as_ref())
                };
                deliver(
                    &worker_tx,
                    worker_pool.as_ref(),
                    DecodeCompletion {
                        job_id,
                        sample_size,
                        tile_index: ti,
                        result,
                    },
                );
            })
            .await;

            if let Err(err) = joined {
                deliver(
                    &completion_tx,
                    pool.as_ref(),
                    DecodeCompletion {
                        job_id,
                        sample_size,
                        tile_index: ti,
                        result: Err(DecodeError::Image {
                            message: format!("decode task failed: {}", err),
                        }),
                    },
                );
            }
        });

        LoadJob::new(job_id, canceled, handle)
    }

    /// Returns true if the tile changed state.
    fn free_tile(&mut self, gi: usize, ti: usize, caller: &str) -> bool {
        let reuse = self.config.buffer_reuse;
        let tile = &mut self.grids[gi].tiles[ti];
        if tile.state() == TileState::None {
            return false;
        }
        if let Some(job) = tile.take_job() {
            job.cancel();
        }
        if let Some(image) = tile.take_image() {
            if reuse {
                image.release(Arc::clone(&self.pool), "tile freed");
            }
        }
        tile.mark_none();
        self.stats.freed += 1;
        trace!("freeTile:{}. {}", caller, tile);
        true
    }

    fn free_all_tiles(&mut self, caller: &str) -> usize {
        let mut freed = 0;
        for gi in 0..self.grids.len() {
            for ti in 0..self.grids[gi].tiles.len() {
                if self.free_tile(gi, ti, caller) {
                    freed += 1;
                }
            }
        }
        freed
    }

    // =========================================================================
    // Decode Completions
    // =========================================================================

    /// Apply a finished decode, or discard it if the tile moved on.
    pub(crate) fn handle_completion(&mut self, completion: DecodeCompletion) {
        let DecodeCompletion {
            job_id,
            sample_size,
            tile_index,
            result,
        } = completion;

        let current = self.grid_index(sample_size).filter(|gi| {
            self.grids[*gi].tiles.get(tile_index).is_some_and(|tile| {
                tile.state() == TileState::Loading && tile.job_id() == Some(job_id)
            })
        });
        let Some(gi) = current else {
            self.stats.stale_results += 1;
            if let Ok(buffer) = result {
                self.pool.free(buffer, "stale decode");
            }
            trace!("loadTile. discarded stale result of job {}", job_id);
            return;
        };

        let now = Instant::now();
        match result {
            Ok(buffer) => {
                let src_rect = self.grids[gi].tiles[tile_index].src_rect;
                let image = match &self.cache {
                    Some(cache) => cache.put(
                        self.cache_key(src_rect, sample_size),
                        buffer,
                        self.config.buffer_reuse,
                    ),
                    None => TileImage::new(buffer),
                };
                let tile = &mut self.grids[gi].tiles[tile_index];
                tile.take_job();
                tile.set_image(image, true, &self.config.animation, now);
                self.stats.decoded += 1;
                trace!("loadTile. successful. {}", tile);
            }
            Err(DecodeError::Canceled) => {
                let tile = &mut self.grids[gi].tiles[tile_index];
                tile.mark_error();
                debug!("loadTile. canceled. {}", tile);
            }
            Err(err) => {
                let tile = &mut self.grids[gi].tiles[tile_index];
                tile.mark_error();
                self.stats.failed += 1;
                warn!("loadTile. failed, {}. {}", err, tile);
            }
        }
        self.publish_snapshots(now);
    }

    /// Wait for and apply completions until no tile is loading.
    ///
    /// Returns immediately if a [`super::TileService`] owns the completion
    /// channel.
    pub async fn wait_for_idle(&mut self) {
        while self.has_loading_tiles() {
            let Some(rx) = self.completion_rx.as_mut() else {
                return;
            };
            let next = rx.recv().await;
            match next {
                Some(completion) => self.handle_completion(completion),
                None => return,
            }
        }
    }

    /// Apply every completion already received, without waiting.
    pub fn process_pending_completions(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let next = match self.completion_rx.as_mut() {
                Some(rx) => rx.try_recv().ok(),
                None => None,
            };
            let Some(completion) = next else {
                break;
            };
            self.handle_completion(completion);
            applied += 1;
        }
        applied
    }

    pub(crate) fn take_completion_receiver(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<DecodeCompletion>> {
        self.completion_rx.take()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Advance animations to `now` and republish.
    ///
    /// Returns true while another frame is needed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.animating {
            return false;
        }
        self.publish_snapshots(now);
        self.animating
    }

    fn publish_snapshots(&mut self, now: Instant) {
        let load_rect = self.image_load_rect;
        let current = self.sample_size;

        let mut foreground = Vec::new();
        let mut foreground_complete = true;
        let mut animating = false;
        if let Some(gi) = self.grid_index(current) {
            for tile in self.grids[gi].tiles.iter_mut() {
                if tile.update_animation(now) {
                    animating = true;
                }
                if tile.src_rect.overlaps(&load_rect) {
                    if tile.state() != TileState::Loaded {
                        foreground_complete = false;
                    }
                    foreground.push(tile.snapshot());
                }
            }
        }

        let mut background = Vec::new();
        if foreground_complete && !animating {
            let mut freed = 0;
            for gi in 0..self.grids.len() {
                if self.grids[gi].sample_size == current {
                    continue;
                }
                for ti in 0..self.grids[gi].tiles.len() {
                    if self.free_tile(gi, ti, "publishSnapshots") {
                        freed += 1;
                    }
                }
            }
            if freed > 0 {
                debug!(
                    "publishSnapshots. foreground complete, freed {} background tiles",
                    freed
                );
            }
        } else {
            // Coarsest first, so finer levels paint on top
            for grid in self.grids.iter_mut().filter(|g| g.sample_size != current) {
                for tile in grid.tiles.iter_mut() {
                    if tile.update_animation(now) {
                        animating = true;
                    }
                    if tile.state() == TileState::Loaded && tile.src_rect.overlaps(&load_rect) {
                        background.push(tile.snapshot());
                    }
                }
            }
        }

        self.animating = animating;
        self.observers.foreground_tiles.send_replace(foreground);
        self.observers.background_tiles.send_replace(background);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop animating and free every tile. Idempotent.
    pub fn clean(&mut self, caller: &str) {
        let freed = self.free_all_tiles(caller);
        self.animating = false;
        self.last_scale = None;
        self.last_visible_rect = None;
        self.sample_size = NO_SUBSAMPLING;
        self.last_sample_size = NO_SUBSAMPLING;
        self.image_load_rect = IntRect::ZERO;

        self.observers.sample_size.send_replace(NO_SUBSAMPLING);
        self.observers.image_load_rect.send_replace(IntRect::ZERO);
        self.observers.foreground_tiles.send_replace(Vec::new());
        self.observers.background_tiles.send_replace(Vec::new());
        debug!("clean:{}. freed {} tiles. {}", caller, freed, self);
    }

    /// Clean up and close the decoder. Further refreshes return `Closed`.
    pub fn close(&mut self, caller: &str) {
        if self.closed {
            return;
        }
        self.clean(caller);
        self.decoder.close();
        self.closed = true;
        self.observers.ready.send_replace(false);
        debug!("close:{}. {}", caller, self);
    }
}

impl fmt::Display for TileManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TileManager(image='{}', imageSize={}, contentSize={}, preferredTileSize={}, sampleSize={}, loadRect={})",
            self.image_key,
            self.image_info.size,
            self.content_size,
            self.preferred_tile_size,
            self.sample_size,
            self.image_load_rect
        )
    }
}

impl Drop for TileManager {
    fn drop(&mut self) {
        for tile in self.grids.iter_mut().flat_map(|g| g.tiles.iter_mut()) {
            if let Some(job) = tile.take_job() {
                job.cancel();
            }
        }
    }
}
