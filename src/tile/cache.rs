//! Memory cache for decoded tiles.
//!
//! This module provides an LRU cache for decoded tile bitmaps, so a tile that
//! scrolls out of the load rect and back in is reattached without another
//! region decode.
//!
//! # Cache Key
//!
//! Tiles are cached by a composite key including:
//! - Image source key
//! - Source rectangle in image pixels
//! - EXIF orientation
//! - Sample size
//!
//! # Size-Based Eviction
//!
//! The cache tracks the total size of cached bitmaps in bytes and evicts
//! least-recently-used entries when the capacity is exceeded. An evicted
//! bitmap goes to the reuse pool only once no tile displays it anymore.

use std::num::NonZeroUsize;
use std::sync::Arc;

use image::RgbaImage;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::geometry::IntRect;

use super::image::TileImage;
use super::pool::BufferReusePool;

/// Default cache capacity: 100MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 100 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 10_000;

// =============================================================================
// Cache Key
// =============================================================================

/// Cache key for decoded tiles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileCacheKey {
    /// Image source key
    pub image_key: Arc<str>,

    /// Tile rectangle in image pixels
    pub src_rect: IntRect,

    /// EXIF orientation the region was decoded with
    pub orientation: u16,

    /// Downsample factor
    pub sample_size: u32,
}

impl TileCacheKey {
    /// Create a new cache key.
    pub fn new(
        image_key: impl Into<Arc<str>>,
        src_rect: IntRect,
        orientation: u16,
        sample_size: u32,
    ) -> Self {
        Self {
            image_key: image_key.into(),
            src_rect,
            orientation,
            sample_size,
        }
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

struct CacheEntry {
    image: TileImage,
    allow_reuse: bool,
}

struct CacheState {
    entries: LruCache<TileCacheKey, CacheEntry>,
    current_size: usize,
}

/// LRU cache for decoded tiles with size-based capacity.
///
/// # Thread Safety
///
/// The cache is internally synchronized and can be shared via `Arc` between
/// the tile manager and decode workers. All operations are synchronous and
/// cheap; none of them decode.
pub struct TileCache {
    state: Mutex<CacheState>,

    /// Maximum total size in bytes
    max_size: usize,

    /// Receives evicted bitmaps nobody displays anymore
    reuse_pool: Option<Arc<dyn BufferReusePool>>,
}

impl TileCache {
    /// Create a new tile cache with default capacity (100MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create a new tile cache with the specified capacity in bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// Create a new tile cache with specified capacity and maximum entries.
    ///
    /// # Arguments
    ///
    /// * `max_size` - Maximum total size of cached bitmaps in bytes
    /// * `max_entries` - Maximum number of entries in the cache
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(max_entries),
                current_size: 0,
            }),
            max_size,
            reuse_pool: None,
        }
    }

    /// Send evicted bitmaps to `pool` once they are no longer displayed.
    pub fn with_reuse_pool(mut self, pool: Arc<dyn BufferReusePool>) -> Self {
        self.reuse_pool = Some(pool);
        self
    }

    /// Get a tile from the cache.
    ///
    /// The returned handle is tagged `from_cache`. This operation marks the
    /// entry as recently used.
    pub fn get(&self, key: &TileCacheKey) -> Option<TileImage> {
        let mut state = self.state.lock();
        state
            .entries
            .get(key)
            .map(|entry| entry.image.with_from_cache(true))
    }

    /// Check if a tile is in the cache without updating LRU order.
    pub fn contains(&self, key: &TileCacheKey) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Store a decoded bitmap in the cache and return a shared handle to it.
    ///
    /// If the cache is over capacity after insertion, least-recently-used
    /// entries are evicted until the cache is within capacity. If the key
    /// already exists, the old bitmap is replaced.
    ///
    /// `allow_reuse` controls whether the bitmap may go to the reuse pool
    /// when it is eventually evicted.
    pub fn put(&self, key: TileCacheKey, pixels: RgbaImage, allow_reuse: bool) -> TileImage {
        let image = TileImage::new(pixels);
        let data_size = image.byte_count();
        let handle = image.with_from_cache(false);

        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();

            if let Some(old) = state.entries.pop(&key) {
                state.current_size = state.current_size.saturating_sub(old.image.byte_count());
                evicted.push(old);
            }

            if let Some((_, lru)) = state.entries.push(key, CacheEntry { image, allow_reuse }) {
                state.current_size = state.current_size.saturating_sub(lru.image.byte_count());
                evicted.push(lru);
            }
            state.current_size += data_size;

            // Evict entries until we're under capacity, never the one just added
            while state.current_size > self.max_size && state.entries.len() > 1 {
                match state.entries.pop_lru() {
                    Some((_, entry)) => {
                        state.current_size =
                            state.current_size.saturating_sub(entry.image.byte_count());
                        evicted.push(entry);
                    }
                    None => break,
                }
            }
        }

        for entry in evicted {
            self.recycle(entry, "evicted");
        }

        handle
    }

    /// Remove a tile from the cache.
    ///
    /// Returns the cached handle if it existed, `None` otherwise.
    pub fn remove(&self, key: &TileCacheKey) -> Option<TileImage> {
        let mut state = self.state.lock();
        let entry = state.entries.pop(key)?;
        state.current_size = state.current_size.saturating_sub(entry.image.byte_count());
        Some(entry.image)
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        let drained: Vec<CacheEntry> = {
            let mut state = self.state.lock();
            state.current_size = 0;
            let mut drained = Vec::with_capacity(state.entries.len());
            while let Some((_, entry)) = state.entries.pop_lru() {
                drained.push(entry);
            }
            drained
        };
        for entry in drained {
            self.recycle(entry, "cleared");
        }
    }

    /// Get the current number of cached tiles.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Get the current total size of cached bitmaps in bytes.
    pub fn size(&self) -> usize {
        self.state.lock().current_size
    }

    /// Get the maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    fn recycle(&self, entry: CacheEntry, reason: &'static str) {
        match (&self.reuse_pool, entry.allow_reuse) {
            (Some(pool), true) => {
                if !entry.image.release(Arc::clone(pool), reason) {
                    trace!("Evicted bitmap still displayed, pooled once the last holder drops it");
                }
            }
            _ => drop(entry),
        }
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
