//! Reuse pool for decoded pixel buffers.
//!
//! Region decodes produce buffers of a handful of distinct sizes (one per
//! sample size, plus edge tiles). Returning released buffers to a pool keyed
//! by pixel dimensions lets the next decode of the same size skip the
//! allocation.

use std::collections::HashMap;

use image::RgbaImage;
use parking_lot::Mutex;
use tracing::trace;

use crate::geometry::IntSize;

/// Default maximum number of buffers kept per pixel size.
pub const DEFAULT_MAX_BUFFERS_PER_SIZE: usize = 8;

/// Default maximum total bytes held by the pool: 32MB.
pub const DEFAULT_MAX_POOL_BYTES: usize = 32 * 1024 * 1024;

/// A sink for pixel buffers that are no longer displayed.
///
/// Must be thread-safe: buffers are freed both from decode worker threads and
/// from the thread that owns the tile manager.
pub trait BufferReusePool: Send + Sync {
    /// Take a buffer of exactly `size`, if one is pooled.
    fn take(&self, size: IntSize) -> Option<RgbaImage>;

    /// Hand a buffer over for reuse. The caller must not touch it again.
    fn free(&self, buffer: RgbaImage, reason: &'static str);
}

/// Size-keyed pool of RGBA buffers.
pub struct TileImagePool {
    buckets: Mutex<PoolBuckets>,
    max_per_size: usize,
    max_bytes: usize,
    enabled: bool,
}

#[derive(Default)]
struct PoolBuckets {
    buffers: HashMap<IntSize, Vec<RgbaImage>>,
    bytes: usize,
}

fn buffer_bytes(buffer: &RgbaImage) -> usize {
    buffer.as_raw().len()
}

impl TileImagePool {
    /// Create a pool with default limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_BUFFERS_PER_SIZE, DEFAULT_MAX_POOL_BYTES)
    }

    /// Create a pool with custom limits.
    ///
    /// # Arguments
    ///
    /// * `max_per_size` - Maximum buffers kept for any one pixel size
    /// * `max_bytes` - Maximum total bytes held across all sizes
    pub fn with_limits(max_per_size: usize, max_bytes: usize) -> Self {
        Self {
            buckets: Mutex::new(PoolBuckets::default()),
            max_per_size,
            max_bytes,
            enabled: true,
        }
    }

    /// A pool that never keeps anything; freed buffers are dropped.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::with_limits(0, 0)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Total number of pooled buffers.
    pub fn pooled_count(&self) -> usize {
        self.buckets.lock().buffers.values().map(Vec::len).sum()
    }

    /// Total bytes held by pooled buffers.
    pub fn pooled_bytes(&self) -> usize {
        self.buckets.lock().bytes
    }

    /// Drop every pooled buffer.
    pub fn clear(&self) {
        let mut buckets = self.buckets.lock();
        buckets.buffers.clear();
        buckets.bytes = 0;
    }
}

impl Default for TileImagePool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferReusePool for TileImagePool {
    fn take(&self, size: IntSize) -> Option<RgbaImage> {
        if !self.enabled {
            return None;
        }
        let mut buckets = self.buckets.lock();
        let buffer = buckets.buffers.get_mut(&size)?.pop()?;
        buckets.bytes = buckets.bytes.saturating_sub(buffer_bytes(&buffer));
        Some(buffer)
    }

    fn free(&self, buffer: RgbaImage, reason: &'static str) {
        if !self.enabled {
            return;
        }
        let size = IntSize::new(buffer.width(), buffer.height());
        let bytes = buffer_bytes(&buffer);

        let mut buckets = self.buckets.lock();
        if buckets.bytes + bytes > self.max_bytes {
            trace!("Pool full, dropping {} buffer ({})", size, reason);
            return;
        }
        let bucket = buckets.buffers.entry(size).or_default();
        if bucket.len() >= self.max_per_size {
            trace!("Pool bucket {} full, dropping buffer ({})", size, reason);
            return;
        }
        bucket.push(buffer);
        buckets.bytes += bytes;
        trace!("Pooled {} buffer ({})", size, reason);
    }
}
