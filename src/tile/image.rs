//! Shared tile bitmaps.
//!
//! A decoded tile can be held at once by its tile, the memory cache and any
//! published snapshot. The pixels go back to the reuse pool when the last of
//! those handles is dropped, never earlier.

use std::fmt;
use std::sync::Arc;

use image::RgbaImage;
use parking_lot::Mutex;

use super::pool::BufferReusePool;

/// Pixels plus where they go once nobody holds them.
struct SharedPixels {
    pixels: RgbaImage,
    recycle: Mutex<Option<(Arc<dyn BufferReusePool>, &'static str)>>,
}

impl Drop for SharedPixels {
    fn drop(&mut self) {
        if let Some((pool, reason)) = self.recycle.get_mut().take() {
            let pixels = std::mem::replace(&mut self.pixels, RgbaImage::new(0, 0));
            pool.free(pixels, reason);
        }
    }
}

/// Handle to a decoded tile bitmap.
///
/// Cloning shares the pixels. Once any holder has called
/// [`TileImage::release`], the buffer is handed to the reuse pool when the
/// last handle drops, so a pooled buffer can never still be visible.
#[derive(Clone)]
pub struct TileImage {
    pixels: Arc<SharedPixels>,
    from_cache: bool,
}

impl TileImage {
    /// Wrap a freshly decoded buffer that is not held by any cache.
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(SharedPixels {
                pixels,
                recycle: Mutex::new(None),
            }),
            from_cache: false,
        }
    }

    /// Same pixels, tagged with where this handle came from.
    pub(crate) fn with_from_cache(&self, from_cache: bool) -> Self {
        Self {
            pixels: Arc::clone(&self.pixels),
            from_cache,
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.pixels.height()
    }

    /// Size of the pixel data in bytes.
    pub fn byte_count(&self) -> usize {
        self.pixels.pixels.as_raw().len()
    }

    /// Whether this handle was served from the memory cache.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// True when both handles point at the same pixels.
    pub fn ptr_eq(&self, other: &TileImage) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    /// Drop this handle and mark the buffer for `pool`.
    ///
    /// Returns true when this was the last handle and the buffer went to the
    /// pool right away. Otherwise the last remaining holder recycles it on
    /// drop.
    pub fn release(self, pool: Arc<dyn BufferReusePool>, reason: &'static str) -> bool {
        *self.pixels.recycle.lock() = Some((pool, reason));
        Arc::into_inner(self.pixels).is_some()
    }
}

impl fmt::Debug for TileImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("from_cache", &self.from_cache)
            .finish()
    }
}
