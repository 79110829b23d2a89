//! Pool of region decoders for one image.
//!
//! Region decoders are not thread-safe, so each concurrent decode borrows its
//! own instance. Instances are created lazily through the factory and parked
//! again after use, so at most `decode_parallelism` of them ever exist.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::DecodeError;
use crate::geometry::IntRect;
use crate::source::{ImageInfo, ImageSource, RegionDecoder, RegionDecoderFactory};

use super::pool::BufferReusePool;

/// Decodes tiles of one image through a pool of [`RegionDecoder`]s.
pub struct TileDecoder {
    source: Arc<dyn ImageSource>,
    factory: Arc<dyn RegionDecoderFactory>,
    image_info: ImageInfo,
    exif_orientation: u16,
    idle: Mutex<Vec<Box<dyn RegionDecoder>>>,
    closed: AtomicBool,
}

impl TileDecoder {
    /// Wrap an already prepared decoder. More are created on demand.
    pub fn new(
        source: Arc<dyn ImageSource>,
        factory: Arc<dyn RegionDecoderFactory>,
        first: Box<dyn RegionDecoder>,
    ) -> Self {
        let image_info = first.image_info().clone();
        let exif_orientation = first.exif_orientation();
        Self {
            source,
            factory,
            image_info,
            exif_orientation,
            idle: Mutex::new(vec![first]),
            closed: AtomicBool::new(false),
        }
    }

    pub fn image_info(&self) -> &ImageInfo {
        &self.image_info
    }

    pub fn image_key(&self) -> &str {
        self.source.key()
    }

    pub fn exif_orientation(&self) -> u16 {
        self.exif_orientation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Decode one tile. Blocking; call from a worker thread.
    pub fn decode(
        &self,
        src_rect: IntRect,
        sample_size: u32,
        pool: &dyn BufferReusePool,
    ) -> Result<RgbaImage, DecodeError> {
        let mut decoder = self.acquire()?;
        let result = decoder.decode_region(self.source.key(), src_rect, sample_size, pool);
        self.recycle(decoder);
        result
    }

    /// Close every idle decoder. Busy decoders are closed when they return.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let idle: Vec<Box<dyn RegionDecoder>> = self.idle.lock().drain(..).collect();
        debug!(
            "Closing {} region decoder(s) for {}",
            idle.len(),
            self.source.key()
        );
        for mut decoder in idle {
            decoder.close();
        }
    }

    fn acquire(&self) -> Result<Box<dyn RegionDecoder>, DecodeError> {
        if self.is_closed() {
            return Err(DecodeError::Closed);
        }
        if let Some(decoder) = self.idle.lock().pop() {
            return Ok(decoder);
        }

        debug!("Creating additional region decoder for {}", self.source.key());
        let stream = self.source.open_source()?;
        let mut decoder = self
            .factory
            .create(self.source.key(), stream, &self.image_info)?;
        decoder.prepare()?;
        Ok(decoder)
    }

    fn recycle(&self, mut decoder: Box<dyn RegionDecoder>) {
        let mut idle = self.idle.lock();
        if self.is_closed() {
            drop(idle);
            decoder.close();
            return;
        }
        idle.push(decoder);
    }
}

impl Drop for TileDecoder {
    fn drop(&mut self) {
        self.close();
    }
}
