//! Region decoder built on the `image` crate.
//!
//! The `image` crate has no native region decoding, so the whole image is
//! decoded once in [`RegionDecoder::prepare`] and regions are box-filtered out
//! of that bitmap. Decoders created by one factory for the same key share that
//! bitmap. This keeps the engine exercisable end to end without a platform
//! decoder.

use std::collections::HashMap;
use std::io::BufReader;
use std::sync::{Arc, Weak};

use image::{ImageFormat, ImageReader, Rgba, RgbaImage};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{DecodeError, IoError};
use crate::geometry::{IntRect, IntSize};
use crate::tile::BufferReusePool;

use super::{ImageInfo, RegionDecoder, RegionDecoderFactory, SourceStream};

fn image_error(err: image::ImageError) -> DecodeError {
    DecodeError::Image {
        message: err.to_string(),
    }
}

/// Fully decoded bitmaps by source key, alive while any decoder holds one.
type SharedBitmaps = Arc<Mutex<HashMap<String, Weak<RgbaImage>>>>;

/// Factory for [`ImageRegionDecoder`]. Supports JPEG and PNG.
#[derive(Debug, Clone, Default)]
pub struct ImageRegionDecoderFactory {
    bitmaps: SharedBitmaps,
}

impl ImageRegionDecoderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn create_decoder(
        &self,
        key: &str,
        stream: Box<dyn SourceStream>,
        image_info: &ImageInfo,
    ) -> ImageRegionDecoder {
        ImageRegionDecoder {
            key: key.to_string(),
            image_info: image_info.clone(),
            stream: Some(stream),
            bitmap: None,
            shared: Some(Arc::clone(&self.bitmaps)),
            closed: false,
        }
    }
}

impl RegionDecoderFactory for ImageRegionDecoderFactory {
    fn check_support(&self, mime_type: &str) -> Option<bool> {
        ImageFormat::from_mime_type(mime_type)
            .map(|format| matches!(format, ImageFormat::Jpeg | ImageFormat::Png))
    }

    fn decode_image_info(&self, stream: Box<dyn SourceStream>) -> Result<ImageInfo, DecodeError> {
        let reader = ImageReader::new(BufReader::new(stream))
            .with_guessed_format()
            .map_err(|e| DecodeError::Io(IoError::from(e)))?;

        let format = reader.format().ok_or_else(|| DecodeError::Image {
            message: "unrecognized image format".to_string(),
        })?;

        let (width, height) = reader.into_dimensions().map_err(image_error)?;
        Ok(ImageInfo::new(
            IntSize::new(width, height),
            format.to_mime_type(),
        ))
    }

    fn create(
        &self,
        key: &str,
        stream: Box<dyn SourceStream>,
        image_info: &ImageInfo,
    ) -> Result<Box<dyn RegionDecoder>, DecodeError> {
        Ok(Box::new(self.create_decoder(key, stream, image_info)))
    }
}

/// Region decoder that keeps the fully decoded image in memory.
pub struct ImageRegionDecoder {
    key: String,
    image_info: ImageInfo,
    stream: Option<Box<dyn SourceStream>>,
    bitmap: Option<Arc<RgbaImage>>,
    shared: Option<SharedBitmaps>,
    closed: bool,
}

impl ImageRegionDecoder {
    pub fn new(key: impl Into<String>, stream: Box<dyn SourceStream>, image_info: ImageInfo) -> Self {
        Self {
            key: key.into(),
            image_info,
            stream: Some(stream),
            bitmap: None,
            shared: None,
            closed: false,
        }
    }

    fn decode_full(&mut self) -> Result<RgbaImage, DecodeError> {
        let stream = self.stream.take().ok_or(DecodeError::Closed)?;
        let decoded = ImageReader::new(BufReader::new(stream))
            .with_guessed_format()
            .map_err(|e| DecodeError::Io(IoError::from(e)))?
            .decode()
            .map_err(image_error)?
            .to_rgba8();
        debug!(
            "Prepared region decoder for {}: {}x{}",
            self.key,
            decoded.width(),
            decoded.height()
        );
        Ok(decoded)
    }
}

impl RegionDecoder for ImageRegionDecoder {
    fn image_info(&self) -> &ImageInfo {
        &self.image_info
    }

    fn prepare(&mut self) -> Result<(), DecodeError> {
        if self.closed {
            return Err(DecodeError::Closed);
        }
        if self.bitmap.is_some() {
            return Ok(());
        }
        let Some(shared) = self.shared.clone() else {
            self.bitmap = Some(Arc::new(self.decode_full()?));
            return Ok(());
        };

        // Held across the decode so concurrent prepares of one key decode once
        let mut bitmaps = shared.lock();
        if let Some(bitmap) = bitmaps.get(&self.key).and_then(Weak::upgrade) {
            self.stream = None;
            self.bitmap = Some(bitmap);
            return Ok(());
        }
        let bitmap = Arc::new(self.decode_full()?);
        bitmaps.retain(|_, weak| weak.strong_count() > 0);
        bitmaps.insert(self.key.clone(), Arc::downgrade(&bitmap));
        self.bitmap = Some(bitmap);
        Ok(())
    }

    fn decode_region(
        &mut self,
        _key: &str,
        region: IntRect,
        sample_size: u32,
        pool: &dyn BufferReusePool,
    ) -> Result<RgbaImage, DecodeError> {
        if self.closed {
            return Err(DecodeError::Closed);
        }
        if self.bitmap.is_none() {
            self.prepare()?;
        }
        let bitmap = self.bitmap.as_ref().ok_or(DecodeError::Closed)?;

        let bounds = IntRect::new(0, 0, bitmap.width() as i32, bitmap.height() as i32);
        if region.is_empty() || !bounds.contains(&region) || sample_size == 0 {
            return Err(DecodeError::InvalidRegion {
                region: region.to_string(),
                width: bitmap.width(),
                height: bitmap.height(),
            });
        }

        let out_size = IntSize::new(
            (region.width() as u32).div_ceil(sample_size),
            (region.height() as u32).div_ceil(sample_size),
        );
        let mut out = pool
            .take(out_size)
            .unwrap_or_else(|| RgbaImage::new(out_size.width, out_size.height));

        let left = region.left as u32;
        let top = region.top as u32;
        let right = region.right as u32;
        let bottom = region.bottom as u32;

        for oy in 0..out_size.height {
            let y0 = top + oy * sample_size;
            let y1 = (y0 + sample_size).min(bottom);
            for ox in 0..out_size.width {
                let x0 = left + ox * sample_size;
                let x1 = (x0 + sample_size).min(right);

                let mut sum = [0u32; 4];
                for y in y0..y1 {
                    for x in x0..x1 {
                        let px = bitmap.get_pixel(x, y);
                        for (acc, channel) in sum.iter_mut().zip(px.0) {
                            *acc += channel as u32;
                        }
                    }
                }
                let count = (x1 - x0) * (y1 - y0);
                out.put_pixel(ox, oy, Rgba(sum.map(|c| (c / count) as u8)));
            }
        }

        Ok(out)
    }

    fn close(&mut self) {
        self.closed = true;
        self.bitmap = None;
        self.stream = None;
    }
}
