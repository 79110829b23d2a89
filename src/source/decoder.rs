//! Region decoding seam.
//!
//! A [`RegionDecoderFactory`] opens an image and hands out [`RegionDecoder`]s,
//! each of which decodes downsampled sub-rectangles on a blocking thread.

use image::RgbaImage;

use crate::error::DecodeError;
use crate::geometry::IntRect;
use crate::tile::BufferReusePool;

use super::{ImageInfo, ImageSource, SourceStream};

/// Decodes arbitrary sub-rectangles of one image.
///
/// A region decoder is not required to be thread-safe; the engine never calls
/// one decoder from two threads at once. Parallel decodes use separate
/// instances.
pub trait RegionDecoder: Send {
    /// Header information of the image this decoder reads.
    fn image_info(&self) -> &ImageInfo;

    /// EXIF orientation tag of the image (1 = normal).
    fn exif_orientation(&self) -> u16 {
        1
    }

    /// Perform any expensive setup before the first region decode.
    fn prepare(&mut self) -> Result<(), DecodeError>;

    /// Decode `region` (image pixels) downsampled by `sample_size`.
    ///
    /// The output buffer is `ceil(width / sample_size)` by
    /// `ceil(height / sample_size)` pixels. Implementations should take a
    /// buffer of that size from `pool` when one is available.
    fn decode_region(
        &mut self,
        key: &str,
        region: IntRect,
        sample_size: u32,
        pool: &dyn BufferReusePool,
    ) -> Result<RgbaImage, DecodeError>;

    /// Release native resources. Further decodes return [`DecodeError::Closed`].
    fn close(&mut self);
}

/// Creates region decoders for a given image source.
pub trait RegionDecoderFactory: Send + Sync {
    /// Whether this factory can decode `mime_type`.
    ///
    /// `None` means "unknown", in which case construction is attempted anyway.
    fn check_support(&self, mime_type: &str) -> Option<bool>;

    /// Cheap pre-check on the source itself before any bytes are read.
    fn accept(&self, _source: &dyn ImageSource) -> bool {
        true
    }

    /// Read the image header.
    fn decode_image_info(&self, stream: Box<dyn SourceStream>) -> Result<ImageInfo, DecodeError>;

    /// Build a decoder over `stream`.
    fn create(
        &self,
        key: &str,
        stream: Box<dyn SourceStream>,
        image_info: &ImageInfo,
    ) -> Result<Box<dyn RegionDecoder>, DecodeError>;
}
