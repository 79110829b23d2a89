//! Image source and region decoding collaborators.
//!
//! The tile engine never decodes pixels itself. It reads image bytes through
//! an [`ImageSource`] and delegates region decoding to a [`RegionDecoder`]
//! produced by a [`RegionDecoderFactory`].
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              TileDecoder                │
//! │     (pool of prepared region decoders)  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │         RegionDecoderFactory            │
//! │  (check_support, image info, create)    │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             ImageSource                 │
//! │  (stable key, seekable byte stream)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! [`ImageRegionDecoderFactory`] is a reference implementation built on the
//! `image` crate. It is suitable for moderately sized JPEG/PNG files and for
//! tests; platform decoders with true region support plug in through the
//! same traits.

mod decoder;
mod image_decoder;
mod image_source;

use serde::Serialize;

use crate::geometry::IntSize;

pub use decoder::{RegionDecoder, RegionDecoderFactory};
pub use image_decoder::{ImageRegionDecoder, ImageRegionDecoderFactory};
pub use image_source::{BytesImageSource, FileImageSource, ImageSource, SourceStream};

/// Header information of the original image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    /// Full-resolution size in pixels
    pub size: IntSize,

    /// MIME type, e.g. `image/jpeg`
    pub mime_type: String,
}

impl ImageInfo {
    pub fn new(size: IntSize, mime_type: impl Into<String>) -> Self {
        Self {
            size,
            mime_type: mime_type.into(),
        }
    }
}
