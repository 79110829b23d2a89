//! # Subsampling
//!
//! A tile engine for viewing images far larger than the screen.
//!
//! The caller shows a small base thumbnail of the image. As the user zooms
//! in, this crate decodes just the regions of the original that cover the
//! viewport, at the coarsest resolution that still looks sharp, and hands
//! back paint-ready tile snapshots.
//!
//! ## Features
//!
//! - **Tile pyramid**: One grid per power-of-two sample size, planned once per image
//! - **Viewport-driven loading**: Only tiles near the visible rect are decoded
//! - **Background tiles**: The previous level stays visible while the new one loads
//! - **Memory cache and buffer reuse**: Decoded tiles survive being freed, and
//!   their pixel buffers are recycled once evicted
//! - **Fade-in animation**: Freshly decoded tiles fade in over a short duration
//!
//! ## Architecture
//!
//! - [`source`] - Image source and region decoder traits, plus an `image`-crate decoder
//! - [`tile`] - Grid planning, tile manager, cache, pool and the tile service task
//! - [`subsampling`] - Engine that validates an image and starts its tile service
//! - [`config`] - Engine knobs and the demo CLI
//! - [`geometry`] - Integer sizes, offsets and rectangles
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use subsampling::{
//!     FileImageSource, ImageRegionDecoderFactory, IntRect, IntSize, SubsamplingEngine,
//!     TileConfig, TransformKind,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let factory = Arc::new(ImageRegionDecoderFactory::new());
//!     let mut engine = SubsamplingEngine::new(TileConfig::default(), factory);
//!
//!     let source = Arc::new(FileImageSource::new("large.jpg"));
//!     let content = IntSize::new(512, 1024);
//!     let handle = engine.set_image(source, content, content).await.unwrap();
//!
//!     let status = handle
//!         .refresh_tiles(3.0, IntRect::new(100, 200, 270, 541), 0, TransformKind::empty(), "example")
//!         .await;
//!     println!("refresh: {:?}", status);
//! }
//! ```

pub mod config;
pub mod error;
pub mod geometry;
pub mod source;
pub mod subsampling;
pub mod tile;

// Re-export commonly used types
pub use config::{Config, TileAnimationSpec, TileConfig, TransformKind};
pub use error::{DecodeError, IoError, SubsamplingError};
pub use geometry::{IntOffset, IntRect, IntSize};
pub use source::{
    BytesImageSource, FileImageSource, ImageInfo, ImageRegionDecoder, ImageRegionDecoderFactory,
    ImageSource, RegionDecoder, RegionDecoderFactory, SourceStream,
};
pub use subsampling::{check_subsampling, create_tile_decoder, SubsamplingEngine};
pub use tile::{
    BufferReusePool, RefreshStatus, Tile, TileCache, TileCacheKey, TileImage, TileImagePool,
    TileManager, TileReceivers, TileService, TileServiceHandle, TileSnapshot, TileState,
    TileStats, DEFAULT_TILE_CACHE_CAPACITY,
};
