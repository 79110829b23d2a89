//! Subsampling engine: entry point tying an image to a tile service.
//!
//! Building a pyramid goes through three checks before any tile exists:
//!
//! ```text
//!   source ─▶ accept? ─▶ header ─▶ mime supported? ─▶ thumbnail valid?
//!                                                         │
//!                                                         ▼
//!                                  TileDecoder ─▶ TileManager ─▶ TileService
//! ```
//!
//! Failures of the first checks are "skippable": the caller should keep
//! showing its base thumbnail without subsampling.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::TileConfig;
use crate::error::{DecodeError, SubsamplingError};
use crate::geometry::IntSize;
use crate::source::{ImageInfo, ImageSource, RegionDecoderFactory};
use crate::tile::{
    BufferReusePool, TileCache, TileDecoder, TileImagePool, TileManager, TileService,
    TileServiceHandle,
};

/// Validate a thumbnail of `content_size` against the original image.
///
/// # Errors
///
/// - [`SubsamplingError::EmptyContentSize`] if the thumbnail has no area
/// - [`SubsamplingError::ThumbnailNotSmaller`] if the thumbnail already
///   carries the full resolution
/// - [`SubsamplingError::AspectRatioMismatch`] if scaling the image down to
///   the thumbnail is off by more than one pixel on either axis
pub fn check_subsampling(
    image_info: &ImageInfo,
    content_size: IntSize,
) -> Result<(), SubsamplingError> {
    let image_size = image_info.size;
    if content_size.is_empty() {
        return Err(SubsamplingError::EmptyContentSize {
            width: content_size.width,
            height: content_size.height,
        });
    }
    if content_size.width >= image_size.width && content_size.height >= image_size.height {
        return Err(SubsamplingError::ThumbnailNotSmaller {
            image: image_size.to_string(),
            thumbnail: content_size.to_string(),
        });
    }

    let scale = (image_size.width as f64 / content_size.width as f64)
        .max(image_size.height as f64 / content_size.height as f64);
    let expected_width = (image_size.width as f64 / scale).round();
    let expected_height = (image_size.height as f64 / scale).round();
    if (expected_width - content_size.width as f64).abs() > 1.0
        || (expected_height - content_size.height as f64).abs() > 1.0
    {
        return Err(SubsamplingError::AspectRatioMismatch {
            image: image_size.to_string(),
            thumbnail: content_size.to_string(),
        });
    }
    Ok(())
}

/// Validate the source and build a prepared [`TileDecoder`] for it.
///
/// Runs blocking header reads and decoder preparation on tokio's blocking
/// pool.
pub async fn create_tile_decoder(
    source: Arc<dyn ImageSource>,
    factory: Arc<dyn RegionDecoderFactory>,
    content_size: IntSize,
) -> Result<TileDecoder, SubsamplingError> {
    let key = source.key().to_string();
    let joined = tokio::task::spawn_blocking(move || {
        create_tile_decoder_blocking(source, factory, content_size)
    })
    .await;
    match joined {
        Ok(result) => result,
        Err(err) => {
            warn!("createTileDecoder. task failed for {}: {}", key, err);
            Err(SubsamplingError::DecoderCreation(DecodeError::Image {
                message: err.to_string(),
            }))
        }
    }
}

fn create_tile_decoder_blocking(
    source: Arc<dyn ImageSource>,
    factory: Arc<dyn RegionDecoderFactory>,
    content_size: IntSize,
) -> Result<TileDecoder, SubsamplingError> {
    if !factory.accept(source.as_ref()) {
        return Err(SubsamplingError::UnsupportedMimeType {
            mime_type: "unknown".to_string(),
        });
    }

    let image_info = factory.decode_image_info(source.open_source()?)?;
    if factory.check_support(&image_info.mime_type) == Some(false) {
        return Err(SubsamplingError::UnsupportedMimeType {
            mime_type: image_info.mime_type,
        });
    }
    check_subsampling(&image_info, content_size)?;

    let mut decoder = factory.create(source.key(), source.open_source()?, &image_info)?;
    decoder.prepare()?;
    Ok(TileDecoder::new(source, factory, decoder))
}

// =============================================================================
// Engine
// =============================================================================

/// Holds the current image and its running tile service.
///
/// The cache and buffer pool outlive individual images so tiles survive an
/// image being closed and reopened.
pub struct SubsamplingEngine {
    config: TileConfig,
    factory: Arc<dyn RegionDecoderFactory>,
    cache: Option<Arc<TileCache>>,
    pool: Arc<dyn BufferReusePool>,
    handle: Option<TileServiceHandle>,
    image_info: Option<ImageInfo>,
}

impl SubsamplingEngine {
    /// Create an engine with its own cache and pool, sized by default.
    pub fn new(config: TileConfig, factory: Arc<dyn RegionDecoderFactory>) -> Self {
        let pool: Arc<dyn BufferReusePool> = if config.buffer_reuse {
            Arc::new(TileImagePool::new())
        } else {
            Arc::new(TileImagePool::disabled())
        };
        let cache = config
            .memory_cache
            .then(|| Arc::new(TileCache::new().with_reuse_pool(Arc::clone(&pool))));
        Self::with_shared(config, factory, cache, pool)
    }

    /// Create an engine over a cache and pool shared with other engines.
    pub fn with_shared(
        config: TileConfig,
        factory: Arc<dyn RegionDecoderFactory>,
        cache: Option<Arc<TileCache>>,
        pool: Arc<dyn BufferReusePool>,
    ) -> Self {
        Self {
            config,
            factory,
            cache,
            pool,
            handle: None,
            image_info: None,
        }
    }

    pub fn config(&self) -> &TileConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&Arc<TileCache>> {
        self.cache.as_ref()
    }

    /// Handle to the running tile service, if an image is set.
    pub fn handle(&self) -> Option<&TileServiceHandle> {
        self.handle.as_ref()
    }

    /// Header of the current image, if one is set.
    pub fn image_info(&self) -> Option<&ImageInfo> {
        self.image_info.as_ref()
    }

    /// Replace the current image and build its pyramid.
    ///
    /// The previous image, if any, is closed first. On a skippable error the
    /// engine is left without an image and the caller should keep its base
    /// thumbnail.
    ///
    /// # Arguments
    ///
    /// * `source` - Original image
    /// * `content_size` - Size of the base thumbnail as laid out on screen
    /// * `container_size` - Size of the viewport
    pub async fn set_image(
        &mut self,
        source: Arc<dyn ImageSource>,
        content_size: IntSize,
        container_size: IntSize,
    ) -> Result<TileServiceHandle, SubsamplingError> {
        self.destroy("setImage").await;

        let key = source.key().to_string();
        let decoder = match create_tile_decoder(source, Arc::clone(&self.factory), content_size).await {
            Ok(decoder) => decoder,
            Err(err) if err.is_skipped() => {
                debug!("setImage. subsampling skipped for {}: {}", key, err);
                return Err(err);
            }
            Err(err) => {
                warn!("setImage. failed for {}: {}", key, err);
                return Err(err);
            }
        };

        let image_info = decoder.image_info().clone();
        let manager = TileManager::new(
            Arc::new(decoder),
            content_size,
            container_size,
            self.config.clone(),
            self.cache.clone(),
            Arc::clone(&self.pool),
        );
        info!("setImage. {}", manager);

        let handle = TileService::spawn(manager);
        self.image_info = Some(image_info);
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Close the current image, freeing its tiles. Idempotent.
    pub async fn destroy(&mut self, caller: &str) {
        self.image_info = None;
        if let Some(handle) = self.handle.take() {
            handle.close(caller).await;
        }
    }
}
