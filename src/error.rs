use thiserror::Error;

/// I/O errors that can occur when opening or reading an image source
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// The source does not exist
    #[error("Image source not found: {0}")]
    NotFound(String),

    /// Reading the source failed
    #[error("Read error: {0}")]
    Read(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::Read(err.to_string()),
        }
    }
}

/// Errors raised by a region decoder
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// I/O error while reading the source stream
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// The underlying image codec rejected the data
    #[error("Image decode failed: {message}")]
    Image { message: String },

    /// Requested region is empty or lies outside the image
    #[error("Invalid region {region} for image of size {width}x{height}")]
    InvalidRegion {
        region: String,
        width: u32,
        height: u32,
    },

    /// The decoder has already been closed
    #[error("Decoder is closed")]
    Closed,

    /// The decode job was canceled before it produced a result
    #[error("Decode canceled")]
    Canceled,
}

/// Construction-time errors reported while building the tile pyramid.
///
/// Skippable errors mean the caller should quietly render the base thumbnail
/// without subsampling. The rest are worth surfacing as failures.
#[derive(Debug, Clone, Error)]
pub enum SubsamplingError {
    /// No decoder factory accepts the image type
    #[error("Unsupported image type: {mime_type}")]
    UnsupportedMimeType { mime_type: String },

    /// Content size is empty so there is nothing to subsample into
    #[error("Content size is empty: {width}x{height}")]
    EmptyContentSize { width: u32, height: u32 },

    /// The thumbnail already carries the full resolution
    #[error("Thumbnail size {thumbnail} is greater than or equal to image size {image}")]
    ThumbnailNotSmaller { image: String, thumbnail: String },

    /// The thumbnail was not produced from this image
    #[error("Thumbnail aspect ratio {thumbnail} does not match image size {image}")]
    AspectRatioMismatch { image: String, thumbnail: String },

    /// The region decoder could not be constructed
    #[error("Failed to create region decoder: {0}")]
    DecoderCreation(#[from] DecodeError),

    /// The image source could not be opened
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl SubsamplingError {
    /// Whether the caller should silently fall back to the base thumbnail.
    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            SubsamplingError::UnsupportedMimeType { .. }
                | SubsamplingError::EmptyContentSize { .. }
                | SubsamplingError::ThumbnailNotSmaller { .. }
        )
    }

    /// Stable negative status code, one per variant.
    pub fn code(&self) -> i32 {
        match self {
            SubsamplingError::UnsupportedMimeType { .. } => -1,
            SubsamplingError::EmptyContentSize { .. } => -2,
            SubsamplingError::ThumbnailNotSmaller { .. } => -3,
            SubsamplingError::AspectRatioMismatch { .. } => -4,
            SubsamplingError::DecoderCreation(_) => -5,
            SubsamplingError::Io(_) => -6,
        }
    }
}
