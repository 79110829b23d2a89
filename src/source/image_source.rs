use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::IoError;

/// A seekable byte stream over the original image.
pub trait SourceStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> SourceStream for T {}

/// Opaque provider of the original image bytes.
///
/// The key must be stable for the lifetime of the image: it is part of every
/// tile cache key, so two sources with the same key must yield the same bytes.
pub trait ImageSource: Send + Sync {
    /// Stable identifier used for cache keys and logging.
    fn key(&self) -> &str;

    /// Open a fresh stream positioned at the start of the image.
    ///
    /// May be called more than once; each region decoder owns its own stream.
    fn open_source(&self) -> Result<Box<dyn SourceStream>, IoError>;
}

// =============================================================================
// File Source
// =============================================================================

/// Image source backed by a file on disk.
#[derive(Debug, Clone)]
pub struct FileImageSource {
    path: PathBuf,
    key: String,
}

impl FileImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = format!("file://{}", path.display());
        Self { path, key }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageSource for FileImageSource {
    fn key(&self) -> &str {
        &self.key
    }

    fn open_source(&self) -> Result<Box<dyn SourceStream>, IoError> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

// =============================================================================
// In-Memory Source
// =============================================================================

/// Image source backed by bytes already in memory.
#[derive(Debug, Clone)]
pub struct BytesImageSource {
    key: String,
    data: Bytes,
}

impl BytesImageSource {
    pub fn new(key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ImageSource for BytesImageSource {
    fn key(&self) -> &str {
        &self.key
    }

    fn open_source(&self) -> Result<Box<dyn SourceStream>, IoError> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }
}
