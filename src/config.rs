//! Configuration for the subsampling engine.
//!
//! Two layers live here:
//! - [`TileConfig`]: the knobs the tile engine itself understands (tile size,
//!   paused transforms, background tiles, animation, cache/reuse)
//! - [`Config`]: command-line configuration for the demo binary, parsed with
//!   clap and convertible into a [`TileConfig`]
//!
//! # Environment Variables
//!
//! The demo binary reads every option from an environment variable with the
//! `SUBSAMPLING_` prefix:
//!
//! - `SUBSAMPLING_TILE_SIZE` - Preferred tile edge in pixels (default: half the container)
//! - `SUBSAMPLING_THUMBNAIL_MAX` - Longest edge of the simulated thumbnail (default: 1024)
//! - `SUBSAMPLING_SCALES` - Comma-separated zoom steps (default: 1,2,4,8,16)
//! - `SUBSAMPLING_CACHE_BYTES` - Memory cache capacity (default: 100MB)
//! - `SUBSAMPLING_DECODE_PARALLELISM` - Concurrent region decodes (default: 2)

use std::path::PathBuf;
use std::time::Duration;

use bitflags::bitflags;
use clap::Parser;

use crate::geometry::IntSize;
use crate::tile::DEFAULT_TILE_CACHE_CAPACITY;

// =============================================================================
// Default Values
// =============================================================================

/// Default number of region decodes allowed to run at once.
pub const DEFAULT_DECODE_PARALLELISM: usize = 2;

/// Default fade-in duration for freshly decoded tiles.
pub const DEFAULT_ANIMATION_DURATION: Duration = Duration::from_millis(200);

/// Default interval between animation frames.
pub const DEFAULT_ANIMATION_INTERVAL: Duration = Duration::from_millis(8);

/// Default longest thumbnail edge used by the demo binary.
pub const DEFAULT_THUMBNAIL_MAX: u32 = 1024;

// =============================================================================
// Transform Kinds
// =============================================================================

bitflags! {
    /// Kinds of continuous transform the viewport may be undergoing.
    ///
    /// Passed to `refresh_tiles` so the engine can skip decode work while a
    /// transform listed in [`TileConfig::paused_transforms`] is in progress.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TransformKind: u32 {
        /// Pinch or double-tap zoom
        const SCALE = 1;
        /// Programmatic pan
        const OFFSET = 1 << 1;
        /// Programmatic locate-to-point
        const LOCATE = 1 << 2;
        /// Free drag by the user
        const GESTURE = 1 << 3;
        /// Inertial fling after a drag
        const FLING = 1 << 4;
    }
}

impl TransformKind {
    /// Transforms that pause tiling unless configured otherwise.
    pub const DEFAULT_PAUSED: TransformKind = TransformKind::SCALE
        .union(TransformKind::OFFSET)
        .union(TransformKind::LOCATE);
}

// =============================================================================
// Tile Configuration
// =============================================================================

/// Fade-in animation applied to newly attached tile images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileAnimationSpec {
    /// When false, alpha jumps straight to 255
    pub enabled: bool,

    /// Total fade duration
    pub duration: Duration,

    /// Delay between republished frames while a fade is running
    pub interval: Duration,
}

impl TileAnimationSpec {
    /// Animation switched off.
    pub fn none() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for TileAnimationSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            duration: DEFAULT_ANIMATION_DURATION,
            interval: DEFAULT_ANIMATION_INTERVAL,
        }
    }
}

/// Knobs understood by the tile engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileConfig {
    /// Preferred tile size in display pixels.
    ///
    /// When `None`, half of the container size is used.
    pub preferred_tile_size: Option<IntSize>,

    /// Transforms during which `refresh_tiles` does nothing
    pub paused_transforms: TransformKind,

    /// Keep the previous level visible until the new level has loaded
    pub background_tiles: bool,

    /// Fade-in animation for newly decoded tiles
    pub animation: TileAnimationSpec,

    /// Store decoded tiles in the shared memory cache
    pub memory_cache: bool,

    /// Hand released pixel buffers to the reuse pool
    pub buffer_reuse: bool,

    /// Maximum number of concurrent region decodes
    pub decode_parallelism: usize,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            preferred_tile_size: None,
            paused_transforms: TransformKind::DEFAULT_PAUSED,
            background_tiles: true,
            animation: TileAnimationSpec::default(),
            memory_cache: true,
            buffer_reuse: true,
            decode_parallelism: DEFAULT_DECODE_PARALLELISM,
        }
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Subsampling demo - drive the tile engine over a real image file.
///
/// Simulates a viewport zooming into the image and reports which tiles the
/// engine decodes at each step.
#[derive(Parser, Debug, Clone)]
#[command(name = "subsampling-demo")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Path of the image to open (JPEG or PNG).
    pub image: PathBuf,

    // =========================================================================
    // Viewport Configuration
    // =========================================================================
    /// Longest edge of the simulated thumbnail and container, in pixels.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_MAX, env = "SUBSAMPLING_THUMBNAIL_MAX")]
    pub thumbnail_max: u32,

    /// Zoom steps to simulate (comma-separated).
    #[arg(
        long,
        env = "SUBSAMPLING_SCALES",
        value_delimiter = ',',
        default_value = "1,2,4,8,16"
    )]
    pub scales: Vec<f32>,

    // =========================================================================
    // Tile Configuration
    // =========================================================================
    /// Preferred tile edge in display pixels.
    ///
    /// If not specified, half of the container size is used.
    #[arg(long, env = "SUBSAMPLING_TILE_SIZE")]
    pub tile_size: Option<u32>,

    /// Maximum number of concurrent region decodes.
    #[arg(long, default_value_t = DEFAULT_DECODE_PARALLELISM, env = "SUBSAMPLING_DECODE_PARALLELISM")]
    pub decode_parallelism: usize,

    /// Drop the previous level as soon as the sample size changes.
    #[arg(long, default_value_t = false)]
    pub no_background_tiles: bool,

    /// Disable the fade-in animation.
    #[arg(long, default_value_t = false)]
    pub no_animation: bool,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Memory cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "SUBSAMPLING_CACHE_BYTES")]
    pub cache_bytes: usize,

    /// Disable the decoded tile memory cache.
    #[arg(long, default_value_t = false)]
    pub no_memory_cache: bool,

    /// Disable pixel buffer reuse.
    #[arg(long, default_value_t = false)]
    pub no_reuse: bool,

    // =========================================================================
    // Output Configuration
    // =========================================================================
    /// Print one JSON object per zoom step instead of log lines.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.thumbnail_max == 0 {
            return Err("thumbnail_max must be greater than 0".to_string());
        }

        if self.scales.is_empty() {
            return Err("at least one scale is required".to_string());
        }
        if self.scales.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err("scales must be positive finite numbers".to_string());
        }

        if self.tile_size == Some(0) {
            return Err("tile_size must be greater than 0".to_string());
        }

        if self.decode_parallelism == 0 {
            return Err("decode_parallelism must be greater than 0".to_string());
        }

        if !self.no_memory_cache && self.cache_bytes == 0 {
            return Err(
                "cache_bytes must be greater than 0 (or pass --no-memory-cache)".to_string(),
            );
        }

        Ok(())
    }

    /// Build the engine configuration from the CLI options.
    pub fn tile_config(&self) -> TileConfig {
        TileConfig {
            preferred_tile_size: self.tile_size.map(|s| IntSize::new(s, s)),
            paused_transforms: TransformKind::DEFAULT_PAUSED,
            background_tiles: !self.no_background_tiles,
            animation: if self.no_animation {
                TileAnimationSpec::none()
            } else {
                TileAnimationSpec::default()
            },
            memory_cache: !self.no_memory_cache,
            buffer_reuse: !self.no_reuse,
            decode_parallelism: self.decode_parallelism,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
