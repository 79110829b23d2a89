//! Tile engine.
//!
//! This module plans the tile pyramid of a large image and keeps the tiles
//! that cover the viewport decoded, at the sample size that matches the
//! current zoom.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │          TileService (one task per image)       │
//! │  ┌───────────────────────────────────────────┐  │
//! │  │               TileManager                 │  │
//! │  │  grid planning · sample size · load rect  │  │
//! │  │  tile state machine · snapshots           │  │
//! │  └───────────────────────────────────────────┘  │
//! └───────┬───────────────┬───────────────┬─────────┘
//!         │               │               │
//!         ▼               ▼               ▼
//!  ┌─────────────┐ ┌─────────────┐ ┌──────────────┐
//!  │ TileDecoder │ │  TileCache  │ │ TileImagePool│
//!  │ (blocking   │ │  (LRU, by   │ │ (buffer      │
//!  │  decodes)   │ │   bytes)    │ │  reuse)      │
//!  └─────────────┘ └─────────────┘ └──────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileManager`]: Refresh protocol and tile lifecycle
//! - [`TileService`]: Task owning a manager, driven through [`TileServiceHandle`]
//! - [`TileCache`]: Size-bounded LRU of decoded tiles, shared across images
//! - [`TileImagePool`]: Recycled pixel buffers keyed by dimensions
//! - [`TileDecoder`]: Pool of region decoders for one image
//! - [`TileGrid`], [`Tile`], [`TileSnapshot`]: The pyramid and its observable copies

mod cache;
mod decoder;
mod grid;
mod image;
mod manager;
pub mod model;
mod pool;
mod sampling;
mod service;

pub use cache::{TileCache, TileCacheKey, DEFAULT_TILE_CACHE_CAPACITY};
pub use decoder::TileDecoder;
pub use grid::{
    calculate_max_sample_size, calculate_preferred_tile_size, plan_tile_grid_map,
    tile_grid_size_map, TileGrid,
};
pub use image::TileImage;
pub use manager::{RefreshStatus, TileManager, TileReceivers, TileStateCounts, TileStats};
pub use model::{AnimationState, Tile, TileSnapshot, TileState, ALPHA_OPAQUE};
pub use pool::{
    BufferReusePool, TileImagePool, DEFAULT_MAX_BUFFERS_PER_SIZE, DEFAULT_MAX_POOL_BYTES,
};
pub use sampling::{calculate_image_load_rect, select_sample_size, NO_SUBSAMPLING};
pub use service::{RefreshRequest, TileService, TileServiceHandle};
