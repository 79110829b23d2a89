//! Tile grid planning.
//!
//! The image is partitioned into a pyramid of grids, one per sample size.
//! At sample size `s` each cell covers roughly `preferred_tile_size * s`
//! image pixels, so every decoded tile ends up close to the preferred tile
//! size on screen. The last column and row are clipped at the image edge.
//!
//! ```text
//!   sample 4          sample 2             sample 1
//! ┌─────┬───┐     ┌──┬──┬──┬─┐     ┌─┬─┬─┬─┬─┬─┬─┐
//! │     │   │     ├──┼──┼──┼─┤     ├─┼─┼─┼─┼─┼─┼─┤
//! │     │   │     ├──┼──┼──┼─┤     ├─┼─┼─┼─┼─┼─┼─┤
//! └─────┴───┘     └──┴──┴──┴─┘     └─┴─┴─┴─┴─┴─┴─┘
//! ```

use std::collections::BTreeMap;

use crate::geometry::{IntOffset, IntRect, IntSize};

use super::model::Tile;

/// One level of the pyramid.
#[derive(Debug)]
pub struct TileGrid {
    /// Downsample factor of every tile in this grid
    pub sample_size: u32,

    /// Number of columns
    pub columns: u32,

    /// Number of rows
    pub rows: u32,

    /// Tiles in row-major order
    pub tiles: Vec<Tile>,
}

impl TileGrid {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Preferred tile size for a container: half of each dimension.
pub fn calculate_preferred_tile_size(container_size: IntSize) -> IntSize {
    IntSize::new(
        (container_size.width / 2).max(1),
        (container_size.height / 2).max(1),
    )
}

/// Smallest power-of-two sample size at which the whole image fits in
/// `content_size`.
///
/// Coarser levels are redundant because the thumbnail already covers them.
pub fn calculate_max_sample_size(image_size: IntSize, content_size: IntSize) -> u32 {
    if image_size.is_empty() || content_size.is_empty() {
        return 1;
    }
    let mut sample_size: u32 = 1;
    while image_size.width / sample_size > content_size.width
        || image_size.height / sample_size > content_size.height
    {
        sample_size *= 2;
    }
    sample_size
}

/// Build the pyramid for `image_size`, coarsest level first.
///
/// Levels are the powers of two from 1 to `max_sample_size` inclusive.
/// Identical inputs always produce identical grids.
pub fn plan_tile_grid_map(
    image_size: IntSize,
    preferred_tile_size: IntSize,
    max_sample_size: u32,
) -> Vec<TileGrid> {
    if image_size.is_empty() || preferred_tile_size.is_empty() {
        return Vec::new();
    }

    let mut grids = Vec::new();
    let mut sample_size: u32 = 1;
    while sample_size <= max_sample_size.max(1) {
        grids.push(plan_tile_grid(image_size, preferred_tile_size, sample_size));
        match sample_size.checked_mul(2) {
            Some(next) => sample_size = next,
            None => break,
        }
    }
    grids.reverse();
    grids
}

fn plan_tile_grid(image_size: IntSize, preferred_tile_size: IntSize, sample_size: u32) -> TileGrid {
    let cell_width = preferred_tile_size.width as u64 * sample_size as u64;
    let cell_height = preferred_tile_size.height as u64 * sample_size as u64;
    let columns = (image_size.width as u64).div_ceil(cell_width) as u32;
    let rows = (image_size.height as u64).div_ceil(cell_height) as u32;

    let mut tiles = Vec::with_capacity(columns as usize * rows as usize);
    for row in 0..rows {
        for column in 0..columns {
            let left = column as u64 * cell_width;
            let top = row as u64 * cell_height;
            let right = (left + cell_width).min(image_size.width as u64);
            let bottom = (top + cell_height).min(image_size.height as u64);
            let src_rect = IntRect::new(left as i32, top as i32, right as i32, bottom as i32);
            tiles.push(Tile::new(IntOffset::new(column, row), src_rect, sample_size));
        }
    }

    TileGrid {
        sample_size,
        columns,
        rows,
        tiles,
    }
}

/// Grid dimensions per sample size, for debug overlays and logging.
pub fn tile_grid_size_map(grids: &[TileGrid]) -> BTreeMap<u32, IntOffset> {
    grids
        .iter()
        .map(|grid| (grid.sample_size, IntOffset::new(grid.columns, grid.rows)))
        .collect()
}
