//! Integer geometry primitives shared by the tile engine.
//!
//! All rectangles are half-open: `right` and `bottom` are exclusive, so a
//! rectangle with `left == right` is empty.

use std::fmt;

use serde::Serialize;

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct IntSize {
    pub width: u32,
    pub height: u32,
}

impl IntSize {
    pub const ZERO: IntSize = IntSize {
        width: 0,
        height: 0,
    };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for IntSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Column/row position of a tile within its grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct IntOffset {
    pub x: u32,
    pub y: u32,
}

impl IntOffset {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for IntOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Half-open integer rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct IntRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl IntRect {
    pub const ZERO: IntRect = IntRect {
        left: 0,
        top: 0,
        right: 0,
        bottom: 0,
    };

    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle anchored at the origin covering `size`.
    pub fn from_size(size: IntSize) -> Self {
        Self::new(0, 0, size.width as i32, size.height as i32)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn size(&self) -> IntSize {
        IntSize::new(self.width().max(0) as u32, self.height().max(0) as u32)
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    /// True when the two rectangles share at least one pixel.
    pub fn overlaps(&self, other: &IntRect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    /// Overlapping area of the two rectangles, or `None` if they are disjoint.
    pub fn intersect(&self, other: &IntRect) -> Option<IntRect> {
        if !self.overlaps(other) {
            return None;
        }
        Some(IntRect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        ))
    }

    pub fn contains(&self, other: &IntRect) -> bool {
        self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }

    /// Clamp every edge into `[0, size]`.
    pub fn limit_to(&self, size: IntSize) -> IntRect {
        let w = size.width as i32;
        let h = size.height as i32;
        IntRect::new(
            self.left.clamp(0, w),
            self.top.clamp(0, h),
            self.right.clamp(0, w),
            self.bottom.clamp(0, h),
        )
    }
}

impl fmt::Display for IntRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{},{},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}
