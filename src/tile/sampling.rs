//! Sample-size selection and image load rect calculation.
//!
//! Both functions are pure: the tile manager memoizes their results on the
//! inputs that actually change between refreshes (scale and visible rect).

use crate::geometry::{IntRect, IntSize};

/// Sample size meaning "the thumbnail is sharp enough, do not subsample".
pub const NO_SUBSAMPLING: u32 = 0;

/// Pick the sample size for the current viewport scale.
///
/// Returns [`NO_SUBSAMPLING`] when `scale <= 1`. Otherwise returns the
/// coarsest power of two whose decoded density still meets the rendered
/// density `content_size * scale`. The finer of the two axes decides, and an
/// exact tie selects the coarser level. Ratios below 2 select sample size 1.
///
/// The result is non-increasing in `scale` for fixed sizes.
pub fn select_sample_size(image_size: IntSize, content_size: IntSize, scale: f32) -> u32 {
    if scale.is_nan() || scale <= 1.0 || image_size.is_empty() || content_size.is_empty() {
        return NO_SUBSAMPLING;
    }

    let scale = scale as f64;
    let width_ratio = image_size.width as f64 / (content_size.width as f64 * scale);
    let height_ratio = image_size.height as f64 / (content_size.height as f64 * scale);
    let ratio = width_ratio.min(height_ratio);

    let mut sample_size: u32 = 1;
    while let Some(next) = sample_size.checked_mul(2) {
        if next as f64 > ratio {
            break;
        }
        sample_size = next;
    }
    sample_size
}

/// Map the visible content rect into image pixels, padded for preloading.
///
/// Each edge grows by half a preferred tile (converted to image pixels at the
/// content-to-image density) so tiles just outside the viewport are decoded
/// before they scroll in. The result is clamped to the image bounds. An empty
/// visible rect yields an empty load rect.
pub fn calculate_image_load_rect(
    image_size: IntSize,
    content_size: IntSize,
    preferred_tile_size: IntSize,
    visible_content_rect: IntRect,
) -> IntRect {
    if visible_content_rect.is_empty() || content_size.is_empty() || image_size.is_empty() {
        return IntRect::ZERO;
    }

    let width_scale = image_size.width as f64 / content_size.width as f64;
    let height_scale = image_size.height as f64 / content_size.height as f64;
    let horizontal_extend = preferred_tile_size.width as f64 / 2.0 * width_scale;
    let vertical_extend = preferred_tile_size.height as f64 / 2.0 * height_scale;

    let left = visible_content_rect.left as f64 * width_scale - horizontal_extend;
    let top = visible_content_rect.top as f64 * height_scale - vertical_extend;
    let right = visible_content_rect.right as f64 * width_scale + horizontal_extend;
    let bottom = visible_content_rect.bottom as f64 * height_scale + vertical_extend;

    let clamp = |v: f64| v.clamp(i32::MIN as f64, i32::MAX as f64) as i32;
    IntRect::new(
        clamp(left.floor()),
        clamp(top.floor()),
        clamp(right.ceil()),
        clamp(bottom.ceil()),
    )
    .limit_to(image_size)
}
