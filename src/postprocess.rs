//! Stock post-processing passes for freshly composited bitmaps.
//!
//! A post-process runs once, on the render call that actually composites;
//! cache hits return the already-processed pixels untouched. These helpers
//! cover the common GPU-upload preparations; callers can pass any closure of
//! their own instead.

use crate::cache::bitmaps::Bitmap;

/// Replaces each packed cluster/coverage word with an RGBA pixel: the given
/// color with alpha taken from the word's coverage. The cluster strip is left
/// alone.
pub fn colorize(bitmap: &mut Bitmap, rgb: u32) {
    let rgb = rgb & 0x00ff_ffff;
    for word in bitmap.coverage_mut() {
        let alpha = (*word & 0xffff) >> 8;
        *word = (alpha << 24) | rgb;
    }
}

/// Reverses the row order of the coverage region, converting between
/// bottom-up and top-down storage. The cluster strip stays in place.
pub fn flip_vertical(bitmap: &mut Bitmap) {
    let width = bitmap.width() as usize;
    let height = bitmap.height() as usize;
    if width == 0 || height < 2 {
        return;
    }
    let coverage = bitmap.coverage_mut();
    let mut top = 0;
    let mut bottom = height - 1;
    while top < bottom {
        let (a, rest) = coverage[top * width..].split_at_mut(width);
        let b_start = bottom * width - (top + 1) * width;
        a.swap_with_slice(&mut rest[b_start..b_start + width]);
        top += 1;
        bottom -= 1;
    }
}

/// [`colorize`] followed by [`flip_vertical`], for top-down RGBA consumers.
pub fn colorize_flipped(bitmap: &mut Bitmap, rgb: u32) {
    colorize(bitmap, rgb);
    flip_vertical(bitmap);
}
