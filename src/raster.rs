//! Glyph rasterization seam: trait contract plus the swash-backed
//! implementation.
//!
//! A rasterizer turns one glyph id plus a sub-pixel pen offset into
//! anti-aliased coverage spans. The glyph cache depends only on the
//! [`GlyphRasterizer`] trait so the backend can be swapped or mocked in
//! tests.

use swash::scale::{Render, ScaleContext, Source};
use swash::zeno::{Format, Vector};

use crate::font::FontData;

/// One horizontal run of pixels with uniform coverage, as emitted by the
/// rasterizer for one glyph outline.
///
/// Coordinates are relative to the glyph origin with the y axis pointing up
/// (FreeType convention): `y` is the scanline, `x` the leftmost pixel of the
/// run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterSpan {
    pub x: i32,
    pub y: i32,
    pub len: u32,
    /// Anti-aliasing intensity, 0..=255.
    pub coverage: u8,
}

/// The rasterizer's output for one glyph: spans in scanline order.
///
/// An ink-less glyph (space) is a successful result with no spans; a failure
/// (malformed outline) is `None`.
#[derive(Debug, Clone, Default)]
pub struct RasterizedGlyph {
    pub spans: Vec<RasterSpan>,
}

/// The rasterization contract consumed by the glyph cache.
pub trait GlyphRasterizer {
    /// Rasterizes `glyph_id` at the sub-pixel offset (`frac_x`, `frac_y`),
    /// both in 1/64 px. Returns `None` when the glyph cannot be rendered.
    fn rasterize(&mut self, glyph_id: u32, frac_x: u8, frac_y: u8) -> Option<RasterizedGlyph>;
}

/// Swash-backed rasterizer bound to one font face at one pixel size.
pub struct SwashRasterizer {
    font: FontData,
    context: ScaleContext,
    size: f32,
    hinted: bool,
}

impl SwashRasterizer {
    pub fn new(font: FontData, size: f32, hinted: bool) -> Self {
        Self {
            font,
            context: ScaleContext::new(),
            size,
            hinted,
        }
    }
}

impl GlyphRasterizer for SwashRasterizer {
    fn rasterize(&mut self, glyph_id: u32, frac_x: u8, frac_y: u8) -> Option<RasterizedGlyph> {
        let glyph: u16 = match glyph_id.try_into() {
            Ok(g) => g,
            Err(_) => {
                log::warn!("glyph id {glyph_id:#x} exceeds u16, cannot rasterize");
                return None;
            }
        };

        let mut scaler = self
            .context
            .builder(self.font.font_ref)
            .size(self.size)
            .hint(self.hinted)
            .build();

        let offset = Vector::new(frac_x as f32 / 64.0, frac_y as f32 / 64.0);

        // Outline only: this pipeline produces coverage, not color bitmaps.
        let image = Render::new(&[Source::Outline, Source::ColorOutline(0)])
            .format(Format::Alpha)
            .offset(offset)
            .render(&mut scaler, glyph)?;

        let width = image.placement.width as usize;
        let height = image.placement.height as usize;
        if width == 0 || height == 0 {
            // Ink-less glyph, e.g. a space.
            return Some(RasterizedGlyph::default());
        }
        if image.data.len() < width * height {
            log::warn!("glyph {glyph_id:#x}: short mask buffer from scaler");
            return None;
        }

        // Convert mask rows into spans. The mask is stored top row first;
        // span coordinates are y-up relative to the glyph origin.
        let mut spans = Vec::new();
        for (row_index, row) in image.data[..width * height].chunks_exact(width).enumerate() {
            let y = image.placement.top - 1 - row_index as i32;
            let mut col = 0;
            while col < width {
                let coverage = row[col];
                if coverage == 0 {
                    col += 1;
                    continue;
                }
                let start = col;
                while col < width && row[col] == coverage {
                    col += 1;
                }
                spans.push(RasterSpan {
                    x: image.placement.left + start as i32,
                    y,
                    len: (col - start) as u32,
                    coverage,
                });
            }
        }

        Some(RasterizedGlyph { spans })
    }
}
