//! Font data ownership and derived pixel-space metrics.

use std::sync::Arc;

use swash::FontRef;

/// Owned font bytes plus a parsed reference into them.
///
/// The `FontRef` borrows the byte buffer; keeping both in one struct makes
/// the reference valid for as long as the struct lives. Cloning is cheap
/// (the bytes are shared), which lets the shaper and the rasterizer hold the
/// same face.
#[derive(Clone)]
pub struct FontData {
    /// Raw font bytes (TTF/OTF).
    pub data: Arc<Vec<u8>>,
    /// Swash reference for metrics and rasterization.
    pub font_ref: FontRef<'static>,
}

impl std::fmt::Debug for FontData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontData")
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl FontData {
    /// Parses font bytes at face index 0.
    ///
    /// Returns `None` if the data is not a parseable font.
    pub fn new(data: Vec<u8>) -> Option<Self> {
        Self::new_with_index(data, 0)
    }

    /// Parses font bytes with an explicit face index, for TrueType
    /// Collection (.ttc) files holding several faces in one buffer.
    pub fn new_with_index(data: Vec<u8>, face_index: usize) -> Option<Self> {
        let data_arc = Arc::new(data);

        // SAFETY: the Arc is stored next to the FontRef and dropped with it,
        // so the borrowed bytes outlive every use of the reference.
        let font_ref = unsafe {
            let bytes = data_arc.as_slice();
            let static_bytes: &'static [u8] = std::mem::transmute(bytes);
            FontRef::from_index(static_bytes, face_index)?
        };

        Some(FontData {
            data: data_arc,
            font_ref,
        })
    }

    /// Pixel size whose line interval matches `pixel_height`.
    ///
    /// The font's design line height (ascent + descent + leading, in font
    /// units) is scaled so that one line occupies `pixel_height` pixels.
    /// Returns `None` when the font declares no usable vertical metrics.
    pub fn size_for_line_height(&self, pixel_height: f32) -> Option<f32> {
        let m = self.font_ref.metrics(&[]);
        let line_units = m.ascent + m.descent + m.leading;
        if line_units <= 0.0 || m.units_per_em == 0 {
            return None;
        }
        Some(pixel_height * m.units_per_em as f32 / line_units)
    }

    /// Font facts at the given pixel size, for caller-side layout.
    pub fn metrics_at(&self, size: f32) -> FontMetrics {
        let m = self.font_ref.metrics(&[]);
        let factor = if m.units_per_em != 0 {
            size / m.units_per_em as f32
        } else {
            0.0
        };
        let glyph_metrics = self.font_ref.glyph_metrics(&[]);
        let charmap = self.font_ref.charmap();

        let advance_px = |ch: char| -> u32 {
            let glyph = charmap.map(ch);
            if glyph == 0 {
                return 0;
            }
            (glyph_metrics.advance_width(glyph) * factor).round() as u32
        };

        let mut em_width = advance_px('M');
        if em_width == 0 {
            em_width = size.round() as u32;
        }

        FontMetrics {
            em_width,
            space_advance: advance_px(' '),
            line_step: ((m.ascent + m.descent + m.leading) * factor).round() as u32,
        }
    }
}

/// Basic font facts in pixels, fixed at open time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FontMetrics {
    /// Advance of 'M', or the pixel size when the font has no 'M'.
    pub em_width: u32,
    /// Advance of the space glyph.
    pub space_advance: u32,
    /// Line interval; equals the `pixel_height` passed to open, modulo
    /// rounding.
    pub line_step: u32,
}
