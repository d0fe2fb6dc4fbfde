//! Paints a shape's glyph spans into a bitmap buffer.
//!
//! Every write is bounds-checked at span granularity: a span that would land
//! outside the buffer is skipped whole and counted, never partially written.
//! Coverage accumulates by OR so overlapping glyph edges cannot underflow or
//! wrap.

use crate::cache::bitmaps::Bitmap;
use crate::cache::glyphs::GlyphCache;
use crate::cache::shapes::ShapeEntry;

/// Composites `shape` into `bitmap`, which must already be reset to the
/// shape's width and height. Returns the number of spans skipped for falling
/// outside the buffer.
pub(crate) fn paint(shape: &ShapeEntry, glyphs: &GlyphCache, bitmap: &mut Bitmap) -> u64 {
    let width = bitmap.width();
    let height = bitmap.height();
    let mut clipped = 0u64;

    for (i, placed) in shape.glyphs.iter().enumerate() {
        let origin_x = placed.x.floor();
        let origin_y = placed.y.floor();
        let cluster_word = (placed.cluster & 0xffff) << 16;

        for span in &glyphs.entry(placed.glyph).spans {
            // Widened arithmetic: a hostile length or coordinate must not
            // wrap past the bounds test.
            let row = origin_y as i64 + span.y as i64;
            let col = origin_x as i64 + span.x as i64;
            let end = col + span.len as i64;
            if row < 0 || row >= height as i64 || col < 0 || end > width as i64 {
                log::warn!(
                    "span at ({col},{row})+{} outside {width}x{height} bitmap, skipped",
                    span.len
                );
                clipped += 1;
                continue;
            }
            let run = &mut bitmap.row_mut(row as i32)[col as usize..end as usize];
            for word in run {
                // Keep whatever coverage is already there; the cluster of the
                // latest glyph wins the high half.
                *word = cluster_word | ((*word | span.coverage as u32) & 0xffff);
            }
        }

        // Strip columns from this glyph's origin up to the next glyph's (or
        // the right edge) belong to this glyph's cluster.
        let start = origin_x.clamp(0, width);
        let end = match shape.glyphs.get(i + 1) {
            Some(next) => next.x.floor().clamp(start, width),
            None => width,
        };
        for word in &mut bitmap.cluster_map_mut()[start as usize..end as usize] {
            *word = placed.cluster;
        }
    }

    clipped
}
