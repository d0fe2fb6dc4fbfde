//! Glyph tier: rasterized coverage spans keyed by glyph id and sub-pixel
//! offset.

use std::mem::size_of;

use crate::cache::store::{Reserved, Store};
use crate::raster::{GlyphRasterizer, RasterSpan};

/// Fallback span-buffer estimate before the first glyph has been rendered.
const INITIAL_GLYPH_ESTIMATE: usize = 512;

/// Glyph identity. When sub-pixel positioning is disabled the fractions are
/// pinned to zero, so every pen position maps to the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct GlyphKey {
    pub id: u32,
    /// Sub-pixel pen offset in 1/64 px, 0..64.
    pub frac_x: u8,
    pub frac_y: u8,
}

impl GlyphKey {
    pub fn whole(id: u32) -> Self {
        Self {
            id,
            frac_x: 0,
            frac_y: 0,
        }
    }
}

/// One stored coverage span. The rasterizer's coverage byte is bit-replicated
/// to 16 bits (PNG-style) before storage so compositing can write it straight
/// into the low half of a bitmap word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CoverageSpan {
    pub x: i32,
    pub y: i32,
    pub len: u32,
    pub coverage: u16,
}

/// Ink bounding box in pixels, y-up, max edges exclusive. Meaningless when
/// the glyph produced no spans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct InkBox {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

#[derive(Debug, Default)]
pub(crate) struct GlyphEntry {
    pub spans: Vec<CoverageSpan>,
    pub ink: InkBox,
}

impl GlyphEntry {
    fn heap_bytes(&self) -> usize {
        self.spans.capacity() * size_of::<CoverageSpan>() + size_of::<Self>()
    }
}

pub(crate) struct GlyphCache {
    pub store: Store<GlyphKey, GlyphEntry>,
    /// Exponential moving estimate of rendered bytes per glyph; seeds the
    /// span buffer of new entries.
    bytes_per_glyph: usize,
    pub rendered: u64,
    pub spans_seen: u64,
}

impl GlyphCache {
    pub fn new(limit: usize) -> Self {
        Self {
            store: Store::new("glyph", limit),
            bytes_per_glyph: 0,
            rendered: 0,
            spans_seen: 0,
        }
    }

    /// Returns an incref'd slot for the glyph, rasterizing on a miss.
    ///
    /// `None` means the rasterizer failed for this glyph; cache bookkeeping
    /// is unaffected and the caller is expected to skip the glyph.
    pub fn get_or_render(
        &mut self,
        rasterizer: &mut dyn GlyphRasterizer,
        key: GlyphKey,
    ) -> Option<usize> {
        if let Some(slot) = self.store.lookup(&key) {
            self.store.incref(slot);
            return Some(slot);
        }

        let estimate = if self.bytes_per_glyph > 0 {
            self.bytes_per_glyph
        } else {
            INITIAL_GLYPH_ESTIMATE
        };
        let Reserved {
            slot,
            reused,
            freed,
        } = self.store.reserve(estimate);
        // Span buffers hold no cross-tier references; dropping is enough.
        drop(freed);

        let mut entry = reused.unwrap_or_default();
        entry.spans.clear();
        if entry.spans.capacity() == 0 {
            entry
                .spans
                .reserve(estimate / size_of::<CoverageSpan>());
        }

        let Some(rasterized) = rasterizer.rasterize(key.id, key.frac_x, key.frac_y) else {
            log::warn!("glyph {:#06x}: rasterization failed, glyph skipped", key.id);
            self.store.discard(slot);
            return None;
        };

        let mut ink = InkBox::default();
        for (i, span) in rasterized.spans.iter().enumerate() {
            entry.spans.push(CoverageSpan {
                x: span.x,
                y: span.y,
                len: span.len,
                coverage: replicate(span.coverage),
            });
            include_span(&mut ink, span, i == 0);
        }
        entry.ink = ink;

        self.rendered += 1;
        self.spans_seen += rasterized.spans.len() as u64;

        let bytes = entry.heap_bytes();
        self.bytes_per_glyph = if self.bytes_per_glyph == 0 {
            bytes
        } else {
            (self.bytes_per_glyph * 7 + bytes) / 8
        };

        self.store.insert(slot, key, entry, bytes);
        self.store.incref(slot);
        drop(self.store.trim(Some(slot)));
        Some(slot)
    }

    pub fn entry(&self, slot: usize) -> &GlyphEntry {
        self.store.payload(slot)
    }

    /// Counts a hit on a glyph reached through a cached shape, keeping it
    /// warm in the recency order.
    pub fn touch(&mut self, slot: usize) {
        self.store.touch(slot);
    }

    pub fn release(&mut self, slot: usize) {
        self.store.decref(slot);
    }
}

/// Bit-replicates an 8-bit coverage value to 16 bits, ala PNG sample scaling.
fn replicate(coverage: u8) -> u16 {
    ((coverage as u16) << 8) | coverage as u16
}

fn include_span(ink: &mut InkBox, span: &RasterSpan, first: bool) {
    // A hostile span length saturates rather than wrapping the box negative.
    let max_x = span
        .x
        .saturating_add(i32::try_from(span.len).unwrap_or(i32::MAX));
    if first {
        *ink = InkBox {
            min_x: span.x,
            max_x,
            min_y: span.y,
            max_y: span.y + 1,
        };
        return;
    }
    ink.min_x = ink.min_x.min(span.x);
    ink.max_x = ink.max_x.max(max_x);
    ink.min_y = ink.min_y.min(span.y);
    ink.max_y = ink.max_y.max(span.y + 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterizedGlyph;

    /// Renders every glyph as a 2x2 box at the origin, or fails for id 0xbad.
    struct BoxRasterizer {
        calls: u32,
    }

    impl GlyphRasterizer for BoxRasterizer {
        fn rasterize(&mut self, glyph_id: u32, _fx: u8, _fy: u8) -> Option<RasterizedGlyph> {
            self.calls += 1;
            if glyph_id == 0xbad {
                return None;
            }
            Some(RasterizedGlyph {
                spans: vec![
                    RasterSpan { x: 0, y: 0, len: 2, coverage: 0x7f },
                    RasterSpan { x: 0, y: 1, len: 2, coverage: 0xff },
                ],
            })
        }
    }

    #[test]
    fn miss_renders_and_hit_does_not() {
        let mut cache = GlyphCache::new(1 << 20);
        let mut raster = BoxRasterizer { calls: 0 };
        let a = cache.get_or_render(&mut raster, GlyphKey::whole(7)).unwrap();
        let b = cache.get_or_render(&mut raster, GlyphKey::whole(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(raster.calls, 1);
        assert_eq!(cache.store.hits, 1);
        assert_eq!(cache.store.refs(a), 2);
    }

    #[test]
    fn coverage_is_bit_replicated() {
        let mut cache = GlyphCache::new(1 << 20);
        let mut raster = BoxRasterizer { calls: 0 };
        let slot = cache.get_or_render(&mut raster, GlyphKey::whole(7)).unwrap();
        let entry = cache.entry(slot);
        assert_eq!(entry.spans[0].coverage, 0x7f7f);
        assert_eq!(entry.spans[1].coverage, 0xffff);
        assert_eq!(entry.ink, InkBox { min_x: 0, max_x: 2, min_y: 0, max_y: 2 });
    }

    #[test]
    fn maximal_span_length_saturates_the_ink_box() {
        struct OverflowRasterizer;

        impl GlyphRasterizer for OverflowRasterizer {
            fn rasterize(&mut self, _id: u32, _fx: u8, _fy: u8) -> Option<RasterizedGlyph> {
                Some(RasterizedGlyph {
                    spans: vec![RasterSpan { x: 1, y: 0, len: u32::MAX, coverage: 0xff }],
                })
            }
        }

        let mut cache = GlyphCache::new(1 << 20);
        let slot = cache
            .get_or_render(&mut OverflowRasterizer, GlyphKey::whole(1))
            .unwrap();
        assert_eq!(cache.entry(slot).ink.max_x, i32::MAX);
    }

    #[test]
    fn rasterizer_failure_leaves_cache_clean() {
        let mut cache = GlyphCache::new(1 << 20);
        let mut raster = BoxRasterizer { calls: 0 };
        assert!(cache.get_or_render(&mut raster, GlyphKey::whole(0xbad)).is_none());
        assert_eq!(cache.store.len(), 0);
        assert_eq!(cache.store.bytes(), 0);
        // The cache stays usable.
        assert!(cache.get_or_render(&mut raster, GlyphKey::whole(1)).is_some());
    }

    #[test]
    fn subpixel_fractions_are_distinct_keys() {
        let mut cache = GlyphCache::new(1 << 20);
        let mut raster = BoxRasterizer { calls: 0 };
        let key_a = GlyphKey { id: 7, frac_x: 0, frac_y: 0 };
        let key_b = GlyphKey { id: 7, frac_x: 32, frac_y: 0 };
        let a = cache.get_or_render(&mut raster, key_a).unwrap();
        let b = cache.get_or_render(&mut raster, key_b).unwrap();
        assert_ne!(a, b);
        assert_eq!(raster.calls, 2);
    }
}
