//! Shape tier: shaped strings keyed by their exact UTF-16 code units.
//!
//! A shape owns one glyph-cache reference per glyph it records; releasing or
//! evicting a shape returns every one of them exactly once.

use std::mem::size_of;

use crate::cache::glyphs::{GlyphCache, GlyphKey};
use crate::cache::store::{Reserved, Store};
use crate::error::Error;
use crate::fixed::Fixed;
use crate::raster::GlyphRasterizer;
use crate::shaper::{ScriptOptions, TextShaper};

/// One glyph placement inside a shape.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ShapeGlyph {
    /// Glyph cache slot; the shape owns one reference on it.
    pub glyph: usize,
    /// Pen origin, canvas-relative after origin translation.
    pub x: Fixed,
    pub y: Fixed,
    /// Index of the source code unit that produced this glyph.
    pub cluster: u32,
}

#[derive(Debug, Default)]
pub(crate) struct ShapeEntry {
    /// The key bytes; kept alongside the index so eviction can unindex, and
    /// reused (capacity retained) across occupants.
    pub text: Vec<u16>,
    pub glyphs: Vec<ShapeGlyph>,
    /// Canvas size in pixels, grid-fitted.
    pub width: i32,
    pub height: i32,
    /// Translation that moved all ink into non-negative coordinates,
    /// grid-fitted to pixels.
    pub origin_x: i32,
    pub origin_y: i32,
}

impl ShapeEntry {
    fn heap_bytes(&self) -> usize {
        self.text.capacity() * size_of::<u16>()
            + self.glyphs.capacity() * size_of::<ShapeGlyph>()
            + size_of::<Self>()
    }
}

/// Running bounding box over fixed-point coordinates.
#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_x: Fixed,
    max_x: Fixed,
    min_y: Fixed,
    max_y: Fixed,
    empty: bool,
}

impl Bounds {
    fn new() -> Self {
        Self {
            min_x: Fixed::ZERO,
            max_x: Fixed::ZERO,
            min_y: Fixed::ZERO,
            max_y: Fixed::ZERO,
            empty: true,
        }
    }

    fn include_point(&mut self, x: Fixed, y: Fixed) {
        self.include_rect(x, y, x, y);
    }

    fn include_rect(&mut self, min_x: Fixed, min_y: Fixed, max_x: Fixed, max_y: Fixed) {
        if self.empty {
            *self = Self {
                min_x,
                max_x,
                min_y,
                max_y,
                empty: false,
            };
            return;
        }
        self.min_x = self.min_x.min(min_x);
        self.max_x = self.max_x.max(max_x);
        self.min_y = self.min_y.min(min_y);
        self.max_y = self.max_y.max(max_y);
    }
}

/// Origin translation and canvas extent for one axis.
///
/// A minimum at or below zero gets one minor unit (1/64 px) of slack so
/// grid-fit rounding can never lose the boundary pixel; a positive minimum
/// produces a translation that trims unused leading space instead.
fn axis_extent(min: Fixed, max: Fixed) -> (Fixed, Fixed) {
    let origin = -min;
    let extent = if min <= Fixed::ZERO {
        max - min + Fixed::EPSILON
    } else {
        max - min
    };
    (origin, extent)
}

pub(crate) struct ShapeCache {
    pub store: Store<Vec<u16>, ShapeEntry>,
}

impl ShapeCache {
    pub fn new(limit: usize) -> Self {
        Self {
            store: Store::new("shape", limit),
        }
    }

    /// Returns an incref'd slot for the string, shaping on a miss.
    ///
    /// Fails only when the shaper cannot process the whole string; glyphs
    /// the rasterizer rejects are skipped while their advances still move
    /// the pen.
    pub fn get_or_shape(
        &mut self,
        shaper: &mut dyn TextShaper,
        rasterizer: &mut dyn GlyphRasterizer,
        glyphs: &mut GlyphCache,
        text: &[u16],
        options: &ScriptOptions,
        subpixel: bool,
    ) -> Result<usize, Error> {
        if let Some(slot) = self.store.lookup(text) {
            // A hot shape keeps its glyphs hot: each one counts a hit and
            // moves to the warm end of the glyph tier's recency order.
            for g in &self.store.payload(slot).glyphs {
                glyphs.touch(g.glyph);
            }
            self.store.incref(slot);
            return Ok(slot);
        }

        // Expected-size heuristic: roughly one glyph per input code unit.
        let estimate = size_of::<ShapeEntry>()
            + text.len() * (size_of::<u16>() + size_of::<ShapeGlyph>());
        let Reserved {
            slot,
            reused,
            freed,
        } = self.store.reserve(estimate);
        for entry in freed {
            release_glyphs(glyphs, entry);
        }

        let mut entry = reused.unwrap_or_default();
        // Return the previous occupant's glyph references before the buffers
        // are repopulated.
        for g in entry.glyphs.drain(..) {
            glyphs.release(g.glyph);
        }
        entry.text.clear();
        entry.text.extend_from_slice(text);

        let shaped = match shaper.shape(text, options) {
            Ok(shaped) => shaped,
            Err(e) => {
                self.store.discard(slot);
                return Err(e);
            }
        };

        // Walk the shaped glyphs in order, accumulating pen position and the
        // string's fixed-point bounding box.
        let mut pen_x = Fixed::ZERO;
        let mut pen_y = Fixed::ZERO;
        let mut bounds = Bounds::new();
        entry.glyphs.reserve(shaped.len());

        for g in &shaped {
            let gx = pen_x + g.x_offset;
            let gy = pen_y + g.y_offset;
            let key = if subpixel {
                GlyphKey {
                    id: g.glyph_id,
                    frac_x: gx.fract(),
                    frac_y: gy.fract(),
                }
            } else {
                GlyphKey::whole(g.glyph_id)
            };

            if let Some(glyph_slot) = glyphs.get_or_render(rasterizer, key) {
                let ink = glyphs.entry(glyph_slot).ink;
                if glyphs.entry(glyph_slot).spans.is_empty() {
                    // An ink-less glyph (space) still affects layout bounds
                    // through its pen position.
                    bounds.include_point(gx, gy);
                } else {
                    let px = gx.floor();
                    let py = gy.floor();
                    // Saturating translation: an ink box clamped against a
                    // hostile span must not overflow here either.
                    bounds.include_rect(
                        Fixed::from_px(px.saturating_add(ink.min_x)),
                        Fixed::from_px(py.saturating_add(ink.min_y)),
                        Fixed::from_px(px.saturating_add(ink.max_x)),
                        Fixed::from_px(py.saturating_add(ink.max_y)),
                    );
                }
                entry.glyphs.push(ShapeGlyph {
                    glyph: glyph_slot,
                    x: gx,
                    y: gy,
                    cluster: g.cluster,
                });
            }

            pen_x += g.x_advance;
            pen_y += g.y_advance;
        }

        // A trailing advance extends the box past the last glyph's ink.
        bounds.include_point(pen_x, pen_y);

        let (origin_x, extent_x) = axis_extent(bounds.min_x, bounds.max_x);
        let (origin_y, extent_y) = axis_extent(bounds.min_y, bounds.max_y);
        for g in &mut entry.glyphs {
            g.x += origin_x;
            g.y += origin_y;
        }
        entry.width = extent_x.grid_fit();
        entry.height = extent_y.grid_fit();
        entry.origin_x = origin_x.grid_fit();
        entry.origin_y = origin_y.grid_fit();

        let bytes = entry.heap_bytes();
        self.store.insert(slot, text.to_vec(), entry, bytes);
        self.store.incref(slot);
        for evicted in self.store.trim(Some(slot)) {
            release_glyphs(glyphs, evicted);
        }
        Ok(slot)
    }
}

/// Returns every glyph reference an evicted shape owned, exactly once.
pub(crate) fn release_glyphs(glyphs: &mut GlyphCache, entry: ShapeEntry) {
    for g in &entry.glyphs {
        glyphs.release(g.glyph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{RasterSpan, RasterizedGlyph};
    use crate::shaper::ShapedGlyph;

    /// One glyph per code unit, two pixels of advance, no offsets. A 0xffff
    /// unit fails the whole call.
    struct UnitShaper {
        calls: u32,
    }

    impl TextShaper for UnitShaper {
        fn shape(
            &mut self,
            text: &[u16],
            _options: &ScriptOptions,
        ) -> Result<Vec<ShapedGlyph>, Error> {
            self.calls += 1;
            if text.contains(&0xffff) {
                return Err(Error::Shaping("unshapable unit".into()));
            }
            Ok(text
                .iter()
                .enumerate()
                .map(|(i, &unit)| ShapedGlyph {
                    glyph_id: unit as u32,
                    cluster: i as u32,
                    x_advance: Fixed::from_px(2),
                    y_advance: Fixed::ZERO,
                    x_offset: Fixed::ZERO,
                    y_offset: Fixed::ZERO,
                })
                .collect())
        }
    }

    /// 2x2 box of full coverage at the glyph origin; a space has no ink and
    /// glyph 0x0bad fails to rasterize.
    struct BoxRasterizer;

    impl GlyphRasterizer for BoxRasterizer {
        fn rasterize(&mut self, glyph_id: u32, _fx: u8, _fy: u8) -> Option<RasterizedGlyph> {
            match glyph_id {
                0x0bad => None,
                0x20 => Some(RasterizedGlyph::default()),
                _ => Some(RasterizedGlyph {
                    spans: vec![
                        RasterSpan { x: 0, y: 0, len: 2, coverage: 0xff },
                        RasterSpan { x: 0, y: 1, len: 2, coverage: 0xff },
                    ],
                }),
            }
        }
    }

    struct Rig {
        shaper: UnitShaper,
        raster: BoxRasterizer,
        glyphs: GlyphCache,
        shapes: ShapeCache,
    }

    fn rig() -> Rig {
        Rig {
            shaper: UnitShaper { calls: 0 },
            raster: BoxRasterizer,
            glyphs: GlyphCache::new(1 << 20),
            shapes: ShapeCache::new(1 << 20),
        }
    }

    impl Rig {
        fn shape(&mut self, text: &[u16], subpixel: bool) -> Result<usize, Error> {
            self.shapes.get_or_shape(
                &mut self.shaper,
                &mut self.raster,
                &mut self.glyphs,
                text,
                &ScriptOptions::default(),
                subpixel,
            )
        }
    }

    #[test]
    fn hit_reuses_entry_without_reshaping() {
        let mut r = rig();
        let a = r.shape(&[65], false).unwrap();
        let b = r.shape(&[65], false).unwrap();
        assert_eq!(a, b);
        assert_eq!(r.shaper.calls, 1, "hit must not re-invoke the shaper");
        assert_eq!(r.shapes.store.refs(a), 2);
        assert_eq!(r.shapes.store.hits, 1);
        // The hit also registers on the shape's glyphs.
        assert_eq!(r.glyphs.store.hits, 1);
        let glyph = r.shapes.store.payload(a).glyphs[0].glyph;
        assert!(r.glyphs.store.lookup(&GlyphKey::whole(65)) == Some(glyph));
    }

    #[test]
    fn single_glyph_geometry_is_deterministic() {
        // A 2x2 ink box plus the minor-unit slack grid-fits to 3x3 at the
        // origin, every time.
        let mut r = rig();
        let slot = r.shape(&[65], false).unwrap();
        let e = r.shapes.store.payload(slot);
        assert_eq!((e.width, e.height), (3, 3));
        assert_eq!((e.origin_x, e.origin_y), (0, 0));

        let mut r2 = rig();
        let slot2 = r2.shape(&[65], false).unwrap();
        let e2 = r2.shapes.store.payload(slot2);
        assert_eq!((e2.width, e2.height, e2.origin_x, e2.origin_y), (3, 3, 0, 0));
    }

    #[test]
    fn trailing_space_widens_the_canvas() {
        let mut r = rig();
        let bare = r.shape(&[65], false).unwrap();
        let bare_w = r.shapes.store.payload(bare).width;
        // The space has no ink; only its advance moves the final pen.
        let spaced = r.shape(&[65, 0x20], false).unwrap();
        let spaced_w = r.shapes.store.payload(spaced).width;
        assert!(spaced_w > bare_w, "{spaced_w} vs {bare_w}");
    }

    #[test]
    fn failed_glyph_is_skipped_but_still_advances() {
        let mut r = rig();
        let slot = r.shape(&[0x0bad, 65], false).unwrap();
        let e = r.shapes.store.payload(slot);
        assert_eq!(e.glyphs.len(), 1, "failed glyph dropped from the list");
        assert_eq!(e.glyphs[0].cluster, 1);
        // All ink starts at 2 px; the origin trims the dead leading space.
        assert_eq!(e.origin_x, -2);
        assert_eq!(e.width, 2);
    }

    #[test]
    fn shaper_failure_leaves_cache_clean() {
        let mut r = rig();
        assert!(r.shape(&[0xffff], false).is_err());
        assert_eq!(r.shapes.store.len(), 0);
        assert!(r.shape(&[65], false).is_ok());
    }

    #[test]
    fn subpixel_mode_splits_glyph_entries_per_fraction() {
        // 2 px advances keep every origin on the pixel grid, so whole-pixel
        // keys dedupe; with a half-pixel offset the fractions diverge.
        let mut r = rig();
        r.shape(&[65, 65], false).unwrap();
        assert_eq!(r.glyphs.store.len(), 1);

        let mut r = rig();
        let slot = r
            .shapes
            .get_or_shape(
                &mut HalfPixelShaper,
                &mut r.raster,
                &mut r.glyphs,
                &[65, 65],
                &ScriptOptions::default(),
                true,
            )
            .unwrap();
        assert_eq!(r.shapes.store.payload(slot).glyphs.len(), 2);
        assert_eq!(r.glyphs.store.len(), 2, "one entry per sub-pixel fraction");
    }

    /// 1.5 px advance, to force distinct sub-pixel fractions.
    struct HalfPixelShaper;

    impl TextShaper for HalfPixelShaper {
        fn shape(
            &mut self,
            text: &[u16],
            _options: &ScriptOptions,
        ) -> Result<Vec<ShapedGlyph>, Error> {
            Ok(text
                .iter()
                .enumerate()
                .map(|(i, &unit)| ShapedGlyph {
                    glyph_id: unit as u32,
                    cluster: i as u32,
                    x_advance: Fixed(96),
                    y_advance: Fixed::ZERO,
                    x_offset: Fixed::ZERO,
                    y_offset: Fixed::ZERO,
                })
                .collect())
        }
    }

    #[test]
    fn evicted_shape_returns_its_glyph_references() {
        let mut r = rig();
        r.shapes = ShapeCache::new(1);
        let a = r.shape(&[65], false).unwrap();
        let glyph_a = r.shapes.store.payload(a).glyphs[0].glyph;
        assert_eq!(r.glyphs.store.refs(glyph_a), 1);
        r.shapes.store.decref(a);
        // Over the 1-byte budget, so inserting B evicts A and releases its
        // glyph.
        r.shape(&[66], false).unwrap();
        assert_eq!(r.glyphs.store.refs(glyph_a), 0);
        assert!(r.shapes.store.evictions >= 1);
    }

    #[test]
    fn referenced_shape_raises_limit_instead_of_evicting() {
        let mut r = rig();
        r.shapes = ShapeCache::new(1);
        let a = r.shape(&[65], false).unwrap();
        // Still referenced: the tiny budget must grow, not fail or evict.
        let b = r.shape(&[66], false).unwrap();
        assert!(r.shapes.store.is_occupied(a));
        assert!(r.shapes.store.is_occupied(b));
        assert!(r.shapes.store.limit() >= r.shapes.store.bytes());
        assert_eq!(r.shapes.store.evictions, 0);
    }
}
