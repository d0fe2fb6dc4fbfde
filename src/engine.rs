//! The cache instance and its public operations.
//!
//! An [`InkJar`] owns the three tiers plus the shaper and rasterizer
//! backends. Every operation is synchronous; one instance supports exactly
//! one mutator at a time (wrap it in a lock or confine it to a thread).
//! A typical split runs shaping and layout on one thread and rendering on
//! another, each with its own instance, passing [`ShapeHandle`]s between
//! them under external synchronization.

use std::mem::size_of;

use crate::cache::bitmaps::{Bitmap, BitmapCache, BitmapEntry, BitmapKey};
use crate::cache::glyphs::GlyphCache;
use crate::cache::shapes::ShapeCache;
use crate::cache::store::Reserved;
use crate::compositor;
use crate::error::Error;
use crate::font::{FontData, FontMetrics};
use crate::raster::{GlyphRasterizer, SwashRasterizer};
use crate::shaper::{RustybuzzShaper, ScriptOptions, TextShaper};
use crate::utf::utf8_to_utf16;

/// Instance configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Desired line interval in pixels; the font size is derived from it.
    pub pixel_height: u32,
    /// Cache distinct glyph renderings per fractional pen offset. Sharper
    /// text, larger glyph tier.
    pub subpixel: bool,
    /// Apply font hinting during rasterization.
    pub hinted: bool,
    /// Byte budgets per tier. Budgets grow transparently when every occupant
    /// is referenced; they never shrink back.
    pub glyph_limit: usize,
    pub shape_limit: usize,
    pub bitmap_limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pixel_height: 16,
            subpixel: false,
            hinted: true,
            glyph_limit: 1 << 20,
            shape_limit: 1 << 20,
            bitmap_limit: 4 << 20,
        }
    }
}

/// An owned reference to a cached shape.
///
/// Geometry is public so the layout side can size and place the string
/// without touching the cache again. The handle is deliberately not `Clone`:
/// each one stands for exactly one cache reference, surrendered by
/// [`InkJar::release_shape`].
#[derive(Debug)]
pub struct ShapeHandle {
    /// Bitmap canvas width in pixels.
    pub width: i32,
    /// Bitmap canvas height in pixels.
    pub height: i32,
    /// Pen start position inside the canvas, in pixels.
    pub origin_x: i32,
    pub origin_y: i32,
    slot: usize,
    generation: u64,
}

/// Counters for one cache tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    pub gets: u64,
    pub hits: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: usize,
    /// Effective byte budget, including any transparent raises.
    pub limit: usize,
}

/// Aggregate statistics across the instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub glyphs: TierStats,
    pub shapes: TierStats,
    pub bitmaps: TierStats,
    /// Rasterizer invocations (glyph-tier misses that reached the backend).
    pub glyphs_rendered: u64,
    /// Coverage spans received from the rasterizer, lifetime total.
    pub glyph_spans_seen: u64,
    /// Compositor spans skipped for falling outside bitmap bounds.
    pub clipped_spans: u64,
}

/// A shaped-text bitmap cache bound to one font at one pixel size.
pub struct InkJar {
    shaper: Box<dyn TextShaper>,
    rasterizer: Box<dyn GlyphRasterizer>,
    glyphs: GlyphCache,
    shapes: ShapeCache,
    bitmaps: BitmapCache,
    script: ScriptOptions,
    subpixel: bool,
    metrics: Option<FontMetrics>,
}

impl InkJar {
    /// Opens an instance over raw TTF/OTF bytes.
    ///
    /// The font size is chosen so one text line occupies
    /// `options.pixel_height` pixels.
    pub fn open(font_data: Vec<u8>, options: &Options) -> Result<Self, Error> {
        let font = FontData::new(font_data).ok_or(Error::InvalidFont)?;
        let size = font
            .size_for_line_height(options.pixel_height as f32)
            .ok_or(Error::BadFontMetrics)?;
        let metrics = font.metrics_at(size);
        let shaper = RustybuzzShaper::new(font.data.clone(), size).ok_or(Error::InvalidFont)?;
        let rasterizer = SwashRasterizer::new(font, size, options.hinted);
        let mut jar = Self::with_backends(Box::new(shaper), Box::new(rasterizer), options);
        jar.metrics = Some(metrics);
        Ok(jar)
    }

    /// Builds an instance over explicit shaper and rasterizer backends.
    ///
    /// The cache core only sees the trait objects, so tests can substitute
    /// deterministic fakes for the font stack.
    pub fn with_backends(
        shaper: Box<dyn TextShaper>,
        rasterizer: Box<dyn GlyphRasterizer>,
        options: &Options,
    ) -> Self {
        Self {
            shaper,
            rasterizer,
            glyphs: GlyphCache::new(options.glyph_limit),
            shapes: ShapeCache::new(options.shape_limit),
            bitmaps: BitmapCache::new(options.bitmap_limit),
            script: ScriptOptions::default(),
            subpixel: options.subpixel,
            metrics: None,
        }
    }

    /// Sets direction/script/language hints for subsequent `shape` calls.
    /// Already-cached shapes keep the hints they were shaped with.
    pub fn set_script(&mut self, script: ScriptOptions) {
        self.script = script;
    }

    /// Font facts for caller-side layout. `None` for instances built over
    /// custom backends.
    pub fn font_metrics(&self) -> Option<FontMetrics> {
        self.metrics
    }

    /// Shapes a UTF-16 string, returning an owned handle with its canvas
    /// geometry. Byte-identical strings share one cache entry; every handle
    /// must eventually go back through [`InkJar::release_shape`].
    pub fn shape(&mut self, text: &[u16]) -> Result<ShapeHandle, Error> {
        let slot = self.shapes.get_or_shape(
            self.shaper.as_mut(),
            self.rasterizer.as_mut(),
            &mut self.glyphs,
            text,
            &self.script,
            self.subpixel,
        )?;
        let entry = self.shapes.store.payload(slot);
        Ok(ShapeHandle {
            width: entry.width,
            height: entry.height,
            origin_x: entry.origin_x,
            origin_y: entry.origin_y,
            slot,
            generation: self.shapes.store.generation(slot),
        })
    }

    /// [`InkJar::shape`] over UTF-8 input.
    pub fn shape_str(&mut self, text: &str) -> Result<ShapeHandle, Error> {
        self.shape(&utf8_to_utf16(text))
    }

    /// Surrenders one shape reference. The entry stays cached and stays a
    /// future hit; a zero count only makes it evictable.
    pub fn release_shape(&mut self, handle: ShapeHandle) {
        let slot = self.resolve(&handle);
        self.shapes.store.decref(slot);
    }

    /// Composites the shape into a bitmap, or returns the cached one.
    ///
    /// The bitmap is valid until the next render call on this instance, which
    /// may reuse its buffer; the borrow on `self` enforces exactly that.
    pub fn render(&mut self, handle: &ShapeHandle) -> &Bitmap {
        self.render_with_postprocess(handle, |_| {})
    }

    /// [`InkJar::render`] with a post-processing pass over fresh pixels.
    ///
    /// The callback runs only when this call actually composites; a cache hit
    /// returns the previously processed bitmap untouched.
    pub fn render_with_postprocess<F>(&mut self, handle: &ShapeHandle, postprocess: F) -> &Bitmap
    where
        F: FnOnce(&mut Bitmap),
    {
        let shape_slot = self.resolve(handle);
        let key = BitmapKey {
            shape_slot,
            shape_generation: handle.generation,
        };
        if let Some(slot) = self.bitmaps.store.lookup(&key) {
            return &self.bitmaps.store.payload(slot).bitmap;
        }

        let shape = self.shapes.store.payload(shape_slot);
        let (width, height) = (shape.width, shape.height);
        let incoming = (width.max(0) as usize) * (height.max(0) as usize + 1) * size_of::<u32>()
            + size_of::<BitmapEntry>();
        let Reserved {
            slot,
            reused,
            freed,
        } = self.bitmaps.store.reserve(incoming);
        for entry in freed {
            self.shapes.store.decref(entry.shape);
        }
        let mut entry = match reused {
            Some(entry) => {
                // Retargeting recycled storage releases the old shape first.
                self.shapes.store.decref(entry.shape);
                entry
            }
            None => BitmapEntry::default(),
        };
        entry.shape = shape_slot;
        self.shapes.store.incref(shape_slot);

        entry.bitmap.reset(width, height);
        let clipped =
            compositor::paint(self.shapes.store.payload(shape_slot), &self.glyphs, &mut entry.bitmap);
        self.bitmaps.clipped_spans += clipped;
        postprocess(&mut entry.bitmap);

        let bytes = entry.bitmap.heap_bytes();
        self.bitmaps.store.insert(slot, key, entry, bytes);
        for evicted in self.bitmaps.store.trim(Some(slot)) {
            self.shapes.store.decref(evicted.shape);
        }
        &self.bitmaps.store.payload(slot).bitmap
    }

    /// Counter snapshot across all three tiers.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            glyphs: TierStats {
                gets: self.glyphs.store.gets,
                hits: self.glyphs.store.hits,
                evictions: self.glyphs.store.evictions,
                entries: self.glyphs.store.len(),
                bytes: self.glyphs.store.bytes(),
                limit: self.glyphs.store.limit(),
            },
            shapes: TierStats {
                gets: self.shapes.store.gets,
                hits: self.shapes.store.hits,
                evictions: self.shapes.store.evictions,
                entries: self.shapes.store.len(),
                bytes: self.shapes.store.bytes(),
                limit: self.shapes.store.limit(),
            },
            bitmaps: TierStats {
                gets: self.bitmaps.store.gets,
                hits: self.bitmaps.store.hits,
                evictions: self.bitmaps.store.evictions,
                entries: self.bitmaps.store.len(),
                bytes: self.bitmaps.store.bytes(),
                limit: self.bitmaps.store.limit(),
            },
            glyphs_rendered: self.glyphs.rendered,
            glyph_spans_seen: self.glyphs.spans_seen,
            clipped_spans: self.bitmaps.clipped_spans,
        }
    }

    /// Maps a handle to its live slot. A stale handle is a usage error that
    /// would silently corrupt reference counts, so it is fatal.
    fn resolve(&self, handle: &ShapeHandle) -> usize {
        if !self.shapes.store.is_occupied(handle.slot)
            || self.shapes.store.generation(handle.slot) != handle.generation
        {
            log::error!("stale shape handle (slot {})", handle.slot);
            panic!("stale shape handle");
        }
        handle.slot
    }
}
