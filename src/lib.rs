//! Shaped-text bitmap cache: string + font in, reusable coverage bitmap out.
//!
//! This crate provides:
//! - HarfBuzz-based text shaping via rustybuzz, with script/direction/language
//!   hints
//! - Anti-aliased glyph rasterization via swash
//! - A three-tier byte-budgeted cache (glyph spans, shaped strings, composited
//!   bitmaps) so interactive applications can redraw the same short strings
//!   every frame without repeating the expensive work
//!
//! # Architecture
//!
//! [`InkJar`] is the instance type. `shape` turns a string into a cached,
//! reference-counted [`ShapeHandle`] carrying the canvas geometry; `render`
//! composites (or re-serves) a [`Bitmap`] of packed cluster/coverage words
//! plus a per-column cluster strip for caret placement. Shapes pin the glyphs
//! they use and bitmaps pin their shape, so eviction never frees an entry
//! something still points at.
//!
//! A rendered bitmap is valid until the next render call on the same
//! instance. Instances do no internal locking; one mutator at a time.

pub mod postprocess;
pub mod utf;

mod cache;
mod compositor;
mod engine;
mod error;
mod fixed;
mod font;
mod raster;
mod shaper;

pub use cache::bitmaps::Bitmap;
pub use engine::{CacheStats, InkJar, Options, ShapeHandle, TierStats};
pub use error::Error;
pub use fixed::Fixed;
pub use font::{FontData, FontMetrics};
pub use raster::{GlyphRasterizer, RasterSpan, RasterizedGlyph, SwashRasterizer};
pub use shaper::{Direction, RustybuzzShaper, ScriptOptions, ShapedGlyph, TextShaper};
