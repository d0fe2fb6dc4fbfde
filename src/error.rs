//! Typed error types for the crate boundary.
//!
//! Only whole-call failures surface here. Per-glyph rasterization failures
//! and clipped compositor spans degrade gracefully and are observable through
//! the log and [`crate::CacheStats`] counters instead.

use thiserror::Error;

/// Top-level error type for the shaped-text cache.
#[derive(Debug, Error)]
pub enum Error {
    /// The supplied font data could not be parsed by the rasterizer or the
    /// shaper.
    #[error("font data could not be parsed")]
    InvalidFont,

    /// The font declares a zero or negative line height, so no pixel size can
    /// satisfy the requested line interval.
    #[error("font has unusable vertical metrics")]
    BadFontMetrics,

    /// The text shaper could not be invoked for the whole string. Individual
    /// glyph failures never produce this; they are skipped.
    #[error("text shaping failed: {0}")]
    Shaping(String),
}
