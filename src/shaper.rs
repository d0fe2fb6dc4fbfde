//! Text shaping seam: trait contract plus the HarfBuzz-backed implementation.
//!
//! Shaping turns a UTF-16 string into an ordered sequence of glyph ids,
//! cluster indices and 26.6 pen advances. The cache core only depends on the
//! [`TextShaper`] trait so the shaper can be swapped or mocked in tests; the
//! production implementation uses HarfBuzz via rustybuzz.

use std::str::FromStr;
use std::sync::Arc;

use rustybuzz::{Face, Language, Script, UnicodeBuffer};

use crate::error::Error;
use crate::fixed::Fixed;

/// A single shaped glyph with positioning information, all distances in 26.6
/// fixed point.
#[derive(Debug, Clone, Copy)]
pub struct ShapedGlyph {
    /// Glyph ID from the font
    pub glyph_id: u32,
    /// Cluster index (which input code unit this glyph represents)
    pub cluster: u32,
    /// Horizontal advance
    pub x_advance: Fixed,
    /// Vertical advance (zero for horizontal text)
    pub y_advance: Fixed,
    /// Horizontal offset from the pen position
    pub x_offset: Fixed,
    /// Vertical offset from the baseline
    pub y_offset: Fixed,
}

/// Text direction for shaping.
///
/// Only horizontal directions are fully supported; `TopToBottom` and
/// `BottomToTop` are accepted and shaped, but canvas derivation treats the
/// result as best-effort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    LeftToRight,
    RightToLeft,
    TopToBottom,
    BottomToTop,
}

impl FromStr for Direction {
    type Err = ();

    /// Parses the conventional HarfBuzz tags `ltr`, `rtl`, `ttb`, `btt`.
    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "ltr" => Ok(Self::LeftToRight),
            "rtl" => Ok(Self::RightToLeft),
            "ttb" => Ok(Self::TopToBottom),
            "btt" => Ok(Self::BottomToTop),
            _ => Err(()),
        }
    }
}

impl From<Direction> for rustybuzz::Direction {
    fn from(d: Direction) -> Self {
        match d {
            Direction::LeftToRight => Self::LeftToRight,
            Direction::RightToLeft => Self::RightToLeft,
            Direction::TopToBottom => Self::TopToBottom,
            Direction::BottomToTop => Self::BottomToTop,
        }
    }
}

/// Script, language and direction hints passed through to the shaper.
#[derive(Debug, Clone, Default)]
pub struct ScriptOptions {
    /// Text direction.
    pub direction: Direction,
    /// Four-letter script tag, e.g. `"Latn"`, `"Arab"`, `"Deva"`.
    pub script: Option<String>,
    /// Language code, e.g. `"en"`, `"ar"`, `"zh"`.
    pub language: Option<String>,
}

/// The shaping contract consumed by the shape cache.
///
/// A whole-call failure fails the shape operation; the shaper must not return
/// partial output.
pub trait TextShaper {
    /// Shapes a UTF-16 string into glyphs in visual order.
    fn shape(&mut self, text: &[u16], options: &ScriptOptions) -> Result<Vec<ShapedGlyph>, Error>;
}

/// HarfBuzz shaper (via rustybuzz) bound to one font face at one pixel size.
pub struct RustybuzzShaper {
    /// Keeps the face data alive; `face` borrows from it.
    _data: Arc<Vec<u8>>,
    face: Face<'static>,
    /// Font units to 26.6 pixel units.
    scale: f32,
    /// Recycled between calls to avoid re-allocating the Unicode buffer.
    buffer: Option<UnicodeBuffer>,
}

impl RustybuzzShaper {
    /// Builds a shaper from raw font bytes at the given pixel size.
    pub fn new(data: Arc<Vec<u8>>, size_px: f32) -> Option<Self> {
        // SAFETY: the Arc is stored next to the Face and dropped with it, so
        // the borrowed bytes outlive every use of the face.
        let face = unsafe {
            let bytes: &'static [u8] = std::mem::transmute(data.as_slice());
            Face::from_slice(bytes, 0)?
        };
        let upem = face.units_per_em();
        if upem == 0 {
            return None;
        }
        Some(Self {
            scale: size_px * 64.0 / upem as f32,
            _data: data,
            face,
            buffer: None,
        })
    }

    fn fixed(&self, font_units: i32) -> Fixed {
        Fixed::from_scaled(font_units as f32 * self.scale)
    }
}

impl TextShaper for RustybuzzShaper {
    fn shape(&mut self, text: &[u16], options: &ScriptOptions) -> Result<Vec<ShapedGlyph>, Error> {
        let mut buffer = self.buffer.take().unwrap_or_else(UnicodeBuffer::new);

        // The input is UCS-2: one code unit per cluster. Lone surrogates are
        // replaced so cluster indices stay aligned with the input.
        for (i, &unit) in text.iter().enumerate() {
            let ch = char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
            buffer.add(ch, i as u32);
        }

        buffer.set_direction(options.direction.into());
        if let Some(script) = options.script.as_deref() {
            match Script::from_str(script) {
                Ok(s) => buffer.set_script(s),
                Err(_) => log::warn!("unknown script tag '{script}', ignoring"),
            }
        }
        if let Some(language) = options.language.as_deref() {
            match Language::from_str(language) {
                Ok(l) => buffer.set_language(l),
                Err(_) => log::warn!("unknown language '{language}', ignoring"),
            }
        }

        let glyphs = rustybuzz::shape(&self.face, &[], buffer);
        let shaped = glyphs
            .glyph_infos()
            .iter()
            .zip(glyphs.glyph_positions())
            .map(|(info, pos)| ShapedGlyph {
                glyph_id: info.glyph_id,
                cluster: info.cluster,
                x_advance: self.fixed(pos.x_advance),
                y_advance: self.fixed(pos.y_advance),
                x_offset: self.fixed(pos.x_offset),
                y_offset: self.fixed(pos.y_offset),
            })
            .collect();

        self.buffer = Some(glyphs.clear());
        Ok(shaped)
    }
}
