//! Bitmap tier: composited pixel buffers keyed by shape identity.
//!
//! Bitmaps carry no caller reference counts. A returned bitmap is valid only
//! until the next render call on the same instance; any later call may
//! repurpose its buffer. Each entry does hold one reference on its source
//! shape so the shape cannot be evicted out from under the pixels.

use std::mem::size_of;

use crate::cache::store::Store;

/// A composited bitmap: `width * height` packed words followed by one strip
/// row of `width` cluster words.
///
/// Coverage rows are stored bottom-up (row 0 is the bottom scanline), ready
/// for GL-style upload. Each coverage word packs the source cluster index in
/// the high 16 bits and anti-aliasing coverage in the low 16 bits. The strip
/// row maps each column to the cluster of the glyph occupying it or most
/// recently preceding it, independent of ink.
#[derive(Debug, Default)]
pub struct Bitmap {
    width: i32,
    height: i32,
    words: Vec<u32>,
}

impl Bitmap {
    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// The coverage region, `width * height` words, bottom row first.
    pub fn coverage(&self) -> &[u32] {
        &self.words[..(self.width * self.height) as usize]
    }

    pub fn coverage_mut(&mut self) -> &mut [u32] {
        &mut self.words[..(self.width * self.height) as usize]
    }

    /// The cluster strip, one word per column.
    pub fn cluster_map(&self) -> &[u32] {
        &self.words[(self.width * self.height) as usize..]
    }

    pub(crate) fn cluster_map_mut(&mut self) -> &mut [u32] {
        &mut self.words[(self.width * self.height) as usize..]
    }

    /// One bottom-up coverage row.
    pub fn row(&self, y: i32) -> &[u32] {
        let start = (y * self.width) as usize;
        &self.words[start..start + self.width as usize]
    }

    pub(crate) fn row_mut(&mut self, y: i32) -> &mut [u32] {
        let start = (y * self.width) as usize;
        &mut self.words[start..start + self.width as usize]
    }

    /// Resizes for a new shape and zeroes every word. Capacity only grows.
    pub(crate) fn reset(&mut self, width: i32, height: i32) {
        self.width = width;
        self.height = height;
        let len = (width * (height + 1)) as usize;
        self.words.clear();
        self.words.resize(len, 0);
    }

    pub(crate) fn heap_bytes(&self) -> usize {
        self.words.capacity() * size_of::<u32>() + size_of::<BitmapEntry>()
    }
}

/// Shape identity: arena slot plus generation, so a recycled slot never
/// aliases its previous occupant's bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BitmapKey {
    pub shape_slot: usize,
    pub shape_generation: u64,
}

#[derive(Debug, Default)]
pub(crate) struct BitmapEntry {
    pub bitmap: Bitmap,
    /// Shape slot this entry holds one reference on. Retargeting a reused
    /// entry releases the old shape before the field is overwritten.
    pub shape: usize,
}

pub(crate) struct BitmapCache {
    pub store: Store<BitmapKey, BitmapEntry>,
    /// Spans the compositor refused to write because they fell outside the
    /// bitmap bounds.
    pub clipped_spans: u64,
}

impl BitmapCache {
    pub fn new(limit: usize) -> Self {
        Self {
            store: Store::new("bitmap", limit),
            clipped_spans: 0,
        }
    }
}
