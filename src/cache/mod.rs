//! The three cache tiers and the slot arena they share.

pub(crate) mod bitmaps;
pub(crate) mod glyphs;
pub(crate) mod shapes;
pub(crate) mod store;
