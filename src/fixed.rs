//! 26.6 fixed-point arithmetic.
//!
//! Shaping and pen positioning work in 1/64th-of-a-pixel units, the same
//! resolution HarfBuzz and FreeType use. The low 6 bits of a value are the
//! fractional part.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// A signed 26.6 fixed-point value (1/64th-of-a-pixel units).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed(pub i32);

impl Fixed {
    pub const ZERO: Self = Self(0);

    /// One pixel.
    pub const ONE: Self = Self(64);

    /// The smallest representable step, 1/64 px.
    pub const EPSILON: Self = Self(1);

    /// Converts a whole pixel count.
    pub const fn from_px(px: i32) -> Self {
        Self(px << 6)
    }

    /// Converts scaled font units, rounding to the nearest 1/64 px.
    pub fn from_scaled(value: f32) -> Self {
        Self(value.round() as i32)
    }

    /// The whole-pixel part, truncated toward negative infinity.
    pub const fn floor(self) -> i32 {
        self.0 >> 6
    }

    /// The sub-pixel fraction, always in `0..64`.
    pub const fn fract(self) -> u8 {
        (self.0 & 0x3f) as u8
    }

    /// Grid-fits an extent to whole pixels, rounding away from zero on any
    /// fractional remainder. Positive values round up, negative values round
    /// down, so ink on either side of zero is never clipped.
    pub const fn grid_fit(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + 63) >> 6
        } else {
            -((-self.0 + 63) >> 6)
        }
    }
}

impl Add for Fixed {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Fixed {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Fixed {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Fixed {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Fixed {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 as f64 / 64.0)
    }
}
