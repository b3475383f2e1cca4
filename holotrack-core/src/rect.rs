//! Axis-aligned pixel rectangles.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in pixel coordinates.
///
/// `x`/`y` is the top-left corner; the rectangle covers
/// `[x, x + width) x [y, y + height)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Creates a new rectangle.
    #[inline]
    #[must_use]
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    #[inline]
    #[must_use]
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[inline]
    #[must_use]
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Number of pixels covered.
    #[inline]
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns true if `other` lies entirely inside this rectangle.
    #[must_use]
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Moves the rectangle by a non-negative offset.
    #[must_use]
    pub fn offset(&self, dx: u32, dy: u32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Grows the rectangle by `pad` on every side and clamps it to `bounds`.
    ///
    /// The left/top edges never move past the bounds' left/top edges and the
    /// size is cut so the right/bottom edges stay inside the bounds. The
    /// rectangle must start inside `bounds`.
    #[must_use]
    pub fn padded_within(&self, pad: u32, bounds: &Rect) -> Self {
        let x = self.x.saturating_sub(pad).max(bounds.x);
        let y = self.y.saturating_sub(pad).max(bounds.y);
        let grow = pad.saturating_mul(2);
        let width = self
            .width
            .saturating_add(grow)
            .min(bounds.right().saturating_sub(x));
        let height = self
            .height
            .saturating_add(grow)
            .min(bounds.bottom().saturating_sub(y));
        Self::new(x, y, width, height)
    }
}
