//! Segment and particle types.

use crate::Rect;
use image::GrayImage;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Focus metric used to pick the best depth for a candidate region.
///
/// `Fine` is the slower metric suited to small regions, `Coarse` the
/// faster one used when a region is large.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FocusMethod {
    /// Fine metric for small regions.
    Fine,
    /// Coarse metric for large regions.
    Coarse,
}

impl FocusMethod {
    /// Table index of the method.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            FocusMethod::Fine => 0,
            FocusMethod::Coarse => 1,
        }
    }

    /// Short name used in logs and on the command line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FocusMethod::Fine => "fine",
            FocusMethod::Coarse => "coarse",
        }
    }
}

impl std::fmt::Display for FocusMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate particle region found in one frame.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Reconstruction depth of best focus.
    pub z: f32,
    /// Ordinal of the coarse depth window that produced the segment.
    pub iteration: u32,
    /// Focus score at `z`.
    pub score: f64,
    /// Focus metric used for the search.
    pub method: FocusMethod,
    /// Padded and clamped bounding box in frame coordinates.
    pub rect: Rect,
    /// Crop of the reconstruction at `z` over `rect`.
    pub image: GrayImage,
}

/// A measured particle, index-aligned with its source [`Segment`].
#[derive(Debug, Clone)]
pub struct Particle {
    /// X position relative to the frame centre (m).
    pub x: f32,
    /// Y position relative to the frame centre (m).
    pub y: f32,
    /// Depth (m).
    pub z: f32,
    /// Equivalent diameter (m).
    pub diameter: f32,
    /// Corrected equivalent diameter (m).
    pub diameter_corrected: f32,
    /// Heywood circularity factor (1.0 for a disk).
    pub circularity: f32,
    /// Intensity dynamic range of the segment crop.
    pub dynamic_range: u8,
    /// Effective pixel size (m).
    pub effective_pixel_size: f32,
    /// Thresholded particle image.
    pub image: GrayImage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focus_method_table_index() {
        assert_eq!(FocusMethod::Fine.index(), 0);
        assert_eq!(FocusMethod::Coarse.index(), 1);
        assert_eq!(FocusMethod::Coarse.to_string(), "coarse");
    }
}
