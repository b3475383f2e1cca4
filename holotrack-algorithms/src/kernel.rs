//! Reconstruction kernel interface and depth ranges.

use image::GrayImage;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A depth range `[start, stop)` sampled every `step`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ZRange {
    /// First depth (m).
    pub start: f32,
    /// End of the range, exclusive (m).
    pub stop: f32,
    /// Sampling step (m).
    pub step: f32,
}

impl ZRange {
    /// Creates a new depth range.
    #[must_use]
    pub fn new(start: f32, stop: f32, step: f32) -> Self {
        Self { start, stop, step }
    }

    /// Number of depth samples in the range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn len(&self) -> usize {
        if !(self.step > 0.0) || self.stop <= self.start {
            return 0;
        }
        let span = (f64::from(self.stop) - f64::from(self.start)) / f64::from(self.step);
        // Absorb float noise such as 10.000001 for an exact multiple.
        (span - 1e-4).ceil().max(1.0) as usize
    }

    /// Returns true if the range holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Depth of sample `i`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn z(&self, i: usize) -> f32 {
        self.start + i as f32 * self.step
    }

    /// Splits the range into consecutive windows `window` wide, each sampled
    /// at this range's step. The last window is cut at `stop`.
    #[must_use]
    pub fn windows(&self, window: f32) -> Vec<ZRange> {
        let outer = ZRange::new(self.start, self.stop, window);
        (0..outer.len())
            .map(|i| {
                let start = outer.z(i);
                ZRange::new(start, (start + window).min(self.stop), self.step)
            })
            .filter(|range| !range.is_empty())
            .collect()
    }
}

/// Numerical reconstruction of a hologram at a given depth.
pub trait ReconKernel: Send {
    /// Sets the hologram to reconstruct.
    fn set_image(&mut self, image: &GrayImage);

    /// Reconstructs the amplitude image at depth `z`.
    fn reconstruct(&mut self, z: f32) -> GrayImage;

    /// Reconstructs every depth of `range` into `stack` and returns the
    /// per-pixel minimum over the stack.
    ///
    /// `stack` is cleared first and reused between calls.
    fn reconstruct_min(&mut self, range: &ZRange, stack: &mut Vec<GrayImage>) -> GrayImage {
        stack.clear();
        let mut projection: Option<GrayImage> = None;
        for i in 0..range.len() {
            let slice = self.reconstruct(range.z(i));
            match projection.as_mut() {
                Some(min) if min.dimensions() == slice.dimensions() => {
                    for (m, s) in min.pixels_mut().zip(slice.pixels()) {
                        m.0[0] = m.0[0].min(s.0[0]);
                    }
                }
                Some(_) => {}
                None => projection = Some(slice.clone()),
            }
            stack.push(slice);
        }
        projection.unwrap_or_default()
    }
}

/// Kernel for imagery that is already in focus: every depth reconstructs to
/// the input image.
#[derive(Debug, Clone, Default)]
pub struct PassthroughKernel {
    image: GrayImage,
}

impl PassthroughKernel {
    /// Creates a kernel with no image set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReconKernel for PassthroughKernel {
    fn set_image(&mut self, image: &GrayImage) {
        self.image.clone_from(image);
    }

    fn reconstruct(&mut self, _z: f32) -> GrayImage {
        self.image.clone()
    }
}
