//! Depth-scanning reconstruction and segmentation.
//!
//! The configured depth range is scanned in coarse windows. For every
//! window the kernel produces the depth stack at the fine step together
//! with its minimum projection. Dark regions of the projection inside the
//! frame interior become candidates; each surviving candidate is padded,
//! focused over the window's stack and emitted as a [`Segment`].

use crate::contours::external_boxes;
use crate::focus::focus;
use crate::kernel::{ReconKernel, ZRange};
use crate::ports;
use crate::threshold::binarize_below;
use holotrack_core::{
    relay, Cycle, File, FileQueue, FileStatus, FocusMethod, Ports, Rect, Result, Segment, Worker,
};
use image::imageops;
use image::GrayImage;
use log::debug;
use std::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Reconstruction and segmentation settings.
///
/// Size bounds of 0 disable the corresponding check.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReconConfig {
    /// Columns excluded at the left and right frame edges.
    pub border_width: u32,
    /// Rows excluded at the top and bottom frame edges.
    pub border_height: u32,
    /// Global depth range at the fine step.
    pub z: ZRange,
    /// Coarse window width in fine steps.
    pub step_multiplier: u32,
    /// Samples per focus search round.
    pub focus_k: usize,
    /// Minimum candidate width and height.
    pub size_min: u32,
    /// Maximum candidate width and height.
    pub size_max: u32,
    /// Candidates larger than this in either dimension use the coarse metric.
    pub size_small: u32,
    /// Padding added on every side before focusing.
    pub pad: u32,
    /// Threshold as a fraction of the frame's background value.
    pub threshold_factor: f32,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            border_width: 8,
            border_height: 8,
            z: ZRange::new(0.02, 0.12, 0.001),
            step_multiplier: 10,
            focus_k: 5,
            size_min: 5,
            size_max: 1000,
            size_small: 20,
            pad: 16,
            threshold_factor: 0.9,
        }
    }
}

impl ReconConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the border on both axes.
    #[must_use]
    pub fn with_border(mut self, width: u32, height: u32) -> Self {
        self.border_width = width;
        self.border_height = height;
        self
    }

    /// Sets the depth range.
    #[must_use]
    pub fn with_z(mut self, z: ZRange) -> Self {
        self.z = z;
        self
    }

    /// Sets the coarse window width in fine steps.
    #[must_use]
    pub fn with_step_multiplier(mut self, multiplier: u32) -> Self {
        self.step_multiplier = multiplier;
        self
    }

    /// Sets the focus search sample count.
    #[must_use]
    pub fn with_focus_k(mut self, k: usize) -> Self {
        self.focus_k = k;
        self
    }

    /// Sets the candidate size bounds.
    #[must_use]
    pub fn with_size(mut self, min: u32, max: u32, small: u32) -> Self {
        self.size_min = min;
        self.size_max = max;
        self.size_small = small;
        self
    }

    /// Sets the padding.
    #[must_use]
    pub fn with_pad(mut self, pad: u32) -> Self {
        self.pad = pad;
        self
    }

    /// Sets the threshold factor.
    #[must_use]
    pub fn with_threshold_factor(mut self, factor: f32) -> Self {
        self.threshold_factor = factor;
        self
    }

    /// Returns true if a candidate box passes the size bounds.
    #[must_use]
    pub fn size_accepts(&self, rect: &Rect) -> bool {
        let too_small =
            self.size_min > 0 && (rect.width < self.size_min || rect.height < self.size_min);
        let too_large =
            self.size_max > 0 && (rect.width > self.size_max || rect.height > self.size_max);
        !too_small && !too_large
    }

    /// Focus metric for a candidate box.
    #[must_use]
    pub fn focus_method(&self, rect: &Rect) -> FocusMethod {
        if rect.width > self.size_small || rect.height > self.size_small {
            FocusMethod::Coarse
        } else {
            FocusMethod::Fine
        }
    }

    /// Coarse windows over the depth range, each sampled at the fine step.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn windows(&self) -> Vec<ZRange> {
        self.z
            .windows(self.z.step * self.step_multiplier.max(1) as f32)
    }

    /// Region of a `width` x `height` frame left after removing the border,
    /// or `None` when the border swallows the frame.
    #[must_use]
    pub fn interior(&self, width: u32, height: u32) -> Option<Rect> {
        let (bw, bh) = (self.border_width, self.border_height);
        if width <= bw.saturating_mul(2) || height <= bh.saturating_mul(2) {
            return None;
        }
        Some(Rect::new(bw, bh, width - 2 * bw, height - 2 * bh))
    }
}

/// Counts from one processed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconStats {
    /// External contours found over all windows.
    pub contours: usize,
    /// Segments emitted.
    pub segments: usize,
}

/// Runs the per-frame segmentation with a reconstruction kernel.
pub struct Reconstructor<K> {
    config: ReconConfig,
    kernel: K,
    stack: Vec<GrayImage>,
}

impl<K: ReconKernel> Reconstructor<K> {
    /// Creates a reconstructor.
    pub fn new(config: ReconConfig, kernel: K) -> Self {
        Self {
            config,
            kernel,
            stack: Vec::new(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    /// Appends the segments found in `file.preprocessed` to `file.segments`.
    ///
    /// A frame without segments is marked [`FileStatus::Empty`].
    pub fn process(&mut self, file: &mut File) -> ReconStats {
        let mut stats = ReconStats::default();
        let found_before = file.segments.len();
        let (width, height) = file.preprocessed.dimensions();

        if let Some(interior) = self.config.interior(width, height) {
            let threshold =
                self.config.threshold_factor * f32::from(file.param.background_value);
            self.kernel.set_image(&file.preprocessed);

            for (iteration, window) in self.config.windows().iter().enumerate() {
                let iteration = u32::try_from(iteration).unwrap_or(u32::MAX);
                let projection = self.kernel.reconstruct_min(window, &mut self.stack);
                let Some(last) = self.stack.len().checked_sub(1) else {
                    continue;
                };

                let mask = binarize_below(&projection, &interior, threshold);
                let boxes = external_boxes(&mask);
                stats.contours += boxes.len();

                for rect in boxes {
                    let rect = rect.offset(interior.x, interior.y);
                    if !self.config.size_accepts(&rect) {
                        continue;
                    }
                    let method = self.config.focus_method(&rect);
                    let rect = rect.padded_within(self.config.pad, &interior);
                    let (idx, score) =
                        focus(&self.stack, &rect, method, 0, last, self.config.focus_k);
                    let image =
                        imageops::crop_imm(&self.stack[idx], rect.x, rect.y, rect.width, rect.height)
                            .to_image();
                    file.segments.push(Segment {
                        z: window.z(idx),
                        iteration,
                        score,
                        method,
                        rect,
                        image,
                    });
                }
            }
        }

        stats.segments = file.segments.len() - found_before;
        if file.segments.is_empty() {
            file.set_status(FileStatus::Empty);
        }
        stats
    }
}

/// The RECON stage: segments every frame still in [`FileStatus::None`].
pub struct Recon<K> {
    reconstructor: Reconstructor<K>,
    input: Option<FileQueue>,
    output: Option<FileQueue>,
}

impl<K: ReconKernel> Recon<K> {
    /// Creates the stage.
    pub fn new(config: ReconConfig, kernel: K) -> Self {
        Self {
            reconstructor: Reconstructor::new(config, kernel),
            input: None,
            output: None,
        }
    }
}

impl<K: ReconKernel> Worker for Recon<K> {
    fn name(&self) -> &str {
        "RECON"
    }

    fn init(&mut self, ports: &Ports) -> Result<()> {
        self.input = Some(ports.input(ports::PREPROCESSED)?);
        self.output = Some(ports.output(ports::RECONSTRUCTED)?);
        Ok(())
    }

    fn cycle(&mut self) -> Result<Cycle> {
        let (Some(input), Some(output)) = (&self.input, &self.output) else {
            return Ok(Cycle::stop(0));
        };
        let reconstructor = &mut self.reconstructor;
        Ok(relay(input, output, |file| {
            if file.status() != FileStatus::None {
                return;
            }
            let start = Instant::now();
            debug!("RECON: reconstructing {}", file.name());
            let stats = reconstructor.process(file);
            debug!(
                "RECON: segments {}, contours {}",
                stats.segments, stats.contours
            );
            debug!(
                "RECON: done {} ({:.2} s)",
                file.name(),
                start.elapsed().as_secs_f64()
            );
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::PassthroughKernel;
    use chrono::NaiveDate;
    use image::Luma;

    fn frame(image: GrayImage, background: u8) -> File {
        let t = NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_milli_opt(3, 4, 5, 6))
            .unwrap();
        let mut file = File::new(1, t, 1, FileStatus::None);
        file.param.background_value = background;
        file.preprocessed = image;
        file
    }

    fn single_window() -> ReconConfig {
        ReconConfig::default()
            .with_z(ZRange::new(0.0, 1.0, 1.0))
            .with_step_multiplier(1)
            .with_threshold_factor(1.0)
    }

    #[test]
    fn test_size_filter_bounds() {
        let cfg = ReconConfig::default().with_size(5, 30, 20);
        assert!(cfg.size_accepts(&Rect::new(0, 0, 5, 30)));
        assert!(!cfg.size_accepts(&Rect::new(0, 0, 4, 10)));
        assert!(!cfg.size_accepts(&Rect::new(0, 0, 10, 31)));

        let open = ReconConfig::default().with_size(0, 0, 20);
        assert!(open.size_accepts(&Rect::new(0, 0, 1, 1)));
        assert!(open.size_accepts(&Rect::new(0, 0, 5000, 1)));
    }

    #[test]
    fn test_focus_method_selection() {
        let cfg = ReconConfig::default().with_size(0, 0, 50);
        assert_eq!(cfg.focus_method(&Rect::new(0, 0, 50, 50)), FocusMethod::Fine);
        assert_eq!(cfg.focus_method(&Rect::new(0, 0, 51, 3)), FocusMethod::Coarse);
        assert_eq!(cfg.focus_method(&Rect::new(0, 0, 3, 51)), FocusMethod::Coarse);
    }

    #[test]
    fn test_windows_cover_range() {
        let cfg = ReconConfig::default()
            .with_z(ZRange::new(0.0, 0.1, 0.01))
            .with_step_multiplier(4);
        let windows = cfg.windows();
        assert_eq!(windows.len(), 3);
        let slices: usize = windows.iter().map(ZRange::len).sum();
        assert_eq!(slices, 10);
    }

    #[test]
    fn test_interior() {
        let cfg = ReconConfig::default().with_border(10, 5);
        assert_eq!(cfg.interior(100, 50), Some(Rect::new(10, 5, 80, 40)));
        assert_eq!(cfg.interior(20, 50), None);
    }

    #[test]
    fn test_blank_frame_is_empty() {
        let mut file = frame(GrayImage::from_pixel(64, 64, Luma([200])), 200);
        let mut recon = Reconstructor::new(single_window(), PassthroughKernel::new());
        let stats = recon.process(&mut file);
        assert_eq!(stats, ReconStats::default());
        assert_eq!(file.status(), FileStatus::Empty);
    }

    #[test]
    fn test_frame_smaller_than_border_is_empty() {
        let mut file = frame(GrayImage::from_pixel(10, 10, Luma([0])), 200);
        let mut recon = Reconstructor::new(
            single_window().with_border(5, 5),
            PassthroughKernel::new(),
        );
        recon.process(&mut file);
        assert!(file.segments.is_empty());
        assert_eq!(file.status(), FileStatus::Empty);
    }

    #[test]
    fn test_dark_square_becomes_segment() {
        let mut image = GrayImage::from_pixel(64, 64, Luma([200]));
        for y in 30..40 {
            for x in 20..28 {
                image.put_pixel(x, y, Luma([40]));
            }
        }
        let mut file = frame(image, 200);
        let cfg = single_window().with_border(4, 4).with_size(5, 0, 20).with_pad(3);
        let mut recon = Reconstructor::new(cfg, PassthroughKernel::new());
        let stats = recon.process(&mut file);

        assert_eq!(stats.segments, 1);
        let segment = &file.segments[0];
        assert_eq!(segment.rect, Rect::new(17, 27, 14, 16));
        assert_eq!(segment.method, FocusMethod::Fine);
        assert_eq!(segment.iteration, 0);
        assert_eq!(segment.image.dimensions(), (14, 16));
        assert_eq!(file.status(), FileStatus::None);
    }
}
