//! Particle measurement.
//!
//! Each segment crop is thresholded with Otsu's method and its largest
//! dark region, holes filled, is measured in physical units.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use crate::contours::{components, fill_holes, Mask};
use crate::ports;
use crate::threshold::{dynamic_range, otsu_threshold};
use holotrack_core::{
    relay, Cycle, File, FileQueue, FileStatus, Particle, Ports, Result, Segment, Worker,
};
use image::{GrayImage, Luma};
use log::debug;
use std::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Measurement settings.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnalysisConfig {
    /// Effective pixel size in the object plane (m).
    pub pixel_size: f32,
    /// Regions with fewer pixels are discarded together with their segment.
    pub min_area: u32,
    /// Factor applied to the equivalent diameter.
    pub diameter_correction: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            pixel_size: 3.45e-6,
            min_area: 4,
            diameter_correction: 1.0,
        }
    }
}

impl AnalysisConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pixel size.
    #[must_use]
    pub fn with_pixel_size(mut self, size: f32) -> Self {
        self.pixel_size = size;
        self
    }

    /// Sets the minimum region area.
    #[must_use]
    pub fn with_min_area(mut self, area: u32) -> Self {
        self.min_area = area;
        self
    }

    /// Sets the diameter correction factor.
    #[must_use]
    pub fn with_diameter_correction(mut self, factor: f32) -> Self {
        self.diameter_correction = factor;
        self
    }
}

/// Measures `segment` inside a `frame_width` x `frame_height` frame.
///
/// Returns `None` when the crop holds no dark region of at least
/// `min_area` pixels.
#[must_use]
pub fn measure(
    config: &AnalysisConfig,
    segment: &Segment,
    frame_width: u32,
    frame_height: u32,
) -> Option<Particle> {
    let crop = &segment.image;
    let (w, h) = crop.dimensions();
    if w == 0 || h == 0 {
        return None;
    }

    let t = otsu_threshold(crop);
    let mut mask = Mask::new(w, h);
    for (x, y, p) in crop.enumerate_pixels() {
        mask.set(x, y, p[0] <= t);
    }
    let region = components(&fill_holes(&mask))
        .into_iter()
        .reduce(|best, c| if c.area > best.area { c } else { best })?;
    if region.area < config.min_area.max(1) {
        return None;
    }

    let psz = f64::from(config.pixel_size);
    let area = f64::from(region.area);
    let diameter = 2.0 * (area / PI).sqrt() * psz;
    let circularity = f64::from(region.perimeter) / (2.0 * (PI * area).sqrt());
    let cx = f64::from(segment.rect.x) + region.centroid.0 + 0.5;
    let cy = f64::from(segment.rect.y) + region.centroid.1 + 0.5;

    let image = GrayImage::from_fn(w, h, |x, y| {
        Luma([if mask.get(x, y) { 0 } else { u8::MAX }])
    });

    Some(Particle {
        x: ((cx - f64::from(frame_width) / 2.0) * psz) as f32,
        y: ((cy - f64::from(frame_height) / 2.0) * psz) as f32,
        z: segment.z,
        diameter: diameter as f32,
        diameter_corrected: (diameter * f64::from(config.diameter_correction)) as f32,
        circularity: circularity as f32,
        dynamic_range: dynamic_range(crop),
        effective_pixel_size: config.pixel_size,
        image,
    })
}

/// Replaces `file.particles` with one particle per measurable segment and
/// drops the segments that could not be measured.
pub fn analyze(config: &AnalysisConfig, file: &mut File) {
    if file.status() != FileStatus::None {
        return;
    }
    let (width, height) = file.preprocessed.dimensions();
    let (segments, particles): (Vec<_>, Vec<_>) = std::mem::take(&mut file.segments)
        .into_iter()
        .filter_map(|s| measure(config, &s, width, height).map(|p| (s, p)))
        .unzip();
    debug!("ANALYSIS: {} particles in {}", particles.len(), file.name());

    file.segments = segments;
    file.particles = particles;
    file.set_status(if file.particles.is_empty() {
        FileStatus::Empty
    } else {
        FileStatus::NotEmpty
    });
}

/// The ANALYSIS stage.
pub struct Analysis {
    config: AnalysisConfig,
    input: Option<FileQueue>,
    output: Option<FileQueue>,
}

impl Analysis {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            input: None,
            output: None,
        }
    }
}

impl Worker for Analysis {
    fn name(&self) -> &str {
        "ANALYSIS"
    }

    fn init(&mut self, ports: &Ports) -> Result<()> {
        self.input = Some(ports.input(ports::RECONSTRUCTED)?);
        self.output = Some(ports.output(ports::ANALYZED)?);
        Ok(())
    }

    fn cycle(&mut self) -> Result<Cycle> {
        let (Some(input), Some(output)) = (&self.input, &self.output) else {
            return Ok(Cycle::stop(0));
        };
        let config = &self.config;
        Ok(relay(input, output, |file| analyze(config, file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use holotrack_core::{FocusMethod, Rect};

    fn disk_segment(rect: Rect, radius: f64) -> Segment {
        let c = (f64::from(rect.width) / 2.0, f64::from(rect.height) / 2.0);
        let image = GrayImage::from_fn(rect.width, rect.height, |x, y| {
            let dx = f64::from(x) + 0.5 - c.0;
            let dy = f64::from(y) + 0.5 - c.1;
            Luma([if dx * dx + dy * dy < radius * radius { 30 } else { 210 }])
        });
        Segment {
            z: 0.05,
            iteration: 0,
            score: 30.0,
            method: FocusMethod::Fine,
            rect,
            image,
        }
    }

    #[test]
    fn test_disk_measurement() {
        let config = AnalysisConfig::new().with_pixel_size(1.0e-6);
        let segment = disk_segment(Rect::new(40, 40, 40, 40), 10.0);
        let p = measure(&config, &segment, 120, 120).unwrap();

        assert_relative_eq!(p.diameter, 20.0e-6, max_relative = 0.05);
        assert_relative_eq!(p.diameter_corrected, p.diameter);
        assert_relative_eq!(p.x, 0.0, epsilon = 1.0e-7);
        assert_relative_eq!(p.y, 0.0, epsilon = 1.0e-7);
        assert_relative_eq!(p.z, 0.05);
        assert_eq!(p.dynamic_range, 180);
        assert!(p.circularity > 0.7 && p.circularity < 1.3, "{}", p.circularity);
        assert_eq!(p.image.dimensions(), (40, 40));
    }

    #[test]
    fn test_diameter_correction() {
        let config = AnalysisConfig::new().with_diameter_correction(1.5);
        let p = measure(&config, &disk_segment(Rect::new(0, 0, 30, 30), 8.0), 100, 100).unwrap();
        assert_relative_eq!(p.diameter_corrected, p.diameter * 1.5, max_relative = 1e-6);
    }

    #[test]
    fn test_tiny_region_is_rejected() {
        let config = AnalysisConfig::new().with_min_area(50);
        let segment = disk_segment(Rect::new(0, 0, 20, 20), 2.0);
        assert!(measure(&config, &segment, 100, 100).is_none());
    }

    #[test]
    fn test_analyze_keeps_segments_aligned() {
        let t = NaiveDate::from_ymd_opt(2022, 2, 2)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let mut file = File::new(1, t, 3, FileStatus::None);
        file.preprocessed = GrayImage::new(200, 200);
        file.segments = vec![
            disk_segment(Rect::new(10, 10, 20, 20), 1.0),
            disk_segment(Rect::new(60, 60, 30, 30), 9.0),
        ];
        analyze(&AnalysisConfig::new().with_min_area(20), &mut file);

        assert_eq!(file.segments.len(), 1);
        assert_eq!(file.particles.len(), 1);
        assert_eq!(file.segments[0].rect, Rect::new(60, 60, 30, 30));
        assert_eq!(file.status(), FileStatus::NotEmpty);
    }

    #[test]
    fn test_analyze_without_particles_marks_empty() {
        let t = NaiveDate::from_ymd_opt(2022, 2, 2)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let mut file = File::new(1, t, 4, FileStatus::None);
        analyze(&AnalysisConfig::default(), &mut file);
        assert_eq!(file.status(), FileStatus::Empty);
    }
}
