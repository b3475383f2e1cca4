//! holotrack-algorithms: Reconstruction, segmentation and measurement.
//!
//! This crate provides the processing stages between frame discovery and
//! saving:
//! - **Preprocess** - background estimate and skip policy
//! - **Recon** - depth-scanning reconstruction, thresholding, contour
//!   extraction and focus search
//! - **Analysis** - per-segment particle measurement
//!
//! The numerical propagation itself is behind the [`ReconKernel`] trait.
//!
#![warn(missing_docs)]

pub mod analysis;
pub mod contours;
pub mod focus;
pub mod kernel;
pub mod preprocess;
pub mod recon;
pub mod threshold;

pub use analysis::{analyze, measure, Analysis, AnalysisConfig};
pub use contours::{components, external_boxes, fill_holes, Component, Mask};
pub use focus::{focus, FocusMetric};
pub use kernel::{PassthroughKernel, ReconKernel, ZRange};
pub use preprocess::{preprocess, Preprocess, PreprocessConfig};
pub use recon::{Recon, ReconConfig, ReconStats, Reconstructor};
pub use threshold::{binarize_below, dynamic_range, median, otsu_threshold, stretch};

/// Port names used to wire the processing stages.
pub mod ports {
    /// Frames as discovered, with the original image loaded.
    pub const ORIGINAL: &str = "original";
    /// Frames with a preprocessed image and background value.
    pub const PREPROCESSED: &str = "preprocessed";
    /// Frames carrying segments.
    pub const RECONSTRUCTED: &str = "reconstructed";
    /// Frames carrying segments and index-aligned particles.
    pub const ANALYZED: &str = "analyzed";
}
