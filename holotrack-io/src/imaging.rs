//! Grayscale image files.

use crate::Result;
use image::GrayImage;
use std::path::Path;

/// Decodes an image file as 8-bit grayscale.
///
/// # Errors
/// Returns an error if the file cannot be read or decoded.
pub fn load_gray<P: AsRef<Path>>(path: P) -> Result<GrayImage> {
    Ok(image::open(path)?.into_luma8())
}

/// Encodes `image` to `path`; the format follows the extension.
///
/// # Errors
/// Returns an error if the format is unknown or the write fails.
pub fn save_gray<P: AsRef<Path>>(image: &GrayImage, path: P) -> Result<()> {
    image.save(path)?;
    Ok(())
}
