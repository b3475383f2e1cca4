//! Intensity statistics and binarization.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use crate::contours::Mask;
use holotrack_core::Rect;
use image::GrayImage;

fn histogram(image: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for &v in image.as_raw() {
        hist[usize::from(v)] += 1;
    }
    hist
}

/// Binarizes the `roi` part of `image`: pixels darker than `threshold`
/// become foreground, everything at or above it background.
///
/// The mask has the size of `roi` after clipping it to the image.
#[must_use]
pub fn binarize_below(image: &GrayImage, roi: &Rect, threshold: f32) -> Mask {
    let x0 = roi.x.min(image.width());
    let y0 = roi.y.min(image.height());
    let x1 = roi.right().min(image.width());
    let y1 = roi.bottom().min(image.height());

    let mut mask = Mask::new(x1 - x0, y1 - y0);
    for y in y0..y1 {
        for x in x0..x1 {
            if f32::from(image.get_pixel(x, y)[0]) < threshold {
                mask.set(x - x0, y - y0, true);
            }
        }
    }
    mask
}

/// Median intensity. Returns 0 for an empty image.
#[must_use]
pub fn median(image: &GrayImage) -> u8 {
    let n = image.as_raw().len() as u64;
    if n == 0 {
        return 0;
    }
    let hist = histogram(image);
    let half = n / 2;
    let mut count = 0;
    for (value, &h) in hist.iter().enumerate() {
        count += h;
        if count > half {
            return value as u8;
        }
    }
    u8::MAX
}

/// Difference between the brightest and the darkest pixel.
#[must_use]
pub fn dynamic_range(image: &GrayImage) -> u8 {
    let raw = image.as_raw();
    match (raw.iter().min(), raw.iter().max()) {
        (Some(min), Some(max)) => max - min,
        _ => 0,
    }
}

/// Otsu's threshold: the value `t` that best separates `[0, t]` from
/// `(t, 255]` by between-class variance.
#[must_use]
pub fn otsu_threshold(image: &GrayImage) -> u8 {
    let hist = histogram(image);
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 0;
    }
    let sum: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut sum_back = 0.0;
    let mut weight_back = 0u64;
    let mut best = 0.0;
    let mut threshold = 0u8;
    for (t, &h) in hist.iter().enumerate() {
        weight_back += h;
        if weight_back == 0 {
            continue;
        }
        let weight_fore = total - weight_back;
        if weight_fore == 0 {
            break;
        }
        sum_back += t as f64 * h as f64;
        let mean_back = sum_back / weight_back as f64;
        let mean_fore = (sum - sum_back) / weight_fore as f64;
        let between = weight_back as f64 * weight_fore as f64 * (mean_back - mean_fore).powi(2);
        if between > best {
            best = between;
            threshold = t as u8;
        }
    }
    threshold
}

/// Linear contrast stretch of `[low, high]` onto `[out_low, out_high]`,
/// saturating outside the input range.
#[must_use]
pub fn stretch(image: &GrayImage, low: u8, high: u8, out_low: u8, out_high: u8) -> GrayImage {
    let mut out = image.clone();
    let span = f32::from(high.saturating_sub(low)).max(1.0);
    let out_span = f32::from(out_high) - f32::from(out_low);
    for p in out.pixels_mut() {
        let v = p.0[0];
        p.0[0] = if v <= low {
            out_low
        } else if v >= high {
            out_high
        } else {
            let t = f32::from(v - low) / span;
            (f32::from(out_low) + t * out_span).round().clamp(0.0, 255.0) as u8
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_binarize_below_is_strict() {
        let mut image = GrayImage::from_pixel(6, 4, Luma([200]));
        image.put_pixel(2, 1, Luma([199]));
        image.put_pixel(3, 1, Luma([200]));
        image.put_pixel(0, 0, Luma([0]));

        let mask = binarize_below(&image, &Rect::new(1, 1, 4, 2), 200.0);
        assert_eq!((mask.width(), mask.height()), (4, 2));
        assert!(mask.get(1, 0));
        assert!(!mask.get(2, 0));
        assert_eq!(mask.count(), 1, "pixel outside the roi must be ignored");
    }

    #[test]
    fn test_binarize_clips_roi() {
        let image = GrayImage::from_pixel(4, 4, Luma([0]));
        let mask = binarize_below(&image, &Rect::new(2, 2, 10, 10), 1.0);
        assert_eq!((mask.width(), mask.height()), (2, 2));
        assert_eq!(mask.count(), 4);
    }

    #[test]
    fn test_median() {
        let mut image = GrayImage::from_pixel(5, 1, Luma([10]));
        image.put_pixel(0, 0, Luma([200]));
        image.put_pixel(1, 0, Luma([250]));
        assert_eq!(median(&image), 10);
        assert_eq!(median(&GrayImage::default()), 0);
    }

    #[test]
    fn test_dynamic_range() {
        let mut image = GrayImage::from_pixel(3, 3, Luma([120]));
        image.put_pixel(1, 1, Luma([20]));
        assert_eq!(dynamic_range(&image), 100);
        assert_eq!(dynamic_range(&GrayImage::default()), 0);
    }

    #[test]
    fn test_otsu_separates_two_levels() {
        let mut image = GrayImage::from_pixel(10, 10, Luma([200]));
        for x in 0..5 {
            for y in 0..10 {
                image.put_pixel(x, y, Luma([40]));
            }
        }
        let t = otsu_threshold(&image);
        assert!((40..200).contains(&t), "threshold {t}");
    }

    #[test]
    fn test_stretch() {
        let image = GrayImage::from_raw(4, 1, vec![10, 100, 150, 250]).unwrap();
        let out = stretch(&image, 100, 200, 0, 255);
        assert_eq!(out.as_raw(), &vec![0, 0, 128, 255]);
    }
}
