//! Binary masks and external region extraction.
//!
//! Regions are 8-connected foreground sets. The external outline of a
//! region is the outline of the region with its holes filled, so
//! [`external_boxes`] fills holes first: anything nested inside a hole of
//! another region belongs to that region's box.

use holotrack_core::Rect;

/// A binary image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    /// Creates an all-background mask.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    /// Mask width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Mask height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Returns true if `(x, y)` is foreground.
    #[inline]
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[self.index(x, y)]
    }

    /// Sets `(x, y)`.
    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let i = self.index(x, y);
        self.data[i] = value;
    }

    /// Number of foreground pixels.
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    fn neighbors4(&self, x: u32, y: u32) -> impl Iterator<Item = (u32, u32)> {
        let (w, h) = (self.width, self.height);
        [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ]
        .into_iter()
        .filter(move |&(nx, ny)| nx < w && ny < h)
    }

    fn neighbors8(&self, x: u32, y: u32) -> impl Iterator<Item = (u32, u32)> {
        let (w, h) = (self.width, self.height);
        (0..9u32)
            .filter(|&k| k != 4)
            .map(move |k| ((x + k % 3).wrapping_sub(1), (y + k / 3).wrapping_sub(1)))
            .filter(move |&(nx, ny)| nx < w && ny < h)
    }
}

/// One 8-connected foreground region.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Bounding box in mask coordinates.
    pub rect: Rect,
    /// Pixel count.
    pub area: u32,
    /// Pixels with at least one 4-neighbour outside the region.
    pub perimeter: u32,
    /// Mean pixel position `(x, y)`.
    pub centroid: (f64, f64),
}

/// Fills every background area not reachable from the mask border.
#[must_use]
pub fn fill_holes(mask: &Mask) -> Mask {
    let (w, h) = (mask.width, mask.height);
    let mut outside = vec![false; mask.data.len()];
    let mut stack = Vec::new();

    let border = (0..w)
        .flat_map(|x| [(x, 0), (x, h.saturating_sub(1))])
        .chain((0..h).flat_map(|y| [(0, y), (w.saturating_sub(1), y)]));
    for (x, y) in border {
        if w == 0 || h == 0 {
            break;
        }
        let i = mask.index(x, y);
        if !mask.data[i] && !outside[i] {
            outside[i] = true;
            stack.push((x, y));
        }
    }

    // Background is 4-connected where the foreground is 8-connected.
    while let Some((x, y)) = stack.pop() {
        for (nx, ny) in mask.neighbors4(x, y) {
            let i = mask.index(nx, ny);
            if !mask.data[i] && !outside[i] {
                outside[i] = true;
                stack.push((nx, ny));
            }
        }
    }

    Mask {
        width: w,
        height: h,
        data: mask
            .data
            .iter()
            .zip(&outside)
            .map(|(&fg, &out)| fg || !out)
            .collect(),
    }
}

/// Labels the 8-connected foreground regions in raster order of their
/// first pixel.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn components(mask: &Mask) -> Vec<Component> {
    let mut seen = vec![false; mask.data.len()];
    let mut stack = Vec::new();
    let mut found = Vec::new();

    for y in 0..mask.height {
        for x in 0..mask.width {
            let start = mask.index(x, y);
            if !mask.data[start] || seen[start] {
                continue;
            }
            seen[start] = true;
            stack.push((x, y));

            let (mut x0, mut y0, mut x1, mut y1) = (x, y, x, y);
            let mut area = 0u32;
            let mut perimeter = 0u32;
            let (mut sum_x, mut sum_y) = (0.0f64, 0.0f64);

            while let Some((px, py)) = stack.pop() {
                area += 1;
                sum_x += f64::from(px);
                sum_y += f64::from(py);
                x0 = x0.min(px);
                y0 = y0.min(py);
                x1 = x1.max(px);
                y1 = y1.max(py);

                let inner = mask.neighbors4(px, py).count() == 4
                    && mask.neighbors4(px, py).all(|(nx, ny)| mask.get(nx, ny));
                if !inner {
                    perimeter += 1;
                }

                for (nx, ny) in mask.neighbors8(px, py) {
                    let i = mask.index(nx, ny);
                    if mask.data[i] && !seen[i] {
                        seen[i] = true;
                        stack.push((nx, ny));
                    }
                }
            }

            found.push(Component {
                rect: Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1),
                area,
                perimeter,
                centroid: (sum_x / f64::from(area), sum_y / f64::from(area)),
            });
        }
    }
    found
}

/// Bounding boxes of the external outlines in `mask`.
#[must_use]
pub fn external_boxes(mask: &Mask) -> Vec<Rect> {
    components(&fill_holes(mask))
        .into_iter()
        .map(|c| c.rect)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_rect(mask: &mut Mask, r: Rect) {
        for y in r.y..r.bottom() {
            for x in r.x..r.right() {
                mask.set(x, y, true);
            }
        }
    }

    #[test]
    fn test_empty_mask() {
        assert!(external_boxes(&Mask::new(8, 8)).is_empty());
        assert!(external_boxes(&Mask::new(0, 0)).is_empty());
    }

    #[test]
    fn test_separate_blobs_in_raster_order() {
        let mut mask = Mask::new(32, 32);
        fill_rect(&mut mask, Rect::new(20, 2, 3, 4));
        fill_rect(&mut mask, Rect::new(1, 10, 5, 2));
        let boxes = external_boxes(&mask);
        assert_eq!(boxes, vec![Rect::new(20, 2, 3, 4), Rect::new(1, 10, 5, 2)]);
    }

    #[test]
    fn test_diagonal_pixels_are_connected() {
        let mut mask = Mask::new(5, 5);
        mask.set(1, 1, true);
        mask.set(2, 2, true);
        mask.set(3, 3, true);
        assert_eq!(external_boxes(&mask), vec![Rect::new(1, 1, 3, 3)]);
    }

    #[test]
    fn test_nested_region_belongs_to_outer_box() {
        let mut mask = Mask::new(20, 20);
        fill_rect(&mut mask, Rect::new(2, 2, 12, 12));
        for y in 4..12 {
            for x in 4..12 {
                mask.set(x, y, false);
            }
        }
        fill_rect(&mut mask, Rect::new(7, 7, 2, 2));
        assert_eq!(external_boxes(&mask), vec![Rect::new(2, 2, 12, 12)]);
        assert_eq!(components(&mask).len(), 2);
    }

    #[test]
    fn test_region_touching_border() {
        let mut mask = Mask::new(10, 10);
        fill_rect(&mut mask, Rect::new(0, 0, 3, 10));
        assert_eq!(external_boxes(&mask), vec![Rect::new(0, 0, 3, 10)]);
    }

    #[test]
    fn test_fill_holes_keeps_open_background() {
        let mut mask = Mask::new(7, 7);
        fill_rect(&mut mask, Rect::new(1, 1, 5, 5));
        mask.set(3, 3, false);
        mask.set(0, 3, false);
        let filled = fill_holes(&mask);
        assert!(filled.get(3, 3));
        assert!(!filled.get(0, 0));
        assert_eq!(filled.count(), 25);
    }

    #[test]
    fn test_component_measures() {
        let mut mask = Mask::new(10, 10);
        fill_rect(&mut mask, Rect::new(2, 3, 4, 4));
        let c = &components(&mask)[0];
        assert_eq!(c.area, 16);
        assert_eq!(c.perimeter, 12);
        assert!((c.centroid.0 - 3.5).abs() < 1e-9);
        assert!((c.centroid.1 - 4.5).abs() < 1e-9);
    }
}
