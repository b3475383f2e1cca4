//! Focus metrics and depth-stack focus search.
//!
//! A metric scores one slice of the depth stack over a region. The search
//! narrows the index range around the best of `k` evenly spaced samples
//! until the range is small enough to evaluate exhaustively.
#![allow(clippy::cast_precision_loss)]

use holotrack_core::{FocusMethod, Rect};
use image::GrayImage;
use rayon::prelude::*;

/// A focus scoring strategy.
#[derive(Debug, Clone, Copy)]
pub struct FocusMetric {
    /// Method this entry implements.
    pub method: FocusMethod,
    /// Scores `image` over `rect`.
    pub score: fn(&GrayImage, &Rect) -> f64,
    /// Whether a higher score means sharper focus.
    pub higher_is_better: bool,
}

impl FocusMetric {
    /// Looks up the metric for `method`.
    #[must_use]
    pub fn of(method: FocusMethod) -> &'static FocusMetric {
        &METRICS[method.index()]
    }

    /// Returns true if score `a` is strictly better than `b`.
    #[inline]
    #[must_use]
    pub fn better(&self, a: f64, b: f64) -> bool {
        if self.higher_is_better {
            a > b
        } else {
            a < b
        }
    }
}

/// Indexed by [`FocusMethod::index`].
static METRICS: [FocusMetric; 2] = [
    FocusMetric {
        method: FocusMethod::Fine,
        score: min_intensity,
        higher_is_better: false,
    },
    FocusMetric {
        method: FocusMethod::Coarse,
        score: std_dev,
        higher_is_better: true,
    },
];

fn clip(image: &GrayImage, rect: &Rect) -> (u32, u32, u32, u32) {
    let x0 = rect.x.min(image.width());
    let y0 = rect.y.min(image.height());
    (
        x0,
        y0,
        rect.right().min(image.width()),
        rect.bottom().min(image.height()),
    )
}

/// Darkest pixel in the region. A particle in focus has its darkest core.
fn min_intensity(image: &GrayImage, rect: &Rect) -> f64 {
    let (x0, y0, x1, y1) = clip(image, rect);
    let mut min = u8::MAX;
    for y in y0..y1 {
        for x in x0..x1 {
            min = min.min(image.get_pixel(x, y)[0]);
        }
    }
    f64::from(min)
}

/// Standard deviation of the region's intensity.
fn std_dev(image: &GrayImage, rect: &Rect) -> f64 {
    let (x0, y0, x1, y1) = clip(image, rect);
    let n = u64::from(x1 - x0) * u64::from(y1 - y0);
    if n == 0 {
        return 0.0;
    }
    let (mut sum, mut sum_sq) = (0.0f64, 0.0f64);
    for y in y0..y1 {
        for x in x0..x1 {
            let v = f64::from(image.get_pixel(x, y)[0]);
            sum += v;
            sum_sq += v * v;
        }
    }
    let mean = sum / n as f64;
    (sum_sq / n as f64 - mean * mean).max(0.0).sqrt()
}

fn best_of(metric: &FocusMetric, scored: &[(usize, f64)]) -> (usize, f64) {
    let mut best = scored[0];
    for &(i, s) in &scored[1..] {
        if metric.better(s, best.1) {
            best = (i, s);
        }
    }
    best
}

fn evaluate(
    metric: &FocusMetric,
    stack: &[GrayImage],
    rect: &Rect,
    indices: &[usize],
) -> Vec<(usize, f64)> {
    indices
        .par_iter()
        .map(|&i| (i, (metric.score)(&stack[i], rect)))
        .collect()
}

/// Finds the best-focused slice of `stack[begin..=end]` over `rect`.
///
/// Returns the slice index and its score. Ties resolve to the lowest index.
/// `k` is the number of samples per narrowing round and is raised to 3.
/// An empty stack yields `(0, 0.0)`.
#[must_use]
pub fn focus(
    stack: &[GrayImage],
    rect: &Rect,
    method: FocusMethod,
    begin: usize,
    end: usize,
    k: usize,
) -> (usize, f64) {
    if stack.is_empty() {
        return (0, 0.0);
    }
    let metric = FocusMetric::of(method);
    let k = k.max(3);
    let mut end = end.min(stack.len() - 1);
    let mut begin = begin.min(end);

    loop {
        let n = end - begin + 1;
        if n <= k {
            let all: Vec<usize> = (begin..=end).collect();
            return best_of(metric, &evaluate(metric, stack, rect, &all));
        }

        let mut samples: Vec<usize> = (0..k)
            .map(|i| begin + (i * (n - 1) + (k - 1) / 2) / (k - 1))
            .collect();
        samples.dedup();
        let scored = evaluate(metric, stack, rect, &samples);
        let (best, _) = best_of(metric, &scored);
        let pos = samples.iter().position(|&i| i == best).unwrap_or(0);

        let next_begin = if pos == 0 { begin } else { samples[pos - 1] };
        let next_end = samples.get(pos + 1).copied().unwrap_or(end);
        if next_end - next_begin >= end - begin {
            let all: Vec<usize> = (begin..=end).collect();
            return best_of(metric, &evaluate(metric, stack, rect, &all));
        }
        begin = next_begin;
        end = next_end;
    }
}
