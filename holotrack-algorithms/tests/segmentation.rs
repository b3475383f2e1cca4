use approx::assert_relative_eq;
use chrono::NaiveDate;
use holotrack_algorithms::{PassthroughKernel, ReconConfig, ReconKernel, Reconstructor, ZRange};
use holotrack_core::{File, FileStatus, FocusMethod, Rect};
use image::{GrayImage, Luma};

fn frame(image: GrayImage, background: u8) -> File {
    let t = NaiveDate::from_ymd_opt(2021, 11, 30)
        .and_then(|d| d.and_hms_milli_opt(14, 15, 16, 170))
        .unwrap();
    let mut file = File::new(1, t, 42, FileStatus::None);
    file.param.background_value = background;
    file.preprocessed = image;
    file
}

fn draw_disk(image: &mut GrayImage, cx: f64, cy: f64, radius: f64, value: u8) {
    for y in 0..image.height() {
        for x in 0..image.width() {
            let dx = f64::from(x) + 0.5 - cx;
            let dy = f64::from(y) + 0.5 - cy;
            if dx * dx + dy * dy < radius * radius {
                image.put_pixel(x, y, Luma([value]));
            }
        }
    }
}

fn draw_square(image: &mut GrayImage, x0: u32, y0: u32, size: u32, value: u8) {
    for y in y0..y0 + size {
        for x in x0..x0 + size {
            image.put_pixel(x, y, Luma([value]));
        }
    }
}

fn single_window() -> ReconConfig {
    ReconConfig::default()
        .with_border(8, 8)
        .with_z(ZRange::new(0.0, 1.0, 1.0))
        .with_step_multiplier(1)
        .with_threshold_factor(1.0)
}

/// Dark pixels get lighter the further `z` is from `focus_z`.
struct DepthKernel {
    image: GrayImage,
    focus_z: f32,
}

impl ReconKernel for DepthKernel {
    fn set_image(&mut self, image: &GrayImage) {
        self.image = image.clone();
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn reconstruct(&mut self, z: f32) -> GrayImage {
        let blur = ((z - self.focus_z).abs() * 400.0).min(120.0) as u8;
        let mut out = self.image.clone();
        for p in out.pixels_mut() {
            if p.0[0] < 128 {
                p.0[0] = blur;
            }
        }
        out
    }
}

#[test]
fn test_single_disk_end_to_end() {
    let mut image = GrayImage::from_pixel(256, 256, Luma([200]));
    draw_disk(&mut image, 100.0, 100.0, 10.0, 0);
    let mut file = frame(image, 200);

    let config = single_window().with_size(5, 0, 50).with_pad(2);
    let mut recon = Reconstructor::new(config, PassthroughKernel::new());
    let stats = recon.process(&mut file);

    assert_eq!(stats.segments, 1);
    assert_eq!(file.segments.len(), 1);
    let segment = &file.segments[0];
    assert_eq!(segment.rect, Rect::new(88, 88, 24, 24));
    assert_eq!(segment.method, FocusMethod::Fine);
    assert_eq!(segment.image.dimensions(), (24, 24));
    assert_relative_eq!(segment.score, 0.0);
    assert_ne!(file.status(), FileStatus::Empty);
}

#[test]
fn test_size_filtering() {
    let mut image = GrayImage::from_pixel(200, 200, Luma([200]));
    draw_square(&mut image, 20, 20, 3, 10);
    draw_square(&mut image, 60, 20, 10, 10);
    draw_square(&mut image, 100, 100, 40, 10);

    let bounded = single_window().with_size(5, 30, 20).with_pad(0);
    let mut file = frame(image.clone(), 200);
    Reconstructor::new(bounded, PassthroughKernel::new()).process(&mut file);
    let rects: Vec<Rect> = file.segments.iter().map(|s| s.rect).collect();
    assert_eq!(rects, vec![Rect::new(60, 20, 10, 10)]);

    let open_max = single_window().with_size(5, 0, 20).with_pad(0);
    let mut file = frame(image, 200);
    Reconstructor::new(open_max, PassthroughKernel::new()).process(&mut file);
    let found: Vec<(Rect, FocusMethod)> = file.segments.iter().map(|s| (s.rect, s.method)).collect();
    assert_eq!(
        found,
        vec![
            (Rect::new(60, 20, 10, 10), FocusMethod::Fine),
            (Rect::new(100, 100, 40, 40), FocusMethod::Coarse),
        ]
    );
}

#[test]
fn test_rect_stays_inside_interior_with_huge_pad() {
    let mut image = GrayImage::from_pixel(120, 90, Luma([200]));
    draw_square(&mut image, 12, 10, 8, 0);
    draw_square(&mut image, 100, 70, 9, 0);
    for pad in [1000, u32::MAX / 2 + 1, u32::MAX] {
        let config = single_window().with_border(10, 6).with_size(0, 0, 50).with_pad(pad);
        let interior = config.interior(120, 90).unwrap();

        let mut file = frame(image.clone(), 200);
        Reconstructor::new(config, PassthroughKernel::new()).process(&mut file);
        assert_eq!(file.segments.len(), 2, "pad {pad}");
        for segment in &file.segments {
            assert_eq!(segment.rect, interior, "pad {pad}");
            assert_eq!(segment.image.dimensions(), (segment.rect.width, segment.rect.height));
        }
    }
}

#[test]
fn test_candidates_touching_the_border_are_clipped() {
    let mut image = GrayImage::from_pixel(64, 64, Luma([200]));
    draw_square(&mut image, 0, 20, 14, 0);
    let config = single_window().with_size(0, 0, 50).with_pad(2);
    let mut file = frame(image, 200);
    Reconstructor::new(config, PassthroughKernel::new()).process(&mut file);
    assert_eq!(file.segments.len(), 1);
    assert_eq!(file.segments[0].rect.x, 8);
}

#[test]
fn test_focus_search_picks_depth_of_best_focus() {
    let mut image = GrayImage::from_pixel(128, 128, Luma([200]));
    draw_disk(&mut image, 64.0, 64.0, 6.0, 0);
    let kernel = DepthKernel {
        image: GrayImage::default(),
        focus_z: 0.35,
    };
    let config = single_window()
        .with_z(ZRange::new(0.0, 1.0, 0.05))
        .with_step_multiplier(20)
        .with_size(3, 0, 50);
    let mut file = frame(image, 200);
    Reconstructor::new(config, kernel).process(&mut file);

    assert_eq!(file.segments.len(), 1);
    assert_relative_eq!(file.segments[0].z, 0.35, epsilon = 1e-5);
    assert_relative_eq!(file.segments[0].score, 0.0);
}

#[test]
fn test_every_window_is_scanned() {
    let mut image = GrayImage::from_pixel(128, 128, Luma([200]));
    draw_disk(&mut image, 64.0, 64.0, 6.0, 0);
    let kernel = DepthKernel {
        image: GrayImage::default(),
        focus_z: 0.35,
    };
    let config = single_window()
        .with_z(ZRange::new(0.0, 1.0, 0.05))
        .with_step_multiplier(5)
        .with_size(3, 0, 50);
    let mut file = frame(image, 200);
    Reconstructor::new(config, kernel).process(&mut file);

    let iterations: Vec<u32> = file.segments.iter().map(|s| s.iteration).collect();
    assert_eq!(iterations, vec![0, 1, 2, 3]);
    for segment in &file.segments {
        assert!((0.0..1.0).contains(&segment.z));
    }
    let best = file
        .segments
        .iter()
        .min_by(|a, b| a.score.total_cmp(&b.score))
        .unwrap();
    assert_eq!(best.iteration, 1);
    assert_relative_eq!(best.z, 0.35, epsilon = 1e-5);
}
