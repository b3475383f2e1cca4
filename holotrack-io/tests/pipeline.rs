use holotrack_algorithms::{
    ports, Analysis, AnalysisConfig, PassthroughKernel, Preprocess, PreprocessConfig, Recon,
    ReconConfig, ZRange,
};
use holotrack_core::{FileQueue, Pipeline, Ports, WorkerConfig};
use holotrack_io::{CsvConnector, Database, Saver, SaverConfig, Watcher, WatcherConfig};
use image::{GrayImage, Luma};
use std::path::Path;

fn write_frame(dir: &Path, name: &str, disk: bool) {
    let mut image = GrayImage::from_pixel(128, 128, Luma([200]));
    if disk {
        for y in 0..128u32 {
            for x in 0..128u32 {
                let dx = f64::from(x) + 0.5 - 64.0;
                let dy = f64::from(y) + 0.5 - 64.0;
                if dx * dx + dy * dy < 64.0 {
                    image.put_pixel(x, y, Luma([30]));
                }
            }
        }
    }
    image.save(dir.join(name)).unwrap();
}

#[test]
fn test_watch_to_store() {
    let incoming = tempfile::tempdir().unwrap();
    let results = tempfile::tempdir().unwrap();
    write_frame(incoming.path(), "02_2024-07-01_09.30.00.500_000001.png", true);
    write_frame(incoming.path(), "02_2024-07-01_09.30.00.600_000002.png", false);
    write_frame(incoming.path(), "02_2024-07-01_09.30.00.700_000003.png", true);
    std::fs::write(incoming.path().join("README"), "not a frame").unwrap();

    let original = FileQueue::bounded(4);
    let preprocessed = FileQueue::bounded(4);
    let reconstructed = FileQueue::bounded(4);
    let analyzed = FileQueue::bounded(4);

    let saver_config = SaverConfig::new(results.path());
    let db = Database::open(CsvConnector::new(saver_config.db_dir())).unwrap();
    let recon_config = ReconConfig::default()
        .with_border(8, 8)
        .with_z(ZRange::new(0.0, 0.004, 0.001))
        .with_step_multiplier(4)
        .with_size(5, 0, 50)
        .with_pad(4);

    let config = WorkerConfig::default();
    let mut pipeline = Pipeline::new();
    pipeline
        .spawn(
            Watcher::new(WatcherConfig::new(incoming.path())),
            Ports::new().with_output(ports::ORIGINAL, &original),
            &config,
        )
        .unwrap();
    pipeline
        .spawn(
            Preprocess::new(PreprocessConfig::default()),
            Ports::new()
                .with_input(ports::ORIGINAL, &original)
                .with_output(ports::PREPROCESSED, &preprocessed),
            &config,
        )
        .unwrap();
    pipeline
        .spawn(
            Recon::new(recon_config, PassthroughKernel::new()),
            Ports::new()
                .with_input(ports::PREPROCESSED, &preprocessed)
                .with_output(ports::RECONSTRUCTED, &reconstructed),
            &config,
        )
        .unwrap();
    pipeline
        .spawn(
            Analysis::new(AnalysisConfig::default()),
            Ports::new()
                .with_input(ports::RECONSTRUCTED, &reconstructed)
                .with_output(ports::ANALYZED, &analyzed),
            &config,
        )
        .unwrap();
    pipeline
        .spawn(
            Saver::new(saver_config, db),
            Ports::new().with_input(ports::ANALYZED, &analyzed),
            &config,
        )
        .unwrap();
    pipeline.join().unwrap();

    let remaining: Vec<_> = std::fs::read_dir(incoming.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(remaining, vec!["README".to_string()]);

    let day = results.path().join("original/2024-07-01/09");
    assert!(day.join("02_2024-07-01_09.30.00.500_000001.png").is_file());
    assert!(!day.join("02_2024-07-01_09.30.00.600_000002.png").exists());
    assert!(day.join("02_2024-07-01_09.30.00.700_000003.png").is_file());

    let mut db = Database::open(CsvConnector::new(results.path().join("db"))).unwrap();
    let rows = db.read_particles(0).unwrap();
    let frames: Vec<(u32, u32)> = rows.iter().map(|r| (r.frame, r.particle)).collect();
    assert_eq!(frames, vec![(1, 1), (3, 1)]);
    assert_eq!(rows[0].rect, rows[1].rect);
}
