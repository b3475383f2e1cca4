//! holotrack CLI
//!
//! Runs the holographic particle pipeline over a watched directory and
//! inspects its outputs.
#![allow(clippy::uninlined_format_args, clippy::too_many_lines)]

use clap::{Parser, Subcommand};
use holotrack_algorithms::{
    ports, Analysis, AnalysisConfig, PassthroughKernel, Preprocess, PreprocessConfig, Recon,
    ReconConfig, ZRange,
};
use holotrack_core::{File, FileQueue, Pipeline, Ports, WorkerConfig};
use holotrack_io::{CsvConnector, Database, Saver, SaverConfig, Watcher, WatcherConfig};
use log::info;
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    HolotrackIo(#[from] holotrack_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] holotrack_core::Error),

    #[error("Output error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Holographic particle detection pipeline.
#[derive(Parser)]
#[command(name = "holotrack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug messages
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process frames from a directory until done
    Run {
        /// Directory scanned for frames
        #[arg(short, long)]
        watch: PathBuf,

        /// Results directory
        #[arg(short, long)]
        results: PathBuf,

        /// Keep watching for new frames
        #[arg(long)]
        forever: bool,

        /// Pause between scans when watching (ms)
        #[arg(long, default_value = "1000")]
        scan_interval_ms: u64,

        /// Queue capacity between stages
        #[arg(long, default_value = "16")]
        queue_capacity: usize,

        /// First reconstruction depth (m)
        #[arg(long, default_value = "0.02")]
        z_start: f32,

        /// End of the reconstruction range (m)
        #[arg(long, default_value = "0.12")]
        z_stop: f32,

        /// Fine depth step (m)
        #[arg(long, default_value = "0.001")]
        z_step: f32,

        /// Coarse window width in fine steps
        #[arg(long, default_value = "10")]
        step_multiplier: u32,

        /// Border excluded on every side (pixels)
        #[arg(long, default_value = "8")]
        border: u32,

        /// Threshold as a fraction of the background value
        #[arg(long, default_value = "0.9")]
        threshold_factor: f32,

        /// Minimum candidate size, 0 disables (pixels)
        #[arg(long, default_value = "5")]
        size_min: u32,

        /// Maximum candidate size, 0 disables (pixels)
        #[arg(long, default_value = "1000")]
        size_max: u32,

        /// Largest candidate focused with the fine metric (pixels)
        #[arg(long, default_value = "20")]
        size_small: u32,

        /// Padding around candidates (pixels)
        #[arg(long, default_value = "16")]
        pad: u32,

        /// Skip frames with a smaller dynamic range, 0 disables
        #[arg(long, default_value = "0")]
        min_dynamic_range: u8,

        /// Effective pixel size (m)
        #[arg(long, default_value = "3.45e-6")]
        pixel_size: f32,

        /// Keep frames without particles
        #[arg(long)]
        keep_empty: bool,

        /// Keep skipped frames
        #[arg(long)]
        keep_skipped: bool,

        /// Write preprocessed images
        #[arg(long)]
        save_preprocessed: bool,
    },

    /// Show the identity and output paths of a frame file
    Name {
        /// Frame file path
        path: PathBuf,

        /// Results directory used for the derived paths
        #[arg(short, long, default_value = ".")]
        results: PathBuf,
    },

    /// Print stored particles
    Particles {
        /// Particle store directory
        #[arg(long)]
        db: PathBuf,

        /// Smallest id to print
        #[arg(long, default_value = "0")]
        min_id: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Run {
            watch,
            results,
            forever,
            scan_interval_ms,
            queue_capacity,
            z_start,
            z_stop,
            z_step,
            step_multiplier,
            border,
            threshold_factor,
            size_min,
            size_max,
            size_small,
            pad,
            min_dynamic_range,
            pixel_size,
            keep_empty,
            keep_skipped,
            save_preprocessed,
        } => {
            let watcher = WatcherConfig::new(watch)
                .with_watch_forever(forever)
                .with_scan_interval(Duration::from_millis(scan_interval_ms));
            let preprocess = PreprocessConfig::new().with_min_dynamic_range(min_dynamic_range);
            let recon = ReconConfig::new()
                .with_border(border, border)
                .with_z(ZRange::new(z_start, z_stop, z_step))
                .with_step_multiplier(step_multiplier)
                .with_threshold_factor(threshold_factor)
                .with_size(size_min, size_max, size_small)
                .with_pad(pad);
            let analysis = AnalysisConfig::new().with_pixel_size(pixel_size);
            let mut saver = SaverConfig::new(results);
            saver.empty = keep_empty;
            saver.skipped = keep_skipped;
            saver.preprocessed = save_preprocessed;

            let db = Database::open(CsvConnector::new(saver.db_dir()))?;

            let original = FileQueue::bounded(queue_capacity);
            let preprocessed = FileQueue::bounded(queue_capacity);
            let reconstructed = FileQueue::bounded(queue_capacity);
            let analyzed = FileQueue::bounded(queue_capacity);

            let config = WorkerConfig::default();
            let mut pipeline = Pipeline::new();
            pipeline.spawn(
                Watcher::new(watcher),
                Ports::new().with_output(ports::ORIGINAL, &original),
                &config,
            )?;
            pipeline.spawn(
                Preprocess::new(preprocess),
                Ports::new()
                    .with_input(ports::ORIGINAL, &original)
                    .with_output(ports::PREPROCESSED, &preprocessed),
                &config,
            )?;
            pipeline.spawn(
                Recon::new(recon, PassthroughKernel::new()),
                Ports::new()
                    .with_input(ports::PREPROCESSED, &preprocessed)
                    .with_output(ports::RECONSTRUCTED, &reconstructed),
                &config,
            )?;
            pipeline.spawn(
                Analysis::new(analysis),
                Ports::new()
                    .with_input(ports::RECONSTRUCTED, &reconstructed)
                    .with_output(ports::ANALYZED, &analyzed),
                &config,
            )?;
            pipeline.spawn(
                Saver::new(saver, db),
                Ports::new().with_input(ports::ANALYZED, &analyzed),
                &config,
            )?;
            info!("Stages: {}", pipeline.stage_names().join(" -> "));

            let start = Instant::now();
            pipeline.join()?;
            info!("Finished in {:.2} s", start.elapsed().as_secs_f64());
        }

        Commands::Name { path, results } => {
            let file = File::from_path(&path)?;
            let output = json!({
                "name": file.name(),
                "sensor": file.sensor(),
                "timestamp": file.timestamp().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
                "frame": file.frame(),
                "dir": file.dir(&results).display().to_string(),
                "recon": file.path_in(results.join("recon"), "png", 1).display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Particles { db, min_id } => {
            let mut db = Database::open(CsvConnector::new(db))?;
            for row in db.read_particles(min_id)? {
                let output = json!({
                    "id": row.id,
                    "timestamp": row.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
                    "sensor": row.sensor,
                    "frame": row.frame,
                    "particle": row.particle,
                    "x": row.x,
                    "y": row.y,
                    "z": row.z,
                    "diameter": row.diameter,
                    "diameter_corrected": row.diameter_corrected,
                    "circularity": row.circularity,
                    "dynamic_range": row.dynamic_range,
                    "effective_pixel_size": row.effective_pixel_size,
                    "rect": [row.rect.x, row.rect.y, row.rect.width, row.rect.height],
                });
                println!("{}", serde_json::to_string(&output)?);
            }
        }
    }

    Ok(())
}
