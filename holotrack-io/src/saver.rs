//! Result persistence.
//!
//! The SAVER stage archives or deletes each source image, writes the
//! derived images selected in [`SaverConfig`] and stores one particle row
//! per measured particle.

use crate::database::{Connector, Database, ParticleRow};
use crate::imaging::save_gray;
use crate::Result;
use holotrack_algorithms::{otsu_threshold, ports, stretch};
use holotrack_core::Result as StageResult;
use holotrack_core::{Cycle, File, FileQueue, FileStatus, Ports, Worker};
use image::{imageops, GrayImage};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// What to keep and where.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaverConfig {
    /// Results root; every artifact kind gets a subdirectory.
    pub root: PathBuf,
    /// Archive source images instead of deleting them.
    pub original: bool,
    /// Write preprocessed images.
    pub preprocessed: bool,
    /// Write per-segment reconstruction crops.
    pub recon: bool,
    /// Write per-particle thresholded images.
    pub threshold: bool,
    /// Write a preview of all segments on a black canvas.
    pub preview: bool,
    /// Keep frames without particles.
    pub empty: bool,
    /// Keep skipped frames.
    pub skipped: bool,
    /// Extension for lossless outputs.
    pub lossless: String,
    /// Extension for lossy outputs.
    pub lossy: String,
}

impl SaverConfig {
    /// Default artifact selection under `root`.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            original: true,
            preprocessed: false,
            recon: true,
            threshold: true,
            preview: true,
            empty: false,
            skipped: false,
            lossless: "png".to_string(),
            lossy: "jpg".to_string(),
        }
    }

    /// Archive directory for `kind`, e.g. `root/recon`.
    #[must_use]
    pub fn dir(&self, kind: &str) -> PathBuf {
        self.root.join(kind)
    }

    /// Particle store directory.
    #[must_use]
    pub fn db_dir(&self) -> PathBuf {
        self.root.join("db")
    }
}

/// Moves `src` to `dst`, replacing `dst`. Falls back to copy and delete
/// when a rename is not possible, e.g. across filesystems.
fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if dst.exists() {
        fs::remove_file(dst)?;
    }
    if fs::rename(src, dst).is_err() {
        fs::copy(src, dst)?;
        fs::remove_file(src)?;
    }
    Ok(())
}

fn remove_source(file: &File) -> Result<()> {
    let path = file.path();
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    match fs::remove_file(path) {
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("SAVER: {} already gone", path.display());
            Ok(())
        }
        Err(err) => Err(err.into()),
        Ok(()) => Ok(()),
    }
}

/// Builds the preview: inverted, contrast-adjusted segment crops pasted
/// onto a black frame-sized canvas.
#[must_use]
pub fn preview(file: &File) -> GrayImage {
    let (width, height) = if file.preprocessed.is_empty() {
        file.original.dimensions()
    } else {
        file.preprocessed.dimensions()
    };
    let mut canvas = GrayImage::new(width, height);
    for segment in &file.segments {
        let mut inverted = segment.image.clone();
        imageops::invert(&mut inverted);
        let th = otsu_threshold(&inverted);
        let adjusted = stretch(&inverted, th, u8::MAX, 0, u8::MAX);
        imageops::replace(
            &mut canvas,
            &adjusted,
            i64::from(segment.rect.x),
            i64::from(segment.rect.y),
        );
    }
    canvas
}

/// Persists one frame.
///
/// # Errors
/// Returns an error if a file operation or the particle store fails.
pub fn save<C: Connector>(config: &SaverConfig, db: &mut Database<C>, file: &File) -> Result<()> {
    let status = file.status();
    if (status == FileStatus::Empty && !config.empty)
        || (status == FileStatus::Skip && !config.skipped)
        || status == FileStatus::None
    {
        return remove_source(file);
    }
    let n = file.particles.len().min(file.segments.len());
    let not_empty = status == FileStatus::NotEmpty;

    if config.original && !file.path().as_os_str().is_empty() {
        let root = config.dir("original");
        fs::create_dir_all(file.dir(&root))?;
        let ext = file
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        move_file(file.path(), &file.path_in(&root, ext, 0))?;
    } else {
        remove_source(file)?;
    }

    if config.preprocessed && !file.preprocessed.is_empty() {
        let root = config.dir("preproc");
        fs::create_dir_all(file.dir(&root))?;
        save_gray(&file.preprocessed, file.path_in(&root, &config.lossless, 0))?;
    }
    if config.recon && not_empty {
        let root = config.dir("recon");
        fs::create_dir_all(file.dir(&root))?;
        for (i, segment) in file.segments.iter().take(n).enumerate() {
            save_gray(&segment.image, file.path_in(&root, &config.lossless, i + 1))?;
        }
    }
    if config.threshold && not_empty {
        let root = config.dir("threshold");
        fs::create_dir_all(file.dir(&root))?;
        for (i, particle) in file.particles.iter().take(n).enumerate() {
            save_gray(&particle.image, file.path_in(&root, &config.lossless, i + 1))?;
        }
    }
    if config.preview && not_empty {
        let root = config.dir("preview");
        fs::create_dir_all(file.dir(&root))?;
        save_gray(&preview(file), file.path_in(&root, &config.lossy, 0))?;
    }

    for (i, (segment, particle)) in file.segments.iter().zip(&file.particles).enumerate() {
        db.write_particle(&ParticleRow {
            id: 0,
            timestamp: file.timestamp(),
            sensor: file.sensor(),
            frame: file.frame(),
            particle: u32::try_from(i + 1).unwrap_or(u32::MAX),
            x: particle.x,
            y: particle.y,
            z: particle.z,
            diameter: particle.diameter,
            diameter_corrected: particle.diameter_corrected,
            circularity: particle.circularity,
            dynamic_range: particle.dynamic_range,
            effective_pixel_size: particle.effective_pixel_size,
            rect: segment.rect,
        })?;
    }
    Ok(())
}

/// The SAVER stage. Owns the particle store it writes to.
pub struct Saver<C: Connector> {
    config: SaverConfig,
    db: Database<C>,
    input: Option<FileQueue>,
}

impl<C: Connector> Saver<C> {
    /// Creates the stage.
    pub fn new(config: SaverConfig, db: Database<C>) -> Self {
        info!("SAVER: results {}", config.root.display());
        Self {
            config,
            db,
            input: None,
        }
    }
}

impl<C: Connector> Worker for Saver<C> {
    fn name(&self) -> &str {
        "SAVER"
    }

    fn init(&mut self, ports: &Ports) -> StageResult<()> {
        self.input = Some(ports.input(ports::ANALYZED)?);
        Ok(())
    }

    fn cycle(&mut self) -> StageResult<Cycle> {
        let Some(input) = &self.input else {
            return Ok(Cycle::stop(0));
        };
        let mut files = VecDeque::new();
        let n = input.collect(&mut files);
        for file in files {
            let start = Instant::now();
            debug!("SAVER: saving {}", file.name());
            save(&self.config, &mut self.db, &file).map_err(|err| err.into_stage("SAVER"))?;
            debug!(
                "SAVER: saved {} ({:.2} s)",
                file.name(),
                start.elapsed().as_secs_f64()
            );
            info!("SAVER: done {}", file.name());
        }
        Ok(Cycle::new(n, !input.is_finished()))
    }
}
