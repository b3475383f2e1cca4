//! Frame discovery.
//!
//! The WATCHER stage scans a directory tree for files that follow the frame
//! naming convention and emits them in identity order. Only identities
//! greater than the last one emitted are considered, so repeated scans never
//! emit a frame twice.

use crate::imaging::load_gray;
use crate::Result;
use holotrack_algorithms::ports;
use holotrack_core::{Cycle, File, FileQueue, FileStatus, Ports, Worker};
use holotrack_core::Result as StageResult;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Directory scanned recursively.
    pub root: PathBuf,
    /// Keep rescanning for new frames while anyone consumes them.
    pub watch_forever: bool,
    /// Pause after a scan that found nothing new.
    pub scan_interval: Duration,
}

impl WatcherConfig {
    /// Single-pass discovery under `root`.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            watch_forever: false,
            scan_interval: Duration::from_secs(1),
        }
    }

    /// Sets whether to keep watching.
    #[must_use]
    pub fn with_watch_forever(mut self, forever: bool) -> Self {
        self.watch_forever = forever;
        self
    }

    /// Sets the rescan pause.
    #[must_use]
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }
}

/// Every parsable frame under `root`, sorted by identity.
///
/// Paths that do not follow the naming convention are skipped.
///
/// # Errors
/// Returns an error if a directory cannot be listed.
pub fn find_frames(root: &Path) -> Result<Vec<File>> {
    let mut frames = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            } else if path.is_file() {
                match File::from_path(&path) {
                    Ok(file) => frames.push(file),
                    Err(_) => debug!("WATCHER: ignoring '{}'", path.display()),
                }
            }
        }
    }
    frames.sort();
    Ok(frames)
}

/// The WATCHER stage.
pub struct Watcher {
    config: WatcherConfig,
    last: Option<File>,
    output: Option<FileQueue>,
}

impl Watcher {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: WatcherConfig) -> Self {
        info!("WATCHER: watching {}", config.root.display());
        Self {
            config,
            last: None,
            output: None,
        }
    }

    fn is_new(&self, file: &File) -> bool {
        self.last.as_ref().map_or(true, |last| file > last)
    }

    fn remember(&mut self, file: &File) {
        self.last = Some(File::new(
            file.sensor(),
            file.timestamp(),
            file.frame(),
            FileStatus::None,
        ));
    }
}

impl Worker for Watcher {
    fn name(&self) -> &str {
        "WATCHER"
    }

    fn init(&mut self, ports: &Ports) -> StageResult<()> {
        self.output = Some(ports.output(ports::ORIGINAL)?);
        Ok(())
    }

    fn cycle(&mut self) -> StageResult<Cycle> {
        let Some(output) = self.output.clone() else {
            return Ok(Cycle::stop(0));
        };
        let frames = find_frames(&self.config.root).map_err(|err| err.into_stage("WATCHER"))?;

        let mut emitted = 0;
        for mut file in frames {
            if !self.is_new(&file) {
                continue;
            }
            let start = Instant::now();
            match load_gray(file.path()) {
                Ok(image) => file.original = image,
                Err(err) => {
                    // Not remembered: the next pass retries it.
                    warn!("WATCHER: invalid image '{}': {err}", file.path().display());
                    break;
                }
            }
            self.remember(&file);
            file.set_status(FileStatus::None);
            debug!(
                "WATCHER: opened {} ({:.2} s)",
                file.name(),
                start.elapsed().as_secs_f64()
            );
            output.push(file);
            emitted += 1;
        }

        let keep_running = self.config.watch_forever && !output.is_detached();
        if keep_running && emitted == 0 {
            thread::sleep(self.config.scan_interval);
        }
        Ok(Cycle::new(emitted, keep_running))
    }
}
