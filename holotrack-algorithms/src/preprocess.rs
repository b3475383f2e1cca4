//! Frame preprocessing: background estimate and skip policy.

use crate::ports;
use crate::threshold::{dynamic_range, median};
use holotrack_core::{relay, Cycle, File, FileQueue, FileStatus, Ports, Result, Worker};
use log::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Preprocessing settings.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PreprocessConfig {
    /// Frames whose original spans fewer grey levels than this are skipped.
    /// 0 disables the check.
    pub min_dynamic_range: u8,
}

impl PreprocessConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum dynamic range.
    #[must_use]
    pub fn with_min_dynamic_range(mut self, range: u8) -> Self {
        self.min_dynamic_range = range;
        self
    }
}

/// Prepares `file.preprocessed` and `file.param` from `file.original`.
///
/// Frames already carrying a status other than [`FileStatus::None`] are
/// left alone.
pub fn preprocess(config: &PreprocessConfig, file: &mut File) {
    if file.status() != FileStatus::None {
        return;
    }
    let range = dynamic_range(&file.original);
    if config.min_dynamic_range > 0 && range < config.min_dynamic_range {
        debug!("PREPROC: skipping {} (dynamic range {range})", file.name());
        file.set_status(FileStatus::Skip);
        return;
    }
    file.preprocessed.clone_from(&file.original);
    file.param.background_value = median(&file.preprocessed);
}

/// The PREPROC stage.
pub struct Preprocess {
    config: PreprocessConfig,
    input: Option<FileQueue>,
    output: Option<FileQueue>,
}

impl Preprocess {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: PreprocessConfig) -> Self {
        Self {
            config,
            input: None,
            output: None,
        }
    }
}

impl Worker for Preprocess {
    fn name(&self) -> &str {
        "PREPROC"
    }

    fn init(&mut self, ports: &Ports) -> Result<()> {
        self.input = Some(ports.input(ports::ORIGINAL)?);
        self.output = Some(ports.output(ports::PREPROCESSED)?);
        Ok(())
    }

    fn cycle(&mut self) -> Result<Cycle> {
        let (Some(input), Some(output)) = (&self.input, &self.output) else {
            return Ok(Cycle::stop(0));
        };
        let config = &self.config;
        Ok(relay(input, output, |file| preprocess(config, file)))
    }
}
