//! The frame entity shared by every pipeline stage.
//!
//! A [`File`] is created once per discovered frame and then moved from
//! queue to stage to queue; it is never cloned, so exactly one stage owns
//! it at any time.

use crate::{Error, Particle, Result, Segment, WorkQueue};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use image::GrayImage;
use regex::Regex;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Queue of frames between two stages.
pub type FileQueue = WorkQueue<File>;

/// Processing status of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FileStatus {
    /// Not processed yet.
    #[default]
    None,
    /// Particles were found.
    NotEmpty,
    /// Reconstruction ran and found nothing.
    Empty,
    /// Excluded before reconstruction.
    Skip,
}

impl FileStatus {
    /// Single-character status code.
    #[must_use]
    pub fn code(self) -> char {
        match self {
            FileStatus::None => 'X',
            FileStatus::NotEmpty => 'T',
            FileStatus::Empty => 'F',
            FileStatus::Skip => 'S',
        }
    }

    /// Parses a single-character status code.
    #[must_use]
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'X' => Some(FileStatus::None),
            'T' => Some(FileStatus::NotEmpty),
            'F' => Some(FileStatus::Empty),
            'S' => Some(FileStatus::Skip),
            _ => None,
        }
    }
}

/// Per-frame parameters derived during preprocessing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileParam {
    /// Background intensity of the preprocessed image.
    pub background_value: u8,
}

/// Frame names, e.g. `01_2023-02-14_13.05.09.042_000017`.
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2})_(\d{4})-(\d{2})-(\d{2})_(\d{2})\.(\d{2})\.(\d{2})\.(\d{3})_(\d{6})$")
        .expect("Invalid frame name regex")
});

/// One frame under processing.
#[derive(Debug)]
pub struct File {
    sensor: u8,
    timestamp: NaiveDateTime,
    frame: u32,
    status: FileStatus,
    path: PathBuf,

    pub param: FileParam,
    pub original: GrayImage,
    pub preprocessed: GrayImage,
    pub segments: Vec<Segment>,
    pub particles: Vec<Particle>,
}

impl File {
    /// Creates a frame with the given identity and no image data.
    #[must_use]
    pub fn new(sensor: u8, timestamp: NaiveDateTime, frame: u32, status: FileStatus) -> Self {
        Self {
            sensor,
            timestamp,
            frame,
            status,
            path: PathBuf::new(),
            param: FileParam::default(),
            original: GrayImage::default(),
            preprocessed: GrayImage::default(),
            segments: Vec::new(),
            particles: Vec::new(),
        }
    }

    /// Parses the frame identity from a path.
    ///
    /// # Errors
    /// Returns [`Error::InvalidName`] if the file stem does not follow the
    /// naming convention.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::InvalidName(path.display().to_string()))?;
        let (sensor, timestamp, frame) = parse_name(stem)?;
        let mut file = Self::new(sensor, timestamp, frame, FileStatus::None);
        file.path = path.to_path_buf();
        Ok(file)
    }

    #[inline]
    #[must_use]
    pub fn sensor(&self) -> u8 {
        self.sensor
    }

    pub fn set_sensor(&mut self, sensor: u8) {
        self.sensor = sensor;
    }

    /// Capture time with millisecond resolution.
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: NaiveDateTime) {
        self.timestamp = timestamp;
    }

    /// Millisecond part of the timestamp.
    #[must_use]
    pub fn millisecond(&self) -> u32 {
        self.timestamp.nanosecond() / 1_000_000
    }

    #[inline]
    #[must_use]
    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn set_frame(&mut self, frame: u32) {
        self.frame = frame;
    }

    #[inline]
    #[must_use]
    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn set_status(&mut self, status: FileStatus) {
        self.status = status;
    }

    /// Source path the frame was discovered at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.path = path.into();
    }

    /// Canonical frame name, e.g. `01_2023-02-14_13.05.09.042_000017`.
    #[must_use]
    pub fn name(&self) -> String {
        let t = &self.timestamp;
        format!(
            "{:02X}_{:04}-{:02}-{:02}_{:02}.{:02}.{:02}.{:03}_{:06}",
            self.sensor,
            t.year(),
            t.month(),
            t.day(),
            t.hour(),
            t.minute(),
            t.second(),
            self.millisecond(),
            self.frame
        )
    }

    /// Replaces the identity with the one encoded in `name`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidName`] if `name` does not follow the naming
    /// convention. The identity is left untouched in that case.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let (sensor, timestamp, frame) = parse_name(name)?;
        self.sensor = sensor;
        self.timestamp = timestamp;
        self.frame = frame;
        Ok(())
    }

    /// Output directory for this frame under `root`: `root/YYYY-MM-DD/hh`.
    #[must_use]
    pub fn dir<P: AsRef<Path>>(&self, root: P) -> PathBuf {
        let t = &self.timestamp;
        root.as_ref()
            .join(format!("{:04}-{:02}-{:02}", t.year(), t.month(), t.day()))
            .join(format!("{:02}", t.hour()))
    }

    /// Output path for an artifact of this frame.
    ///
    /// `ext` is given without the leading dot. A `sub` index greater than
    /// zero is appended as `_<sub>`, used for per-segment files.
    #[must_use]
    pub fn path_in<P: AsRef<Path>>(&self, root: P, ext: &str, sub: usize) -> PathBuf {
        let mut name = self.name();
        if sub > 0 {
            name.push_str(&format!("_{sub}"));
        }
        if !ext.is_empty() {
            name.push('.');
            name.push_str(ext.trim_start_matches('.'));
        }
        self.dir(root).join(name)
    }

    fn key(&self) -> (NaiveDateTime, u32, u8) {
        (self.timestamp, self.frame, self.sensor)
    }
}

fn parse_name(name: &str) -> Result<(u8, NaiveDateTime, u32)> {
    let invalid = || Error::InvalidName(name.to_string());
    let caps = NAME_PATTERN.captures(name).ok_or_else(invalid)?;
    let num = |i: usize| -> Result<u32> { caps[i].parse::<u32>().map_err(|_| invalid()) };

    let sensor = u8::from_str_radix(&caps[1], 16).map_err(|_| invalid())?;
    let year = i32::try_from(num(2)?).map_err(|_| invalid())?;
    let timestamp = NaiveDate::from_ymd_opt(year, num(3)?, num(4)?)
        .and_then(|d| d.and_hms_milli_opt(num(5).ok()?, num(6).ok()?, num(7).ok()?, num(8).ok()?))
        .ok_or_else(invalid)?;
    let frame = num(9)?;
    Ok((sensor, timestamp, frame))
}

impl PartialEq for File {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for File {}

impl PartialOrd for File {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Frames order by timestamp, then frame number. The sensor only breaks
/// ties between otherwise identical identities.
impl Ord for File {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
