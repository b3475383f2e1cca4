//! Particle and statistics store.
//!
//! [`Database`] owns one connection obtained from a [`Connector`]. Every
//! operation pings the connection first; a dead connection is dropped and
//! reopened through the connector, and a failed reopen surfaces as
//! [`Error::Reconnect`].
//!
//! [`CsvConnector`] stores both tables as CSV files in one directory.
#![allow(clippy::module_name_repetitions)]

use crate::{Error, Result};
use chrono::{NaiveDateTime, Timelike};
use holotrack_core::Rect;
use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Rows returned by one [`Database::read_particles`] call at most.
pub const MAX_ROWS: usize = 1000;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const PARTICLE_HEADER: [&str; 18] = [
    "id",
    "datetime",
    "ms",
    "sensor",
    "frame",
    "particle",
    "x",
    "y",
    "z",
    "diam",
    "diam_corr",
    "circularity",
    "dnr",
    "effpsz",
    "subx",
    "suby",
    "subw",
    "subh",
];
const STATS_HEADER: [&str; 8] = [
    "id",
    "datetime",
    "ms",
    "lwc",
    "mvd",
    "conc",
    "frames",
    "particles",
];

/// One stored particle.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleRow {
    /// Store-assigned id; ignored on write.
    pub id: u64,
    /// Frame timestamp, millisecond resolution.
    pub timestamp: NaiveDateTime,
    /// Sensor id of the frame.
    pub sensor: u8,
    /// Frame sequence number.
    pub frame: u32,
    /// 1-based ordinal within the frame.
    pub particle: u32,
    /// X position relative to the frame centre (m).
    pub x: f32,
    /// Y position relative to the frame centre (m).
    pub y: f32,
    /// Depth (m).
    pub z: f32,
    /// Equivalent diameter (m).
    pub diameter: f32,
    /// Corrected equivalent diameter (m).
    pub diameter_corrected: f32,
    /// Heywood circularity factor.
    pub circularity: f32,
    /// Intensity dynamic range of the segment crop.
    pub dynamic_range: u8,
    /// Effective pixel size (m).
    pub effective_pixel_size: f32,
    /// Segment bounding box in frame pixels.
    pub rect: Rect,
}

/// One stored statistics record.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsRow {
    /// Store-assigned id; ignored on write.
    pub id: u64,
    /// Start of the statistics interval.
    pub timestamp: NaiveDateTime,
    /// Liquid water content.
    pub lwc: f32,
    /// Median volume diameter.
    pub mvd: f32,
    /// Concentration.
    pub conc: f32,
    /// Frames in the interval.
    pub frames: u32,
    /// Particles in the interval.
    pub particles: u32,
}

/// A live session with a store.
pub trait Connection: Send {
    /// Returns true if the session is still usable.
    fn ping(&mut self) -> bool;

    /// Appends a particle row and returns its id.
    ///
    /// # Errors
    /// Returns an error if the store rejects the write.
    fn insert_particle(&mut self, row: &ParticleRow) -> Result<u64>;

    /// Appends a statistics row and returns its id.
    ///
    /// # Errors
    /// Returns an error if the store rejects the write.
    fn insert_stats(&mut self, row: &StatsRow) -> Result<u64>;

    /// Particle rows with `id >= min_id` in ascending id order, at most
    /// `limit` of them.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    fn select_particles(&mut self, min_id: u64, limit: usize) -> Result<Vec<ParticleRow>>;
}

/// Opens sessions with a store, creating its tables when missing.
pub trait Connector: Send {
    /// Session type handed out by [`Connector::connect`].
    type Connection: Connection;

    /// Connects and opens the store.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    fn connect(&self) -> Result<Self::Connection>;
}

/// A self-healing handle to a particle store.
pub struct Database<C: Connector> {
    connector: C,
    connection: Option<C::Connection>,
}

impl<C: Connector> Database<C> {
    /// Connects through `connector`.
    ///
    /// # Errors
    /// Returns the connector's error if the first connection fails.
    pub fn open(connector: C) -> Result<Self> {
        let connection = connector.connect()?;
        Ok(Self {
            connector,
            connection: Some(connection),
        })
    }

    fn connection(&mut self) -> Result<&mut C::Connection> {
        if !self.connection.as_mut().is_some_and(|c| c.ping()) {
            warn!("DATABASE: connection lost, reconnecting");
            self.connection = None;
            let connection = self
                .connector
                .connect()
                .map_err(|err| Error::Reconnect(err.to_string()))?;
            info!("DATABASE: reconnected");
            self.connection = Some(connection);
        }
        self.connection
            .as_mut()
            .ok_or_else(|| Error::Reconnect("no connection".to_string()))
    }

    /// Stores a particle row and returns its id.
    ///
    /// # Errors
    /// Returns [`Error::Reconnect`] if the store is gone for good, or the
    /// store's own error.
    pub fn write_particle(&mut self, row: &ParticleRow) -> Result<u64> {
        self.connection()?.insert_particle(row)
    }

    /// Stores a statistics row and returns its id.
    ///
    /// # Errors
    /// Returns [`Error::Reconnect`] if the store is gone for good, or the
    /// store's own error.
    pub fn write_stats(&mut self, row: &StatsRow) -> Result<u64> {
        self.connection()?.insert_stats(row)
    }

    /// One page of particle rows starting at `min_id`.
    ///
    /// # Errors
    /// Returns [`Error::Reconnect`] if the store is gone for good, or the
    /// store's own error.
    pub fn read_particles(&mut self, min_id: u64) -> Result<Vec<ParticleRow>> {
        self.connection()?.select_particles(min_id, MAX_ROWS)
    }
}

/// Connector for a directory holding `particles.csv` and `stats.csv`.
#[derive(Debug, Clone)]
pub struct CsvConnector {
    dir: PathBuf,
}

impl CsvConnector {
    /// Creates a connector for `dir`. Nothing is touched until connect.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Connector for CsvConnector {
    type Connection = CsvConnection;

    fn connect(&self) -> Result<CsvConnection> {
        fs::create_dir_all(&self.dir)?;
        let particles = self.dir.join("particles.csv");
        let stats = self.dir.join("stats.csv");
        ensure_table(&particles, &PARTICLE_HEADER)?;
        ensure_table(&stats, &STATS_HEADER)?;

        let connection = CsvConnection {
            next_particle: last_id(&particles)? + 1,
            next_stats: last_id(&stats)? + 1,
            particles,
            stats,
        };
        debug!("DATABASE: opened {}", self.dir.display());
        Ok(connection)
    }
}

/// Session with a CSV store.
#[derive(Debug)]
pub struct CsvConnection {
    particles: PathBuf,
    stats: PathBuf,
    next_particle: u64,
    next_stats: u64,
}

/// Particle table line.
#[derive(Debug, Serialize, Deserialize)]
struct ParticleRecord {
    id: u64,
    datetime: String,
    ms: u32,
    sensor: u8,
    frame: u32,
    particle: u32,
    x: f32,
    y: f32,
    z: f32,
    diam: f32,
    diam_corr: f32,
    circularity: f32,
    dnr: u8,
    effpsz: f32,
    subx: u32,
    suby: u32,
    subw: u32,
    subh: u32,
}

impl ParticleRecord {
    fn new(id: u64, row: &ParticleRow) -> Self {
        Self {
            id,
            datetime: row.timestamp.format(DATETIME_FORMAT).to_string(),
            ms: millis(&row.timestamp),
            sensor: row.sensor,
            frame: row.frame,
            particle: row.particle,
            x: row.x,
            y: row.y,
            z: row.z,
            diam: row.diameter,
            diam_corr: row.diameter_corrected,
            circularity: row.circularity,
            dnr: row.dynamic_range,
            effpsz: row.effective_pixel_size,
            subx: row.rect.x,
            suby: row.rect.y,
            subw: row.rect.width,
            subh: row.rect.height,
        }
    }

    fn into_row(self) -> Result<ParticleRow> {
        Ok(ParticleRow {
            id: self.id,
            timestamp: parse_timestamp(&self.datetime, self.ms)?,
            sensor: self.sensor,
            frame: self.frame,
            particle: self.particle,
            x: self.x,
            y: self.y,
            z: self.z,
            diameter: self.diam,
            diameter_corrected: self.diam_corr,
            circularity: self.circularity,
            dynamic_range: self.dnr,
            effective_pixel_size: self.effpsz,
            rect: Rect::new(self.subx, self.suby, self.subw, self.subh),
        })
    }
}

/// Statistics table line.
#[derive(Debug, Serialize)]
struct StatsRecord {
    id: u64,
    datetime: String,
    ms: u32,
    lwc: f32,
    mvd: f32,
    conc: f32,
    frames: u32,
    particles: u32,
}

impl StatsRecord {
    fn new(id: u64, row: &StatsRow) -> Self {
        Self {
            id,
            datetime: row.timestamp.format(DATETIME_FORMAT).to_string(),
            ms: millis(&row.timestamp),
            lwc: row.lwc,
            mvd: row.mvd,
            conc: row.conc,
            frames: row.frames,
            particles: row.particles,
        }
    }
}

/// Leading id column of any table.
#[derive(Debug, Deserialize)]
struct RecordId {
    id: u64,
}

fn millis(t: &NaiveDateTime) -> u32 {
    t.nanosecond() / 1_000_000
}

fn parse_timestamp(datetime: &str, ms: u32) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(datetime, DATETIME_FORMAT)
        .ok()
        .and_then(|t| t.with_nanosecond(ms.checked_mul(1_000_000)?))
        .ok_or_else(|| Error::Database(format!("malformed timestamp: '{datetime}' ms {ms}")))
}

fn ensure_table(path: &Path, header: &[&str]) -> Result<()> {
    if !path.exists() {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(header)?;
        writer.flush()?;
    }
    Ok(())
}

fn records<T: DeserializeOwned>(path: &Path) -> Result<impl Iterator<Item = Result<T>>> {
    let reader = csv::Reader::from_path(path)?;
    Ok(reader
        .into_deserialize::<T>()
        .map(|record| record.map_err(Error::from)))
}

fn last_id(path: &Path) -> Result<u64> {
    let mut last = 0;
    for record in records::<RecordId>(path)? {
        last = record?.id;
    }
    Ok(last)
}

fn append<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let file = OpenOptions::new().append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer.serialize(record)?;
    writer.flush()?;
    Ok(())
}

impl Connection for CsvConnection {
    fn ping(&mut self) -> bool {
        self.particles.is_file() && self.stats.is_file()
    }

    fn insert_particle(&mut self, row: &ParticleRow) -> Result<u64> {
        let id = self.next_particle;
        append(&self.particles, &ParticleRecord::new(id, row))?;
        self.next_particle += 1;
        Ok(id)
    }

    fn insert_stats(&mut self, row: &StatsRow) -> Result<u64> {
        let id = self.next_stats;
        append(&self.stats, &StatsRecord::new(id, row))?;
        self.next_stats += 1;
        Ok(id)
    }

    fn select_particles(&mut self, min_id: u64, limit: usize) -> Result<Vec<ParticleRow>> {
        let mut rows = Vec::new();
        for record in records::<ParticleRecord>(&self.particles)? {
            if rows.len() == limit {
                break;
            }
            let record = record?;
            if record.id >= min_id {
                rows.push(record.into_row()?);
            }
        }
        Ok(rows)
    }
}
