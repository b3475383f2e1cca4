//! holotrack-io: Frame discovery, result saving and particle storage.
//!
//! This crate provides the stages at both ends of the pipeline:
//! - **Watcher** - finds new frames on disk and decodes them
//! - **Saver** - archives source images, writes derived images and stores
//!   particle rows
//!
//! The particle store sits behind the [`Connector`]/[`Connection`] traits;
//! [`CsvConnector`] keeps it in a directory of CSV tables.
//!

pub mod database;
mod error;
pub mod imaging;
pub mod saver;
pub mod watcher;

pub use database::{
    Connection, Connector, CsvConnection, CsvConnector, Database, ParticleRow, StatsRow, MAX_ROWS,
};
pub use error::{Error, Result};
pub use imaging::{load_gray, save_gray};
pub use saver::{preview, save, Saver, SaverConfig};
pub use watcher::{find_frames, Watcher, WatcherConfig};
