//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode or encode error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// CSV table read or write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The particle store rejected an operation or holds malformed data.
    #[error("database error: {0}")]
    Database(String),

    /// The particle store went away and could not be reopened.
    #[error("database reconnect failed: {0}")]
    Reconnect(String),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] holotrack_core::Error),
}

impl Error {
    /// Converts a failure inside a stage into the runtime's error type.
    pub(crate) fn into_stage(self, stage: &str) -> holotrack_core::Error {
        match self {
            Error::Core(err) => err,
            other => holotrack_core::Error::StageFailed {
                stage: stage.to_string(),
                message: other.to_string(),
            },
        }
    }
}
