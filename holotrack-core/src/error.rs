//! Error types for holotrack-core.

use thiserror::Error;

/// Result type alias for holotrack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for holotrack operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A name or path that does not follow the frame naming convention.
    #[error("invalid frame name: '{0}'")]
    InvalidName(String),

    /// A stage was started without one of its required queue bindings.
    #[error("stage {stage}: missing queue binding '{port}'")]
    MissingPort { stage: String, port: String },

    /// A stage stopped because its cycle returned an error.
    #[error("stage {stage} failed: {message}")]
    StageFailed { stage: String, message: String },

    /// A stage thread panicked.
    #[error("stage {0} panicked")]
    StagePanicked(String),

    /// Stage thread could not be started.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
