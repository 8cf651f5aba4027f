//! Error types for the output module

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    /// No virtual device satisfying the requirements could be acquired
    #[error("Virtual device unavailable: {0}")]
    Unavailable(String),

    #[error("Virtual device I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("D-Bus call failed: {0}")]
    Bus(String),

    #[error("Operation not supported by {0}")]
    Unsupported(String),
}
