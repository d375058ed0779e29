//! Common error types for framepipe

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for framepipe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the framepipe crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
