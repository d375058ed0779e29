//! Error types for framepipe-dec
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for the decode pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Codec library unavailable or codec context creation failed
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Per-unit codec failure (pipeline needs flush or close)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Protocol misuse (double release, foreign slot, submit while failed)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation on a closed pipeline
    #[error("Pipeline closed")]
    Closed,

    /// Blocking wait interrupted by flush or close
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Buffer pool torn down while a caller waited on it
    #[error("Buffer pool destroyed: {0}")]
    PoolDestroyed(String),

    /// Non-decode failure raised while processing a unit
    #[error("Unexpected decode error: {message}")]
    Unexpected {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid construction parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from the common crate (config loading)
    #[error(transparent)]
    Common(#[from] framepipe_common::Error),
}

impl Error {
    /// Wrap a non-decode failure, keeping the original cause
    pub fn unexpected<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Unexpected {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True for errors that end a blocking wait without a failure of the pipeline itself
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled(_) | Error::Closed | Error::PoolDestroyed(_))
    }
}

/// Convenience Result type using framepipe-dec Error
pub type Result<T> = std::result::Result<T, Error>;
