//! # framepipe common library
//!
//! Shared code for the framepipe decode pipeline crates:
//! - Common error type
//! - Bootstrap configuration (TOML) and config file resolution
//! - Pipeline event types and the EventBus used to publish them

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
