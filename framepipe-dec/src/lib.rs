//! # framepipe decoder library (framepipe-dec)
//!
//! Asynchronous single-worker video decode pipeline.
//!
//! **Purpose:** Move compressed units from a producer through an opaque codec
//! on a dedicated worker thread and hand decoded frames back in submission
//! order, over fixed-size buffer pools. On the consumer side, route frames to
//! render or drop and track frame pacing and drop bursts.
//!
//! **Architecture:** `BufferPool` arenas with move-only slot handles, a
//! `PipelineController` owning the queues and the worker thread, a
//! `CodecAdapter` boundary, and a `VideoRenderer` feeding the
//! `FramePacingTracker`.

pub mod codec;
pub mod config;
pub mod error;
pub mod pacing;
pub mod pipeline;
pub mod renderer;
pub mod session;

pub use config::DecoderConfig;
pub use error::{Error, Result};
pub use pacing::{FramePacingTracker, PacingConfig};
pub use pipeline::PipelineController;
pub use renderer::VideoRenderer;
