//! Decode pipeline
//!
//! Producer → input pool → decode worker → output pool → consumer, with the
//! controller owning the queues between them.

pub mod buffer_pool;
pub mod buffers;
pub mod controller;
mod worker;

pub use buffer_pool::{BufferPool, Owner, Recycle, Slot, SlotState};
pub use buffers::{BufferFlags, Format, InputBuffer, OutputBuffer, OutputMode, MIME_VIDEO_AV1};
pub use controller::{PipelineController, Wait};
