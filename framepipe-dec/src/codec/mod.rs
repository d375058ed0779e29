//! Codec boundary
//!
//! The bitstream decoder is an opaque unit. The pipeline talks to it only
//! through [`CodecAdapter`] (one decoder context) and [`CodecFactory`]
//! (context construction plus the library availability probe).

pub mod library;
pub mod synthetic;

pub use library::{CodecLibrary, LibraryLoader};
pub use synthetic::{SyntheticCodec, SyntheticCodecConfig, SyntheticCodecFactory};

use crate::error::Result;
use crate::pipeline::buffers::OutputBuffer;
use thiserror::Error;

/// Codec call failed; details via [`CodecAdapter::last_error_message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("codec call failed")]
pub struct CodecFailure;

/// Result of pulling a frame out of the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveStatus {
    /// Output buffer holds a displayable frame
    Frame,
    /// Output buffer holds a frame the codec marked as not for display
    DecodeOnlyFrame,
    /// Codec needs more input before it can emit a frame
    NoFrameYet,
    /// Codec failed
    Error,
}

/// One decoder context
///
/// Calls are strictly serial: the decode worker owns the adapter and never
/// calls it from two threads at once.
pub trait CodecAdapter: Send {
    /// Feed one compressed unit
    fn decode(&mut self, payload: &[u8]) -> std::result::Result<(), CodecFailure>;

    /// Pull the next decoded frame into `output`
    fn retrieve_frame(&mut self, output: &mut OutputBuffer, decode_only: bool) -> RetrieveStatus;

    /// Diagnostic for the most recent failure
    fn last_error_message(&self) -> String;

    /// Release the context. Called exactly once by the pipeline.
    fn close(&mut self);
}

/// Builds decoder contexts for one codec backend
pub trait CodecFactory: Send + Sync {
    /// Codec name used in the decoder name (`"lib" + name + version`)
    fn name(&self) -> &str;

    /// Availability state of the backend library
    fn library(&self) -> &CodecLibrary;

    /// Create a decoder context
    ///
    /// # Errors
    /// `Error::Initialization` if the backend cannot create a context.
    fn create(&self, thread_hint: usize, tile_hint: usize) -> Result<Box<dyn CodecAdapter>>;
}
