//! Decoder construction parameters
//!
//! Validated form of [`framepipe_common::config::DecoderSettings`]. Every
//! parameter must be a positive integer; anything else is rejected before a
//! pool or codec context is created.

use crate::error::{Error, Result};
use framepipe_common::config::DecoderSettings;

/// Default number of input buffer slots
pub const DEFAULT_NUM_INPUT_BUFFERS: usize = 4;

/// Default number of output buffer slots
pub const DEFAULT_NUM_OUTPUT_BUFFERS: usize = 4;

/// Default initial input buffer size: 720p compressed by a factor of two
pub const DEFAULT_INPUT_BUFFER_SIZE: usize =
    ceil_divide(1280, 64) * ceil_divide(720, 64) * (64 * 64 * 3 / 2) / 2;

const fn ceil_divide(numerator: usize, denominator: usize) -> usize {
    (numerator + denominator - 1) / denominator
}

/// Thread hint used when none is configured
pub fn default_thread_hint() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Validated decoder construction parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    pub num_input_buffers: usize,
    pub num_output_buffers: usize,
    pub initial_input_buffer_size: usize,
    pub thread_hint: usize,
    pub tile_hint: usize,
}

impl DecoderConfig {
    /// Validate raw parameters
    ///
    /// # Errors
    /// `Error::Config` naming the first non-positive parameter.
    pub fn new(
        num_input_buffers: i64,
        num_output_buffers: i64,
        initial_input_buffer_size: i64,
        thread_hint: i64,
        tile_hint: i64,
    ) -> Result<Self> {
        Ok(Self {
            num_input_buffers: positive("num_input_buffers", num_input_buffers)?,
            num_output_buffers: positive("num_output_buffers", num_output_buffers)?,
            initial_input_buffer_size: positive(
                "initial_input_buffer_size",
                initial_input_buffer_size,
            )?,
            thread_hint: positive("thread_hint", thread_hint)?,
            tile_hint: positive("tile_hint", tile_hint)?,
        })
    }

    /// Build from config file settings, filling unset optional values
    ///
    /// Thread hint defaults to available parallelism; tile hint defaults to
    /// the thread hint.
    pub fn from_settings(settings: &DecoderSettings) -> Result<Self> {
        let thread_hint = settings
            .thread_hint
            .unwrap_or(default_thread_hint() as i64);
        Self::new(
            settings.num_input_buffers,
            settings.num_output_buffers,
            settings
                .initial_input_buffer_size
                .unwrap_or(DEFAULT_INPUT_BUFFER_SIZE as i64),
            thread_hint,
            settings.tile_hint.unwrap_or(thread_hint),
        )
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        let threads = default_thread_hint();
        Self {
            num_input_buffers: DEFAULT_NUM_INPUT_BUFFERS,
            num_output_buffers: DEFAULT_NUM_OUTPUT_BUFFERS,
            initial_input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            thread_hint: threads,
            tile_hint: threads,
        }
    }
}

fn positive(name: &str, value: i64) -> Result<usize> {
    if value <= 0 {
        return Err(Error::Config(format!(
            "{name} must be a positive integer (got {value})"
        )));
    }
    usize::try_from(value)
        .map_err(|_| Error::Config(format!("{name} is out of range (got {value})")))
}
