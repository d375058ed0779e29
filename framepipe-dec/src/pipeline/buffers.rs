//! Input and output unit types carried through the buffer pools

use crate::pipeline::buffer_pool::Recycle;
use bitflags::bitflags;

/// MIME type accepted by the video renderer
pub const MIME_VIDEO_AV1: &str = "video/av01";

bitflags! {
    /// Per-buffer flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u8 {
        /// Decode to advance codec state, never render
        const DECODE_ONLY = 1;
        /// Last unit of the stream
        const END_OF_STREAM = 1 << 1;
        /// Random access point
        const KEY_FRAME = 1 << 2;
    }
}

/// How decoded frames reach the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OutputMode {
    /// No output target set
    #[default]
    None = 0,
    /// Frame bytes handed to a buffer renderer
    Yuv = 1,
    /// Frame rendered to a surface
    SurfaceYuv = 2,
}

impl OutputMode {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => OutputMode::Yuv,
            2 => OutputMode::SurfaceYuv,
            _ => OutputMode::None,
        }
    }
}

/// Stream format descriptor
///
/// Produced by container parsing (outside this crate) and attached to input
/// units; copied to the output unit of every rendered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    pub sample_mime_type: String,
    pub width: u32,
    pub height: u32,
    /// Largest compressed unit in the stream, if the container knows it
    pub max_input_size: Option<usize>,
}

impl Format {
    pub fn av1(width: u32, height: u32) -> Self {
        Self {
            sample_mime_type: MIME_VIDEO_AV1.to_string(),
            width,
            height,
            max_input_size: None,
        }
    }
}

/// Compressed unit submitted by the producer
#[derive(Debug, Default)]
pub struct InputBuffer {
    /// Compressed payload
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds
    pub time_us: i64,
    pub flags: BufferFlags,
    pub format: Option<Format>,
}

impl InputBuffer {
    /// Empty buffer with `capacity` bytes preallocated
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    pub fn is_decode_only(&self) -> bool {
        self.flags.contains(BufferFlags::DECODE_ONLY)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }
}

impl Recycle for InputBuffer {
    fn recycle(&mut self) {
        // Keep the allocation, drop the contents
        self.data.clear();
        self.time_us = 0;
        self.flags = BufferFlags::empty();
        self.format = None;
    }
}

/// Decoded frame handed to the consumer
#[derive(Debug, Default)]
pub struct OutputBuffer {
    /// Decoded frame bytes (planar YUV for the synthetic codec)
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds
    pub time_us: i64,
    pub mode: OutputMode,
    pub format: Option<Format>,
    pub width: u32,
    pub height: u32,
    pub flags: BufferFlags,
}

impl OutputBuffer {
    /// Prepare for a frame of a render-eligible input
    pub fn init(&mut self, time_us: i64, mode: OutputMode) {
        self.time_us = time_us;
        self.mode = mode;
    }

    pub fn is_decode_only(&self) -> bool {
        self.flags.contains(BufferFlags::DECODE_ONLY)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }
}

impl Recycle for OutputBuffer {
    fn recycle(&mut self) {
        self.data.clear();
        self.time_us = 0;
        self.mode = OutputMode::None;
        self.format = None;
        self.width = 0;
        self.height = 0;
        self.flags = BufferFlags::empty();
    }
}
