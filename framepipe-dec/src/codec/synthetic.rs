//! Deterministic synthetic codec
//!
//! Stands in for a native decoder in the demo binary, tests and benchmarks.
//! A synthetic unit is a small header followed by filler bytes:
//!
//! ```text
//! "FPSY" | frame_index: u32 LE | time_us: i64 LE | hidden: u8 | filler...
//! ```
//!
//! Decoding a unit queues it inside the codec; a frame is emitted once more
//! than `pipeline_depth` units are pending, so a non-zero depth models a
//! codec with internal reordering latency. Failures and panics can be
//! injected at a given call index.

use super::{CodecAdapter, CodecFactory, CodecFailure, CodecLibrary, RetrieveStatus};
use crate::error::Result;
use crate::pipeline::buffers::OutputBuffer;
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Availability state of the synthetic backend
pub static SYNTHETIC_LIBRARY: CodecLibrary = CodecLibrary::new("synthetic");

const MAGIC: [u8; 4] = *b"FPSY";

fn load_synthetic() -> std::result::Result<String, String> {
    Ok(env!("CARGO_PKG_VERSION").to_string())
}

/// Header of one synthetic compressed unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticUnit {
    pub frame_index: u32,
    pub time_us: i64,
    /// Codec reports the resulting frame as not for display
    pub hidden: bool,
}

impl SyntheticUnit {
    pub const HEADER_LEN: usize = 17;

    pub fn new(frame_index: u32, time_us: i64) -> Self {
        Self {
            frame_index,
            time_us,
            hidden: false,
        }
    }

    /// Write header plus `padding` filler bytes, replacing the buffer contents
    pub fn encode_into(&self, buf: &mut Vec<u8>, padding: usize) {
        buf.clear();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&self.frame_index.to_le_bytes());
        buf.extend_from_slice(&self.time_us.to_le_bytes());
        buf.push(u8::from(self.hidden));
        buf.resize(Self::HEADER_LEN + padding, (self.frame_index & 0xff) as u8);
    }

    pub fn encode(&self, padding: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_LEN + padding);
        self.encode_into(&mut buf, padding);
        buf
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::HEADER_LEN || bytes[..4] != MAGIC {
            return None;
        }
        let frame_index = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        let time_us = i64::from_le_bytes(bytes[8..16].try_into().ok()?);
        Some(Self {
            frame_index,
            time_us,
            hidden: bytes[16] != 0,
        })
    }
}

/// Behaviour of synthetic decoder contexts
#[derive(Debug, Clone, Default)]
pub struct SyntheticCodecConfig {
    /// Units held inside the codec before frames start coming out
    pub pipeline_depth: usize,
    pub width: u32,
    pub height: u32,
    /// Fail the decode call with this index (0-based)
    pub fail_decode_at: Option<u64>,
    /// Fail the retrieve call with this index (0-based)
    pub fail_retrieve_at: Option<u64>,
    /// Panic inside the decode call with this index (0-based)
    pub panic_at: Option<u64>,
    /// Simulated decode cost per unit
    pub decode_delay: Option<Duration>,
}

impl SyntheticCodecConfig {
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }
}

/// Synthetic decoder context
pub struct SyntheticCodec {
    config: SyntheticCodecConfig,
    pending: VecDeque<SyntheticUnit>,
    decode_calls: u64,
    retrieve_calls: u64,
    last_error: String,
    closed: bool,
}

impl SyntheticCodec {
    pub fn new(config: SyntheticCodecConfig) -> Self {
        Self {
            config,
            pending: VecDeque::new(),
            decode_calls: 0,
            retrieve_calls: 0,
            last_error: String::new(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn write_frame(&self, unit: &SyntheticUnit, output: &mut OutputBuffer) {
        let luma = (self.config.width * self.config.height) as usize;
        let chroma = luma / 2;

        output.data.clear();
        output.data.resize(luma, (unit.frame_index & 0xff) as u8);
        output.data.resize(luma + chroma, 128);
        output.width = self.config.width;
        output.height = self.config.height;
        output.time_us = unit.time_us;
    }
}

impl CodecAdapter for SyntheticCodec {
    fn decode(&mut self, payload: &[u8]) -> std::result::Result<(), CodecFailure> {
        let call = self.decode_calls;
        self.decode_calls += 1;

        if let Some(delay) = self.config.decode_delay {
            thread::sleep(delay);
        }
        if self.config.panic_at == Some(call) {
            panic!("synthetic codec panicked on unit {call}");
        }
        if self.config.fail_decode_at == Some(call) {
            self.last_error = format!("injected decode failure on unit {call}");
            return Err(CodecFailure);
        }

        match SyntheticUnit::parse(payload) {
            Some(unit) => {
                self.pending.push_back(unit);
                Ok(())
            }
            None => {
                self.last_error = format!("malformed unit ({} bytes)", payload.len());
                Err(CodecFailure)
            }
        }
    }

    fn retrieve_frame(&mut self, output: &mut OutputBuffer, decode_only: bool) -> RetrieveStatus {
        let call = self.retrieve_calls;
        self.retrieve_calls += 1;

        if self.config.fail_retrieve_at == Some(call) {
            self.last_error = format!("injected retrieve failure on call {call}");
            return RetrieveStatus::Error;
        }
        if self.pending.len() <= self.config.pipeline_depth {
            return RetrieveStatus::NoFrameYet;
        }
        let Some(unit) = self.pending.pop_front() else {
            return RetrieveStatus::NoFrameYet;
        };

        self.write_frame(&unit, output);
        if unit.hidden || decode_only {
            RetrieveStatus::DecodeOnlyFrame
        } else {
            RetrieveStatus::Frame
        }
    }

    fn last_error_message(&self) -> String {
        self.last_error.clone()
    }

    fn close(&mut self) {
        debug!(
            "Synthetic codec closed: decode_calls={}, pending={}",
            self.decode_calls,
            self.pending.len()
        );
        self.pending.clear();
        self.closed = true;
    }
}

/// Factory for synthetic decoder contexts
#[derive(Debug, Clone)]
pub struct SyntheticCodecFactory {
    config: SyntheticCodecConfig,
}

impl SyntheticCodecFactory {
    /// Create the factory and register the synthetic backend loader
    pub fn new(config: SyntheticCodecConfig) -> Self {
        SYNTHETIC_LIBRARY.install(load_synthetic);
        Self { config }
    }

    pub fn config(&self) -> &SyntheticCodecConfig {
        &self.config
    }
}

impl CodecFactory for SyntheticCodecFactory {
    fn name(&self) -> &str {
        "Synthetic"
    }

    fn library(&self) -> &CodecLibrary {
        &SYNTHETIC_LIBRARY
    }

    fn create(&self, thread_hint: usize, tile_hint: usize) -> Result<Box<dyn CodecAdapter>> {
        debug!(
            "Creating synthetic codec: {}x{}, depth={}, threads={}, tiles={}",
            self.config.width, self.config.height, self.config.pipeline_depth, thread_hint, tile_hint
        );
        Ok(Box::new(SyntheticCodec::new(self.config.clone())))
    }
}
