//! Test helpers for framepipe-dec integration tests
//!
//! - ScriptedCodecFactory: codec whose per-unit behaviour is scripted
//! - RecordingSink / ManualClock: consumer-side collaborators
//! - Unit builders for filling input slots

#![allow(dead_code)]

pub mod scripted_codec;
pub mod sinks;

pub use scripted_codec::{
    CodecLog, Gate, ScriptedCodecFactory, Step, MISSING_LIBRARY, SCRIPTED_LIBRARY,
};
pub use sinks::{ManualClock, RecordingSink};

use framepipe_dec::pipeline::{BufferFlags, Format, InputBuffer, PipelineController, Slot};
use framepipe_dec::DecoderConfig;
use std::time::Duration;

/// Generous bound for waits that should finish quickly
pub const WAIT: Duration = Duration::from_secs(5);

pub fn decoder_config(inputs: usize, outputs: usize) -> DecoderConfig {
    DecoderConfig::new(inputs as i64, outputs as i64, 256, 1, 1).unwrap()
}

/// Fill an input slot with a payload identifying the unit
pub fn fill(slot: &mut Slot<InputBuffer>, time_us: i64, flags: BufferFlags) {
    slot.data.clear();
    slot.data.extend_from_slice(&time_us.to_le_bytes());
    slot.time_us = time_us;
    slot.flags = flags;
    slot.format = Some(Format::av1(16, 16));
}

/// Acquire, fill and submit one unit
pub fn submit_unit(controller: &PipelineController, time_us: i64, flags: BufferFlags) {
    let mut slot = controller.dequeue_input_buffer().unwrap();
    fill(&mut slot, time_us, flags);
    controller.submit(slot).unwrap();
}
