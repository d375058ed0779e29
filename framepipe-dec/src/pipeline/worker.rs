//! Decode worker
//!
//! One dedicated thread per pipeline. It takes the oldest queued input unit
//! once an output slot is free, runs it through the codec outside the state
//! lock, and queues the result. Only one decode call is ever in flight.

use super::buffer_pool::{Owner, Slot};
use super::buffers::{BufferFlags, InputBuffer, OutputBuffer, OutputMode};
use super::controller::{Phase, Shared};
use crate::codec::{CodecAdapter, RetrieveStatus};
use crate::error::{Error, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use tracing::{debug, error, trace, warn};

/// What one input unit produced
#[derive(Debug, PartialEq, Eq)]
enum UnitOutcome {
    /// Output slot holds a frame (or an end-of-stream marker) for the consumer
    Frame,
    /// Codec needs more input; output slot goes straight back to the pool
    NoFrame,
}

/// Worker thread main loop
///
/// Returns the codec when the pipeline closes so the controller can close it
/// exactly once.
pub(crate) fn run(shared: Arc<Shared>, mut codec: Box<dyn CodecAdapter>) -> Box<dyn CodecAdapter> {
    debug!("Decode worker started");

    loop {
        let Some((input, mut output, epoch)) = next_unit(&shared) else {
            break;
        };

        let mode = OutputMode::from_u8(shared.output_mode.load(Ordering::Acquire));
        trace!(
            "Decoding unit time_us={} flags={:?} ({} bytes)",
            input.time_us,
            input.flags,
            input.data.len()
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            decode_unit(codec.as_mut(), &input, &mut output, mode)
        }))
        .unwrap_or_else(|payload| {
            Err(Error::Unexpected {
                message: panic_message(payload.as_ref()),
                source: None,
            })
        });

        finish_unit(&shared, input, output, epoch, outcome);
    }

    debug!("Decode worker exiting");
    codec
}

/// Wait for a queued input unit and a free output slot
///
/// Returns None once the pipeline is closed.
fn next_unit(shared: &Shared) -> Option<(Slot<InputBuffer>, Slot<OutputBuffer>, u64)> {
    let mut state = shared.lock_state();

    loop {
        if state.phase == Phase::Closed {
            return None;
        }

        if state.phase == Phase::Running && !state.failed {
            if let Some(input) = state.queued_input.pop_front() {
                match shared.output_pool.try_acquire(Owner::Worker) {
                    Ok(Some(output)) => {
                        if let Err(e) = shared.input_pool.hand_to(&input, Owner::Worker) {
                            // Unit skipped; the failure reaches the consumer
                            error!("Input slot {} handoff rejected: {}", input.index(), e);
                            release_input(shared, input);
                            release_output(shared, output);
                            state.record_failure(e);
                            shared.output_available.notify_all();
                            continue;
                        }
                        state.decoding = true;
                        return Some((input, output, state.flush_epoch));
                    }
                    Ok(None) => state.queued_input.push_front(input),
                    Err(e) => {
                        // Pool destroyed: the pipeline is closing
                        debug!("Decode worker stopping: {}", e);
                        state.queued_input.push_front(input);
                        return None;
                    }
                }
            }
        }

        state = shared
            .work_available
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Publish the result of one unit and return the consumed slots
fn finish_unit(
    shared: &Shared,
    input: Slot<InputBuffer>,
    output: Slot<OutputBuffer>,
    epoch: u64,
    outcome: Result<UnitOutcome>,
) {
    let mut state = shared.lock_state();
    state.decoding = false;
    state.decoded_inputs += 1;

    release_input(shared, input);

    let stale = state.flush_epoch != epoch || state.phase == Phase::Closed;
    if stale {
        trace!("Discarding unit decoded across flush/close");
        release_output(shared, output);
    } else {
        match outcome {
            Ok(UnitOutcome::Frame) => match shared.output_pool.enqueue(&output) {
                Ok(()) => {
                    trace!("Queued output time_us={} flags={:?}", output.time_us, output.flags);
                    state.queued_output.push_back(output);
                    shared.output_available.notify_all();
                }
                Err(e) => {
                    release_output(shared, output);
                    state.record_failure(e);
                    shared.output_available.notify_all();
                }
            },
            Ok(UnitOutcome::NoFrame) => {
                trace!("Codec produced no frame yet");
                release_output(shared, output);
            }
            Err(e) => {
                error!("Decode failed: {}", e);
                release_output(shared, output);
                state.record_failure(e);
                shared.output_available.notify_all();
            }
        }
    }

    drop(state);
    shared.worker_idle.notify_all();
}

fn release_input(shared: &Shared, input: Slot<InputBuffer>) {
    if let Err(e) = shared.input_pool.release(input) {
        warn!("Failed to release input slot: {}", e);
    }
}

fn release_output(shared: &Shared, output: Slot<OutputBuffer>) {
    if let Err(e) = shared.output_pool.release(output) {
        warn!("Failed to release output slot: {}", e);
    }
}

/// Run one input unit through the codec
fn decode_unit(
    codec: &mut dyn CodecAdapter,
    input: &InputBuffer,
    output: &mut OutputBuffer,
    mode: OutputMode,
) -> Result<UnitOutcome> {
    if input.is_end_of_stream() {
        output.time_us = input.time_us;
        output.flags.insert(BufferFlags::END_OF_STREAM);
        return Ok(UnitOutcome::Frame);
    }

    if codec.decode(&input.data).is_err() {
        return Err(Error::Decode(format!(
            "decode error: {}",
            codec.last_error_message()
        )));
    }

    // Retrieve even for decode-only input: the frame has to leave the codec
    let decode_only = input.is_decode_only();
    if !decode_only {
        output.init(input.time_us, mode);
    }

    match codec.retrieve_frame(output, decode_only) {
        RetrieveStatus::Frame => {}
        RetrieveStatus::DecodeOnlyFrame => output.flags.insert(BufferFlags::DECODE_ONLY),
        RetrieveStatus::NoFrameYet => return Ok(UnitOutcome::NoFrame),
        RetrieveStatus::Error => {
            return Err(Error::Decode(format!(
                "retrieve frame error: {}",
                codec.last_error_message()
            )))
        }
    }

    if decode_only {
        output.flags.insert(BufferFlags::DECODE_ONLY);
    } else {
        output.format = input.format.clone();
    }

    Ok(UnitOutcome::Frame)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "codec panicked".to_string()
    }
}
