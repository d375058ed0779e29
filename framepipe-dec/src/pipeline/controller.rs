//! Pipeline controller
//!
//! Owns the input and output queues, the two buffer pools and the decode
//! worker thread. All shared state sits behind one mutex; three condition
//! variables signal the transitions the actors wait for:
//!
//! - `work_available`: input queued, output slot freed, flush finished, close
//! - `output_available`: output queued, error recorded, flush, close
//! - `worker_idle`: an in-flight decode call finished
//!
//! Lock order is controller state, then pool. Pools never call back into the
//! controller.

use super::buffer_pool::{BufferPool, Owner, Slot};
use super::buffers::{InputBuffer, OutputBuffer, OutputMode};
use super::worker;
use crate::codec::{CodecAdapter, CodecFactory};
use crate::config::DecoderConfig;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// How long `dequeue_output` may wait for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Return immediately if nothing is ready
    NonBlocking,
    /// Wait up to the given duration
    Timeout(Duration),
    /// Wait until a frame, an error, flush or close
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Running,
    Flushing,
    Closed,
}

pub(crate) struct PipelineState {
    pub(crate) phase: Phase,
    pub(crate) queued_input: VecDeque<Slot<InputBuffer>>,
    pub(crate) queued_output: VecDeque<Slot<OutputBuffer>>,
    /// Worker failure not yet delivered to the consumer
    pub(crate) pending_error: Option<Error>,
    /// Set on worker failure; cleared only by flush
    pub(crate) failed: bool,
    /// A decode call is in flight
    pub(crate) decoding: bool,
    /// Bumped by every flush; results from an older epoch are discarded
    pub(crate) flush_epoch: u64,
    pub(crate) decoded_inputs: u64,
}

impl PipelineState {
    pub(crate) fn record_failure(&mut self, error: Error) {
        self.failed = true;
        if self.pending_error.is_none() {
            self.pending_error = Some(error);
        }
    }
}

/// State shared between the controller and its worker thread
pub(crate) struct Shared {
    state: Mutex<PipelineState>,
    pub(crate) work_available: Condvar,
    pub(crate) output_available: Condvar,
    pub(crate) worker_idle: Condvar,
    pub(crate) output_mode: AtomicU8,
    pub(crate) input_pool: BufferPool<InputBuffer>,
    pub(crate) output_pool: BufferPool<OutputBuffer>,
}

impl Shared {
    pub(crate) fn new(
        input_pool: BufferPool<InputBuffer>,
        output_pool: BufferPool<OutputBuffer>,
    ) -> Self {
        Self {
            state: Mutex::new(PipelineState {
                phase: Phase::Running,
                queued_input: VecDeque::new(),
                queued_output: VecDeque::new(),
                pending_error: None,
                failed: false,
                decoding: false,
                flush_epoch: 0,
                decoded_inputs: 0,
            }),
            work_available: Condvar::new(),
            output_available: Condvar::new(),
            worker_idle: Condvar::new(),
            output_mode: AtomicU8::new(OutputMode::None as u8),
            input_pool,
            output_pool,
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Asynchronous single-worker decode pipeline
///
/// The caller thread acquires input slots, fills and submits them, and
/// dequeues decoded output slots in submission order. A dedicated worker
/// thread runs the codec. Dropping the controller closes it.
pub struct PipelineController {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<Box<dyn CodecAdapter>>>>,
    decoder_id: Uuid,
    name: String,
}

impl PipelineController {
    /// Create the pools, the codec context and the worker thread
    ///
    /// # Errors
    /// - `Error::Initialization` if the codec library is unavailable or the
    ///   codec context cannot be created
    /// - `Error::Config` if a pool cannot be built
    pub fn new(config: DecoderConfig, factory: &dyn CodecFactory) -> Result<Self> {
        let library = factory.library();
        if !library.is_available() {
            return Err(Error::Initialization(
                "Failed to load decoder native library.".to_string(),
            ));
        }

        let input_size = config.initial_input_buffer_size;
        let input_pool = BufferPool::new("input", config.num_input_buffers, || {
            InputBuffer::with_capacity(input_size)
        })?;
        let output_pool = BufferPool::new("output", config.num_output_buffers, OutputBuffer::default)?;

        let codec = factory.create(config.thread_hint, config.tile_hint)?;

        let shared = Arc::new(Shared::new(input_pool, output_pool));

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("framepipe-decode".to_string())
            .spawn(move || worker::run(worker_shared, codec))
            .map_err(|e| Error::unexpected("Failed to spawn decode worker", e))?;

        let decoder_id = Uuid::new_v4();
        let name = format!("lib{}{}", factory.name(), library.version().unwrap_or_default());

        info!(
            "Decoder {} created: name={}, inputs={}, outputs={}, threads={}, tiles={}",
            decoder_id,
            name,
            config.num_input_buffers,
            config.num_output_buffers,
            config.thread_hint,
            config.tile_hint
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
            decoder_id,
            name,
        })
    }

    /// `"lib" + codec name + library version`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn decoder_id(&self) -> Uuid {
        self.decoder_id
    }

    /// Acquire a free input slot, blocking until one is available
    ///
    /// # Errors
    /// - `Error::Closed` if the pipeline is (or becomes) closed
    /// - `Error::Cancelled` if a flush interrupts the wait
    /// - `Error::InvalidState` while a worker failure awaits flush
    pub fn dequeue_input_buffer(&self) -> Result<Slot<InputBuffer>> {
        self.check_accepting()?;
        self.shared
            .input_pool
            .acquire(Owner::Producer)
            .map_err(pool_error)
    }

    /// Acquire a free input slot without blocking
    pub fn try_dequeue_input_buffer(&self) -> Result<Option<Slot<InputBuffer>>> {
        self.check_accepting()?;
        self.shared
            .input_pool
            .try_acquire(Owner::Producer)
            .map_err(pool_error)
    }

    /// Give back an input slot that will not be submitted
    pub fn release_input(&self, slot: Slot<InputBuffer>) -> Result<()> {
        self.shared.input_pool.release(slot)
    }

    /// Queue a filled input slot for the worker
    ///
    /// # Errors
    /// - `Error::Closed` after close
    /// - `Error::InvalidState` during flush, after a worker failure that has
    ///   not been flushed, or for a slot from another pipeline
    ///
    /// On error the slot is returned to its pool.
    pub fn submit(&self, slot: Slot<InputBuffer>) -> Result<()> {
        let mut state = self.shared.lock_state();

        let rejection = match state.phase {
            Phase::Closed => Some(Error::Closed),
            Phase::Flushing => Some(Error::InvalidState(
                "cannot submit while flushing".to_string(),
            )),
            Phase::Running if state.failed => Some(Error::InvalidState(
                "decoder failed; flush or close before submitting".to_string(),
            )),
            Phase::Running => None,
        };
        if let Some(err) = rejection {
            drop(state);
            let _ = self.shared.input_pool.release(slot);
            return Err(err);
        }

        if let Err(e) = self.shared.input_pool.enqueue(&slot) {
            drop(state);
            // A slot from another pipeline goes back to its own pool
            let _ = self.shared.input_pool.release(slot);
            return Err(e);
        }
        trace!(
            "Submitted input slot {} time_us={} flags={:?}",
            slot.index(),
            slot.time_us,
            slot.flags
        );
        state.queued_input.push_back(slot);
        drop(state);

        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Next decoded output slot, in submission order
    ///
    /// Queued outputs are delivered before a recorded worker error; the error
    /// is delivered exactly once. `Ok(None)` means nothing became ready
    /// within the wait.
    ///
    /// # Errors
    /// - the recorded worker error (`Decode`, `Unexpected`, `InvalidState`)
    /// - `Error::Cancelled` if a flush interrupts the wait
    /// - `Error::Closed` after close
    pub fn dequeue_output(&self, wait: Wait) -> Result<Option<Slot<OutputBuffer>>> {
        let deadline = match wait {
            Wait::NonBlocking => Some(Instant::now()),
            // Too far out to be a deadline: same as blocking
            Wait::Timeout(timeout) => Instant::now().checked_add(timeout),
            Wait::Blocking => None,
        };

        let mut state = self.shared.lock_state();
        let epoch = state.flush_epoch;

        loop {
            if state.phase == Phase::Closed {
                return Err(Error::Closed);
            }
            if state.flush_epoch != epoch {
                return Err(Error::Cancelled("output wait interrupted by flush".to_string()));
            }
            if let Some(slot) = state.queued_output.pop_front() {
                if let Err(e) = self.shared.output_pool.hand_to(&slot, Owner::Consumer) {
                    let _ = self.shared.output_pool.release(slot);
                    self.shared.work_available.notify_one();
                    return Err(e);
                }
                return Ok(Some(slot));
            }
            if let Some(err) = state.pending_error.take() {
                debug!("Delivering worker error to consumer: {}", err);
                return Err(err);
            }

            state = match deadline {
                None => self
                    .shared
                    .output_available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    self.shared
                        .output_available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Return an output slot after render or drop
    pub fn release_output(&self, slot: Slot<OutputBuffer>) -> Result<()> {
        self.shared.output_pool.release(slot)?;

        // The worker may be waiting for a free output slot
        let _state = self.shared.lock_state();
        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Discard all queued work and return to running
    ///
    /// Waits for an in-flight decode call to finish; its result is discarded.
    /// Clears a recorded worker failure. Blocked `dequeue_output` and
    /// `dequeue_input_buffer` callers are woken with `Cancelled`.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.shared.lock_state();
        if state.phase == Phase::Closed {
            return Err(Error::Closed);
        }

        state.phase = Phase::Flushing;
        state.flush_epoch += 1;

        let inputs: Vec<_> = state.queued_input.drain(..).collect();
        let outputs: Vec<_> = state.queued_output.drain(..).collect();
        let discarded = (inputs.len(), outputs.len());
        for slot in inputs {
            if let Err(e) = self.shared.input_pool.release(slot) {
                warn!("Failed to release input slot during flush: {}", e);
            }
        }
        for slot in outputs {
            if let Err(e) = self.shared.output_pool.release(slot) {
                warn!("Failed to release output slot during flush: {}", e);
            }
        }
        state.pending_error = None;
        state.failed = false;

        self.shared.output_available.notify_all();
        self.shared.input_pool.interrupt();

        while state.decoding {
            state = self
                .shared
                .worker_idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        // Close may have happened while waiting for the worker
        if state.phase == Phase::Flushing {
            state.phase = Phase::Running;
        }
        drop(state);
        self.shared.work_available.notify_all();

        debug!(
            "Decoder {} flushed: discarded {} input, {} output",
            self.decoder_id, discarded.0, discarded.1
        );
        Ok(())
    }

    /// Shut the pipeline down
    ///
    /// Wakes every blocked caller, joins the worker and closes the codec
    /// exactly once. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.shared.lock_state();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Closed;
            state.pending_error = None;

            let inputs: Vec<_> = state.queued_input.drain(..).collect();
            let outputs: Vec<_> = state.queued_output.drain(..).collect();
            for slot in inputs {
                let _ = self.shared.input_pool.release(slot);
            }
            for slot in outputs {
                let _ = self.shared.output_pool.release(slot);
            }
        }

        self.shared.work_available.notify_all();
        self.shared.output_available.notify_all();
        self.shared.worker_idle.notify_all();
        self.shared.input_pool.destroy();
        self.shared.output_pool.destroy();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            match handle.join() {
                Ok(mut codec) => {
                    codec.close();
                    debug!("Decode worker joined, codec closed");
                }
                Err(_) => error!("Decode worker terminated abnormally; codec not closed"),
            }
        }

        info!("Decoder {} closed", self.decoder_id);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock_state().phase == Phase::Closed
    }

    /// Output mode stamped on render-eligible frames
    pub fn set_output_mode(&self, mode: OutputMode) {
        self.shared.output_mode.store(mode as u8, Ordering::Release);
    }

    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from_u8(self.shared.output_mode.load(Ordering::Acquire))
    }

    /// Input units the worker has finished with since construction
    pub fn decoded_input_count(&self) -> u64 {
        self.shared.lock_state().decoded_inputs
    }

    pub fn free_input_slots(&self) -> usize {
        self.shared.input_pool.free_count()
    }

    pub fn free_output_slots(&self) -> usize {
        self.shared.output_pool.free_count()
    }

    fn check_accepting(&self) -> Result<()> {
        let state = self.shared.lock_state();
        match state.phase {
            Phase::Closed => Err(Error::Closed),
            _ if state.failed => Err(Error::InvalidState(
                "decoder failed; flush or close before submitting".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pool teardown means the pipeline closed under the caller
fn pool_error(error: Error) -> Error {
    match error {
        Error::PoolDestroyed(_) => Error::Closed,
        other => other,
    }
}
