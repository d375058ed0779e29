//! Scripted codec
//!
//! Each decode call index maps to a [`Step`]; unscripted calls produce a
//! frame whose bytes are a copy of the input payload. Calls, payloads and
//! closes are recorded in a shared [`CodecLog`].

use framepipe_dec::codec::{
    CodecAdapter, CodecFactory, CodecFailure, CodecLibrary, RetrieveStatus,
};
use framepipe_dec::pipeline::OutputBuffer;
use framepipe_dec::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub static SCRIPTED_LIBRARY: CodecLibrary = CodecLibrary::new("scripted");
pub static MISSING_LIBRARY: CodecLibrary = CodecLibrary::new("missing");

pub const SCRIPTED_VERSION: &str = "1.2.3";

fn load_scripted() -> std::result::Result<String, String> {
    Ok(SCRIPTED_VERSION.to_string())
}

fn load_missing() -> std::result::Result<String, String> {
    Err("libmissing.so: cannot open shared object file".to_string())
}

/// Behaviour of one decode call
#[derive(Debug, Clone)]
pub enum Step {
    Frame,
    /// Codec marks the frame as not for display
    DecodeOnlyFrame,
    /// Codec keeps the unit; no frame yet
    NoFrame,
    FailDecode(&'static str),
    FailRetrieve(&'static str),
    Panic(&'static str),
    /// Wait on the factory gate, then produce a frame
    Block,
}

/// Shared record of codec activity
#[derive(Debug, Default)]
pub struct CodecLog {
    inner: Mutex<LogInner>,
}

#[derive(Debug, Default)]
struct LogInner {
    payloads: Vec<Vec<u8>>,
    created: usize,
    closed: usize,
}

impl CodecLog {
    pub fn decode_calls(&self) -> usize {
        self.inner.lock().unwrap().payloads.len()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().payloads.clone()
    }

    pub fn created(&self) -> usize {
        self.inner.lock().unwrap().created
    }

    pub fn closed(&self) -> usize {
        self.inner.lock().unwrap().closed
    }
}

/// One-shot barrier a blocked decode call waits on
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    waiting: usize,
}

impl Gate {
    fn pass(&self) {
        let mut state = self.state.lock().unwrap();
        state.waiting += 1;
        self.changed.notify_all();
        while !state.open {
            state = self.changed.wait(state).unwrap();
        }
        state.waiting -= 1;
    }

    /// Wait until a decode call is parked on the gate
    pub fn wait_for_waiter(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        while state.waiting == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self.changed.wait_timeout(state, deadline - now).unwrap().0;
        }
        true
    }

    pub fn open(&self) {
        self.state.lock().unwrap().open = true;
        self.changed.notify_all();
    }
}

pub struct ScriptedCodecFactory {
    steps: HashMap<usize, Step>,
    library: &'static CodecLibrary,
    fail_create: bool,
    pub log: Arc<CodecLog>,
    pub gate: Arc<Gate>,
}

impl ScriptedCodecFactory {
    pub fn new() -> Self {
        SCRIPTED_LIBRARY.install(load_scripted);
        Self {
            steps: HashMap::new(),
            library: &SCRIPTED_LIBRARY,
            fail_create: false,
            log: Arc::new(CodecLog::default()),
            gate: Arc::new(Gate::default()),
        }
    }

    /// Factory whose library probe fails
    pub fn unavailable() -> Self {
        MISSING_LIBRARY.install(load_missing);
        Self {
            library: &MISSING_LIBRARY,
            ..Self::new()
        }
    }

    /// Script the decode call with index `call`
    pub fn step(mut self, call: usize, step: Step) -> Self {
        self.steps.insert(call, step);
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }
}

impl CodecFactory for ScriptedCodecFactory {
    fn name(&self) -> &str {
        "Scripted"
    }

    fn library(&self) -> &CodecLibrary {
        self.library
    }

    fn create(&self, _thread_hint: usize, _tile_hint: usize) -> Result<Box<dyn CodecAdapter>> {
        if self.fail_create {
            return Err(Error::Initialization("Failed to initialize decoder.".to_string()));
        }
        self.log.inner.lock().unwrap().created += 1;
        Ok(Box::new(ScriptedCodec {
            steps: self.steps.clone(),
            log: Arc::clone(&self.log),
            gate: Arc::clone(&self.gate),
            calls: 0,
            current: Step::Frame,
            held: Vec::new(),
            last_error: String::new(),
        }))
    }
}

struct ScriptedCodec {
    steps: HashMap<usize, Step>,
    log: Arc<CodecLog>,
    gate: Arc<Gate>,
    calls: usize,
    current: Step,
    /// Payload of the most recent unit
    held: Vec<u8>,
    last_error: String,
}

impl CodecAdapter for ScriptedCodec {
    fn decode(&mut self, payload: &[u8]) -> std::result::Result<(), CodecFailure> {
        let call = self.calls;
        self.calls += 1;
        self.log.inner.lock().unwrap().payloads.push(payload.to_vec());
        self.held = payload.to_vec();
        self.current = self.steps.get(&call).cloned().unwrap_or(Step::Frame);

        match &self.current {
            Step::FailDecode(message) => {
                self.last_error = (*message).to_string();
                Err(CodecFailure)
            }
            Step::Panic(message) => panic!("{}", message),
            Step::Block => {
                self.gate.pass();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn retrieve_frame(&mut self, output: &mut OutputBuffer, _decode_only: bool) -> RetrieveStatus {
        match &self.current {
            Step::NoFrame => RetrieveStatus::NoFrameYet,
            Step::FailRetrieve(message) => {
                self.last_error = (*message).to_string();
                RetrieveStatus::Error
            }
            step => {
                output.data.clear();
                output.data.extend_from_slice(&self.held);
                output.width = 16;
                output.height = 16;
                if matches!(step, Step::DecodeOnlyFrame) {
                    RetrieveStatus::DecodeOnlyFrame
                } else {
                    RetrieveStatus::Frame
                }
            }
        }
    }

    fn last_error_message(&self) -> String {
        self.last_error.clone()
    }

    fn close(&mut self) {
        self.log.inner.lock().unwrap().closed += 1;
    }
}
