//! Consumer-side collaborators for renderer tests

use framepipe_dec::pipeline::{OutputBuffer, OutputMode};
use framepipe_dec::renderer::{Clock, FrameSink};
use framepipe_dec::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Records the timestamp of every frame it is asked to render
pub struct RecordingSink {
    target: OutputMode,
    fail: bool,
    pub rendered: Arc<Mutex<Vec<i64>>>,
}

impl RecordingSink {
    pub fn new(target: OutputMode) -> Self {
        Self {
            target,
            fail: false,
            rendered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sink that records the call and then fails it
    pub fn failing(target: OutputMode) -> Self {
        Self {
            fail: true,
            ..Self::new(target)
        }
    }
}

impl FrameSink for RecordingSink {
    fn target(&self) -> OutputMode {
        self.target
    }

    fn render(&mut self, frame: &OutputBuffer) -> Result<()> {
        self.rendered.lock().unwrap().push(frame.time_us);
        if self.fail {
            return Err(Error::Decode("display rejected frame".to_string()));
        }
        Ok(())
    }
}

/// Clock advanced explicitly by the test
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
