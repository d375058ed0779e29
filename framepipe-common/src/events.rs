//! Event types for the framepipe event system
//!
//! Provides pipeline event definitions and the EventBus used to deliver them
//! to interested listeners (logging, JSON output, host player glue).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Decoder pipeline events
///
/// Events are broadcast via EventBus and can be serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Decoder instance constructed and worker started
    DecoderCreated {
        /// Decoder instance identifier
        decoder_id: Uuid,
        /// Decoder name (codec + library version)
        name: String,
        /// Input slot count
        num_input_buffers: usize,
        /// Output slot count
        num_output_buffers: usize,
        /// When the decoder was created
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Decoder instance released (codec closed)
    DecoderReleased {
        /// Decoder instance identifier
        decoder_id: Uuid,
        /// When the decoder was released
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Codec reported a failure; decoder needs flush or release
    DecodeFailed {
        /// Decoder instance identifier
        decoder_id: Uuid,
        /// Diagnostic message from the codec
        message: String,
        /// When the failure was observed by the consumer
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Late frame report for one pacing window
    LateFrameCount {
        /// Frames whose render gap exceeded the threshold
        delayed_frames: u32,
        /// Rendered frames in the reported window
        window_frames: u32,
        /// When the window closed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Drop bursts crossed a severity ceiling
    DroppedTooManyFrames {
        /// Dropped frames in the current measure window
        dropped_in_window: u32,
        /// Lifetime bucket counts at the time of the crossing (tiers 0..=4)
        tier_counts: [u32; 5],
        /// When the crossing happened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Renderer started
    PlaybackStarted {
        /// When playback started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Renderer stopped
    PlaybackStopped {
        /// Frames rendered since start
        rendered_frames: u64,
        /// Frames dropped since start
        dropped_frames: u64,
        /// When playback stopped
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PipelineEvent {
    /// Short event name (the serialized `type` tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::DecoderCreated { .. } => "DecoderCreated",
            PipelineEvent::DecoderReleased { .. } => "DecoderReleased",
            PipelineEvent::DecodeFailed { .. } => "DecodeFailed",
            PipelineEvent::LateFrameCount { .. } => "LateFrameCount",
            PipelineEvent::DroppedTooManyFrames { .. } => "DroppedTooManyFrames",
            PipelineEvent::PlaybackStarted { .. } => "PlaybackStarted",
            PipelineEvent::PlaybackStopped { .. } => "PlaybackStopped",
        }
    }

    /// Serialize as a single JSON line
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally: publishing never blocks, slow
/// subscribers observe `Lagged` instead of stalling the pipeline.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
