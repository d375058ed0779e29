//! Video renderer
//!
//! Consumer side of the pipeline: creates and releases the decoder, routes
//! every dequeued output slot to render or drop, keeps decoder counters and
//! feeds the frame pacing tracker. Pacing notifications and decoder
//! lifecycle are published on the event bus when one is attached.

use crate::codec::CodecFactory;
use crate::config::DecoderConfig;
use crate::error::{Error, Result};
use crate::pacing::{DropStats, FramePacingTracker, PacingConfig, PacingListener};
use crate::pipeline::{Format, OutputBuffer, OutputMode, PipelineController, Slot, MIME_VIDEO_AV1};
use framepipe_common::events::{EventBus, PipelineEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Millisecond clock used for render gaps
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Monotonic clock measured from construction
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Display collaborator receiving rendered frames
///
/// The renderer returns the slot to the pool after `render` returns, whether
/// it succeeded or not.
pub trait FrameSink: Send {
    /// `Yuv` for a buffer renderer, `SurfaceYuv` for a surface
    fn target(&self) -> OutputMode;

    fn render(&mut self, frame: &OutputBuffer) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSupport {
    Unsupported,
    Handled,
}

/// Decoder counters, reset on playback start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderCounters {
    pub rendered_output_buffers: u64,
    pub dropped_buffers: u64,
    /// Decode-only outputs routed to drop (also counted in `dropped_buffers`)
    pub skipped_output_buffers: u64,
    pub decoded_input_buffers: u64,
}

/// Publishes pacing notifications on the event bus
pub struct EventBusPacingListener {
    events: EventBus,
}

impl EventBusPacingListener {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }
}

impl PacingListener for EventBusPacingListener {
    fn on_late_frames(&mut self, delayed_frames: u32, window_frames: u32) {
        self.events.emit_lossy(PipelineEvent::LateFrameCount {
            delayed_frames,
            window_frames,
            timestamp: chrono::Utc::now(),
        });
    }

    fn on_too_many_dropped_frames(&mut self, stats: &DropStats) {
        self.events.emit_lossy(PipelineEvent::DroppedTooManyFrames {
            dropped_in_window: stats.dropped_in_window,
            tier_counts: stats.tier_counts,
            timestamp: chrono::Utc::now(),
        });
    }
}

pub struct VideoRenderer {
    config: DecoderConfig,
    factory: Arc<dyn CodecFactory>,
    decoder: Option<Arc<PipelineController>>,
    sink: Option<Box<dyn FrameSink>>,
    output_mode: OutputMode,
    tracker: FramePacingTracker,
    counters: DecoderCounters,
    decoded_inputs_at_start: u64,
    clock: Arc<dyn Clock>,
    start_time_ms: u64,
    last_render_ms: u64,
    events: Option<EventBus>,
}

impl VideoRenderer {
    pub fn new(config: DecoderConfig, pacing: PacingConfig, factory: Arc<dyn CodecFactory>) -> Self {
        Self {
            config,
            factory,
            decoder: None,
            sink: None,
            output_mode: OutputMode::None,
            tracker: FramePacingTracker::new(pacing),
            counters: DecoderCounters::default(),
            decoded_inputs_at_start: 0,
            clock: Arc::new(SystemClock::default()),
            start_time_ms: 0,
            last_render_ms: 0,
            events: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish lifecycle and pacing events on `events`
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.tracker
            .set_listener(Box::new(EventBusPacingListener::new(events.clone())));
        self.events = Some(events);
        self
    }

    pub fn name(&self) -> &'static str {
        "FramepipeVideoRenderer"
    }

    pub fn supports_format(&self, format: &Format) -> FormatSupport {
        if !format.sample_mime_type.eq_ignore_ascii_case(MIME_VIDEO_AV1)
            || !self.factory.library().is_available()
        {
            return FormatSupport::Unsupported;
        }
        FormatSupport::Handled
    }

    /// Format changes never require a new decoder
    pub fn can_keep_codec(&self, _old: &Format, _new: &Format) -> bool {
        true
    }

    /// Build a decoder for `format`, replacing any existing one
    ///
    /// The format's max input size, when known, overrides the configured
    /// initial input buffer size. Tile hint follows the thread hint.
    pub fn create_decoder(&mut self, format: &Format) -> Result<Arc<PipelineController>> {
        self.release_decoder();

        let config = DecoderConfig {
            initial_input_buffer_size: format
                .max_input_size
                .unwrap_or(self.config.initial_input_buffer_size),
            tile_hint: self.config.thread_hint,
            ..self.config
        };
        debug!("Creating decoder for {} {}x{}", format.sample_mime_type, format.width, format.height);

        let decoder = Arc::new(PipelineController::new(config, self.factory.as_ref())?);
        decoder.set_output_mode(self.output_mode);

        self.emit(PipelineEvent::DecoderCreated {
            decoder_id: decoder.decoder_id(),
            name: decoder.name().to_string(),
            num_input_buffers: config.num_input_buffers,
            num_output_buffers: config.num_output_buffers,
            timestamp: chrono::Utc::now(),
        });

        self.decoder = Some(Arc::clone(&decoder));
        Ok(decoder)
    }

    /// Close and forget the current decoder, clearing drop statistics
    pub fn release_decoder(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            decoder.close();
            self.emit(PipelineEvent::DecoderReleased {
                decoder_id: decoder.decoder_id(),
                timestamp: chrono::Utc::now(),
            });
        }
        self.tracker.clear();
    }

    pub fn decoder(&self) -> Option<&Arc<PipelineController>> {
        self.decoder.as_ref()
    }

    /// Set (or clear) the display target; the output mode follows it
    pub fn set_output_sink(&mut self, sink: Option<Box<dyn FrameSink>>) {
        self.output_mode = sink.as_ref().map_or(OutputMode::None, |s| s.target());
        self.sink = sink;
        if let Some(decoder) = &self.decoder {
            decoder.set_output_mode(self.output_mode);
        }
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    /// Present one dequeued output slot
    ///
    /// Decode-only slots are dropped and end-of-stream markers are released
    /// without rendering. Otherwise the frame goes to the sink; the slot is
    /// released exactly once either way, and the counters and pacing tracker
    /// are updated only when the sink succeeded.
    pub fn render_output_buffer(&mut self, slot: Slot<OutputBuffer>) -> Result<()> {
        if slot.is_end_of_stream() {
            trace!("End of stream reached at time_us={}", slot.time_us);
            return self.release(slot);
        }
        if slot.is_decode_only() {
            self.counters.skipped_output_buffers += 1;
            return self.drop_output_buffer(slot);
        }

        let rendered = match self.sink.as_mut() {
            None => Err(Error::InvalidState("no output sink configured".to_string())),
            Some(sink) if sink.target() == OutputMode::SurfaceYuv && self.decoder.is_none() => {
                Err(Error::Decode(
                    "Failed to render output buffer to surface: decoder is not initialized."
                        .to_string(),
                ))
            }
            Some(sink) => sink.render(&slot),
        };
        let time_us = slot.time_us;
        let released = self.release(slot);
        rendered?;
        released?;

        self.counters.rendered_output_buffers += 1;
        let now = self.clock.now_ms();
        let gap = now.saturating_sub(self.last_render_ms);
        self.last_render_ms = now;
        trace!(
            "Rendered frame {} time_us={}, average {} ms, gap {} ms",
            self.counters.rendered_output_buffers,
            time_us,
            now.saturating_sub(self.start_time_ms) / self.counters.rendered_output_buffers,
            gap
        );
        self.tracker.on_rendered(Duration::from_millis(gap));
        Ok(())
    }

    /// Skip one dequeued output slot
    pub fn drop_output_buffer(&mut self, slot: Slot<OutputBuffer>) -> Result<()> {
        self.counters.dropped_buffers += 1;
        self.tracker.on_dropped();
        trace!(
            "Dropped frame time_us={} (total dropped {})",
            slot.time_us,
            self.counters.dropped_buffers
        );
        self.release(slot)
    }

    /// Report a decoder failure observed by the consumer
    pub fn on_decode_error(&self, error: &Error) {
        if let Some(decoder) = &self.decoder {
            self.emit(PipelineEvent::DecodeFailed {
                decoder_id: decoder.decoder_id(),
                message: error.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
    }

    pub fn on_started(&mut self) {
        self.tracker.start();
        self.counters = DecoderCounters::default();
        self.decoded_inputs_at_start = self
            .decoder
            .as_ref()
            .map_or(0, |d| d.decoded_input_count());
        self.start_time_ms = self.clock.now_ms();
        self.last_render_ms = self.start_time_ms;

        info!("Video renderer started at {} ms", self.start_time_ms);
        self.emit(PipelineEvent::PlaybackStarted {
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn on_stopped(&mut self) {
        self.tracker.stop();
        let counters = self.counters();

        info!(
            "Video renderer stopped: rendered={}, dropped={}, skipped={}, decoded={}",
            counters.rendered_output_buffers,
            counters.dropped_buffers,
            counters.skipped_output_buffers,
            counters.decoded_input_buffers
        );
        self.emit(PipelineEvent::PlaybackStopped {
            rendered_frames: counters.rendered_output_buffers,
            dropped_frames: counters.dropped_buffers,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Flush the decoder and clear drop statistics
    pub fn flush(&mut self) -> Result<()> {
        if let Some(decoder) = &self.decoder {
            decoder.flush()?;
        }
        self.tracker.reset_on_flush();
        Ok(())
    }

    pub fn counters(&self) -> DecoderCounters {
        let decoded = self
            .decoder
            .as_ref()
            .map_or(0, |d| d.decoded_input_count());
        DecoderCounters {
            decoded_input_buffers: decoded.saturating_sub(self.decoded_inputs_at_start),
            ..self.counters
        }
    }

    pub fn tracker(&self) -> &FramePacingTracker {
        &self.tracker
    }

    fn release(&self, slot: Slot<OutputBuffer>) -> Result<()> {
        match &self.decoder {
            Some(decoder) => decoder.release_output(slot),
            // Pool went away with the decoder
            None => Ok(()),
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.emit_lossy(event);
        }
    }
}
