//! Synthetic playback session
//!
//! Plays the caller-thread role against a renderer whose decoder was built
//! with the synthetic codec: fills input slots with synthetic units, submits
//! them, dequeues decoded frames in order and renders or drops them. A decode
//! failure is reported, flushed and playback continues with the next unit.

use crate::codec::synthetic::SyntheticUnit;
use crate::error::{Error, Result};
use crate::pipeline::{BufferFlags, Format, PipelineController, Wait};
use crate::renderer::VideoRenderer;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const OUTPUT_POLL: Duration = Duration::from_millis(100);

/// Shape of the synthetic stream
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Units to submit before end of stream
    pub frames: u32,
    /// Presentation interval between units
    pub frame_interval: Duration,
    /// Every n-th unit is submitted decode-only
    pub decode_only_every: Option<u32>,
    /// Drop frames that come out this far behind their presentation time
    pub late_threshold: Option<Duration>,
    /// Wait for each frame's presentation time before rendering
    pub realtime: bool,
    /// Filler bytes after each unit header
    pub unit_padding: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frames: 120,
            frame_interval: Duration::from_micros(33_333),
            decode_only_every: None,
            late_threshold: None,
            realtime: false,
            unit_padding: 256,
        }
    }
}

/// Outcome of one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub submitted: u32,
    pub rendered: u64,
    pub dropped: u64,
    pub skipped: u64,
    pub decode_errors: u32,
    pub reached_end_of_stream: bool,
    /// Stopped early by close (Ctrl+C)
    pub cancelled: bool,
}

pub struct PlaybackSession {
    config: SessionConfig,
    format: Format,
}

impl PlaybackSession {
    pub fn new(config: SessionConfig, format: Format) -> Self {
        Self { config, format }
    }

    /// Play the whole stream through `renderer`'s current decoder
    ///
    /// # Errors
    /// `Error::InvalidState` if the renderer has no decoder; any renderer or
    /// pipeline error other than a recoverable decode failure or a close.
    pub fn run(&self, renderer: &mut VideoRenderer) -> Result<SessionReport> {
        let decoder = renderer
            .decoder()
            .cloned()
            .ok_or_else(|| Error::InvalidState("renderer has no decoder".to_string()))?;

        let mut report = SessionReport::default();
        let mut next_index: u32 = 0;
        let mut eos_submitted = false;

        renderer.on_started();
        let started = Instant::now();

        loop {
            match self.feed(&decoder, &mut next_index, &mut eos_submitted) {
                Ok(()) => {}
                Err(e) if e.is_cancellation() => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            }

            match decoder.dequeue_output(Wait::Timeout(OUTPUT_POLL)) {
                Ok(Some(slot)) => {
                    if slot.is_end_of_stream() {
                        renderer.render_output_buffer(slot)?;
                        report.reached_end_of_stream = true;
                        break;
                    }

                    let due = Duration::from_micros(u64::try_from(slot.time_us).unwrap_or(0));
                    let elapsed = started.elapsed();
                    let late = self
                        .config
                        .late_threshold
                        .is_some_and(|threshold| self.config.realtime && elapsed > due + threshold);

                    if late {
                        debug!("Frame at {} us is late by {:?}", slot.time_us, elapsed - due);
                        renderer.drop_output_buffer(slot)?;
                    } else {
                        if self.config.realtime && due > elapsed && !slot.is_decode_only() {
                            thread::sleep(due - elapsed);
                        }
                        renderer.render_output_buffer(slot)?;
                    }
                }
                Ok(None) => {}
                Err(e @ (Error::Decode(_) | Error::Unexpected { .. } | Error::InvalidState(_))) => {
                    warn!("Decoder reported failure, flushing: {}", e);
                    renderer.on_decode_error(&e);
                    report.decode_errors += 1;
                    renderer.flush()?;
                    // Flush discarded everything queued, end of stream included
                    eos_submitted = false;
                }
                Err(e) if e.is_cancellation() => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        renderer.on_stopped();

        let counters = renderer.counters();
        report.rendered = counters.rendered_output_buffers;
        report.dropped = counters.dropped_buffers;
        report.skipped = counters.skipped_output_buffers;
        report.submitted = next_index;

        info!(
            "Session finished: submitted={}, rendered={}, dropped={}, errors={}, eos={}",
            report.submitted, report.rendered, report.dropped, report.decode_errors,
            report.reached_end_of_stream
        );
        Ok(report)
    }

    /// Submit as many units as there are free input slots
    fn feed(
        &self,
        decoder: &Arc<PipelineController>,
        next_index: &mut u32,
        eos_submitted: &mut bool,
    ) -> Result<()> {
        while !*eos_submitted {
            let mut slot = match decoder.try_dequeue_input_buffer() {
                Ok(Some(slot)) => slot,
                Ok(None) => return Ok(()),
                // Failure pending delivery; the consumer side will flush
                Err(Error::InvalidState(_)) => return Ok(()),
                Err(e) => return Err(e),
            };

            let time_us = i64::from(*next_index) * self.config.frame_interval.as_micros() as i64;
            slot.time_us = time_us;
            slot.format = Some(self.format.clone());

            if *next_index >= self.config.frames {
                slot.flags = BufferFlags::END_OF_STREAM;
                *eos_submitted = true;
            } else {
                SyntheticUnit::new(*next_index, time_us)
                    .encode_into(&mut slot.data, self.config.unit_padding);
                if *next_index == 0 {
                    slot.flags.insert(BufferFlags::KEY_FRAME);
                }
                if let Some(every) = self.config.decode_only_every.filter(|n| *n > 0) {
                    if *next_index % every == every - 1 {
                        slot.flags.insert(BufferFlags::DECODE_ONLY);
                    }
                }
                *next_index += 1;
            }

            match decoder.submit(slot) {
                Ok(()) => {}
                // Worker failed between dequeue and submit; the unit is lost with the flush
                Err(Error::InvalidState(_)) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{SyntheticCodecConfig, SyntheticCodecFactory};
    use crate::config::DecoderConfig;
    use crate::pacing::PacingConfig;
    use crate::pipeline::{OutputBuffer, OutputMode};
    use crate::renderer::FrameSink;

    struct CountingSink;

    impl FrameSink for CountingSink {
        fn target(&self) -> OutputMode {
            OutputMode::Yuv
        }

        fn render(&mut self, _frame: &OutputBuffer) -> Result<()> {
            Ok(())
        }
    }

    fn renderer(codec: SyntheticCodecConfig) -> VideoRenderer {
        let mut renderer = VideoRenderer::new(
            DecoderConfig::new(4, 4, 1024, 1, 1).unwrap(),
            PacingConfig::default(),
            Arc::new(SyntheticCodecFactory::new(codec)),
        );
        renderer.set_output_sink(Some(Box::new(CountingSink)));
        renderer.create_decoder(&Format::av1(8, 8)).unwrap();
        renderer
    }

    #[test]
    fn test_session_renders_every_frame() {
        let mut renderer = renderer(SyntheticCodecConfig::with_size(8, 8));
        let session = PlaybackSession::new(
            SessionConfig {
                frames: 30,
                ..Default::default()
            },
            Format::av1(8, 8),
        );

        let report = session.run(&mut renderer).unwrap();

        assert!(report.reached_end_of_stream);
        assert_eq!(report.submitted, 30);
        assert_eq!(report.rendered, 30);
        assert_eq!(report.dropped, 0);
        assert_eq!(renderer.counters().decoded_input_buffers, 31);
    }

    #[test]
    fn test_session_skips_decode_only_units() {
        let mut renderer = renderer(SyntheticCodecConfig::with_size(8, 8));
        let session = PlaybackSession::new(
            SessionConfig {
                frames: 12,
                decode_only_every: Some(3),
                ..Default::default()
            },
            Format::av1(8, 8),
        );

        let report = session.run(&mut renderer).unwrap();

        assert_eq!(report.rendered, 8);
        assert_eq!(report.skipped, 4);
        assert_eq!(report.dropped, 4);
    }

    #[test]
    fn test_session_recovers_from_decode_failure() {
        let mut renderer = renderer(SyntheticCodecConfig {
            fail_decode_at: Some(5),
            ..SyntheticCodecConfig::with_size(8, 8)
        });
        let session = PlaybackSession::new(
            SessionConfig {
                frames: 20,
                ..Default::default()
            },
            Format::av1(8, 8),
        );

        let report = session.run(&mut renderer).unwrap();

        assert_eq!(report.decode_errors, 1);
        assert!(report.reached_end_of_stream);
        // Units queued behind the failure are discarded by the flush
        assert!(report.rendered < 20);
        assert!(report.rendered >= 5);
    }

    #[test]
    fn test_session_without_decoder() {
        let mut renderer = VideoRenderer::new(
            DecoderConfig::default(),
            PacingConfig::default(),
            Arc::new(SyntheticCodecFactory::new(SyntheticCodecConfig::default())),
        );
        let session = PlaybackSession::new(SessionConfig::default(), Format::av1(8, 8));
        assert!(matches!(session.run(&mut renderer), Err(Error::InvalidState(_))));
    }
}
