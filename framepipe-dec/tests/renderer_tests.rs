//! Renderer routing, counters and pacing events

mod helpers;

use framepipe_common::events::{EventBus, PipelineEvent};
use framepipe_dec::pipeline::{BufferFlags, Format, OutputMode, PipelineController, Wait};
use framepipe_dec::renderer::FormatSupport;
use framepipe_dec::{Error, PacingConfig, VideoRenderer};
use helpers::*;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

fn drain(rx: &mut Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
    events
}

/// Submit one unit and hand the decoded slot to the renderer
fn decode_and_render(renderer: &mut VideoRenderer, controller: &PipelineController, time_us: i64) {
    submit_unit(controller, time_us, BufferFlags::empty());
    let slot = controller.dequeue_output(Wait::Timeout(WAIT)).unwrap().unwrap();
    renderer.render_output_buffer(slot).unwrap();
}

#[test]
fn test_sink_failure_releases_slot_and_skips_counters() {
    let factory = Arc::new(ScriptedCodecFactory::new());
    let mut renderer = VideoRenderer::new(decoder_config(2, 2), PacingConfig::default(), factory);
    let sink = RecordingSink::failing(OutputMode::Yuv);
    let attempted = Arc::clone(&sink.rendered);
    renderer.set_output_sink(Some(Box::new(sink)));
    let controller = renderer.create_decoder(&Format::av1(16, 16)).unwrap();
    renderer.on_started();

    submit_unit(&controller, 42, BufferFlags::empty());
    let slot = controller.dequeue_output(Wait::Timeout(WAIT)).unwrap().unwrap();

    assert!(matches!(renderer.render_output_buffer(slot), Err(Error::Decode(_))));
    assert_eq!(*attempted.lock().unwrap(), vec![42]);
    assert_eq!(controller.free_output_slots(), 2);
    assert_eq!(renderer.counters().rendered_output_buffers, 0);
    assert_eq!(renderer.tracker().rendered_in_measure_window(), 0);
}

#[test]
fn test_render_without_sink_is_invalid_state() {
    let factory = Arc::new(ScriptedCodecFactory::new());
    let mut renderer = VideoRenderer::new(decoder_config(1, 1), PacingConfig::default(), factory);
    let controller = renderer.create_decoder(&Format::av1(16, 16)).unwrap();

    submit_unit(&controller, 1, BufferFlags::empty());
    let slot = controller.dequeue_output(Wait::Timeout(WAIT)).unwrap().unwrap();

    assert!(matches!(
        renderer.render_output_buffer(slot),
        Err(Error::InvalidState(_))
    ));
    assert_eq!(controller.free_output_slots(), 1);
}

#[test]
fn test_surface_render_after_decoder_release_fails() {
    let factory = Arc::new(ScriptedCodecFactory::new());
    let mut renderer = VideoRenderer::new(decoder_config(1, 1), PacingConfig::default(), factory);
    renderer.set_output_sink(Some(Box::new(RecordingSink::new(OutputMode::SurfaceYuv))));
    let controller = renderer.create_decoder(&Format::av1(16, 16)).unwrap();

    submit_unit(&controller, 1, BufferFlags::empty());
    let slot = controller.dequeue_output(Wait::Timeout(WAIT)).unwrap().unwrap();
    assert_eq!(slot.mode, OutputMode::SurfaceYuv);
    renderer.release_decoder();

    match renderer.render_output_buffer(slot) {
        Err(Error::Decode(message)) => assert_eq!(
            message,
            "Failed to render output buffer to surface: decoder is not initialized."
        ),
        other => panic!("Expected surface error, got {other:?}"),
    }
}

#[test]
fn test_late_frames_reported_on_event_bus() {
    let factory = Arc::new(ScriptedCodecFactory::new());
    let clock = Arc::new(ManualClock::default());
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let mut renderer = VideoRenderer::new(decoder_config(2, 2), PacingConfig::default(), factory)
        .with_clock(Arc::clone(&clock) as Arc<dyn framepipe_dec::renderer::Clock>)
        .with_event_bus(events);
    renderer.set_output_sink(Some(Box::new(RecordingSink::new(OutputMode::Yuv))));
    let controller = renderer.create_decoder(&Format::av1(16, 16)).unwrap();
    renderer.on_started();

    for index in 0..16i64 {
        // Three frames well past the 41 ms threshold
        clock.advance(if index % 5 == 0 && index < 15 { 60 } else { 16 });
        decode_and_render(&mut renderer, &controller, index);
    }

    let late: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            PipelineEvent::LateFrameCount {
                delayed_frames,
                window_frames,
                ..
            } => Some((delayed_frames, window_frames)),
            _ => None,
        })
        .collect();
    assert_eq!(late, vec![(3, 16)]);
    assert_eq!(renderer.counters().rendered_output_buffers, 16);
    assert_eq!(renderer.counters().decoded_input_buffers, 16);
}

#[test]
fn test_drop_burst_reported_once() {
    let factory = Arc::new(ScriptedCodecFactory::new());
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let mut renderer = VideoRenderer::new(decoder_config(2, 2), PacingConfig::default(), factory)
        .with_event_bus(events);
    let controller = renderer.create_decoder(&Format::av1(16, 16)).unwrap();
    renderer.on_started();

    for time in 0..20i64 {
        submit_unit(&controller, time, BufferFlags::empty());
        let slot = controller.dequeue_output(Wait::Timeout(WAIT)).unwrap().unwrap();
        renderer.drop_output_buffer(slot).unwrap();
    }

    let bursts: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            PipelineEvent::DroppedTooManyFrames {
                dropped_in_window,
                tier_counts,
                ..
            } => Some((dropped_in_window, tier_counts)),
            _ => None,
        })
        .collect();
    assert_eq!(bursts, vec![(7, [1, 2, 4, 0, 0])]);
    assert_eq!(renderer.counters().dropped_buffers, 20);
    assert_eq!(controller.free_output_slots(), 2);
}

#[test]
fn test_decoder_lifecycle_events() {
    let factory = Arc::new(ScriptedCodecFactory::new());
    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let mut renderer = VideoRenderer::new(decoder_config(3, 5), PacingConfig::default(), factory)
        .with_event_bus(events);

    let first = renderer.create_decoder(&Format::av1(16, 16)).unwrap();
    let second = renderer.create_decoder(&Format::av1(32, 32)).unwrap();
    renderer.release_decoder();

    assert!(first.is_closed());
    assert!(second.is_closed());

    let kinds: Vec<_> = drain(&mut rx).iter().map(|e| e.event_type()).collect();
    assert_eq!(
        kinds,
        vec!["DecoderCreated", "DecoderReleased", "DecoderCreated", "DecoderReleased"]
    );
}

#[test]
fn test_decoder_created_event_fields() {
    let factory = Arc::new(ScriptedCodecFactory::new());
    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let mut renderer = VideoRenderer::new(decoder_config(3, 5), PacingConfig::default(), factory)
        .with_event_bus(events);
    let controller = renderer.create_decoder(&Format::av1(16, 16)).unwrap();

    match drain(&mut rx).into_iter().next() {
        Some(PipelineEvent::DecoderCreated {
            decoder_id,
            name,
            num_input_buffers,
            num_output_buffers,
            ..
        }) => {
            assert_eq!(decoder_id, controller.decoder_id());
            assert_eq!(name, "libScripted1.2.3");
            assert_eq!((num_input_buffers, num_output_buffers), (3, 5));
        }
        other => panic!("Expected DecoderCreated, got {other:?}"),
    }
}

#[test]
fn test_decode_error_and_stop_events() {
    let factory = Arc::new(ScriptedCodecFactory::new().step(1, Step::FailDecode("bad tile")));
    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let mut renderer = VideoRenderer::new(decoder_config(2, 2), PacingConfig::default(), factory)
        .with_event_bus(events);
    renderer.set_output_sink(Some(Box::new(RecordingSink::new(OutputMode::Yuv))));
    let controller = renderer.create_decoder(&Format::av1(16, 16)).unwrap();
    renderer.on_started();

    decode_and_render(&mut renderer, &controller, 1);
    submit_unit(&controller, 2, BufferFlags::empty());
    let error = controller.dequeue_output(Wait::Timeout(WAIT)).unwrap_err();
    renderer.on_decode_error(&error);
    renderer.flush().unwrap();
    renderer.on_stopped();

    let events = drain(&mut rx);
    let message = events.iter().find_map(|event| match event {
        PipelineEvent::DecodeFailed { message, .. } => Some(message.clone()),
        _ => None,
    });
    assert_eq!(message.as_deref(), Some("Decode error: decode error: bad tile"));

    let stopped = events.iter().find_map(|event| match event {
        PipelineEvent::PlaybackStopped {
            rendered_frames,
            dropped_frames,
            ..
        } => Some((*rendered_frames, *dropped_frames)),
        _ => None,
    });
    assert_eq!(stopped, Some((1, 0)));
}

#[test]
fn test_counters_reset_on_start() {
    let factory = Arc::new(ScriptedCodecFactory::new());
    let mut renderer = VideoRenderer::new(decoder_config(2, 2), PacingConfig::default(), factory);
    renderer.set_output_sink(Some(Box::new(RecordingSink::new(OutputMode::Yuv))));
    let controller = renderer.create_decoder(&Format::av1(16, 16)).unwrap();
    renderer.on_started();

    decode_and_render(&mut renderer, &controller, 1);
    decode_and_render(&mut renderer, &controller, 2);
    assert_eq!(renderer.counters().rendered_output_buffers, 2);

    renderer.on_started();
    assert_eq!(renderer.counters(), Default::default());

    decode_and_render(&mut renderer, &controller, 3);
    assert_eq!(renderer.counters().rendered_output_buffers, 1);
    assert_eq!(renderer.counters().decoded_input_buffers, 1);
}

#[test]
fn test_unavailable_library_unsupported() {
    let renderer = VideoRenderer::new(
        decoder_config(1, 1),
        PacingConfig::default(),
        Arc::new(ScriptedCodecFactory::unavailable()),
    );
    assert_eq!(
        renderer.supports_format(&Format::av1(16, 16)),
        FormatSupport::Unsupported
    );
}

#[test]
fn test_max_input_size_overrides_initial_size() {
    let factory = Arc::new(ScriptedCodecFactory::new());
    let mut renderer = VideoRenderer::new(decoder_config(1, 1), PacingConfig::default(), factory);
    let mut format = Format::av1(16, 16);
    format.max_input_size = Some(4096);

    let controller = renderer.create_decoder(&format).unwrap();
    let slot = controller.dequeue_input_buffer().unwrap();
    assert!(slot.data.capacity() >= 4096);
    controller.release_input(slot).unwrap();
}
