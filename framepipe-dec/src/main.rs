//! framepipe-dec - Synthetic playback driver
//!
//! Builds a decoder around the synthetic codec, plays a generated stream
//! through it and reports what was rendered, dropped and skipped. Pipeline
//! events can be printed as JSON lines. Ctrl+C closes the decoder, which
//! unblocks the session and ends playback early.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use framepipe_common::config::load_config;
use framepipe_common::events::EventBus;
use framepipe_dec::codec::{SyntheticCodecConfig, SyntheticCodecFactory};
use framepipe_dec::pipeline::{Format, OutputBuffer, OutputMode};
use framepipe_dec::renderer::{FormatSupport, FrameSink};
use framepipe_dec::session::{PlaybackSession, SessionConfig};
use framepipe_dec::{DecoderConfig, PacingConfig, VideoRenderer};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for framepipe-dec
#[derive(Parser, Debug)]
#[command(name = "framepipe-dec")]
#[command(about = "Play a synthetic stream through the framepipe decode pipeline")]
#[command(version)]
struct Args {
    /// Config file (overrides FRAMEPIPE_CONFIG and the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of input buffer slots
    #[arg(long, env = "FRAMEPIPE_INPUT_BUFFERS")]
    input_buffers: Option<i64>,

    /// Number of output buffer slots
    #[arg(long, env = "FRAMEPIPE_OUTPUT_BUFFERS")]
    output_buffers: Option<i64>,

    /// Codec thread hint (tile hint follows it)
    #[arg(long, env = "FRAMEPIPE_THREADS")]
    threads: Option<i64>,

    /// Units to play before end of stream
    #[arg(short = 'n', long, default_value = "120")]
    frames: u32,

    /// Presentation interval in milliseconds
    #[arg(long, default_value = "33")]
    frame_interval_ms: u64,

    /// Submit every n-th unit as decode-only
    #[arg(long)]
    decode_only_every: Option<u32>,

    /// Inject a codec failure at this decode call (0-based)
    #[arg(long)]
    fail_at: Option<u64>,

    /// Units held inside the synthetic codec before frames come out
    #[arg(long, default_value = "0")]
    pipeline_depth: usize,

    /// Frame width
    #[arg(long, default_value = "320")]
    width: u32,

    /// Frame height
    #[arg(long, default_value = "180")]
    height: u32,

    /// Pace rendering to presentation time
    #[arg(long)]
    realtime: bool,

    /// In realtime mode, drop frames later than this many milliseconds
    #[arg(long)]
    late_threshold_ms: Option<u64>,

    /// Print pipeline events as JSON lines on stdout
    #[arg(long)]
    json_events: bool,
}

/// Sink that accepts every frame and keeps totals
#[derive(Default)]
struct TallySink {
    frames: u64,
    bytes: u64,
}

impl FrameSink for TallySink {
    fn target(&self) -> OutputMode {
        OutputMode::Yuv
    }

    fn render(&mut self, frame: &OutputBuffer) -> framepipe_dec::Result<()> {
        self.frames += 1;
        self.bytes += frame.data.len() as u64;
        trace!(
            "Displayed frame time_us={} {}x{} ({} bytes total)",
            frame.time_us,
            frame.width,
            frame.height,
            self.bytes
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    let level = &config.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("framepipe_dec={level},framepipe_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting framepipe-dec v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = config.decoder.clone();
    if let Some(n) = args.input_buffers {
        settings.num_input_buffers = n;
    }
    if let Some(n) = args.output_buffers {
        settings.num_output_buffers = n;
    }
    if let Some(n) = args.threads {
        settings.thread_hint = Some(n);
    }
    let decoder_config =
        DecoderConfig::from_settings(&settings).context("Invalid decoder configuration")?;

    // Event printer
    let events = EventBus::new(256);
    let printer = if args.json_events || config.logging.json_events {
        let mut rx = events.subscribe();
        Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match event.to_json_line() {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!("Failed to serialize {} event: {}", event.event_type(), e),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event printer lagged, skipped {} events", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    } else {
        None
    };

    let factory = Arc::new(SyntheticCodecFactory::new(SyntheticCodecConfig {
        pipeline_depth: args.pipeline_depth,
        fail_decode_at: args.fail_at,
        ..SyntheticCodecConfig::with_size(args.width, args.height)
    }));
    let format = Format::av1(args.width, args.height);

    let mut renderer = VideoRenderer::new(decoder_config, PacingConfig::from(&config.pacing), factory)
        .with_event_bus(events.clone());
    if renderer.supports_format(&format) == FormatSupport::Unsupported {
        bail!("Format {} is not supported", format.sample_mime_type);
    }
    renderer.set_output_sink(Some(Box::new(TallySink::default())));

    let decoder = renderer
        .create_decoder(&format)
        .context("Failed to create decoder")?;
    info!("Decoder ready: {}", decoder.name());

    let session = PlaybackSession::new(
        SessionConfig {
            frames: args.frames,
            frame_interval: Duration::from_millis(args.frame_interval_ms),
            decode_only_every: args.decode_only_every,
            late_threshold: args.late_threshold_ms.map(Duration::from_millis),
            realtime: args.realtime,
            ..Default::default()
        },
        format,
    );

    let mut session_task = tokio::task::spawn_blocking(move || {
        let result = session.run(&mut renderer);
        renderer.release_decoder();
        result
    });

    let report = tokio::select! {
        joined = &mut session_task => joined.context("Playback session panicked")??,
        _ = shutdown_signal() => {
            info!("Closing decoder");
            tokio::task::spawn_blocking(move || decoder.close())
                .await
                .context("Decoder close panicked")?;
            session_task.await.context("Playback session panicked")??
        }
    };

    info!(
        "Playback finished: submitted={}, rendered={}, dropped={}, skipped={}, errors={}, cancelled={}",
        report.submitted,
        report.rendered,
        report.dropped,
        report.skipped,
        report.decode_errors,
        report.cancelled
    );

    drop(events);
    if let Some(printer) = printer {
        printer.await.context("Event printer panicked")?;
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
