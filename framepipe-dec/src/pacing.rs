//! Frame pacing and drop accounting
//!
//! Tracks two independent windows on the consumer side:
//!
//! - **Late frames**: every rendered frame whose gap since the previous render
//!   exceeds the threshold counts as delayed. Every `window_size` rendered
//!   frames the count is reported to the listener and reset.
//! - **Drop bursts**: each drop increments the measure-window drop count and
//!   one severity bucket chosen by that count. When any bucket crosses its
//!   ceiling the listener hears "too many dropped frames" once and the
//!   buckets are cleared. Separately, once rendered + dropped in the measure
//!   window exceeds `measure_window`, the measure-window counts (not the
//!   buckets) start over.
//!
//! Owned by the caller thread; no locking.

use framepipe_common::config::PacingSettings;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_RENDER_THRESHOLD: Duration = Duration::from_millis(41);
pub const DEFAULT_WINDOW_SIZE: u32 = 16;
pub const DEFAULT_MEASURE_WINDOW: u32 = 24;

/// Number of drop severity tiers
pub const DROP_TIERS: usize = 5;

/// Bucket ceilings: a bucket above its ceiling triggers the notification
const DROP_TIER_CEILINGS: [u32; DROP_TIERS] = [15, 7, 3, 1, 0];

/// Pacing thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    pub render_threshold: Duration,
    pub window_size: u32,
    pub measure_window: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            render_threshold: DEFAULT_RENDER_THRESHOLD,
            window_size: DEFAULT_WINDOW_SIZE,
            measure_window: DEFAULT_MEASURE_WINDOW,
        }
    }
}

impl From<&PacingSettings> for PacingConfig {
    fn from(settings: &PacingSettings) -> Self {
        Self {
            render_threshold: Duration::from_millis(settings.render_threshold_ms),
            window_size: settings.window_size.max(1),
            measure_window: settings.measure_window,
        }
    }
}

/// Snapshot passed with a too-many-dropped-frames notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropStats {
    pub dropped_in_window: u32,
    pub tier_counts: [u32; DROP_TIERS],
}

/// Receiver of pacing notifications
pub trait PacingListener: Send {
    /// A late-frame window closed
    fn on_late_frames(&mut self, delayed_frames: u32, window_frames: u32);

    /// A drop bucket crossed its ceiling
    fn on_too_many_dropped_frames(&mut self, stats: &DropStats);
}

/// Severity tier for the n-th drop in the measure window
pub fn drop_tier(dropped_in_window: u32) -> usize {
    if dropped_in_window > 15 {
        4
    } else if dropped_in_window > 7 {
        3
    } else if dropped_in_window > 3 {
        2
    } else if dropped_in_window > 1 {
        1
    } else {
        0
    }
}

/// Sliding-window render delay and drop burst statistics
pub struct FramePacingTracker {
    config: PacingConfig,
    delayed_frame_count: u32,
    rendered_in_current_window: u32,
    rendered_in_measure_window: u32,
    dropped_in_measure_window: u32,
    dropped_frame_stats: [u32; DROP_TIERS],
    /// Latched after a too-many-dropped notification until an explicit clear
    drop_alert_latched: bool,
    listener: Option<Box<dyn PacingListener>>,
}

impl FramePacingTracker {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            delayed_frame_count: 0,
            rendered_in_current_window: 0,
            rendered_in_measure_window: 0,
            dropped_in_measure_window: 0,
            dropped_frame_stats: [0; DROP_TIERS],
            drop_alert_latched: false,
            listener: None,
        }
    }

    pub fn set_listener(&mut self, listener: Box<dyn PacingListener>) {
        self.listener = Some(listener);
    }

    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Record a rendered frame and the gap since the previous render
    pub fn on_rendered(&mut self, gap: Duration) {
        if gap > self.config.render_threshold {
            self.delayed_frame_count += 1;
        }
        self.rendered_in_current_window += 1;
        self.rendered_in_measure_window += 1;

        if self.rendered_in_current_window >= self.config.window_size {
            self.report_late_frames();
        }
        self.check_drop_ceilings();
        self.check_measure_window();
    }

    /// Record a dropped frame
    pub fn on_dropped(&mut self) {
        self.dropped_in_measure_window += 1;
        self.dropped_frame_stats[drop_tier(self.dropped_in_measure_window)] += 1;

        self.check_drop_ceilings();
        self.check_measure_window();
    }

    /// Playback started: reset everything
    pub fn start(&mut self) {
        self.delayed_frame_count = 0;
        self.rendered_in_current_window = 0;
        self.clear();
    }

    /// Playback stopped: report a partial late-frame window, clear drop data
    pub fn stop(&mut self) {
        if self.rendered_in_current_window > 0 {
            self.report_late_frames();
        }
        self.clear();
    }

    pub fn reset_on_flush(&mut self) {
        self.clear();
    }

    /// Clear measure-window counts, drop buckets and the alert latch
    pub fn clear(&mut self) {
        self.rendered_in_measure_window = 0;
        self.dropped_in_measure_window = 0;
        self.dropped_frame_stats = [0; DROP_TIERS];
        self.drop_alert_latched = false;
    }

    pub fn delayed_frame_count(&self) -> u32 {
        self.delayed_frame_count
    }

    pub fn rendered_in_current_window(&self) -> u32 {
        self.rendered_in_current_window
    }

    pub fn rendered_in_measure_window(&self) -> u32 {
        self.rendered_in_measure_window
    }

    pub fn dropped_in_measure_window(&self) -> u32 {
        self.dropped_in_measure_window
    }

    pub fn dropped_frame_stats(&self) -> [u32; DROP_TIERS] {
        self.dropped_frame_stats
    }

    fn report_late_frames(&mut self) {
        debug!(
            "Frames delayed in current window: {}/{}",
            self.delayed_frame_count, self.rendered_in_current_window
        );
        if let Some(listener) = self.listener.as_mut() {
            listener.on_late_frames(self.delayed_frame_count, self.rendered_in_current_window);
        }
        self.delayed_frame_count = 0;
        self.rendered_in_current_window = 0;
    }

    fn check_drop_ceilings(&mut self) {
        if self.drop_alert_latched {
            return;
        }
        let crossed = self
            .dropped_frame_stats
            .iter()
            .zip(DROP_TIER_CEILINGS)
            .any(|(count, ceiling)| *count > ceiling);
        if !crossed {
            return;
        }

        let stats = DropStats {
            dropped_in_window: self.dropped_in_measure_window,
            tier_counts: self.dropped_frame_stats,
        };
        debug!(
            "Too many dropped frames: {} in window, tiers {:?}",
            stats.dropped_in_window, stats.tier_counts
        );
        if let Some(listener) = self.listener.as_mut() {
            listener.on_too_many_dropped_frames(&stats);
        }
        self.dropped_frame_stats = [0; DROP_TIERS];
        self.drop_alert_latched = true;
    }

    fn check_measure_window(&mut self) {
        if self.rendered_in_measure_window + self.dropped_in_measure_window
            > self.config.measure_window
        {
            debug!(
                "Dropped frames in measure window: {}",
                self.dropped_in_measure_window
            );
            self.rendered_in_measure_window = 0;
            self.dropped_in_measure_window = 0;
        }
    }
}

impl Default for FramePacingTracker {
    fn default() -> Self {
        Self::new(PacingConfig::default())
    }
}
