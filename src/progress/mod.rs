//! Throttled progress rendering
//!
//! A [`ProgressPresenter`] turns raw `(current, total)` ticks into status
//! text, but only when its phase's minimum interval has passed since the
//! previous render. Ticks arrive from three places: the transport's download
//! and upload callbacks (bytes) and the media tool's progress stream (frames).
//! All of them go through a [`ProgressSink`].
//!
//! [`reporter::StatusReporter`] is the sink used by pipelines: it feeds the
//! presenter, records progress in the registry and edits the status message.

pub mod reporter;

pub use reporter::StatusReporter;

use crate::types::{Phase, TaskId};
use crate::utils::{
    clamp_percentage, format_time, human_readable_rate, human_readable_size, progress_bar,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Default number of glyphs in the progress bar
pub const DEFAULT_BAR_WIDTH: usize = 15;

/// Receiver of progress ticks
///
/// Implementations must be cheap to call frequently; throttling is their job.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Report `current` of `total` units (bytes or frames)
    async fn report(&self, current: u64, total: u64);
}

/// Sink that drops every tick
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl ProgressSink for NoopSink {
    async fn report(&self, _current: u64, _total: u64) {}
}

/// One progress observation with derived figures
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressSample {
    /// Units done
    pub current: u64,
    /// Units expected
    pub total: u64,
    /// Time since the phase started
    pub elapsed: Duration,
    /// Phase the sample belongs to
    pub phase: Phase,
}

impl ProgressSample {
    /// Completion percentage in `0.0..=100.0`; zero when the total is unknown
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        clamp_percentage(self.current as f64 / self.total as f64 * 100.0)
    }

    /// Units per second; zero before any time has passed
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.current as f64 / secs
        }
    }

    /// Seconds until completion at the current rate; zero when the rate is zero
    pub fn eta_seconds(&self) -> f64 {
        let rate = self.rate();
        if rate <= 0.0 {
            0.0
        } else {
            self.total.saturating_sub(self.current) as f64 / rate
        }
    }
}

/// Per-task, per-phase throttled status formatter
#[derive(Debug)]
pub struct ProgressPresenter {
    phase: Phase,
    min_interval: Duration,
    bar_width: usize,
    started: Instant,
    last_render: Option<Instant>,
    file_name: Option<String>,
    stop_hint: Option<String>,
}

impl ProgressPresenter {
    /// Create a presenter whose clock starts now
    pub fn new(phase: Phase, min_interval: Duration) -> Self {
        Self {
            phase,
            min_interval,
            bar_width: DEFAULT_BAR_WIDTH,
            started: Instant::now(),
            last_render: None,
            file_name: None,
            stop_hint: None,
        }
    }

    /// Set the number of bar glyphs
    pub fn with_bar_width(mut self, width: usize) -> Self {
        self.bar_width = width.max(1);
        self
    }

    /// Show the file name in the header
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Show how to stop the task, e.g. `/stopab12cd34`
    pub fn with_stop_hint(mut self, stop_command: &str, task_id: &TaskId) -> Self {
        self.stop_hint = Some(format!("{}{}", stop_command, task_id));
        self
    }

    /// Phase this presenter renders
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Build a sample for `current` of `total` at the present instant
    pub fn sample(&self, current: u64, total: u64) -> ProgressSample {
        ProgressSample {
            current,
            total,
            elapsed: self.started.elapsed(),
            phase: self.phase,
        }
    }

    /// Handle a tick, returning text only when a render is due
    ///
    /// The first tick always renders; later ticks render once the minimum
    /// interval has passed since the previous render.
    pub fn on_tick(&mut self, current: u64, total: u64) -> Option<String> {
        let now = Instant::now();
        if let Some(last) = self.last_render
            && now.duration_since(last) < self.min_interval
        {
            return None;
        }
        self.last_render = Some(now);
        Some(self.render(&self.sample(current, total)))
    }

    /// Render a sample unconditionally
    pub fn render(&self, sample: &ProgressSample) -> String {
        let mut text = format!("**{}**\n", self.phase.label());
        if let Some(name) = &self.file_name {
            text.push_str(&format!("📁 {}\n", name));
        }
        text.push('\n');
        text.push_str(&progress_bar(sample.percentage(), self.bar_width));
        text.push('\n');

        if self.phase.counts_bytes() {
            text.push_str(&format!(
                "📦 Size: {} / {}\n⚡ Speed: {}\n",
                human_readable_size(sample.current),
                human_readable_size(sample.total),
                human_readable_rate(sample.rate())
            ));
        } else {
            text.push_str(&format!(
                "🎞 Frames: {} / {}\n⚡ Speed: {:.1} fps\n",
                sample.current,
                sample.total,
                sample.rate()
            ));
        }

        text.push_str(&format!(
            "⏳ ETA: {}\n⏱ Elapsed: {}\n",
            format_time(sample.eta_seconds()),
            format_time(sample.elapsed.as_secs_f64())
        ));

        if let Some(hint) = &self.stop_hint {
            text.push_str(&format!("\n❌ Cancel: {}", hint));
        }
        text
    }
}
