//! External media tool adapter (ffmpeg / ffprobe)
//!
//! - [`command`] - Fixed argument templates per operation
//! - [`presets`] - Resolution table, crop ratios, compression levels
//! - [`probe`] - ffprobe output parsing and frame estimates
//! - [`progress`] - `-progress pipe:1` stream parsing
//! - [`runner`] - Child process supervision (cancel, watchdog, stderr tail)
//!
//! The engine only sees the [`MediaProcessor`] trait; [`MediaTool`] is the
//! implementation that shells out to the real binaries.

pub mod command;
pub mod presets;
pub mod probe;
pub mod progress;
pub mod runner;

pub use command::{EncodeParams, FfmpegCommand, MediaJob, Operation, SubtitleMode};
pub use presets::{AspectRatio, RESOLUTIONS, Resolution, compression_crf};
pub use probe::{AudioStream, MediaInfo};

use crate::config::{ToolsConfig, WatchdogConfig};
use crate::error::MediaError;
use crate::progress::ProgressSink;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Maximum runtime of a single ffprobe call
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(120);

/// Operations the engine needs from the media tool
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Read metadata of `input`
    async fn probe(&self, input: &Path) -> Result<MediaInfo, MediaError>;

    /// Best-effort total frame count of `input`, zero when unknown
    async fn frame_estimate(&self, input: &Path) -> Result<u64, MediaError>;

    /// Run one job to completion
    ///
    /// Frame progress is reported as `(frame, total_frames)`. The child is
    /// killed and [`MediaError::Cancelled`] returned as soon as `cancel`
    /// fires.
    async fn execute(
        &self,
        job: &MediaJob,
        total_frames: u64,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<(), MediaError>;

    /// Name for logging
    fn name(&self) -> &str;
}

/// [`MediaProcessor`] backed by the ffmpeg and ffprobe binaries
#[derive(Clone, Debug)]
pub struct MediaTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    run_limit: Duration,
}

impl MediaTool {
    /// Create a tool with explicit binary paths
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            run_limit: WatchdogConfig::default().transcode_timeout,
        }
    }

    /// Find both binaries on PATH
    pub fn from_path() -> Option<Self> {
        let ffmpeg = which::which("ffmpeg").ok()?;
        let ffprobe = which::which("ffprobe").ok()?;
        Some(Self::new(ffmpeg, ffprobe))
    }

    /// Resolve binaries from configuration, falling back to PATH if allowed
    pub fn from_config(tools: &ToolsConfig, watchdog: &WatchdogConfig) -> Result<Self, MediaError> {
        let ffmpeg = resolve_binary("ffmpeg", tools.ffmpeg_path.as_ref(), tools.search_path)?;
        let ffprobe = resolve_binary("ffprobe", tools.ffprobe_path.as_ref(), tools.search_path)?;
        tracing::info!(
            ffmpeg = %ffmpeg.display(),
            ffprobe = %ffprobe.display(),
            "Media tool initialized"
        );
        Ok(Self::new(ffmpeg, ffprobe).with_run_limit(watchdog.transcode_timeout))
    }

    /// Set the watchdog limit for ffmpeg runs
    pub fn with_run_limit(mut self, limit: Duration) -> Self {
        self.run_limit = limit;
        self
    }

    async fn count_packets(&self, input: &Path) -> Option<u64> {
        match runner::run_capture(
            &self.ffprobe,
            &probe::count_packets_args(input),
            "count_frames",
            PROBE_TIMEOUT,
        )
        .await
        {
            Ok(out) => probe::parse_packet_count(&String::from_utf8_lossy(&out)),
            Err(e) => {
                tracing::debug!(input = %input.display(), error = %e, "Packet count unavailable");
                None
            }
        }
    }
}

fn resolve_binary(
    name: &str,
    configured: Option<&PathBuf>,
    search_path: bool,
) -> Result<PathBuf, MediaError> {
    if let Some(path) = configured {
        return Ok(path.clone());
    }
    if search_path {
        return which::which(name).map_err(|_| MediaError::BinaryNotFound(name.to_string()));
    }
    Err(MediaError::BinaryNotFound(name.to_string()))
}

#[async_trait]
impl MediaProcessor for MediaTool {
    async fn probe(&self, input: &Path) -> Result<MediaInfo, MediaError> {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(MediaError::InputNotFound(input.to_path_buf()));
        }
        let out =
            runner::run_capture(&self.ffprobe, &probe::probe_args(input), "probe", PROBE_TIMEOUT)
                .await?;
        probe::parse_probe_output(&out)
    }

    async fn frame_estimate(&self, input: &Path) -> Result<u64, MediaError> {
        let packets = self.count_packets(input).await;
        let duration = match packets {
            Some(_) => 0.0,
            None => self.probe(input).await?.duration,
        };
        Ok(probe::estimate_total_frames(packets, duration))
    }

    async fn execute(
        &self,
        job: &MediaJob,
        total_frames: u64,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<(), MediaError> {
        if let Some(list) = job.concat_list() {
            tokio::fs::write(&job.input, list).await?;
        } else if !tokio::fs::try_exists(&job.input).await.unwrap_or(false) {
            return Err(MediaError::InputNotFound(job.input.clone()));
        }

        let args = job.to_command().build_args();
        let result = runner::run_with_progress(
            &self.ffmpeg,
            &args,
            job.operation.name(),
            total_frames,
            cancel,
            self.run_limit,
            progress,
        )
        .await;

        if result.is_err()
            && let Err(e) = tokio::fs::remove_file(&job.output).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(output = %job.output.display(), error = %e, "Failed to remove partial output");
        }
        result
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}
