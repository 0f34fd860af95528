//! Configuration types for encoder-bot

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for the encoder engine
///
/// Sub-config fields are flattened, so the serialized form is a single flat
/// object. [`Config::from_env`] builds one from the bot's environment variables.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where per-task work directories live
    #[serde(flatten)]
    pub storage: StorageConfig,

    /// File size ceilings and concurrency
    #[serde(flatten)]
    pub limits: LimitsConfig,

    /// Default encoder parameters passed to the media tool
    #[serde(flatten)]
    pub encoding: EncodingConfig,

    /// Media tool binary locations
    #[serde(flatten)]
    pub tools: ToolsConfig,

    /// Progress presenter throttling
    #[serde(flatten)]
    pub progress: ProgressConfig,

    /// Per-phase maximum runtimes
    #[serde(flatten)]
    pub watchdog: WatchdogConfig,

    /// Merge queue bounds
    #[serde(flatten)]
    pub merge_queue: MergeQueueConfig,

    /// Retry behavior at the chat transport boundary
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Storage locations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of per-task work directories (default: "./downloads")
    ///
    /// Each task works in `<work_dir>/<owner>/<task_id>/`.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
        }
    }
}

/// Size ceilings and concurrency limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest file a standard user may submit, in bytes (default: 2 GiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Largest file a privileged user may submit, in bytes (default: 4 GiB)
    #[serde(default = "default_max_file_size_privileged")]
    pub max_file_size_privileged: u64,

    /// Pipelines allowed to run at once (default: 2)
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_file_size_privileged: default_max_file_size_privileged(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
        }
    }
}

impl LimitsConfig {
    /// Size ceiling for an owner with the given privilege
    pub fn ceiling_for(&self, privileged: bool) -> u64 {
        if privileged {
            self.max_file_size_privileged
        } else {
            self.max_file_size
        }
    }
}

/// Encoder defaults
///
/// These are opaque to the engine and only forwarded to the media tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// Video codec (default: "libx264")
    #[serde(default = "default_codec")]
    pub codec: String,

    /// Encoder preset (default: "medium")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Constant rate factor (default: 23)
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// AAC audio bitrate (default: "128k")
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            preset: default_preset(),
            crf: default_crf(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

/// External tool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the ffmpeg binary (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to the ffprobe binary (auto-detected if None)
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Search PATH for binaries that are not configured (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            search_path: true,
        }
    }
}

/// Progress presenter configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Minimum time between download status edits (default: 2 seconds)
    #[serde(default = "default_transfer_interval", with = "duration_serde")]
    pub download_interval: Duration,

    /// Minimum time between transcode status edits (default: 3 seconds)
    #[serde(default = "default_transcode_interval", with = "duration_serde")]
    pub transcode_interval: Duration,

    /// Minimum time between upload status edits (default: 2 seconds)
    #[serde(default = "default_transfer_interval", with = "duration_serde")]
    pub upload_interval: Duration,

    /// Number of glyphs in the progress bar (default: 15)
    #[serde(default = "default_bar_width")]
    pub bar_width: usize,

    /// Command prefix users send to stop a task (default: "/stop")
    #[serde(default = "default_stop_command")]
    pub stop_command: String,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            download_interval: default_transfer_interval(),
            transcode_interval: default_transcode_interval(),
            upload_interval: default_transfer_interval(),
            bar_width: default_bar_width(),
            stop_command: default_stop_command(),
        }
    }
}

impl ProgressConfig {
    /// Minimum render interval for a phase
    pub fn interval_for(&self, phase: crate::types::Phase) -> Duration {
        match phase {
            crate::types::Phase::Downloading => self.download_interval,
            crate::types::Phase::Transcoding => self.transcode_interval,
            crate::types::Phase::Uploading => self.upload_interval,
        }
    }
}

/// Maximum runtime per phase before the pipeline is failed
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Download phase limit (default: 1 hour)
    #[serde(default = "default_transfer_timeout", with = "duration_serde")]
    pub download_timeout: Duration,

    /// Media tool limit (default: 6 hours)
    #[serde(default = "default_transcode_timeout", with = "duration_serde")]
    pub transcode_timeout: Duration,

    /// Upload phase limit (default: 1 hour)
    #[serde(default = "default_transfer_timeout", with = "duration_serde")]
    pub upload_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            download_timeout: default_transfer_timeout(),
            transcode_timeout: default_transcode_timeout(),
            upload_timeout: default_transfer_timeout(),
        }
    }
}

impl WatchdogConfig {
    /// Maximum runtime for a phase
    pub fn limit_for(&self, phase: crate::types::Phase) -> Duration {
        match phase {
            crate::types::Phase::Downloading => self.download_timeout,
            crate::types::Phase::Transcoding => self.transcode_timeout,
            crate::types::Phase::Uploading => self.upload_timeout,
        }
    }
}

/// Merge queue bounds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeQueueConfig {
    /// Maximum queued videos per owner (default: 10)
    #[serde(default = "default_merge_max_entries")]
    pub merge_max_entries: usize,

    /// Queued videos older than this are dropped (default: 1 hour)
    #[serde(default = "default_merge_ttl", with = "duration_serde")]
    pub merge_ttl: Duration,

    /// How often a background sweep drops expired entries (default: 60 seconds)
    #[serde(default = "default_merge_purge_interval", with = "duration_serde")]
    pub merge_purge_interval: Duration,
}

impl Default for MergeQueueConfig {
    fn default() -> Self {
        Self {
            merge_max_entries: default_merge_max_entries(),
            merge_ttl: default_merge_ttl(),
            merge_purge_interval: default_merge_purge_interval(),
        }
    }
}

/// Retry configuration for transient transport failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(Error::Config {
                message: format!("failed to load .env: {}", e),
                key: None,
            });
        }
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(dir) = lookup("DOWNLOAD_DIR") {
            config.storage.work_dir = PathBuf::from(dir);
        }
        if let Some(v) = parse_var(&lookup, "MAX_FILE_SIZE")? {
            config.limits.max_file_size = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_FILE_SIZE_PREMIUM")? {
            config.limits.max_file_size_privileged = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_CONCURRENT_TASKS")? {
            config.limits.max_concurrent_tasks = v;
        }
        if let Some(codec) = lookup("DEFAULT_CODEC") {
            config.encoding.codec = codec;
        }
        if let Some(preset) = lookup("DEFAULT_PRESET") {
            config.encoding.preset = preset;
        }
        if let Some(v) = parse_var(&lookup, "DEFAULT_CRF")? {
            config.encoding.crf = v;
        }
        if let Some(bitrate) = lookup("DEFAULT_AUDIO_BITRATE") {
            config.encoding.audio_bitrate = bitrate;
        }
        if let Some(path) = lookup("FFMPEG_PATH") {
            config.tools.ffmpeg_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("FFPROBE_PATH") {
            config.tools.ffprobe_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_concurrent_tasks == 0 {
            return Err(config_error(
                "max_concurrent_tasks must be at least 1",
                "max_concurrent_tasks",
            ));
        }
        if self.limits.max_file_size == 0 {
            return Err(config_error(
                "max_file_size must be greater than zero",
                "max_file_size",
            ));
        }
        if self.limits.max_file_size_privileged < self.limits.max_file_size {
            return Err(config_error(
                "max_file_size_privileged must not be below max_file_size",
                "max_file_size_privileged",
            ));
        }
        if self.encoding.crf > 51 {
            return Err(config_error("crf must be between 0 and 51", "crf"));
        }
        if self.encoding.codec.trim().is_empty() {
            return Err(config_error("codec must not be empty", "codec"));
        }
        if self.progress.bar_width == 0 {
            return Err(config_error("bar_width must be at least 1", "bar_width"));
        }
        if self.progress.stop_command.trim().is_empty() {
            return Err(config_error(
                "stop_command must not be empty",
                "stop_command",
            ));
        }
        if self.merge_queue.merge_max_entries < 2 {
            return Err(config_error(
                "merge_max_entries must allow at least two videos",
                "merge_max_entries",
            ));
        }
        if self.merge_queue.merge_purge_interval.is_zero() {
            return Err(config_error(
                "merge_purge_interval must be greater than zero",
                "merge_purge_interval",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| Error::Config {
            message: format!("{} has an invalid value: {:?}", key, raw),
            key: Some(key.to_string()),
        }),
    }
}

// Default value functions
fn default_work_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_max_file_size_privileged() -> u64 {
    4 * 1024 * 1024 * 1024
}

fn default_max_concurrent_tasks() -> usize {
    2
}

fn default_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_crf() -> u8 {
    23
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_true() -> bool {
    true
}

fn default_transfer_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_transcode_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_bar_width() -> usize {
    15
}

fn default_stop_command() -> String {
    "/stop".to_string()
}

fn default_transfer_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_transcode_timeout() -> Duration {
    Duration::from_secs(6 * 3600)
}

fn default_merge_max_entries() -> usize {
    10
}

fn default_merge_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_merge_purge_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
