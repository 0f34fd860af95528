//! Error types for encoder-bot
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (validation, media tool, chat transport)
//! - Machine-readable error codes for logging and observers
//! - Bounded, user-facing messages suitable for a chat status edit

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Maximum number of characters of diagnostic text shown to a chat user
pub const MAX_USER_ERROR_LEN: usize = 400;

/// Result type alias for encoder-bot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for encoder-bot
///
/// Every failure inside a pipeline is converted into this type at the pipeline
/// boundary, logged with context and turned into a status edit.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "work_dir")
        key: Option<String>,
    },

    /// Input rejected before any subprocess was spawned
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// External media tool (ffmpeg / ffprobe) error
    #[error("media tool error: {0}")]
    Media(#[from] MediaError),

    /// Chat transport error (download, upload, message edits)
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Settings store lookup failed
    #[error("settings store error: {0}")]
    Store(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A pipeline phase exceeded its maximum runtime
    #[error("{phase} exceeded the maximum runtime of {limit:?}")]
    PhaseTimeout {
        /// Phase that was running
        phase: crate::types::Phase,
        /// Configured maximum runtime
        limit: Duration,
    },

    /// Task not present in the registry
    #[error("task {0} not found")]
    TaskNotFound(String),

    /// The task was cancelled by its owner
    #[error("task cancelled")]
    Cancelled,

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Input validation errors
///
/// These are detected before any work directory or subprocess exists, so
/// reporting them never requires cleanup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// File exceeds the owner's size ceiling
    #[error("file is {size} bytes, limit is {limit} bytes")]
    FileTooLarge {
        /// Size of the submitted file in bytes
        size: u64,
        /// Ceiling that applies to the owner in bytes
        limit: u64,
    },

    /// Resolution name is not in the resolution table
    #[error("unknown resolution: {0}")]
    UnknownResolution(String),

    /// Time string could not be parsed
    #[error("invalid time: {0}")]
    InvalidTime(String),

    /// Trim range is empty or reversed
    #[error("start time {start}s must be before end time {end}s")]
    InvalidTimeRange {
        /// Start offset in seconds
        start: u64,
        /// End offset in seconds
        end: u64,
    },

    /// Compression percentage outside 10..=90
    #[error("compression must be between 10 and 90 percent, got {0}")]
    CompressionOutOfRange(u8),

    /// Aspect ratio not supported by the crop operation
    #[error("unsupported aspect ratio: {0}")]
    UnsupportedAspectRatio(String),

    /// Subtitle file has an unsupported extension
    #[error("unsupported subtitle file: {0}")]
    InvalidSubtitleFile(String),

    /// Owner's merge queue is full
    #[error("merge queue is full ({max} entries)")]
    MergeQueueFull {
        /// Maximum entries per owner
        max: usize,
    },

    /// Operation reserved for privileged owners
    #[error("{0} is available to premium users only")]
    PrivilegedOnly(String),

    /// Not enough entries queued to merge
    #[error("merge needs at least {need} videos, {have} queued")]
    MergeQueueTooShort {
        /// Entries currently queued
        have: usize,
        /// Entries required
        need: usize,
    },
}

/// Errors from the external media tool adapter
#[derive(Debug, Error)]
pub enum MediaError {
    /// Binary not found on PATH or at the configured location
    #[error("{0} binary not found")]
    BinaryNotFound(String),

    /// Failed to spawn the child process
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        /// Binary that failed to start
        binary: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Tool exited with a non-zero status
    #[error("{operation} failed with exit code {code:?}: {stderr}")]
    Failed {
        /// Operation name (e.g., "transcode", "trim")
        operation: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Captured standard error (already bounded)
        stderr: String,
    },

    /// Phase watchdog expired and the child was killed
    #[error("{operation} exceeded the maximum runtime of {limit:?}")]
    Timeout {
        /// Operation name
        operation: String,
        /// Configured maximum runtime
        limit: Duration,
    },

    /// The child was terminated because the task was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Probe output could not be interpreted
    #[error("probe failed: {0}")]
    Probe(String),

    /// Input file missing
    #[error("input file not found: {0}")]
    InputNotFound(PathBuf),

    /// I/O error while talking to the child process
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by the chat transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Network blip talking to the chat platform
    #[error("network error: {0}")]
    Network(String),

    /// The platform asked us to slow down
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Suggested wait, if the platform sent one
        retry_after: Option<Duration>,
    },

    /// Target message no longer exists (e.g., deleted by the user)
    #[error("message not found")]
    MessageNotFound,

    /// Request rejected permanently
    #[error("rejected: {0}")]
    Rejected(String),
}

impl Error {
    /// Get the machine-readable error code
    pub fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Validation(e) => match e {
                ValidationError::FileTooLarge { .. } => "file_too_large",
                ValidationError::UnknownResolution(_) => "unknown_resolution",
                ValidationError::InvalidTime(_) => "invalid_time",
                ValidationError::InvalidTimeRange { .. } => "invalid_time_range",
                ValidationError::CompressionOutOfRange(_) => "compression_out_of_range",
                ValidationError::UnsupportedAspectRatio(_) => "unsupported_aspect_ratio",
                ValidationError::InvalidSubtitleFile(_) => "invalid_subtitle_file",
                ValidationError::MergeQueueFull { .. } => "merge_queue_full",
                ValidationError::MergeQueueTooShort { .. } => "merge_queue_too_short",
                ValidationError::PrivilegedOnly(_) => "privileged_only",
            },
            Error::Media(e) => match e {
                MediaError::BinaryNotFound(_) => "binary_not_found",
                MediaError::Spawn { .. } => "spawn_failed",
                MediaError::Failed { .. } => "media_tool_failed",
                MediaError::Timeout { .. } => "media_tool_timeout",
                MediaError::Cancelled => "cancelled",
                MediaError::Probe(_) => "probe_failed",
                MediaError::InputNotFound(_) => "input_not_found",
                MediaError::Io(_) => "io_error",
            },
            Error::Transport(_) => "transport_error",
            Error::Store(_) => "store_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::PhaseTimeout { .. } => "phase_timeout",
            Error::TaskNotFound(_) => "task_not_found",
            Error::Cancelled => "cancelled",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }

    /// Whether this error represents an owner-initiated cancellation
    ///
    /// Cancellation can surface either directly or through the media adapter
    /// killing its child process.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Media(MediaError::Cancelled))
    }

    /// Bounded message suitable for showing to the task owner
    pub fn user_message(&self) -> String {
        crate::utils::truncate_for_user(&self.to_string(), MAX_USER_ERROR_LEN)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Other(format!("task join failed: {}", e))
    }
}
