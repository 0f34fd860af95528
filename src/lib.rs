//! # encoder-bot
//!
//! Task lifecycle, progress tracking and ffmpeg orchestration for a video
//! encoder chat bot.
//!
//! ## Design Philosophy
//!
//! encoder-bot is designed to be:
//! - **Transport-agnostic** - The chat platform sits behind [`ChatTransport`]
//! - **Cancellable everywhere** - Every phase stops promptly and cleans up
//! - **Library-first** - Command routing and bot wiring live in the embedding binary
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use encoder_bot::{
//!     ChatId, Config, Engine, InMemoryStore, JobKind, JobRequest, MediaRef, MediaTool, OwnerId,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn encoder_bot::ChatTransport>) -> encoder_bot::Result<()> {
//! let config = Config::from_env()?;
//! let media = MediaTool::from_config(&config.tools, &config.watchdog)?;
//! let engine = Engine::new(config, transport, Arc::new(InMemoryStore::new()), Arc::new(media)).await?;
//!
//! // Subscribe to events
//! let mut events = engine.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let request = JobRequest::new(
//!     OwnerId(42),
//!     ChatId(42),
//!     MediaRef {
//!         file_id: "AgADBAAD".into(),
//!         file_name: Some("holiday.mkv".into()),
//!         file_size: 48_000_000,
//!     },
//!     JobKind::encode("720p")?,
//! );
//! let task_id = engine.submit(request).await?;
//! println!("queued {task_id}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// ffmpeg / ffprobe adapter
pub mod media;
/// Task orchestration (decomposed into focused submodules)
pub mod pipeline;
/// Throttled progress rendering
pub mod progress;
/// Active task registry and merge queues
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Settings store seam
pub mod store;
/// Chat transport seam
pub mod transport;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, MediaError, Result, TransportError, ValidationError};
pub use media::{MediaInfo, MediaProcessor, MediaTool};
pub use pipeline::{Engine, JobKind, JobRequest, parse_stop_command};
pub use progress::{ProgressPresenter, ProgressSink, StatusReporter};
pub use registry::{MergeQueue, Task, TaskRegistry};
pub use store::{InMemoryStore, SettingsStore};
pub use transport::ChatTransport;
pub use types::{
    Artifact, ChatId, Event, MediaRef, MessageRef, OwnerId, Phase, Status, TaskId, UploadKind,
};

/// Helper function to run the engine with graceful signal handling.
///
/// Waits for a termination signal and then calls the engine's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use encoder_bot::{Engine, run_with_shutdown};
///
/// # async fn example(engine: Engine) -> encoder_bot::Result<()> {
/// // The bot's update loop runs elsewhere with its own clone of the engine
/// run_with_shutdown(engine).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(engine: Engine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
