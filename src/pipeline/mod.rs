//! Task orchestration split into focused submodules.
//!
//! The [`Engine`] struct and its methods are organized by domain:
//! - [`job`] - Job requests and up-front validation
//! - [`run`] - The phased state machine driving one task
//! - [`control`] - Stop, list and merge commands
//! - [`messages`] - Status and reply texts
//!
//! Every accepted request becomes one spawned tokio task that walks
//! `Queued → Downloading → Transcoding → Uploading → Done`, with `Cancelled`
//! and `Failed` reachable from any non-terminal state.

mod control;
mod job;
pub mod messages;
mod run;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use control::parse_stop_command;
pub use job::{JobKind, JobRequest};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::media::MediaProcessor;
use crate::registry::{MergeQueue, TaskRegistry};
use crate::store::SettingsStore;
use crate::transport::ChatTransport;
use crate::types::{Event, OwnerId, TaskId};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for running tasks to wind down
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 1000;

/// Poll interval while waiting for the registry to drain
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Main engine instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Engine {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Running tasks and their cancellation tokens
    pub(crate) registry: TaskRegistry,
    /// Per-owner videos waiting to be merged
    pub(crate) merge_queue: MergeQueue,
    /// Chat platform adapter
    pub(crate) transport: Arc<dyn ChatTransport>,
    /// Settings and privilege lookups
    pub(crate) store: Arc<dyn SettingsStore>,
    /// External media tool
    pub(crate) media: Arc<dyn MediaProcessor>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Limits how many pipelines run past Queued at once
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Set to false during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Stops background maintenance (merge queue sweeps) on shutdown
    pub(crate) background_cancel: CancellationToken,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("media", &self.media.name())
            .field("accepting_new", &self.accepting_new.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine
    ///
    /// Validates the configuration, creates the work directory root and
    /// starts the merge queue sweep, which runs until [`shutdown`](Self::shutdown).
    pub async fn new(
        config: Config,
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn SettingsStore>,
        media: Arc<dyn MediaProcessor>,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.storage.work_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create work directory '{}': {}",
                        config.storage.work_dir.display(),
                        e
                    ),
                ))
            })?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        let concurrent_limit = Arc::new(Semaphore::new(config.limits.max_concurrent_tasks));
        let merge_queue = MergeQueue::new(&config.merge_queue);
        let background_cancel = CancellationToken::new();
        merge_queue.spawn_purger(
            config.merge_queue.merge_purge_interval,
            background_cancel.clone(),
        );

        tracing::info!(
            work_dir = %config.storage.work_dir.display(),
            max_concurrent_tasks = config.limits.max_concurrent_tasks,
            media = media.name(),
            "Engine initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            registry: TaskRegistry::new(),
            merge_queue,
            transport,
            store,
            media,
            event_tx,
            concurrent_limit,
            accepting_new: Arc::new(AtomicBool::new(true)),
            background_cancel,
        })
    }

    /// Replace the task registry, e.g. to share one across engines
    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Subscribe to task lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The task registry
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// The merge queues
    pub fn merge_queue(&self) -> &MergeQueue {
        &self.merge_queue
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether new requests are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Work directory of one task
    pub(crate) fn task_dir(&self, owner_id: OwnerId, task_id: &TaskId) -> PathBuf {
        self.config
            .storage
            .work_dir
            .join(owner_id.to_string())
            .join(task_id.as_str())
    }

    /// Gracefully shut down the engine
    ///
    /// 1. Stops accepting new requests
    /// 2. Cancels every running task
    /// 3. Waits up to [`SHUTDOWN_GRACE`] for the pipelines to clean up and
    ///    deregister
    /// 4. Stops background maintenance and drops expired merge entries
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new tasks");

        let signalled = self.registry.cancel_all().await;
        tracing::info!(tasks = signalled, "Signalled cancellation to all running tasks");

        match tokio::time::timeout(SHUTDOWN_GRACE, self.wait_for_active_tasks()).await {
            Ok(()) => tracing::info!("All running tasks stopped"),
            Err(_) => tracing::warn!(
                remaining = self.registry.len().await,
                "Timeout waiting for tasks to stop, proceeding with shutdown"
            ),
        }

        self.background_cancel.cancel();
        let dropped = self.merge_queue.purge_expired().await;
        tracing::info!(expired_merge_entries = dropped, "Shutdown complete");
        Ok(())
    }

    async fn wait_for_active_tasks(&self) {
        while !self.registry.is_empty().await {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
}
