use super::{ProgressPresenter, ProgressSink};
use crate::registry::TaskRegistry;
use crate::transport::ChatTransport;
use crate::types::{Event, MessageRef, OwnerId, TaskId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

/// Progress sink that edits a task's status message
///
/// Every tick is recorded in the registry. Ticks that pass the presenter's
/// throttle are rendered into the status message and broadcast as
/// [`Event::Progress`]. Edit failures are logged and swallowed so a deleted
/// status message never aborts the pipeline.
pub struct StatusReporter {
    transport: Arc<dyn ChatTransport>,
    status: MessageRef,
    registry: TaskRegistry,
    owner_id: OwnerId,
    task_id: TaskId,
    // Held across the edit so renders of one task never interleave
    presenter: Mutex<ProgressPresenter>,
    event_tx: broadcast::Sender<Event>,
}

impl StatusReporter {
    /// Create a reporter for one phase of one task
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        status: MessageRef,
        registry: TaskRegistry,
        owner_id: OwnerId,
        task_id: TaskId,
        presenter: ProgressPresenter,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            transport,
            status,
            registry,
            owner_id,
            task_id,
            presenter: Mutex::new(presenter),
            event_tx,
        }
    }
}

#[async_trait]
impl ProgressSink for StatusReporter {
    async fn report(&self, current: u64, total: u64) {
        self.registry
            .update_progress(self.owner_id, &self.task_id, current, total)
            .await;

        let mut presenter = self.presenter.lock().await;
        let Some(text) = presenter.on_tick(current, total) else {
            return;
        };

        let _ = self.event_tx.send(Event::Progress {
            owner_id: self.owner_id,
            task_id: self.task_id.clone(),
            phase: presenter.phase(),
            percent: presenter.sample(current, total).percentage(),
        });

        if let Err(e) = self.transport.edit_text(&self.status, &text).await {
            tracing::debug!(
                owner_id = self.owner_id.0,
                task_id = %self.task_id,
                error = %e,
                "Progress edit failed, ignoring"
            );
        }
    }
}
