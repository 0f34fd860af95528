//! Owner commands: stop, task list and the merge queue.

use crate::error::{Error, Result, ValidationError};
use crate::registry::Task;
use crate::types::{ChatId, MediaRef, OwnerId, TaskId};

use super::Engine;
use super::job::{JobKind, JobRequest};
use super::messages;

/// Extract the task id from a stop command
///
/// Accepts `<prefix><id>`, `<prefix> <id>` and `<prefix>@botname <id>`.
/// Returns `None` when no well-formed id follows the prefix.
///
/// # Examples
///
/// ```
/// use encoder_bot::pipeline::parse_stop_command;
///
/// assert_eq!(parse_stop_command("/stopAb12", "/stop").unwrap().as_str(), "Ab12");
/// assert_eq!(parse_stop_command("/stop Ab12", "/stop").unwrap().as_str(), "Ab12");
/// assert!(parse_stop_command("/stop", "/stop").is_none());
/// ```
pub fn parse_stop_command(text: &str, prefix: &str) -> Option<TaskId> {
    let rest = text.trim().strip_prefix(prefix)?;
    let rest = match rest.strip_prefix('@') {
        Some(mention) => mention.split_once(char::is_whitespace)?.1,
        None => rest,
    };
    let id = rest.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(TaskId::from(id))
}

impl Engine {
    /// Request cancellation of one of the owner's tasks
    ///
    /// Returns false when the owner has no active task with that id.
    pub async fn cancel_task(&self, owner_id: OwnerId, task_id: &TaskId) -> bool {
        let found = self.registry.cancel(owner_id, task_id).await;
        if !found {
            tracing::debug!(owner_id = owner_id.0, task_id = %task_id, "Cancel target not found");
        }
        found
    }

    /// Handle a stop command and return the reply text
    pub async fn stop_command(&self, owner_id: OwnerId, text: &str) -> String {
        let prefix = &self.config.progress.stop_command;
        match parse_stop_command(text, prefix) {
            Some(task_id) => {
                if self.cancel_task(owner_id, &task_id).await {
                    messages::cancel_ok(&task_id)
                } else {
                    messages::cancel_not_found(&task_id)
                }
            }
            None => messages::stop_usage(prefix),
        }
    }

    /// The owner's running tasks, oldest first
    pub async fn list_tasks(&self, owner_id: OwnerId) -> Vec<Task> {
        self.registry.list_for_owner(owner_id).await
    }

    /// Render the owner's running tasks with a stop hint per task
    pub async fn tasks_command(&self, owner_id: OwnerId) -> String {
        let tasks = self.list_tasks(owner_id).await;
        messages::task_list(&tasks, &self.config.progress.stop_command)
    }

    /// Queue a video for merging and return the reply text
    ///
    /// The owner's size ceiling applies per video.
    pub async fn merge_add(&self, owner_id: OwnerId, media: MediaRef) -> String {
        match self.try_merge_add(owner_id, media).await {
            Ok(len) => messages::merge_added(len, self.config.merge_queue.merge_max_entries),
            Err(e) => messages::rejected(&e.user_message()),
        }
    }

    async fn try_merge_add(&self, owner_id: OwnerId, media: MediaRef) -> Result<usize> {
        let privileged = self.store.is_privileged(owner_id).await?;
        let limit = self.config.limits.ceiling_for(privileged);
        if media.file_size > limit {
            return Err(ValidationError::FileTooLarge {
                size: media.file_size,
                limit,
            }
            .into());
        }
        let len = self.merge_queue.push(owner_id, media).await?;
        tracing::debug!(owner_id = owner_id.0, queued = len, "Video added to merge queue");
        Ok(len)
    }

    /// Render the owner's merge queue
    pub async fn merge_list(&self, owner_id: OwnerId) -> String {
        messages::merge_queue(&self.merge_queue.list(owner_id).await)
    }

    /// Empty the owner's merge queue and return the reply text
    pub async fn merge_clear(&self, owner_id: OwnerId) -> String {
        messages::merge_cleared(self.merge_queue.clear(owner_id).await)
    }

    /// Start merging the owner's queued videos
    ///
    /// Needs at least two queued videos. The queue is consumed when the merge
    /// task is accepted and restored when it is rejected.
    pub async fn merge_start(&self, owner_id: OwnerId, chat: ChatId) -> Result<TaskId> {
        if !self.is_accepting() {
            self.reply(chat, &messages::shutting_down()).await;
            return Err(Error::ShuttingDown);
        }

        let entries = match self.merge_queue.take(owner_id).await {
            Ok(entries) => entries,
            Err(e) => {
                let err = Error::from(e);
                self.reply(chat, &messages::rejected(&err.user_message()))
                    .await;
                return Err(err);
            }
        };

        let mut parts = entries.into_iter().map(|e| e.media);
        let Some(first) = parts.next() else {
            return Err(ValidationError::MergeQueueTooShort {
                have: 0,
                need: crate::registry::MIN_MERGE_ENTRIES,
            }
            .into());
        };
        let others: Vec<MediaRef> = parts.collect();
        let restore: Vec<MediaRef> = std::iter::once(first.clone())
            .chain(others.iter().cloned())
            .collect();

        let request = JobRequest::new(owner_id, chat, first, JobKind::Merge { others });
        match self.submit(request).await {
            Ok(task_id) => Ok(task_id),
            Err(e) => {
                for media in restore {
                    if let Err(push_err) = self.merge_queue.push(owner_id, media).await {
                        tracing::warn!(owner_id = owner_id.0, error = %push_err, "Failed to restore merge queue entry");
                    }
                }
                Err(e)
            }
        }
    }
}
