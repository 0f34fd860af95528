//! Per-owner queue of videos waiting to be merged

use crate::config::MergeQueueConfig;
use crate::error::ValidationError;
use crate::types::{MediaRef, OwnerId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Minimum number of videos needed to start a merge
pub const MIN_MERGE_ENTRIES: usize = 2;

/// One queued video
#[derive(Clone, Debug)]
pub struct MergeEntry {
    /// Media to fetch when the merge starts
    pub media: MediaRef,
    /// When the entry was queued
    pub added_at: Instant,
}

/// Bounded, expiring merge queues keyed by owner
///
/// Entries older than the configured TTL are dropped when their owner touches
/// the queue. Queues nobody touches again are swept by
/// [`spawn_purger`](Self::spawn_purger). An owner whose queue becomes empty
/// no longer holds a map slot.
#[derive(Clone, Debug)]
pub struct MergeQueue {
    queues: Arc<Mutex<HashMap<OwnerId, Vec<MergeEntry>>>>,
    max_entries: usize,
    ttl: Duration,
}

impl MergeQueue {
    /// Create an empty queue set
    pub fn new(config: &MergeQueueConfig) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            max_entries: config.merge_max_entries,
            ttl: config.merge_ttl,
        }
    }

    /// Append a video, returning the owner's new queue length
    pub async fn push(&self, owner_id: OwnerId, media: MediaRef) -> Result<usize, ValidationError> {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(owner_id).or_default();
        retain_fresh(queue, self.ttl);

        if queue.len() >= self.max_entries {
            return Err(ValidationError::MergeQueueFull {
                max: self.max_entries,
            });
        }

        queue.push(MergeEntry {
            media,
            added_at: Instant::now(),
        });
        Ok(queue.len())
    }

    /// Current entries for an owner, oldest first
    pub async fn list(&self, owner_id: OwnerId) -> Vec<MergeEntry> {
        let mut queues = self.queues.lock().await;
        let entries = match queues.get_mut(&owner_id) {
            Some(queue) => {
                retain_fresh(queue, self.ttl);
                queue.clone()
            }
            None => return Vec::new(),
        };
        if entries.is_empty() {
            queues.remove(&owner_id);
        }
        entries
    }

    /// Drop an owner's queue, returning how many entries were removed
    pub async fn clear(&self, owner_id: OwnerId) -> usize {
        let mut queues = self.queues.lock().await;
        queues.remove(&owner_id).map(|q| q.len()).unwrap_or(0)
    }

    /// Take the whole queue for merging
    ///
    /// Fails without touching the queue when fewer than two videos are queued.
    pub async fn take(&self, owner_id: OwnerId) -> Result<Vec<MergeEntry>, ValidationError> {
        let mut queues = self.queues.lock().await;
        let have = match queues.get_mut(&owner_id) {
            Some(queue) => {
                retain_fresh(queue, self.ttl);
                queue.len()
            }
            None => 0,
        };
        if have == 0 {
            queues.remove(&owner_id);
        }

        if have < MIN_MERGE_ENTRIES {
            return Err(ValidationError::MergeQueueTooShort {
                have,
                need: MIN_MERGE_ENTRIES,
            });
        }

        Ok(queues.remove(&owner_id).unwrap_or_default())
    }

    /// Remove expired entries for every owner, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let mut queues = self.queues.lock().await;
        let mut dropped = 0;
        for queue in queues.values_mut() {
            let before = queue.len();
            retain_fresh(queue, self.ttl);
            dropped += before - queue.len();
        }
        queues.retain(|_, q| !q.is_empty());
        if dropped > 0 {
            tracing::debug!(dropped, "Expired merge queue entries removed");
        }
        dropped
    }

    /// Entries held across all owners
    pub async fn len(&self) -> usize {
        self.queues.lock().await.values().map(Vec::len).sum()
    }

    /// Whether no owner has anything queued
    pub async fn is_empty(&self) -> bool {
        self.queues.lock().await.is_empty()
    }

    /// Owners currently holding a queue
    pub async fn owner_count(&self) -> usize {
        self.queues.lock().await.len()
    }

    /// Spawn a task that calls [`purge_expired`](Self::purge_expired) every
    /// `every` until `cancel` fires
    ///
    /// `every` must be non-zero.
    pub fn spawn_purger(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        queue.purge_expired().await;
                    }
                    _ = cancel.cancelled() => {
                        tracing::debug!("Merge queue purger stopped");
                        break;
                    }
                }
            }
        })
    }
}

fn retain_fresh(queue: &mut Vec<MergeEntry>, ttl: Duration) {
    queue.retain(|entry| entry.added_at.elapsed() < ttl);
}
