//! In-process registry of running tasks
//!
//! The registry is the single source of truth for which pipelines are in
//! flight. It hands out task ids, keeps the per-task [`CancellationToken`]
//! and answers the owner's list/stop commands. Cancellation here only flips
//! the token; the pipeline observes it and terminates its subprocess.
//!
//! State is in memory only and does not survive a restart.

mod merge_queue;

pub use merge_queue::{MIN_MERGE_ENTRIES, MergeEntry, MergeQueue};

use crate::types::{OwnerId, Phase, TaskId};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Length of generated task ids
pub const TASK_ID_LEN: usize = 8;

type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Snapshot of a registered task
///
/// `cancelled` is read live from the task's token, so it never reverts once
/// set even on an old snapshot.
#[derive(Clone, Debug)]
pub struct Task {
    /// Owner who started the task
    pub owner_id: OwnerId,
    /// Unique id among active tasks
    pub task_id: TaskId,
    /// Phase at the time of the snapshot
    pub phase: Phase,
    /// Wall-clock creation time
    pub started_at: DateTime<Utc>,
    /// Expected total units for the current phase (bytes or frames)
    pub total_units: u64,
    /// Units processed so far in the current phase
    pub current_units: u64,
    token: CancellationToken,
}

impl Task {
    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token that fires when the task is cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Seconds since the task was registered
    pub fn running_seconds(&self) -> f64 {
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        (elapsed.num_milliseconds().max(0) as f64) / 1000.0
    }
}

struct Entry {
    task: Task,
    seq: u64,
}

#[derive(Default)]
struct RegistryState {
    tasks: HashMap<TaskId, Entry>,
    next_seq: u64,
}

/// Process-wide table of running tasks (cloneable, state is shared)
#[derive(Clone)]
pub struct TaskRegistry {
    state: Arc<Mutex<RegistryState>>,
    id_generator: IdGenerator,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry").finish_non_exhaustive()
    }
}

impl TaskRegistry {
    /// Create an empty registry with random alphanumeric ids
    pub fn new() -> Self {
        Self::with_id_generator(random_task_id)
    }

    /// Create an empty registry with a custom id source
    ///
    /// Generated ids that collide with an active task are discarded and the
    /// generator is asked again.
    pub fn with_id_generator<F>(generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            id_generator: Arc::new(generator),
        }
    }

    /// Register a new task for `owner_id`
    ///
    /// The task starts in [`Phase::Downloading`] and is not cancelled.
    pub async fn register(&self, owner_id: OwnerId) -> Task {
        let mut state = self.state.lock().await;

        let task_id = loop {
            let candidate = TaskId::new((self.id_generator)());
            if !state.tasks.contains_key(&candidate) {
                break candidate;
            }
            tracing::debug!(task_id = %candidate, "Generated task id collides, retrying");
        };

        let task = Task {
            owner_id,
            task_id: task_id.clone(),
            phase: Phase::Downloading,
            started_at: Utc::now(),
            total_units: 0,
            current_units: 0,
            token: CancellationToken::new(),
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.insert(
            task_id.clone(),
            Entry {
                task: task.clone(),
                seq,
            },
        );

        tracing::debug!(owner_id = owner_id.0, task_id = %task_id, "Task registered");
        task
    }

    /// Request cancellation of a task
    ///
    /// Returns true if the task exists and belongs to `owner_id`, including
    /// when it was already cancelled. Returns false otherwise.
    pub async fn cancel(&self, owner_id: OwnerId, task_id: &TaskId) -> bool {
        let state = self.state.lock().await;
        match state.tasks.get(task_id) {
            Some(entry) if entry.task.owner_id == owner_id => {
                entry.task.token.cancel();
                tracing::info!(
                    owner_id = owner_id.0,
                    task_id = %task_id,
                    phase = %entry.task.phase,
                    "Task cancellation requested"
                );
                true
            }
            _ => false,
        }
    }

    /// Tasks of `owner_id` in registration order
    pub async fn list_for_owner(&self, owner_id: OwnerId) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut entries: Vec<&Entry> = state
            .tasks
            .values()
            .filter(|e| e.task.owner_id == owner_id)
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.task.clone()).collect()
    }

    /// Remove a task; removing an absent task is a no-op
    pub async fn deregister(&self, owner_id: OwnerId, task_id: &TaskId) {
        let mut state = self.state.lock().await;
        let owned = state
            .tasks
            .get(task_id)
            .is_some_and(|e| e.task.owner_id == owner_id);
        if owned {
            state.tasks.remove(task_id);
            tracing::debug!(owner_id = owner_id.0, task_id = %task_id, "Task deregistered");
        }
    }

    /// Whether the task exists and has been cancelled
    pub async fn is_cancelled(&self, owner_id: OwnerId, task_id: &TaskId) -> bool {
        self.get(owner_id, task_id)
            .await
            .is_some_and(|task| task.is_cancelled())
    }

    /// Snapshot of a single task
    pub async fn get(&self, owner_id: OwnerId, task_id: &TaskId) -> Option<Task> {
        let state = self.state.lock().await;
        state
            .tasks
            .get(task_id)
            .filter(|e| e.task.owner_id == owner_id)
            .map(|e| e.task.clone())
    }

    /// Move a task into a new phase and reset its unit counters
    pub async fn set_phase(&self, owner_id: OwnerId, task_id: &TaskId, phase: Phase) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.tasks.get_mut(task_id)
            && entry.task.owner_id == owner_id
        {
            entry.task.phase = phase;
            entry.task.current_units = 0;
            entry.task.total_units = 0;
        }
    }

    /// Record progress for the task's current phase
    pub async fn update_progress(
        &self,
        owner_id: OwnerId,
        task_id: &TaskId,
        current: u64,
        total: u64,
    ) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.tasks.get_mut(task_id)
            && entry.task.owner_id == owner_id
        {
            entry.task.current_units = current;
            entry.task.total_units = total;
        }
    }

    /// Cancel every registered task, returning how many were signalled
    pub async fn cancel_all(&self) -> usize {
        let state = self.state.lock().await;
        for entry in state.tasks.values() {
            entry.task.token.cancel();
        }
        state.tasks.len()
    }

    /// Number of registered tasks
    pub async fn len(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    /// Whether no task is registered
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.tasks.is_empty()
    }
}

fn random_task_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TASK_ID_LEN)
        .map(char::from)
        .collect()
}
