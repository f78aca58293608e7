//! Registry of transfer tasks keyed by source URL.
//!
//! The registry is the only state shared between concurrent transfers. It
//! lives for one run (one engine) and never forgets a task: a failed or
//! finished URL stays on record so a resubmission is recognized.
//!
//! Registration is a single check-and-insert under the map's shard lock
//! (`DashMap::entry`), so two concurrent submissions of the same URL cannot
//! both succeed.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

/// Ordinal assigned to a task in registration order, starting at 0.
pub type TaskOrdinal = usize;

/// Lifecycle state of a transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Registered, no body bytes received yet.
    Pending,
    /// At least one body chunk received.
    InProgress,
    /// Stream completed with the declared total reached.
    Finished,
    /// Transfer ended with an error. Terminal.
    Failed,
}

impl TaskState {
    /// Returns true for `Finished` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Returns the stable label used in log output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

/// How the registry treats a URL it has already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistryPolicy {
    /// Any known URL is a duplicate, whatever its state.
    #[default]
    RejectKnown,
    /// A `Finished` URL may be registered again (same ordinal, back to `Pending`).
    /// Pending, in-progress, and failed URLs are still duplicates.
    AllowFinished,
}

/// Point-in-time view of one registered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    /// Dedup key.
    pub source_url: String,
    /// Registration ordinal.
    pub ordinal: TaskOrdinal,
    /// Current state.
    pub state: TaskState,
}

impl TransferTask {
    /// Returns true once the task reached `Finished`.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.state == TaskState::Finished
    }
}

#[derive(Debug)]
struct TaskRecord {
    ordinal: TaskOrdinal,
    state: TaskState,
}

/// Identity-keyed set of transfer tasks for one run.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, TaskRecord>,
    next_ordinal: AtomicUsize,
    policy: RegistryPolicy,
}

impl TaskRegistry {
    /// Creates an empty registry with [`RegistryPolicy::RejectKnown`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry with an explicit policy.
    #[must_use]
    pub fn with_policy(policy: RegistryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Returns the configured policy.
    #[must_use]
    pub fn policy(&self) -> RegistryPolicy {
        self.policy
    }

    /// Atomically registers `source_url`.
    ///
    /// Returns the task ordinal when the URL was accepted, or `None` when it is
    /// a duplicate under the registry policy. A `None` result means the caller
    /// must do nothing further for this URL.
    pub fn try_register(&self, source_url: &str) -> Option<TaskOrdinal> {
        match self.tasks.entry(source_url.to_string()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if self.policy == RegistryPolicy::AllowFinished
                    && record.state == TaskState::Finished
                {
                    record.state = TaskState::Pending;
                    debug!(url = %source_url, ordinal = record.ordinal, "re-registered finished task");
                    return Some(record.ordinal);
                }
                debug!(
                    url = %source_url,
                    ordinal = record.ordinal,
                    state = record.state.as_str(),
                    "duplicate task rejected"
                );
                None
            }
            Entry::Vacant(vacant) => {
                let ordinal = self.next_ordinal.fetch_add(1, Ordering::SeqCst);
                vacant.insert(TaskRecord {
                    ordinal,
                    state: TaskState::Pending,
                });
                debug!(url = %source_url, ordinal, "registered task");
                Some(ordinal)
            }
        }
    }

    /// Marks the task finished.
    ///
    /// Returns `false` (and logs a warning) when the URL was never registered;
    /// the call is otherwise a no-op in that case.
    pub fn mark_finished(&self, source_url: &str) -> bool {
        self.transition(source_url, TaskState::Finished)
    }

    /// Marks the task in progress. Only applies to `Pending` tasks.
    pub fn mark_in_progress(&self, source_url: &str) -> bool {
        let Some(mut record) = self.tasks.get_mut(source_url) else {
            warn!(url = %source_url, "mark_in_progress on unknown task");
            return false;
        };
        if record.state == TaskState::Pending {
            record.state = TaskState::InProgress;
        }
        true
    }

    /// Marks the task failed. Finished tasks are left untouched.
    pub fn mark_failed(&self, source_url: &str) -> bool {
        self.transition(source_url, TaskState::Failed)
    }

    fn transition(&self, source_url: &str, to: TaskState) -> bool {
        let Some(mut record) = self.tasks.get_mut(source_url) else {
            warn!(url = %source_url, state = to.as_str(), "state change on unknown task");
            return false;
        };
        if record.state == TaskState::Finished {
            return true;
        }
        record.state = to;
        true
    }

    /// Returns the ordinal of a registered URL.
    #[must_use]
    pub fn index_of(&self, source_url: &str) -> Option<TaskOrdinal> {
        self.tasks.get(source_url).map(|record| record.ordinal)
    }

    /// Returns the state of a registered URL.
    #[must_use]
    pub fn state_of(&self, source_url: &str) -> Option<TaskState> {
        self.tasks.get(source_url).map(|record| record.state)
    }

    /// Returns all tasks ordered by ordinal.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TransferTask> {
        let mut tasks: Vec<TransferTask> = self
            .tasks
            .iter()
            .map(|entry| TransferTask {
                source_url: entry.key().clone(),
                ordinal: entry.value().ordinal,
                state: entry.value().state,
            })
            .collect();
        tasks.sort_by_key(|task| task.ordinal);
        tasks
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true when nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
