//! The task registry: sole owner of task records and their lifecycle.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

use super::{Task, TaskId, TaskStatus};

/// How long a terminal task is kept after it finishes (5 minutes).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

/// Maximum number of terminal tasks kept at once.
pub const DEFAULT_MAX_RETAINED: usize = 1024;

/// Errors returned by registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The id is unknown or its record was evicted.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),
}

/// Retention policy for finished tasks.
///
/// A terminal task is evicted once it has been finished for longer than
/// `retention`, or earlier if more than `max_retained` terminal tasks exist
/// (oldest first). Pending and running tasks are never evicted.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub retention: Duration,
    pub max_retained: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            max_retained: DEFAULT_MAX_RETAINED,
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long finished tasks are kept.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the maximum number of finished tasks kept.
    pub fn max_retained(mut self, max_retained: usize) -> Self {
        self.max_retained = max_retained;
        self
    }
}

/// One lifecycle step, with the data it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskTransition {
    /// Pending -> Running.
    Start,
    /// Running -> Completed with the work's result.
    Complete(Value),
    /// Running -> Failed with the failure message.
    Fail(String),
    /// Running -> TimedOut with the timeout message.
    TimeOut(String),
    /// Pending or Running -> Cancelled.
    Cancel,
}

impl TaskTransition {
    /// The state this transition moves to.
    pub fn target(&self) -> TaskStatus {
        match self {
            Self::Start => TaskStatus::Running,
            Self::Complete(_) => TaskStatus::Completed,
            Self::Fail(_) => TaskStatus::Failed,
            Self::TimeOut(_) => TaskStatus::TimedOut,
            Self::Cancel => TaskStatus::Cancelled,
        }
    }

    fn allowed_from(&self, current: TaskStatus) -> bool {
        match self {
            Self::Start => current == TaskStatus::Pending,
            Self::Complete(_) | Self::Fail(_) | Self::TimeOut(_) => current == TaskStatus::Running,
            Self::Cancel => !current.is_terminal(),
        }
    }
}

/// Result of [`TaskRegistry::transition`], with the snapshot taken right
/// after it.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The task moved to the requested state.
    Applied(Task),
    /// The task was already terminal (or the move is not allowed from its
    /// current state); nothing changed except possibly a recorded late result.
    Ignored(Task),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// Snapshot of the task after the transition attempt.
    pub fn task(&self) -> &Task {
        match self {
            Self::Applied(task) | Self::Ignored(task) => task,
        }
    }

    pub fn into_task(self) -> Task {
        match self {
            Self::Applied(task) | Self::Ignored(task) => task,
        }
    }
}

struct Entry {
    task: Task,
    status: watch::Sender<TaskStatus>,
}

impl Entry {
    fn new(task: Task) -> Self {
        let (status, _) = watch::channel(task.status);
        Self { task, status }
    }
}

/// Tracks delegated tasks from registration to eviction.
///
/// The registry is the only place task status changes. Terminal states are
/// sticky: the first terminal transition wins and every later one is ignored.
pub struct TaskRegistry {
    config: RegistryConfig,
    tasks: Mutex<HashMap<TaskId, Entry>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    /// Create a registry with the default retention policy.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            config,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create a pending task and return its id.
    ///
    /// Expired finished tasks are evicted first.
    pub fn register(&self, description: impl Into<String>) -> TaskId {
        let task = Task::new(description.into());
        let id = task.id.clone();

        let mut tasks = self.tasks.lock();
        self.evict(&mut tasks, Utc::now());
        tasks.insert(id.clone(), Entry::new(task));
        log::debug!("registered task {}", id);
        id
    }

    /// Apply one lifecycle transition.
    ///
    /// A transition against a terminal task is ignored and logged. The one
    /// exception is a completion arriving after a timeout or cancellation: its
    /// value is stored in `result` for auditing while the status stays put.
    pub fn transition(
        &self,
        id: &TaskId,
        transition: TaskTransition,
    ) -> Result<Transition, RegistryError> {
        let mut tasks = self.tasks.lock();
        let entry = tasks
            .get_mut(id)
            .ok_or_else(|| RegistryError::TaskNotFound(id.clone()))?;
        let current = entry.task.status;
        let target = transition.target();

        if !transition.allowed_from(current) {
            match transition {
                TaskTransition::Complete(value)
                    if matches!(current, TaskStatus::TimedOut | TaskStatus::Cancelled) =>
                {
                    log::debug!("recording late result for {} task {}", current, id);
                    entry.task.result = Some(value);
                }
                _ => log::debug!(
                    "ignoring {} transition for task {}: already {}",
                    target,
                    id,
                    current
                ),
            }
            return Ok(Transition::Ignored(entry.task.clone()));
        }

        match transition {
            TaskTransition::Complete(value) => entry.task.result = Some(value),
            TaskTransition::Fail(message) | TaskTransition::TimeOut(message) => {
                entry.task.error = Some(message)
            }
            TaskTransition::Start | TaskTransition::Cancel => {}
        }
        entry.task.status = target;
        if target.is_terminal() {
            entry.task.completed_at = Some(Utc::now());
        }
        entry.status.send_replace(target);

        Ok(Transition::Applied(entry.task.clone()))
    }

    /// Snapshot of a task.
    pub fn get(&self, id: &TaskId) -> Result<Task, RegistryError> {
        self.tasks
            .lock()
            .get(id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| RegistryError::TaskNotFound(id.clone()))
    }

    /// Wait until the task is terminal or `timeout` elapses.
    ///
    /// Returns the snapshot either way; on timeout its status is whatever it
    /// was at that moment.
    pub async fn await_completion(
        &self,
        id: &TaskId,
        timeout: Duration,
    ) -> Result<Task, RegistryError> {
        let mut status = self
            .tasks
            .lock()
            .get(id)
            .map(|entry| entry.status.subscribe())
            .ok_or_else(|| RegistryError::TaskNotFound(id.clone()))?;

        let _ = tokio::time::timeout(timeout, status.wait_for(|s| s.is_terminal())).await;
        self.get(id)
    }

    /// Evict a finished task now.
    ///
    /// Returns `false` (and keeps the record) if the task is still pending or
    /// running.
    pub fn acknowledge(&self, id: &TaskId) -> Result<bool, RegistryError> {
        let mut tasks = self.tasks.lock();
        let entry = tasks
            .get(id)
            .ok_or_else(|| RegistryError::TaskNotFound(id.clone()))?;
        if !entry.task.is_terminal() {
            return Ok(false);
        }
        tasks.remove(id);
        Ok(true)
    }

    /// Evict finished tasks past the retention policy. Returns how many were
    /// removed.
    pub fn sweep(&self) -> usize {
        let mut tasks = self.tasks.lock();
        self.evict(&mut tasks, Utc::now())
    }

    /// Snapshots of every retained task.
    pub fn list(&self) -> Vec<Task> {
        self.tasks
            .lock()
            .values()
            .map(|entry| entry.task.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    fn evict(&self, tasks: &mut HashMap<TaskId, Entry>, now: DateTime<Utc>) -> usize {
        let before = tasks.len();
        let retention = self.config.retention;

        tasks.retain(|_, entry| match entry.task.completed_at {
            Some(finished) if entry.task.is_terminal() => now
                .signed_duration_since(finished)
                .to_std()
                .map(|age| age < retention)
                .unwrap_or(true),
            _ => true,
        });

        let mut finished: Vec<(DateTime<Utc>, TaskId)> = tasks
            .values()
            .filter(|entry| entry.task.is_terminal())
            .filter_map(|entry| Some((entry.task.completed_at?, entry.task.id.clone())))
            .collect();
        if finished.len() > self.config.max_retained {
            finished.sort_by_key(|(finished_at, _)| *finished_at);
            let excess = finished.len() - self.config.max_retained;
            for (_, id) in finished.into_iter().take(excess) {
                tasks.remove(&id);
            }
        }

        let evicted = before - tasks.len();
        if evicted > 0 {
            log::debug!("evicted {} finished tasks", evicted);
        }
        evicted
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
