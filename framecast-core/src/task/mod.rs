//! Background task records.
//!
//! A [`Task`] is the authoritative record of one delegated unit of work. The
//! [`TaskRegistry`] owns every record; callers only hold a [`TaskId`] and read
//! snapshots.

mod registry;

pub use registry::{
    RegistryConfig, RegistryError, TaskRegistry, TaskTransition, Transition, DEFAULT_MAX_RETAINED,
    DEFAULT_RETENTION,
};

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Opaque task identifier, unique for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a task.
///
/// ```text
/// Pending --> Running --> Completed | Failed | TimedOut
/// Pending | Running --> Cancelled
/// ```
///
/// The four right-hand states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transition can leave this state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timedout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Snapshot of a task record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    /// Opaque label supplied when the task was started.
    pub description: String,
    pub status: TaskStatus,
    /// Result of the work. Set on completion, and also when the work
    /// finishes after the task already timed out or was cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure or timeout message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When the task reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    fn new(description: String) -> Self {
        Self {
            id: TaskId::new(),
            description,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Why delegated work did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The work returned an error or panicked.
    #[error("{0}")]
    Failed(String),

    /// The work did not finish within its timeout.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The task was cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// What a completion handler receives when its task reaches a terminal state.
pub type TaskOutcome = Result<Value, TaskError>;
