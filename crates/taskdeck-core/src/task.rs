//! Task types.

use crate::{CoreError, InstanceId, TaskId, TaskStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Priority used when the caller does not pick one.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Accepted priority range (inclusive); higher runs first.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

/// A Task as mirrored from the center.
///
/// The center reports tasks in several shapes (queue listings, running
/// listings, push snapshots); every field other than the id is optional on
/// the wire and takes its default when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier (`id` or `task_id` on the wire).
    #[serde(alias = "task_id")]
    pub id: TaskId,

    /// Current task status.
    #[serde(default)]
    pub status: TaskStatus,

    /// Scheduling priority.
    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Opaque task input.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,

    /// Position in the queue, for pending tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,

    /// When the task was submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,

    /// When the task was dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<NaiveDateTime>,

    /// Instance the task is running on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Create a pending task with default priority (useful for testing).
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            priority: DEFAULT_PRIORITY,
            payload: serde_json::Value::Null,
            position: None,
            created_at: None,
            started_at: None,
            instance_id: None,
            result: None,
            error: None,
        }
    }

    /// Builder method to set the status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Request body for submitting a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Opaque task input.
    pub payload: serde_json::Value,

    /// Return immediately instead of waiting for the result.
    #[serde(rename = "async")]
    pub async_mode: bool,

    /// Scheduling priority (1..=10).
    pub priority: u8,
}

impl NewTask {
    /// Create an async submission with default priority.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            async_mode: true,
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to wait for completion instead of returning early.
    pub fn blocking(mut self) -> Self {
        self.async_mode = false;
        self
    }

    /// Validate caller-supplied fields before sending.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !PRIORITY_RANGE.contains(&self.priority) {
            return Err(CoreError::InvalidInput(format!(
                "priority must be between {} and {}, got {}",
                PRIORITY_RANGE.start(),
                PRIORITY_RANGE.end(),
                self.priority
            )));
        }
        if !self.payload.is_object() {
            return Err(CoreError::InvalidInput(
                "payload must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }
}

/// Response to task submission and lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReceipt {
    pub task_id: TaskId,
    pub status: TaskStatus,

    /// Queue position, when still pending.
    #[serde(default)]
    pub position: Option<u64>,

    #[serde(default)]
    pub result: Option<serde_json::Value>,

    #[serde(default)]
    pub error: Option<String>,
}

/// Response to a task listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskList {
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub total: u64,
}
