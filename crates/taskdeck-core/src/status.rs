//! Status enums for Tasks and Instances.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Status of a Task as reported by the center.
///
/// Transitions are driven by the server; the client only observes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the queue.
    #[default]
    Pending,
    /// Dispatched to an instance.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Exceeded the task timeout.
    Timeout,
    /// Cancelled by a user.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// Wire name, as used in the `?status=` filter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoreError::InvalidInput(format!("unknown task status: {}", other))),
        }
    }
}

/// Health status of a backend Instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Healthy and free to take a task.
    Idle,
    /// Processing a task.
    Busy,
    /// Unreachable at the last health check.
    #[default]
    Offline,
    /// Reachable but reporting errors.
    Error,
    /// Taken out of rotation by an operator.
    Disabled,
}

impl InstanceStatus {
    /// Returns true if the instance counts as offline in aggregates.
    pub fn is_down(&self) -> bool {
        matches!(self, Self::Offline | Self::Error)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Error => "error",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Processing backend an Instance runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Pipeline,
    VllmAsyncEngine,
}

impl FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipeline" => Ok(Self::Pipeline),
            "vllm-async-engine" => Ok(Self::VllmAsyncEngine),
            other => Err(CoreError::InvalidInput(format!("unknown backend: {}", other))),
        }
    }
}
