//! Pure aggregate functions over entity lists.

use serde::{Deserialize, Serialize};

use crate::{Instance, InstanceCounters, InstanceStatus, Task, TaskStatus};

/// Count instances by health.
///
/// - idle: enabled and reporting `idle` (a disabled idle instance is not
///   available for dispatch)
/// - busy: reporting `busy`
/// - offline: reporting `offline` or `error`
///
/// Instances in other states only contribute to `total`.
pub fn count_instances(instances: &[Instance]) -> InstanceCounters {
    let mut counters = InstanceCounters {
        total: instances.len() as u64,
        ..Default::default()
    };

    for instance in instances {
        match instance.status {
            InstanceStatus::Idle if instance.enabled => counters.idle += 1,
            InstanceStatus::Busy => counters.busy += 1,
            status if status.is_down() => counters.offline += 1,
            _ => {}
        }
    }

    counters
}

/// Tasks counted by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBreakdown {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub timeout: u64,
    pub cancelled: u64,
}

impl TaskBreakdown {
    /// Total number of tasks counted.
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed + self.timeout + self.cancelled
    }
}

/// Count tasks by status.
pub fn count_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> TaskBreakdown {
    let mut breakdown = TaskBreakdown::default();

    for task in tasks {
        match task.status {
            TaskStatus::Pending => breakdown.pending += 1,
            TaskStatus::Running => breakdown.running += 1,
            TaskStatus::Completed => breakdown.completed += 1,
            TaskStatus::Failed => breakdown.failed += 1,
            TaskStatus::Timeout => breakdown.timeout += 1,
            TaskStatus::Cancelled => breakdown.cancelled += 1,
        }
    }

    breakdown
}
