//! Stats snapshot types.

use serde::{Deserialize, Serialize};

/// Queue depth as counted by the center.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounters {
    pub pending: u64,
    pub running: u64,
}

/// Lifetime task outcomes as counted by the center.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Instance health summary.
///
/// Locally this is always derived from the instance list with
/// [`count_instances`](crate::count_instances); the copy the center sends is
/// never kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceCounters {
    pub total: u64,
    pub idle: u64,
    pub busy: u64,
    pub offline: u64,
}

/// Response of `GET /stats`, and the dashboard's summary view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub queue: QueueCounters,
    pub tasks: TaskCounters,
    #[serde(default)]
    pub instances: InstanceCounters,
}
