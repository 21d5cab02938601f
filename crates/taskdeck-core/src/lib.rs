//! taskdeck Core Domain Types
//!
//! This crate contains the pure domain types mirrored from the task center:
//! - Tasks and their queue metadata
//! - Backend instances
//! - Center configuration
//! - Stats snapshots and push messages
//!
//! Nothing here touches the network. The aggregate functions are pure and
//! are what the state store uses to derive instance counters.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod ids;
pub mod instance;
pub mod message;
pub mod stats;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use aggregate::{count_instances, count_tasks, TaskBreakdown};
pub use config::{CenterConfig, ConfigPatch};
pub use error::CoreError;
pub use ids::{InstanceId, TaskId};
pub use instance::{Instance, InstanceUpdate, NewInstance};
pub use message::{PushMessage, StatsPush};
pub use stats::{InstanceCounters, QueueCounters, StatsSnapshot, TaskCounters};
pub use status::{BackendKind, InstanceStatus, TaskStatus};
pub use task::{NewTask, Task, TaskList, TaskReceipt};
