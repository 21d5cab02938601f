//! Push channel messages.
//!
//! Frames arrive as JSON text shaped `{"type": ..., "data": ...}`. Only the
//! `stats` type carries a payload the dashboard understands; anything else is
//! surfaced as [`PushMessage::Other`] so newer servers do not break older
//! clients.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{CoreError, Instance, QueueCounters, Task, TaskCounters};

/// Message type carrying a full stats snapshot.
pub const STATS_MESSAGE: &str = "stats";

/// A decoded push message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Full snapshot of the center.
    Stats(StatsPush),
    /// A message type this client does not handle (or a `stats` frame
    /// without data).
    Other { kind: String },
}

/// Payload of a `stats` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsPush {
    pub queue: QueueCounters,
    pub tasks: TaskCounters,
    pub instances: Vec<Instance>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub queued_tasks: Vec<Task>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub running_tasks: Vec<Task>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl PushMessage {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let raw: RawMessage = serde_json::from_str(text)?;

        if raw.kind != STATS_MESSAGE || raw.data.is_null() {
            return Ok(Self::Other { kind: raw.kind });
        }

        let stats = serde_json::from_value(raw.data)?;
        Ok(Self::Stats(stats))
    }

    /// The wire `type` of this message.
    pub fn kind(&self) -> &str {
        match self {
            Self::Stats(_) => STATS_MESSAGE,
            Self::Other { kind } => kind,
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InstanceStatus;

    #[test]
    fn test_parse_stats_frame() {
        let text = r#"{
            "type": "stats",
            "data": {
                "queue": {"pending": 2, "running": 1},
                "tasks": {"total": 3, "completed": 1, "failed": 0},
                "instances": [{"id": 1, "status": "busy", "enabled": true}],
                "queued_tasks": [{"id": "a", "priority": 5, "status": "pending", "created_at": "2024-05-01T10:00:00"}],
                "running_tasks": null
            }
        }"#;

        let PushMessage::Stats(stats) = PushMessage::parse(text).unwrap() else {
            panic!("Expected Stats");
        };
        assert_eq!(stats.queue.pending, 2);
        assert_eq!(stats.instances[0].status, InstanceStatus::Busy);
        assert_eq!(stats.instances[0].id.as_str(), "1");
        assert_eq!(stats.queued_tasks.len(), 1);
        assert!(stats.running_tasks.is_empty());
    }

    #[test]
    fn test_missing_task_lists_default_to_empty() {
        let text = r#"{"type":"stats","data":{"queue":{"pending":0,"running":0},"tasks":{"total":0,"completed":0,"failed":0},"instances":[]}}"#;
        let PushMessage::Stats(stats) = PushMessage::parse(text).unwrap() else {
            panic!("Expected Stats");
        };
        assert!(stats.queued_tasks.is_empty());
        assert!(stats.running_tasks.is_empty());
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let msg = PushMessage::parse(r#"{"type":"heartbeat","data":{"ts":1}}"#).unwrap();
        assert_eq!(msg, PushMessage::Other { kind: "heartbeat".to_string() });
        assert_eq!(msg.kind(), "heartbeat");
    }

    #[test]
    fn test_malformed_frames() {
        assert!(PushMessage::parse("not json").is_err());
        assert!(PushMessage::parse(r#"{"data":{}}"#).is_err());
        assert!(PushMessage::parse(r#"{"type":"stats","data":{"queue":1}}"#).is_err());
    }
}
