//! Center configuration mirrored by the dashboard.
//!
//! The center owns these tunables; the client only reads them and submits
//! replacements. Locally the config is always replaced wholesale.

use crate::CoreError;
use serde::{Deserialize, Serialize};

/// Runtime tunables of the task center. All durations are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CenterConfig {
    /// Maximum time a task may run.
    pub task_timeout: u64,

    /// Maximum time a task may wait in the queue.
    pub queue_timeout: u64,

    /// Maximum number of queued tasks before submissions are refused.
    pub max_queue_size: u64,

    /// Whether task priorities are honoured.
    pub enable_priority: bool,

    /// Retry attempts for a failed task.
    pub max_retries: u64,

    /// Delay between retries.
    pub retry_delay: u64,

    /// Interval between instance health checks.
    pub health_check_interval: u64,

    /// Per-request timeout towards instances.
    pub instance_timeout: u64,
}

impl Default for CenterConfig {
    fn default() -> Self {
        Self {
            task_timeout: 300,
            queue_timeout: 600,
            max_queue_size: 100,
            enable_priority: true,
            max_retries: 3,
            retry_delay: 5,
            health_check_interval: 30,
            instance_timeout: 10,
        }
    }
}

impl CenterConfig {
    /// Validate against the lower bounds the center enforces.
    pub fn validate(&self) -> Result<(), CoreError> {
        ConfigPatch::from(self).validate()
    }
}

/// Partial configuration update (PATCH body).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_priority: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_timeout: Option<u64>,
}

impl ConfigPatch {
    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Validate the fields that are set.
    pub fn validate(&self) -> Result<(), CoreError> {
        check_min("task_timeout", self.task_timeout, 10)?;
        check_min("queue_timeout", self.queue_timeout, 60)?;
        check_min("max_queue_size", self.max_queue_size, 1)?;
        check_min("retry_delay", self.retry_delay, 1)?;
        check_min("health_check_interval", self.health_check_interval, 5)?;
        check_min("instance_timeout", self.instance_timeout, 1)?;
        Ok(())
    }
}

impl From<&CenterConfig> for ConfigPatch {
    fn from(config: &CenterConfig) -> Self {
        Self {
            task_timeout: Some(config.task_timeout),
            queue_timeout: Some(config.queue_timeout),
            max_queue_size: Some(config.max_queue_size),
            enable_priority: Some(config.enable_priority),
            max_retries: Some(config.max_retries),
            retry_delay: Some(config.retry_delay),
            health_check_interval: Some(config.health_check_interval),
            instance_timeout: Some(config.instance_timeout),
        }
    }
}

fn check_min(field: &str, value: Option<u64>, min: u64) -> Result<(), CoreError> {
    match value {
        Some(v) if v < min => Err(CoreError::InvalidInput(format!(
            "{} must be at least {}, got {}",
            field, min, v
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(CenterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_lower_bounds() {
        let config = CenterConfig {
            task_timeout: 5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("task_timeout"));

        let patch = ConfigPatch {
            health_check_interval: Some(4),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
    }

    #[test]
    fn test_full_config_becomes_full_patch() {
        let patch = ConfigPatch::from(&CenterConfig::default());
        let body = serde_json::to_value(&patch).unwrap();
        let back: CenterConfig = serde_json::from_value(body).unwrap();
        assert_eq!(back, CenterConfig::default());
        assert!(ConfigPatch::default().is_empty());
    }
}
