//! Backend instance types.

use crate::{BackendKind, CoreError, InstanceId, InstanceStatus, TaskId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

fn default_enabled() -> bool {
    true
}

/// A processing instance registered with the center.
///
/// Push snapshots only carry `id`, `name`, `status`, `current_task_id` and
/// `enabled`; the remaining fields fall back to their defaults there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique instance identifier.
    pub id: InstanceId,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Base URL the center dispatches to.
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub backend: BackendKind,

    /// Health status from the last check.
    #[serde(default)]
    pub status: InstanceStatus,

    /// Whether the scheduler may dispatch to this instance.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Task currently running on the instance, if any.
    #[serde(default)]
    pub current_task_id: Option<TaskId>,

    #[serde(default)]
    pub total_tasks: u64,

    #[serde(default)]
    pub failed_tasks: u64,

    #[serde(default)]
    pub last_heartbeat: Option<NaiveDateTime>,
}

impl Instance {
    /// Create an enabled instance with the given status (useful for testing).
    pub fn new(id: impl Into<InstanceId>, status: InstanceStatus) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            url: String::new(),
            backend: BackendKind::default(),
            status,
            enabled: true,
            current_task_id: None,
            total_tasks: 0,
            failed_tasks: 0,
            last_heartbeat: None,
        }
    }

    /// Builder method to set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builder method to set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Whether the instance is holding a task. The center refuses to
    /// remove such an instance.
    pub fn is_occupied(&self) -> bool {
        self.current_task_id.is_some()
    }
}

/// Request body for registering an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInstance {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub backend: BackendKind,
}

impl NewInstance {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            backend: BackendKind::default(),
        }
    }

    /// Builder method to set the backend kind.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Validate caller-supplied fields before sending.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("instance name is required".to_string()));
        }
        validate_url(&self.url)
    }
}

/// Partial update for an instance (PATCH body).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,
}

impl InstanceUpdate {
    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.url.is_none() && self.backend.is_none()
    }

    /// Validate caller-supplied fields before sending.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.is_empty() {
            return Err(CoreError::InvalidInput("update has no fields".to_string()));
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(CoreError::InvalidInput("instance name cannot be empty".to_string()));
            }
        }
        if let Some(url) = &self.url {
            validate_url(url)?;
        }
        Ok(())
    }
}

fn validate_url(url: &str) -> Result<(), CoreError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(CoreError::InvalidInput(format!(
            "instance url must start with http:// or https://, got '{}'",
            url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_shape_fills_defaults() {
        let inst: Instance = serde_json::from_value(json!({
            "id": "i-1",
            "name": "gpu-0",
            "status": "busy",
            "current_task_id": "t-9",
            "enabled": true
        }))
        .unwrap();

        assert_eq!(inst.status, InstanceStatus::Busy);
        assert_eq!(inst.url, "");
        assert_eq!(inst.backend, BackendKind::Pipeline);
        assert!(inst.is_occupied());
    }

    #[test]
    fn test_new_instance_validation() {
        assert!(NewInstance::new("a", "http://10.0.0.1:8000").validate().is_ok());
        assert!(NewInstance::new(" ", "http://10.0.0.1:8000").validate().is_err());
        assert!(NewInstance::new("a", "10.0.0.1:8000").validate().is_err());
    }

    #[test]
    fn test_update_serializes_only_set_fields() {
        let update = InstanceUpdate {
            name: Some("renamed".to_string()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&update).unwrap(), json!({"name": "renamed"}));
        assert!(update.validate().is_ok());
        assert!(InstanceUpdate::default().validate().is_err());
    }
}
