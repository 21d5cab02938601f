//! Newtype wrappers for identifiers to ensure type safety.
//!
//! Identifiers are assigned by the center. They are usually UUID strings,
//! but integer ids are accepted on the wire and kept in their decimal form.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire form of an identifier: a string or a bare integer.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

/// Unique identifier for a Task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawId")]
pub struct TaskId(String);

impl TaskId {
    /// Create a new TaskId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<RawId> for TaskId {
    fn from(raw: RawId) -> Self {
        Self(raw.into())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Unique identifier for a backend Instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawId")]
pub struct InstanceId(String);

impl InstanceId {
    /// Create a new InstanceId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<RawId> for InstanceId {
    fn from(raw: RawId) -> Self {
        Self(raw.into())
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        let id = TaskId::new("test-123");
        assert_eq!(format!("{}", id), "test-123");
    }

    #[test]
    fn test_id_accepts_integer_on_the_wire() {
        let id: InstanceId = serde_json::from_str("1").unwrap();
        assert_eq!(id.as_str(), "1");

        let id: InstanceId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id, InstanceId::from("abc"));
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = TaskId::new("t-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"t-1\"");
    }
}
