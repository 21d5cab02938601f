//! Core domain errors.

use thiserror::Error;

/// Core domain errors for taskdeck.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller-supplied input failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
