//! Error types for the state store.

use std::fmt;

use taskdeck_client::ClientError;
use taskdeck_core::CoreError;
use thiserror::Error;

/// A pulled slice of the canonical state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slice {
    Stats,
    Instances,
    Config,
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slice::Stats => write!(f, "stats"),
            Slice::Instances => write!(f, "instances"),
            Slice::Config => write!(f, "config"),
        }
    }
}

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A pull failed; the slice kept its previous value.
    #[error("failed to pull {slice}: {source}")]
    Pull { slice: Slice, source: ClientError },

    /// The center rejected a mutation or could not be reached.
    #[error("{action} failed: {source}")]
    Mutation {
        action: &'static str,
        source: ClientError,
    },

    /// The mutation went through but the follow-up pull failed.
    #[error("{action} applied but resync failed: {source}")]
    Resync {
        action: &'static str,
        source: ClientError,
    },

    /// The request was refused locally before being sent.
    #[error("invalid input: {0}")]
    Invalid(#[from] CoreError),
}

impl SyncError {
    /// The underlying client error, if the failure came from the center.
    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            Self::Pull { source, .. }
            | Self::Mutation { source, .. }
            | Self::Resync { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}
