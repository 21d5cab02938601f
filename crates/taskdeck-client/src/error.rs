//! Error types for the client.

use thiserror::Error;

/// Errors returned by request/response calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network failure or timeout.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The center answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// A configured URL is not usable.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// HTTP status of the failed call, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Errors raised by the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Could not establish the connection.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The established connection failed.
    #[error("transport error: {0}")]
    Transport(String),
}
