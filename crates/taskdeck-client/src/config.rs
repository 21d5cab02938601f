//! Client configuration.

use std::time::Duration;

use crate::error::ClientError;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, e.g. `http://127.0.0.1:8000/api`.
    pub base_url: String,

    /// Timeout applied to every request.
    pub request_timeout: Duration,

    /// Path of the stats stream, relative to the base URL.
    pub push_path: String,

    /// Delay before reopening the push channel after it closes.
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            request_timeout: Duration::from_secs(30),
            push_path: "/stats/ws".to_string(),
            reconnect_delay: Duration::from_millis(3000),
        }
    }
}

impl ClientConfig {
    /// Create a config for the given base URL with default timings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// WebSocket URL of the stats stream, derived from the base URL.
    pub fn push_url(&self) -> Result<String, ClientError> {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            return Err(ClientError::InvalidUrl(self.base_url.clone()));
        };
        Ok(format!("{}{}", ws_base, self.push_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_url_swaps_scheme() {
        let config = ClientConfig::new("http://localhost:8000/api/");
        assert_eq!(config.push_url().unwrap(), "ws://localhost:8000/api/stats/ws");

        let config = ClientConfig::new("https://center.example/api");
        assert_eq!(config.push_url().unwrap(), "wss://center.example/api/stats/ws");
    }

    #[test]
    fn test_push_url_rejects_other_schemes() {
        let config = ClientConfig::new("ftp://center");
        assert!(matches!(config.push_url(), Err(ClientError::InvalidUrl(_))));
    }
}
