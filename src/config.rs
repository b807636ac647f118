//! Client configuration
//!
//! ## Table of Contents
//! - **ClientConfig**: API endpoint, credential and stream tuning
//! - Environment variable names (`EPI_*`)

use crate::error::{Result, TelemetryError};
use std::time::Duration;
use url::Url;

/// Environment variable for the API base URL
pub const API_BASE_URL_ENV: &str = "EPI_API_BASE_URL";

/// Environment variable for the bearer token
pub const API_TOKEN_ENV: &str = "EPI_API_TOKEN";

/// Environment variable for the HTTP timeout in seconds
pub const HTTP_TIMEOUT_ENV: &str = "EPI_HTTP_TIMEOUT_SECS";

/// Environment variable for the frame channel capacity
pub const STREAM_BUFFER_ENV: &str = "EPI_STREAM_BUFFER";

/// Base URL used when none is configured
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/v1";

/// Complete client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base URL including the version prefix, without trailing slash
    pub base_url: String,
    /// Bearer token, if known up front
    pub token: Option<String>,
    /// Timeout for REST calls; the stream itself has no overall timeout
    pub request_timeout: Duration,
    /// Capacity of the channel between the stream reader and the consumer
    pub stream_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            token: None,
            request_timeout: Duration::from_secs(30),
            stream_buffer: 256,
        }
    }
}

impl ClientConfig {
    /// Create a config for an explicit base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::default().with_base_url(base_url)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var(API_BASE_URL_ENV) {
            config = config.with_base_url(url);
        }
        if let Ok(token) = std::env::var(API_TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.token = Some(token);
            }
        }
        if let Ok(secs) = std::env::var(HTTP_TIMEOUT_ENV) {
            let secs: u64 = secs
                .parse()
                .map_err(|_| TelemetryError::config(format!("{} must be an integer", HTTP_TIMEOUT_ENV)))?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(size) = std::env::var(STREAM_BUFFER_ENV) {
            config.stream_buffer = size
                .parse()
                .map_err(|_| TelemetryError::config(format!("{} must be an integer", STREAM_BUFFER_ENV)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the REST timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the frame channel capacity
    pub fn with_stream_buffer(mut self, size: usize) -> Self {
        self.stream_buffer = size;
        self
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| TelemetryError::config(format!("invalid base URL {}: {}", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TelemetryError::config(format!(
                "base URL must be http(s), got {}",
                url.scheme()
            )));
        }
        if self.stream_buffer == 0 {
            return Err(TelemetryError::config("stream buffer must be at least 1"));
        }
        Ok(())
    }

    /// Absolute URL for an API path such as `/runs`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.stream_buffer, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = ClientConfig::new("https://api.example.org/v1/");
        assert_eq!(config.url("/runs"), "https://api.example.org/v1/runs");
    }

    #[test]
    fn test_invalid_configs() {
        assert!(ClientConfig::new("not a url").validate().is_err());
        assert!(ClientConfig::new("ftp://example.org").validate().is_err());
        assert!(ClientConfig::default().with_stream_buffer(0).validate().is_err());
    }
}
