//! Error types for the telemetry pipeline
//!
//! ## Table of Contents
//! - **TelemetryError**: Main error enum covering all failure modes
//! - **Result**: Type alias for `Result<T, TelemetryError>`

use crate::schema::{ProblemError, ValidationError};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Malformed scenario, frame or request; never partially applied
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Stream or connection failure, surfaced to the caller without retry
    #[error("transport error: {0}")]
    Transport(String),

    /// Missing or empty bearer credential
    #[error("authentication required: no bearer token supplied")]
    AuthRequired,

    /// Structured failure reported by the server
    #[error("server problem {}: {}", .0.code, .0.title)]
    Problem(ProblemError),

    /// Configuration error during client setup
    #[error("configuration error: {0}")]
    Config(String),

    /// Metrics registration failure
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Generic IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error outside the schema boundary
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TelemetryError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether a fresh connection attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Io(_) => true,
            Self::Problem(problem) => problem.status >= 500,
            _ => false,
        }
    }

    /// The server problem, if this error carries one
    pub fn problem(&self) -> Option<&ProblemError> {
        match self {
            Self::Problem(problem) => Some(problem),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<prometheus::Error> for TelemetryError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}

impl From<ProblemError> for TelemetryError {
    fn from(problem: ProblemError) -> Self {
        Self::Problem(problem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TelemetryError::transport("reset by peer").is_transient());
        assert!(!TelemetryError::AuthRequired.is_transient());
        assert!(!TelemetryError::config("bad url").is_transient());

        let mut problem = ProblemError::new("run.not_found", "Run not found", 404);
        assert!(!TelemetryError::Problem(problem.clone()).is_transient());
        problem.status = 503;
        assert!(TelemetryError::Problem(problem).is_transient());
    }

    #[test]
    fn test_problem_display_includes_code() {
        let err = TelemetryError::from(ProblemError::new("http.404", "Run not found", 404));
        assert_eq!(err.to_string(), "server problem http.404: Run not found");
        assert_eq!(err.problem().map(|p| p.status), Some(404));
    }
}
