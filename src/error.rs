//! Error types for pipeline execution and telemetry.

use std::time::Duration;

use thiserror::Error;

/// The main error type for pipeline operations.
///
/// Node failures, timeouts and malformed artifacts halt a run. Telemetry and
/// configuration errors are produced by the telemetry layer, which logs them
/// and never lets them reach a caller's pipeline result.
#[derive(Error, Debug)]
pub enum Error {
    /// A stage's business logic failed.
    #[error("stage '{stage}' failed: {message}")]
    Node {
        /// The stage that failed.
        stage: String,
        /// What went wrong.
        message: String,
    },

    /// A stage or remote call exceeded its deadline.
    #[error("'{stage}' timed out after {after:?}")]
    Timeout {
        /// The stage or remote operation that timed out.
        stage: String,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// The artifact could not be read or decoded.
    #[error("malformed artifact: {0}")]
    Artifact(String),

    /// A remote telemetry call failed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Telemetry credentials were missing or rejected.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A generic error with a message.
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Short name of the error variant, used in `ERROR: <kind>: <message>` snapshots.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Node { .. } => "NodeFailure",
            Error::Timeout { .. } => "Timeout",
            Error::Artifact(_) => "ArtifactError",
            Error::Telemetry(_) => "TelemetryFailure",
            Error::Configuration(_) => "ConfigurationFailure",
            Error::Validation(_) => "ValidationError",
            Error::Io(_) => "IoError",
            Error::Json(_) => "JsonError",
            Error::Message(_) => "Error",
        }
    }

    /// Convenience constructor for node failures.
    pub fn node(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Node {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Message(msg.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Telemetry(err.to_string())
    }
}

/// A specialized `Result` type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(Error::node("assess", "boom").kind(), "NodeFailure");
        assert_eq!(Error::Artifact("bad header".into()).kind(), "ArtifactError");
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.kind(), "IoError");
    }

    #[test]
    fn test_display_includes_stage() {
        let err = Error::Timeout {
            stage: "finalize".into(),
            after: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "'finalize' timed out after 2s");
    }
}
