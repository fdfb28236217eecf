//! Pipeline and telemetry configuration.
//!
//! Telemetry settings come from the environment:
//!
//! | variable                        | field            | default             |
//! |---------------------------------|------------------|---------------------|
//! | `REFINERY_API_KEY`              | `api_key`        | none (disabled)     |
//! | `REFINERY_PROJECT`              | `project`        | `artifact-refinery` |
//! | `REFINERY_ENDPOINT`             | `endpoint`       | `http://127.0.0.1:8088` |
//! | `REFINERY_REMOTE_TIMEOUT_SECS`  | `remote_timeout` | 30                  |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::uploader::UploadMode;

/// Default improvement bound for a run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;
/// Default mean score an assessment needs to pass.
pub const DEFAULT_PASS_THRESHOLD: f64 = 0.6;

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum overall score for an assessment to pass.
    pub pass_threshold: f64,
    /// Deadline for a single stage invocation.
    pub stage_timeout: Duration,
    /// Return node failures as errors instead of a `PIPELINE_ERROR` state.
    pub raise_on_error: bool,
    /// When replayed workflows are uploaded.
    pub upload: UploadMode,
    /// Name given to every replayed workflow.
    pub workflow_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            stage_timeout: Duration::from_secs(300),
            raise_on_error: true,
            upload: UploadMode::PerRun,
            workflow_name: "artifact-refinement-pipeline".to_string(),
        }
    }
}

/// Remote telemetry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Backend API key; telemetry is disabled without one.
    pub api_key: Option<String>,
    /// Project the workflows are filed under.
    pub project: String,
    /// Base URL of the backend.
    pub endpoint: String,
    /// Deadline for each remote call.
    pub remote_timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            project: "artifact-refinery".to_string(),
            endpoint: "http://127.0.0.1:8088".to_string(),
            remote_timeout: Duration::from_secs(30),
        }
    }
}

impl TelemetryConfig {
    /// Read settings from `REFINERY_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let remote_timeout = match non_empty("REFINERY_REMOTE_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring invalid REFINERY_REMOTE_TIMEOUT_SECS");
                    defaults.remote_timeout
                }
            },
            None => defaults.remote_timeout,
        };

        Self {
            api_key: non_empty("REFINERY_API_KEY"),
            project: non_empty("REFINERY_PROJECT").unwrap_or(defaults.project),
            endpoint: non_empty("REFINERY_ENDPOINT").unwrap_or(defaults.endpoint),
            remote_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_lookup_overrides_defaults() {
        let vars = HashMap::from([
            ("REFINERY_API_KEY", "secret"),
            ("REFINERY_PROJECT", "bench"),
            ("REFINERY_REMOTE_TIMEOUT_SECS", "5"),
        ]);
        let cfg = TelemetryConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.project, "bench");
        assert_eq!(cfg.endpoint, TelemetryConfig::default().endpoint);
        assert_eq!(cfg.remote_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_blank_key_and_bad_timeout_fall_back() {
        let vars = HashMap::from([
            ("REFINERY_API_KEY", "  "),
            ("REFINERY_REMOTE_TIMEOUT_SECS", "soon"),
        ]);
        let cfg = TelemetryConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.remote_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_pipeline_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.pass_threshold, 0.6);
        assert!(cfg.raise_on_error);
        assert_eq!(cfg.upload, UploadMode::PerRun);
    }
}
