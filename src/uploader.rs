//! Upload scheduling.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::telemetry::TelemetryClient;

/// When a replayed workflow is uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadMode {
    /// Upload right after each run's replay.
    #[default]
    PerRun,
    /// Leave workflows pending for a later [`BatchUploader::flush`].
    Deferred,
}

/// Uploads every pending workflow in one call.
///
/// Used with [`UploadMode::Deferred`] when many runs execute back-to-back or
/// concurrently and share one client.
#[derive(Debug, Clone)]
pub struct BatchUploader {
    client: TelemetryClient,
}

impl BatchUploader {
    /// Create an uploader for `client`.
    pub fn new(client: TelemetryClient) -> Self {
        Self { client }
    }

    /// Upload all pending workflows. Returns the number uploaded, 0 on failure.
    pub async fn flush(&self) -> usize {
        let started = Instant::now();
        let uploaded = self.client.flush().await;
        info!(
            uploaded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch upload finished"
        );
        uploaded
    }
}
