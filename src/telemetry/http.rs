//! HTTP telemetry backend.
//!
//! Workflow records are staged locally and shipped in one POST per
//! [`upload`](TelemetryBackend::upload):
//!
//! ```text
//! POST {endpoint}/projects/{project}/workflows
//! Authorization: Bearer {api_key}
//! {"project": "...", "workflows": [WorkflowRecord, ...]}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::record::{Metadata, StepPayload, WorkflowBuffer, WorkflowRecord};
use super::TelemetryBackend;
use crate::config::TelemetryConfig;
use crate::recorder::StatusCode;
use crate::{Error, Result};

#[derive(Serialize)]
struct UploadBody<'a> {
    project: &'a str,
    workflows: &'a [WorkflowRecord],
}

/// Backend that uploads workflows to an HTTP collector.
#[derive(Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    project: String,
    api_key: String,
    buffer: WorkflowBuffer,
}

impl HttpBackend {
    /// Build a backend from configuration.
    ///
    /// Fails with [`Error::Configuration`] when no API key is set or the
    /// endpoint is not an http(s) URL.
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Configuration("REFINERY_API_KEY is not set".into()))?;

        let endpoint = config.endpoint.trim_end_matches('/');
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(Error::Configuration(format!(
                "telemetry endpoint must be an http(s) URL, got '{endpoint}'"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.remote_timeout)
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{endpoint}/projects/{}/workflows", config.project),
            project: config.project.clone(),
            api_key,
            buffer: WorkflowBuffer::new(),
        })
    }

    /// Concluded workflows not yet uploaded.
    pub fn pending(&self) -> &[WorkflowRecord] {
        self.buffer.pending()
    }
}

#[async_trait]
impl TelemetryBackend for HttpBackend {
    async fn begin_workflow(&mut self, input: &str, name: &str, metadata: Metadata) -> Result<()> {
        self.buffer.begin(input, name, metadata);
        Ok(())
    }

    async fn add_step(&mut self, step: StepPayload) -> Result<()> {
        self.buffer.add_step(step)
    }

    async fn conclude_workflow(
        &mut self,
        output: &str,
        duration: Duration,
        status: StatusCode,
    ) -> Result<()> {
        self.buffer.conclude(output, duration, status)
    }

    async fn upload(&mut self) -> Result<usize> {
        let batch = self.buffer.take_completed();
        if batch.is_empty() {
            return Ok(0);
        }

        debug!(url = %self.url, workflows = batch.len(), "uploading workflows");
        let body = UploadBody {
            project: &self.project,
            workflows: &batch,
        };
        let sent = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match sent {
            Ok(_) => Ok(batch.len()),
            Err(err) => {
                self.buffer.restore(batch);
                Err(err.into())
            }
        }
    }

    async fn abandon_workflow(&mut self) {
        self.buffer.abandon();
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn config(endpoint: &str) -> TelemetryConfig {
        TelemetryConfig {
            api_key: Some("test-key".into()),
            project: "bench".into(),
            endpoint: endpoint.into(),
            remote_timeout: Duration::from_secs(5),
        }
    }

    async fn conclude_one(backend: &mut HttpBackend, input: &str) {
        backend
            .begin_workflow(input, "wf", Metadata::new())
            .await
            .unwrap();
        backend
            .conclude_workflow("out", Duration::from_millis(2), StatusCode::OK)
            .await
            .unwrap();
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let mut cfg = config("http://localhost:1");
        cfg.api_key = None;
        assert!(matches!(HttpBackend::new(&cfg), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        assert!(matches!(
            HttpBackend::new(&config("ftp://collector")),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_posts_concluded_workflows() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/projects/bench/workflows")
                    .header("authorization", "Bearer test-key");
                then.status(200).json_body(json!({"accepted": 2}));
            })
            .await;

        let mut backend = HttpBackend::new(&config(&server.base_url())).unwrap();
        conclude_one(&mut backend, "first").await;
        conclude_one(&mut backend, "second").await;

        assert_eq!(backend.upload().await.unwrap(), 2);
        assert!(backend.pending().is_empty());
        assert_eq!(backend.upload().await.unwrap(), 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_upload_keeps_workflows() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(503);
            })
            .await;

        let mut backend = HttpBackend::new(&config(&server.base_url())).unwrap();
        conclude_one(&mut backend, "only").await;

        assert!(matches!(backend.upload().await, Err(Error::Telemetry(_))));
        assert_eq!(backend.pending().len(), 1);
    }
}
