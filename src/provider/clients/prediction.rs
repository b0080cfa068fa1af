//! Asynchronous submit-then-poll prediction client.
//!
//! `POST {submit}` returns `{id, status, output?}`; `GET {poll}/{id}` reports
//! progress until the prediction succeeds or fails.

use super::extract_output_url;
use crate::error::{map_http_error, PipelineError};
use crate::provider::{
    build_provider_http_client, error_from_response, GenerationRequest, MediaProvider,
    OperationHandle, PollStatus, ProviderDescriptor, RemoteAsset, Submission,
};
use crate::types::MediaKind;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Value,
}

enum RemoteState {
    Running,
    Succeeded,
    Failed,
}

fn classify_status(status: &str) -> RemoteState {
    match status.to_ascii_lowercase().as_str() {
        "succeeded" | "completed" | "complete" | "success" | "done" => RemoteState::Succeeded,
        "failed" | "error" | "canceled" | "cancelled" | "expired" => RemoteState::Failed,
        _ => RemoteState::Running,
    }
}

fn error_text(value: &Value) -> String {
    match value {
        Value::Null => "no error detail".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct PredictionClient {
    client: Client,
    descriptor: ProviderDescriptor,
    api_key: Option<String>,
    /// Credentials were configured, so an unresolved key means unavailable
    /// rather than an open endpoint.
    requires_key: bool,
}

impl PredictionClient {
    pub fn new(
        descriptor: ProviderDescriptor,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_provider_http_client(request_timeout)?,
            descriptor,
            api_key,
            requires_key: false,
        })
    }

    pub fn with_required_key(mut self, required: bool) -> Self {
        self.requires_key = required;
        self
    }

    fn ensure_credentials(&self) -> Result<(), PipelineError> {
        if self.requires_key && self.api_key.is_none() {
            return Err(PipelineError::ProviderUnavailable(format!(
                "{} has no API key configured",
                self.name()
            )));
        }
        Ok(())
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// URLs pass through; local files are inlined as data URIs.
    async fn source_reference(&self, source: &str) -> Result<String, PipelineError> {
        if source.starts_with("http://") || source.starts_with("https://") || source.starts_with("data:") {
            return Ok(source.to_string());
        }
        let bytes = tokio::fs::read(source).await.map_err(|e| {
            PipelineError::ProviderError(format!("cannot read source asset {}: {}", source, e))
        })?;
        let mime = match Path::new(source).extension().and_then(|e| e.to_str()) {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("webp") => "image/webp",
            _ => "image/png",
        };
        Ok(format!("data:{};base64,{}", mime, BASE64.encode(bytes)))
    }

    fn poll_url(&self, reference: &str) -> String {
        let base = self
            .descriptor
            .poll_endpoint
            .as_deref()
            .unwrap_or(&self.descriptor.submit_endpoint);
        format!("{}/{}", base.trim_end_matches('/'), reference)
    }
}

#[async_trait]
impl MediaProvider for PredictionClient {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<Submission, PipelineError> {
        self.ensure_credentials()?;
        let mut input = json!({ "prompt": request.prompt });
        if let Some(source) = &request.source_asset {
            input["image"] = json!(self.source_reference(source).await?);
        }
        if request.media == MediaKind::Video {
            if let Some(max) = self.descriptor.capabilities.max_duration_secs {
                input["duration"] = json!(max);
            }
        }
        let body = json!({ "model": self.descriptor.model, "input": input });

        debug!(
            provider = %self.name(),
            job_id = %request.job_id,
            "Submitting prediction"
        );
        let response = self
            .authorize(self.client.post(&self.descriptor.submit_endpoint))
            .json(&body)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(self.name(), response).await);
        }

        let parsed: PredictionResponse = response.json().await.map_err(|e| {
            PipelineError::EmptyResult(format!("{}: unparseable response: {}", self.name(), e))
        })?;

        // Some deployments answer synchronously; skip polling entirely.
        if let Some(status) = parsed.status.as_deref() {
            match classify_status(status) {
                RemoteState::Succeeded => {
                    return extract_output_url(&parsed.output)
                        .map(|url| Submission::Ready(RemoteAsset::Url(url)))
                        .ok_or_else(|| {
                            PipelineError::EmptyResult(format!(
                                "{} reported success without output",
                                self.name()
                            ))
                        });
                }
                RemoteState::Failed => {
                    return Err(PipelineError::ProviderError(format!(
                        "{} rejected prediction: {}",
                        self.name(),
                        error_text(&parsed.error)
                    )));
                }
                RemoteState::Running => {}
            }
        }

        match parsed.id.filter(|id| !id.trim().is_empty()) {
            Some(id) => Ok(Submission::Pending(OperationHandle::new(self.name(), id))),
            None => Err(PipelineError::EmptyResult(format!(
                "{} returned no prediction id",
                self.name()
            ))),
        }
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<PollStatus, PipelineError> {
        self.ensure_credentials()?;
        let response = self
            .authorize(self.client.get(self.poll_url(&handle.reference)))
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(self.name(), response).await);
        }

        let parsed: PredictionResponse = response.json().await.map_err(|e| {
            PipelineError::ProviderError(format!("{}: unparseable poll response: {}", self.name(), e))
        })?;

        let status = parsed.status.as_deref().unwrap_or("processing");
        Ok(match classify_status(status) {
            RemoteState::Running => PollStatus::InProgress,
            RemoteState::Failed => PollStatus::Failed(error_text(&parsed.error)),
            RemoteState::Succeeded => match extract_output_url(&parsed.output) {
                Some(url) => PollStatus::Completed(RemoteAsset::Url(url)),
                None => PollStatus::Failed(format!(
                    "{} completed without output",
                    self.name()
                )),
            },
        })
    }
}
