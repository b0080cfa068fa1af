//! Synchronous OpenAI-compatible image generation client.

use crate::error::{map_http_error, PipelineError};
use crate::provider::{
    build_provider_http_client, error_from_response, is_http_url, GenerationRequest, MediaProvider,
    ProviderDescriptor, RemoteAsset, Submission,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<&'a str>,
}

#[derive(Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

/// `POST {base}/images/generations`, answered in the same response.
pub struct SyncImageClient {
    client: Client,
    descriptor: ProviderDescriptor,
    api_key: Option<String>,
    size: Option<String>,
}

impl SyncImageClient {
    pub fn new(
        descriptor: ProviderDescriptor,
        api_key: Option<String>,
        size: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_provider_http_client(request_timeout)?,
            descriptor,
            api_key,
            size,
        })
    }
}

#[async_trait]
impl MediaProvider for SyncImageClient {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<Submission, PipelineError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            PipelineError::ProviderUnavailable(format!("{} has no API key configured", self.name()))
        })?;

        let body = ImageGenerationRequest {
            model: &self.descriptor.model,
            prompt: &request.prompt,
            n: 1,
            size: self.size.as_deref(),
        };

        debug!(
            provider = %self.name(),
            job_id = %request.job_id,
            "Submitting image generation request"
        );
        let response = self
            .client
            .post(&self.descriptor.submit_endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(self.name(), response).await);
        }

        let parsed: ImageGenerationResponse = response.json().await.map_err(|e| {
            PipelineError::EmptyResult(format!("{}: unparseable response: {}", self.name(), e))
        })?;

        let datum = parsed.data.into_iter().next().ok_or_else(|| {
            PipelineError::EmptyResult(format!("{} returned no images", self.name()))
        })?;

        if let Some(encoded) = datum.b64_json.filter(|s| !s.is_empty()) {
            let data = BASE64.decode(encoded.as_bytes()).map_err(|e| {
                PipelineError::EmptyResult(format!("{}: invalid base64 payload: {}", self.name(), e))
            })?;
            if data.is_empty() {
                return Err(PipelineError::EmptyResult(format!(
                    "{} returned an empty image",
                    self.name()
                )));
            }
            return Ok(Submission::Ready(RemoteAsset::Bytes {
                data,
                extension: "png".to_string(),
            }));
        }

        match datum.url.filter(|u| is_http_url(u)) {
            Some(url) => Ok(Submission::Ready(RemoteAsset::Url(url.trim().to_string()))),
            None => Err(PipelineError::EmptyResult(format!(
                "{} response had neither url nor b64_json",
                self.name()
            ))),
        }
    }
}
