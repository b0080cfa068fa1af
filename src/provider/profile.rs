//! Provider profiles: serialized configuration and client construction.

use super::{
    MediaProvider, PredictionClient, ProviderCapabilities, ProviderDescriptor, SyncImageClient,
};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// OpenAI-compatible synchronous image endpoint.
    OpenaiImages,
    /// Submit-then-poll prediction API (video and slow image models).
    Prediction,
}

pub fn provider_type_slug(provider_type: ProviderType) -> &'static str {
    match provider_type {
        ProviderType::OpenaiImages => "openai_images",
        ProviderType::Prediction => "prediction",
    }
}

/// Provider configuration entry (`[providers.<name>]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub model: String,
    /// Base URL (images) or submit URL (predictions).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Poll base URL; the operation reference is appended.
    #[serde(default)]
    pub poll_endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub capabilities: Option<ProviderCapabilities>,
    /// Image size hint, e.g. "1024x1024".
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    120
}

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }
        for url in [self.endpoint.as_deref(), self.poll_endpoint.as_deref()]
            .into_iter()
            .flatten()
        {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("Invalid endpoint URL: {}", url));
            }
        }
        if self.provider_type == ProviderType::Prediction && self.endpoint.is_none() {
            return Err("Prediction providers require an endpoint".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than zero".to_string());
        }
        let caps = self.resolved_capabilities();
        if caps.is_async && self.provider_type == ProviderType::OpenaiImages {
            return Err("openai_images providers are synchronous".to_string());
        }
        Ok(())
    }

    /// Whether the profile names any credential source.
    pub fn declares_credentials(&self) -> bool {
        self.api_key.is_some() || self.api_key_env.is_some()
    }

    /// Inline key first, then the named environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                self.api_key_env
                    .as_ref()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|k| !k.trim().is_empty())
            })
    }

    pub fn resolved_capabilities(&self) -> ProviderCapabilities {
        if let Some(caps) = &self.capabilities {
            return caps.clone();
        }
        match self.provider_type {
            ProviderType::OpenaiImages => ProviderCapabilities::default(),
            ProviderType::Prediction => ProviderCapabilities {
                supports_image: false,
                supports_video: true,
                supports_image_to_video: true,
                max_duration_secs: Some(10),
                is_async: true,
            },
        }
    }

    pub fn descriptor(&self, name: &str) -> ProviderDescriptor {
        let submit_endpoint = match self.provider_type {
            ProviderType::OpenaiImages => format!(
                "{}/images/generations",
                self.endpoint
                    .as_deref()
                    .unwrap_or(DEFAULT_OPENAI_BASE_URL)
                    .trim_end_matches('/')
            ),
            ProviderType::Prediction => self
                .endpoint
                .clone()
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
        };
        let poll_endpoint = match self.provider_type {
            ProviderType::OpenaiImages => None,
            ProviderType::Prediction => Some(
                self.poll_endpoint
                    .clone()
                    .unwrap_or_else(|| submit_endpoint.clone())
                    .trim_end_matches('/')
                    .to_string(),
            ),
        };
        ProviderDescriptor {
            name: name.to_string(),
            model: self.model.clone(),
            capabilities: self.resolved_capabilities(),
            submit_endpoint,
            poll_endpoint,
        }
    }
}

/// Factory for creating provider clients from configuration
pub struct ProviderFactory;

impl ProviderFactory {
    /// Build a client. A missing API key does not fail here: the client reports
    /// `ProviderUnavailable` when it is asked to submit. Prediction profiles
    /// without any credential source talk to the endpoint unauthenticated.
    pub fn create_client(
        name: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn MediaProvider>, PipelineError> {
        config
            .validate()
            .map_err(|e| PipelineError::Config(format!("Provider '{}': {}", name, e)))?;
        let descriptor = config.descriptor(name);
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let api_key = config.resolve_api_key();
        let client: Arc<dyn MediaProvider> = match config.provider_type {
            ProviderType::OpenaiImages => Arc::new(SyncImageClient::new(
                descriptor,
                api_key,
                config.size.clone(),
                timeout,
            )?),
            ProviderType::Prediction => Arc::new(
                PredictionClient::new(descriptor, api_key, timeout)?
                    .with_required_key(config.declares_credentials()),
            ),
        };
        Ok(client)
    }
}
