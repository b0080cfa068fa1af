//! Media Provider Abstraction
//!
//! Unified capability interface over external image and video generation
//! services. Providers either answer synchronously with the asset, or hand back
//! an [`OperationHandle`] that the poller drives to a terminal state. Every
//! provider-specific response shape is normalized here, at the boundary.

use crate::cache::CacheKey;
use crate::error::PipelineError;
use crate::job::{AssetLocator, GenerationJob};
use crate::types::{Category, JobId, MediaKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod clients;
pub mod profile;

pub use clients::{PredictionClient, SyncImageClient};
pub use profile::{ProviderConfig, ProviderFactory, ProviderType};

/// What a provider can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    #[serde(default = "default_true")]
    pub supports_image: bool,
    #[serde(default)]
    pub supports_video: bool,
    #[serde(default)]
    pub supports_image_to_video: bool,
    /// Longest clip the provider will produce, in seconds. Sent as the
    /// requested duration on video submissions; requests carry no duration of
    /// their own, so it never excludes a provider.
    #[serde(default)]
    pub max_duration_secs: Option<u32>,
    /// Results arrive through polling rather than in the submit response.
    #[serde(default)]
    pub is_async: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_image: true,
            supports_video: false,
            supports_image_to_video: false,
            max_duration_secs: None,
            is_async: false,
        }
    }
}

/// Static description of a provider. Not mutated at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub model: String,
    pub capabilities: ProviderCapabilities,
    pub submit_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_endpoint: Option<String>,
}

impl ProviderDescriptor {
    /// Reason this provider cannot serve `request`, if any. Checks media kind
    /// and image-to-video support.
    pub fn unsupported_reason(&self, request: &GenerationRequest) -> Option<String> {
        let caps = &self.capabilities;
        match request.media {
            MediaKind::Image if !caps.supports_image => {
                return Some(format!("{} does not generate images", self.name));
            }
            MediaKind::Video if !caps.supports_video => {
                return Some(format!("{} does not generate video", self.name));
            }
            _ => {}
        }
        if request.source_asset.is_some() && !caps.supports_image_to_video {
            return Some(format!("{} does not support image-to-video", self.name));
        }
        None
    }
}

/// Provider-agnostic request for one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub job_id: JobId,
    pub category: Category,
    pub media: MediaKind,
    pub subject_id: String,
    pub prompt: String,
    pub source_asset: Option<String>,
    pub fingerprint: CacheKey,
}

impl GenerationRequest {
    pub fn from_job(job: &GenerationJob) -> Self {
        Self {
            job_id: job.id,
            category: job.category,
            media: job.category.media_kind(),
            subject_id: job.subject_id.clone(),
            prompt: job.payload.prompt.clone(),
            source_asset: job.payload.source_asset.clone(),
            fingerprint: CacheKey::for_job(job),
        }
    }
}

/// Generated media, before it has been persisted locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAsset {
    /// Provider-hosted, usually time-limited.
    Url(String),
    /// Inline payload (for example base64 image data).
    Bytes { data: Vec<u8>, extension: String },
    /// Already written to durable storage by the provider itself.
    Stored(PathBuf),
}

impl RemoteAsset {
    pub fn remote_url(&self) -> Option<&str> {
        match self {
            RemoteAsset::Url(url) => Some(url),
            _ => None,
        }
    }

    /// Whether the payload carries anything usable. URLs must be absolute http(s).
    pub fn is_usable(&self) -> bool {
        match self {
            RemoteAsset::Url(url) => is_http_url(url),
            RemoteAsset::Bytes { data, .. } => !data.is_empty(),
            RemoteAsset::Stored(path) => !path.as_os_str().is_empty(),
        }
    }
}

/// Absolute `http://` or `https://` URL with a host.
pub fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or("");
            !host.is_empty() && !value.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// Token for an in-flight asynchronous generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationHandle {
    pub provider: String,
    /// Opaque external reference (prediction ID, operation name, ...).
    pub reference: String,
    pub submitted_at: DateTime<Utc>,
}

impl OperationHandle {
    pub fn new(provider: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reference: reference.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Result of a submit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Ready(RemoteAsset),
    Pending(OperationHandle),
}

/// Remote state reported by one poll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    InProgress,
    Completed(RemoteAsset),
    Failed(String),
}

/// Normalized per-provider outcome. Nothing provider-specific escapes past this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderResult {
    pub success: bool,
    pub locator: Option<AssetLocator>,
    pub provider_name: String,
    pub error: Option<String>,
    /// Locator is an expiring remote URL because persisting failed.
    pub degraded: bool,
}

impl ProviderResult {
    pub fn success(provider_name: impl Into<String>, locator: AssetLocator) -> Self {
        Self {
            success: true,
            locator: Some(locator),
            provider_name: provider_name.into(),
            error: None,
            degraded: false,
        }
    }

    pub fn degraded(provider_name: impl Into<String>, remote_url: String, error: String) -> Self {
        Self {
            success: true,
            locator: Some(AssetLocator::Remote(remote_url)),
            provider_name: provider_name.into(),
            error: Some(error),
            degraded: true,
        }
    }

    pub fn failure(provider_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            locator: None,
            provider_name: provider_name.into(),
            error: Some(error.into()),
            degraded: false,
        }
    }
}

/// Media provider client trait
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Static description and capability flags
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Submit a generation request
    async fn submit(&self, request: &GenerationRequest) -> Result<Submission, PipelineError>;

    /// Query the remote state of an asynchronous operation
    async fn poll(&self, handle: &OperationHandle) -> Result<PollStatus, PipelineError> {
        Err(PipelineError::ProviderError(format!(
            "{} cannot poll operation {}",
            self.name(),
            handle.reference
        )))
    }

    fn name(&self) -> &str {
        &self.descriptor().name
    }
}

/// Named providers plus the per-category fallback order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn MediaProvider>>,
    routes: HashMap<Category, Vec<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn MediaProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Set the fallback order for a category, replacing any previous route.
    pub fn set_route(&mut self, category: Category, names: Vec<String>) {
        self.routes.insert(category, names);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MediaProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn route_names(&self, category: Category) -> &[String] {
        self.routes.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Providers for a category in fallback order. Unknown names are skipped.
    pub fn route(&self, category: Category) -> Vec<Arc<dyn MediaProvider>> {
        self.route_names(category)
            .iter()
            .filter_map(|name| self.providers.get(name).cloned())
            .collect()
    }
}

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn build_provider_http_client(request_timeout: Duration) -> Result<Client, PipelineError> {
    Client::builder()
        .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
        .timeout(request_timeout)
        .build()
        .map_err(|e| PipelineError::ProviderError(format!("Failed to create HTTP client: {}", e)))
}

/// Map a non-2xx provider response onto the pipeline taxonomy.
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> PipelineError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    match status.as_u16() {
        401 | 403 => PipelineError::ProviderUnavailable(format!(
            "{} rejected credentials ({}): {}",
            provider, status, body
        )),
        _ => PipelineError::ProviderError(format!(
            "{} request failed with status {}: {}",
            provider, status, body
        )),
    }
}
