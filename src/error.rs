//! Error types for the media generation pipeline.

use crate::types::JobId;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid asset path: {0}")]
    InvalidPath(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Pipeline errors.
///
/// Per-provider failures are absorbed by the fallback cascade; only the
/// aggregated last error of an exhausted cascade reaches a job's `last_error`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing configuration or credentials. No request is sent.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Transient network or API failure.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// HTTP success without a usable payload.
    #[error("Provider returned no usable result: {0}")]
    EmptyResult(String),

    /// The poller exceeded its bounded wait.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Remote generation succeeded but the asset could not be persisted.
    #[error("Download failed: {0}")]
    DownloadFailure(String),

    /// Malformed job, rejected before it enters the queue.
    #[error("Invalid job: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether the fallback cascade should move on to the next provider.
    pub fn is_cascadable(&self) -> bool {
        !matches!(self, PipelineError::Validation(_) | PipelineError::Config(_))
    }

    /// Short machine-readable label, used in events and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ProviderUnavailable(_) => "provider_unavailable",
            PipelineError::ProviderError(_) => "provider_error",
            PipelineError::EmptyResult(_) => "empty_result",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::DownloadFailure(_) => "download_failure",
            PipelineError::Validation(_) => "validation",
            PipelineError::JobNotFound(_) => "job_not_found",
            PipelineError::Storage(_) => "storage",
            PipelineError::Config(_) => "config",
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

/// Map a reqwest transport error onto the pipeline taxonomy.
pub(crate) fn map_http_error(error: reqwest::Error) -> PipelineError {
    if let Some(status) = error.status() {
        match status.as_u16() {
            401 | 403 => {
                PipelineError::ProviderUnavailable(format!("Authentication failed: {}", error))
            }
            _ => PipelineError::ProviderError(format!(
                "Request failed with status {}: {}",
                status, error
            )),
        }
    } else if error.is_timeout() {
        PipelineError::ProviderError(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        PipelineError::ProviderError(format!("Connection error: {}", error))
    } else {
        PipelineError::ProviderError(format!("HTTP error: {}", error))
    }
}
