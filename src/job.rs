//! Generation jobs
//!
//! A job is one unit of work producing a single media asset. Jobs are created
//! from [`JobDescriptor`]s supplied by the content layer or the trigger
//! classifier, and are owned by the executor once enqueued.

use crate::error::PipelineError;
use crate::types::{Category, JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

const MAX_PROMPT_CHARS: usize = 8000;

/// External request for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub subject_id: String,
    pub category: Category,
    pub prompt: String,
    #[serde(default)]
    pub priority: i32,
    /// Source asset for image-to-video generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_asset: Option<String>,
}

impl JobDescriptor {
    pub fn new(
        subject_id: impl Into<String>,
        category: Category,
        prompt: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            category,
            prompt: prompt.into(),
            priority,
            source_asset: None,
        }
    }

    pub fn with_source_asset(mut self, source: impl Into<String>) -> Self {
        self.source_asset = Some(source.into());
        self
    }

    /// Reject malformed descriptors before they reach the queue.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.subject_id.trim().is_empty() {
            return Err(PipelineError::Validation("subject_id cannot be empty".into()));
        }
        if self
            .subject_id
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0')
            || self.subject_id.contains("..")
        {
            return Err(PipelineError::Validation(format!(
                "subject_id '{}' contains path characters",
                self.subject_id
            )));
        }
        if self.prompt.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "empty prompt for {} '{}'",
                self.category, self.subject_id
            )));
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(PipelineError::Validation(format!(
                "prompt for '{}' exceeds {} characters",
                self.subject_id, MAX_PROMPT_CHARS
            )));
        }
        if let Some(source) = &self.source_asset {
            if source.trim().is_empty() {
                return Err(PipelineError::Validation(
                    "source_asset is present but empty".into(),
                ));
            }
            if self.category != Category::Video {
                return Err(PipelineError::Validation(format!(
                    "source_asset is only valid for video jobs, got {}",
                    self.category
                )));
            }
        }
        Ok(())
    }
}

/// What gets sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_asset: Option<String>,
}

/// Where a finished asset lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum AssetLocator {
    /// Durable local file.
    Local(PathBuf),
    /// Provider-hosted URL. Time-limited; only used when persisting failed.
    Remote(String),
}

impl AssetLocator {
    pub fn is_local(&self) -> bool {
        matches!(self, AssetLocator::Local(_))
    }
}

impl fmt::Display for AssetLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetLocator::Local(path) => write!(f, "{}", path.display()),
            AssetLocator::Remote(url) => f.write_str(url),
        }
    }
}

/// A single media generation job.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub category: Category,
    pub subject_id: String,
    /// Lower is served first.
    pub priority: i32,
    pub payload: JobPayload,
    pub status: JobStatus,
    /// Set if and only if `status == Complete`.
    pub locator: Option<AssetLocator>,
    pub attempted_providers: Vec<String>,
    pub last_error: Option<String>,
    /// Every status the job has held, starting with `Pending`.
    pub history: Vec<JobStatus>,
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl GenerationJob {
    pub(crate) fn from_descriptor(descriptor: JobDescriptor, seq: u64) -> Self {
        Self {
            id: JobId::next(),
            category: descriptor.category,
            subject_id: descriptor.subject_id,
            priority: descriptor.priority,
            payload: JobPayload {
                prompt: descriptor.prompt,
                source_asset: descriptor.source_asset,
            },
            status: JobStatus::Pending,
            locator: None,
            attempted_providers: Vec::new(),
            last_error: None,
            history: vec![JobStatus::Pending],
            seq,
        }
    }

    /// Insertion sequence number, used to break priority ties.
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::Validation(format!(
                "illegal transition {} -> {} for {}",
                self.status, next, self.id
            )));
        }
        self.status = next;
        self.history.push(next);
        Ok(())
    }

    pub(crate) fn mark_generating(&mut self) -> Result<(), PipelineError> {
        self.transition(JobStatus::Generating)
    }

    pub(crate) fn mark_complete(&mut self, locator: AssetLocator) -> Result<(), PipelineError> {
        self.transition(JobStatus::Complete)?;
        self.locator = Some(locator);
        Ok(())
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), PipelineError> {
        self.transition(JobStatus::Failed)?;
        self.locator = None;
        self.last_error = Some(error.into());
        Ok(())
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            category: self.category,
            subject_id: self.subject_id.clone(),
            status: self.status,
            locator: self.locator.clone(),
            attempted_providers: self.attempted_providers.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only view of a job handed to subscribers and progress UIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub category: Category,
    pub subject_id: String,
    pub status: JobStatus,
    pub locator: Option<AssetLocator>,
    pub attempted_providers: Vec<String>,
    pub last_error: Option<String>,
}
