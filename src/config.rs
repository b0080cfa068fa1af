//! Configuration System
//!
//! Layered configuration: built-in defaults, the user's global file, workspace
//! files and finally `ATELIER__SECTION__KEY` environment variables. Validation
//! collects every problem instead of stopping at the first.

use crate::cache::CacheConfig;
use crate::executor::ExecutorConfig;
use crate::logging::LoggingConfig;
use crate::poller::PollerConfig;
use crate::storage::StorageConfig;
use crate::trigger::{TriggerConfig, MAX_SCORE};
use crate::types::Category;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use crate::provider::{ProviderConfig, ProviderType};

mod facade;
pub mod merge;
pub mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtelierConfig {
    /// Named provider profiles
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Per-category fallback order
    #[serde(default)]
    pub routes: RouteConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub trigger: TriggerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ordered provider names per category. The first entry is tried first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub portrait: Vec<String>,
    pub scene: Vec<String>,
    pub evidence_image: Vec<String>,
    pub ui_image: Vec<String>,
    pub video: Vec<String>,
}

impl RouteConfig {
    pub fn get(&self, category: Category) -> &[String] {
        match category {
            Category::Portrait => &self.portrait,
            Category::Scene => &self.scene,
            Category::EvidenceImage => &self.evidence_image,
            Category::UiImage => &self.ui_image,
            Category::Video => &self.video,
        }
    }

    pub fn set(&mut self, category: Category, names: Vec<String>) {
        let slot = match category {
            Category::Portrait => &mut self.portrait,
            Category::Scene => &mut self.scene,
            Category::EvidenceImage => &mut self.evidence_image,
            Category::UiImage => &mut self.ui_image,
            Category::Video => &mut self.video,
        };
        *slot = names;
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Provider(String, String),
    Route(Category, String),
    Section(&'static str, String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Provider(name, msg) => write!(f, "Provider '{}': {}", name, msg),
            ValidationError::Route(category, msg) => write!(f, "Route '{}': {}", category, msg),
            ValidationError::Section(section, msg) => write!(f, "[{}]: {}", section, msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl AtelierConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for (name, provider) in &self.providers {
            if let Err(e) = provider.validate() {
                errors.push(ValidationError::Provider(name.clone(), e));
            }
            let caps = provider.resolved_capabilities();
            if caps.is_async
                && provider.poll_endpoint.is_none()
                && provider.endpoint.is_none()
            {
                errors.push(ValidationError::Provider(
                    name.clone(),
                    "asynchronous providers need a poll endpoint".to_string(),
                ));
            }
        }

        for category in Category::ALL {
            for name in self.routes.get(category) {
                if !self.providers.contains_key(name) {
                    errors.push(ValidationError::Route(
                        category,
                        format!("unknown provider '{}'", name),
                    ));
                }
            }
        }

        if self.poller.interval_ms == 0 {
            errors.push(ValidationError::Section(
                "poller",
                "interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.poller.image_max_wait_secs == 0 || self.poller.video_max_wait_secs == 0 {
            errors.push(ValidationError::Section(
                "poller",
                "max wait budgets must be greater than zero".to_string(),
            ));
        }
        if self.executor.max_queue_size == 0 {
            errors.push(ValidationError::Section(
                "executor",
                "max_queue_size must be greater than zero".to_string(),
            ));
        }
        if self.trigger.threshold > MAX_SCORE {
            errors.push(ValidationError::Section(
                "trigger",
                format!(
                    "threshold {} can never be reached (max score {})",
                    self.trigger.threshold, MAX_SCORE
                ),
            ));
        }
        if self.storage.root.as_os_str().is_empty() {
            errors.push(ValidationError::Section(
                "storage",
                "root cannot be empty".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
