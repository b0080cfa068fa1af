//! Pipeline lifecycle events and subscribers.
//!
//! Listeners run synchronously on the emitting task and must not block.

use crate::job::JobSnapshot;
use crate::types::{Category, JobId};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    JobEnqueued {
        job_id: JobId,
        category: Category,
        subject_id: String,
        priority: i32,
    },
    JobStarted {
        job_id: JobId,
    },
    CacheHit {
        job_id: JobId,
        key: String,
    },
    /// Job joined an identical request already in flight.
    JobCoalesced {
        job_id: JobId,
        leader: JobId,
    },
    ProviderAttempt {
        job_id: JobId,
        provider: String,
    },
    ProviderFailed {
        job_id: JobId,
        provider: String,
        error_kind: String,
        error: String,
    },
    PollingStarted {
        job_id: JobId,
        provider: String,
        reference: String,
    },
    LocatorDegraded {
        job_id: JobId,
        provider: String,
        remote_url: String,
        error: String,
    },
    JobCompleted {
        job_id: JobId,
        locator: String,
        provider: Option<String>,
    },
    JobFailed {
        job_id: JobId,
        error: String,
    },
    TriggerFired {
        subject_id: String,
        turn: u64,
        score: u32,
        job_id: JobId,
    },
}

impl PipelineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::JobEnqueued { .. } => "job_enqueued",
            PipelineEvent::JobStarted { .. } => "job_started",
            PipelineEvent::CacheHit { .. } => "cache_hit",
            PipelineEvent::JobCoalesced { .. } => "job_coalesced",
            PipelineEvent::ProviderAttempt { .. } => "provider_attempt",
            PipelineEvent::ProviderFailed { .. } => "provider_failed",
            PipelineEvent::PollingStarted { .. } => "polling_started",
            PipelineEvent::LocatorDegraded { .. } => "locator_degraded",
            PipelineEvent::JobCompleted { .. } => "job_completed",
            PipelineEvent::JobFailed { .. } => "job_failed",
            PipelineEvent::TriggerFired { .. } => "trigger_fired",
        }
    }
}

pub type EventListener = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;
pub type ReadyListener = Arc<dyn Fn(&JobSnapshot) + Send + Sync>;

/// Fan-out for pipeline events and asset-ready callbacks.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<EventListener>>>,
    ready: Arc<RwLock<Vec<ReadyListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Register a callback fired once per job reaching Complete or Failed.
    pub fn on_asset_ready<F>(&self, listener: F)
    where
        F: Fn(&JobSnapshot) + Send + Sync + 'static,
    {
        self.ready.write().push(Arc::new(listener));
    }

    pub fn emit(&self, event: PipelineEvent) {
        trace!(event_type = event.event_type(), "pipeline event");
        // Snapshot so listeners may subscribe without deadlocking.
        let listeners: Vec<EventListener> = self.listeners.read().clone();
        for listener in listeners {
            listener(&event);
        }
    }

    pub(crate) fn asset_ready(&self, snapshot: &JobSnapshot) {
        let listeners: Vec<ReadyListener> = self.ready.read().clone();
        for listener in listeners {
            listener(snapshot);
        }
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
        self.ready.write().clear();
    }
}
