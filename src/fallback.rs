//! Provider Fallback Adapter
//!
//! Tries an ordered list of providers for one job. Every per-provider failure
//! (network error, non-2xx, empty payload, poll timeout) is absorbed here and
//! the cascade moves on; only exhaustion of the whole list fails the job.

use crate::error::PipelineError;
use crate::events::{EventBus, PipelineEvent};
use crate::job::AssetLocator;
use crate::poller::OperationPoller;
use crate::provider::{
    is_http_url, GenerationRequest, MediaProvider, ProviderResult, RemoteAsset, Submission,
};
use crate::storage::{AssetStore, AssetTarget};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Fires once when a job's work has been handed off to a background poll,
/// so the executor can start the next job.
pub struct DispatchSignal {
    tx: Mutex<Option<oneshot::Sender<()>>>,
    handed_off: AtomicBool,
}

impl DispatchSignal {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
                handed_off: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// A signal nobody listens to.
    pub fn detached() -> Self {
        Self {
            tx: Mutex::new(None),
            handed_off: AtomicBool::new(false),
        }
    }

    pub fn fire(&self) {
        self.handed_off.store(true, Ordering::SeqCst);
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Whether the executor has already moved on to other jobs.
    pub fn handed_off(&self) -> bool {
        self.handed_off.load(Ordering::SeqCst)
    }
}

/// Where a cascade stopped when an attempt failed after hand-off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeProgress {
    /// Index of the next provider in the route
    pub next: usize,
    pub attempted: Vec<String>,
    pub failures: Vec<String>,
}

/// Result of a full cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackOutcome {
    pub result: ProviderResult,
    /// Providers tried, in order.
    pub attempted: Vec<String>,
    /// Set when a provider failed after the job was handed off and others
    /// remain. The executor starts the rest under its own schedule.
    pub resume: Option<CascadeProgress>,
}

pub struct ProviderFallbackAdapter {
    poller: OperationPoller,
    store: Arc<AssetStore>,
    degrade_on_download_failure: bool,
    events: EventBus,
}

impl ProviderFallbackAdapter {
    pub fn new(
        poller: OperationPoller,
        store: Arc<AssetStore>,
        degrade_on_download_failure: bool,
        events: EventBus,
    ) -> Self {
        Self {
            poller,
            store,
            degrade_on_download_failure,
            events,
        }
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    /// Run the cascade for one request.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        providers: &[Arc<dyn MediaProvider>],
        dispatched: &DispatchSignal,
    ) -> FallbackOutcome {
        self.run_from(request, providers, CascadeProgress::default(), dispatched)
            .await
    }

    /// Continue a cascade at `progress.next`.
    ///
    /// Once `dispatched` has fired, a failed attempt does not submit to the
    /// next provider inline: it returns `resume` so the executor can start the
    /// remaining providers one at a time, behind its rate limit.
    pub async fn run_from(
        &self,
        request: &GenerationRequest,
        providers: &[Arc<dyn MediaProvider>],
        progress: CascadeProgress,
        dispatched: &DispatchSignal,
    ) -> FallbackOutcome {
        let CascadeProgress {
            next,
            mut attempted,
            mut failures,
        } = progress;

        if providers.is_empty() {
            return FallbackOutcome {
                result: ProviderResult::failure(
                    "",
                    format!("no providers configured for {}", request.category),
                ),
                attempted,
                resume: None,
            };
        }

        for (index, provider) in providers.iter().enumerate().skip(next) {
            let name = provider.name().to_string();
            attempted.push(name.clone());
            let start = Instant::now();

            match self.attempt(request, provider, dispatched).await {
                Ok(result) => {
                    info!(
                        job_id = %request.job_id,
                        provider = %name,
                        attempt = attempted.len(),
                        duration_ms = start.elapsed().as_millis(),
                        degraded = result.degraded,
                        "Provider produced asset"
                    );
                    return FallbackOutcome {
                        result,
                        attempted,
                        resume: None,
                    };
                }
                Err(err) => {
                    warn!(
                        job_id = %request.job_id,
                        provider = %name,
                        attempt = attempted.len(),
                        error_kind = err.kind(),
                        error = %err,
                        "Provider attempt failed"
                    );
                    self.events.emit(PipelineEvent::ProviderFailed {
                        job_id: request.job_id,
                        provider: name.clone(),
                        error_kind: err.kind().to_string(),
                        error: err.to_string(),
                    });
                    let cascadable = err.is_cascadable();
                    failures.push(format!("{}: {}", name, err));
                    if !cascadable {
                        break;
                    }
                    if dispatched.handed_off() && index + 1 < providers.len() {
                        debug!(
                            job_id = %request.job_id,
                            provider = %name,
                            next_provider = %providers[index + 1].name(),
                            "Handing remaining fallback back to the executor"
                        );
                        return FallbackOutcome {
                            result: ProviderResult::failure(name, err.to_string()),
                            attempted: attempted.clone(),
                            resume: Some(CascadeProgress {
                                next: index + 1,
                                attempted,
                                failures,
                            }),
                        };
                    }
                }
            }
        }

        let last = attempted.last().cloned().unwrap_or_default();
        let error = format!(
            "all {} providers failed: {}",
            attempted.len(),
            failures.join("; ")
        );
        FallbackOutcome {
            result: ProviderResult::failure(last, error),
            attempted,
            resume: None,
        }
    }

    async fn attempt(
        &self,
        request: &GenerationRequest,
        provider: &Arc<dyn MediaProvider>,
        dispatched: &DispatchSignal,
    ) -> Result<ProviderResult, PipelineError> {
        if let Some(reason) = provider.descriptor().unsupported_reason(request) {
            return Err(PipelineError::ProviderUnavailable(reason));
        }

        self.events.emit(PipelineEvent::ProviderAttempt {
            job_id: request.job_id,
            provider: provider.name().to_string(),
        });
        debug!(
            job_id = %request.job_id,
            provider = %provider.name(),
            category = %request.category,
            "Submitting to provider"
        );

        let asset = match provider.submit(request).await? {
            Submission::Ready(asset) => asset,
            Submission::Pending(handle) => {
                self.events.emit(PipelineEvent::PollingStarted {
                    job_id: request.job_id,
                    provider: provider.name().to_string(),
                    reference: handle.reference.clone(),
                });
                dispatched.fire();
                let task = self
                    .poller
                    .spawn(Arc::clone(provider), handle, request.media);
                task.outcome().await.into_result(provider.name())?
            }
        };

        if !asset.is_usable() {
            return Err(PipelineError::EmptyResult(match asset.remote_url() {
                Some(url) => format!("{} returned an invalid asset URL '{}'", provider.name(), url),
                None => format!("{} returned an empty payload", provider.name()),
            }));
        }

        self.persist(request, provider.name(), asset).await
    }

    async fn persist(
        &self,
        request: &GenerationRequest,
        provider_name: &str,
        asset: RemoteAsset,
    ) -> Result<ProviderResult, PipelineError> {
        let target = AssetTarget {
            category: request.category,
            subject_id: request.subject_id.clone(),
            fingerprint: request.fingerprint.clone(),
        };

        match self.store.persist(&asset, &target).await {
            Ok(path) => Ok(ProviderResult::success(
                provider_name,
                AssetLocator::Local(path),
            )),
            Err(err) => match asset.remote_url() {
                Some(url) if self.degrade_on_download_failure && is_http_url(url) => {
                    warn!(
                        category = "degraded_locator",
                        job_id = %request.job_id,
                        provider = %provider_name,
                        remote_url = %url,
                        error = %err,
                        "Persisting generated asset failed; keeping expiring remote URL"
                    );
                    self.events.emit(PipelineEvent::LocatorDegraded {
                        job_id: request.job_id,
                        provider: provider_name.to_string(),
                        remote_url: url.to_string(),
                        error: err.to_string(),
                    });
                    Ok(ProviderResult::degraded(
                        provider_name,
                        url.to_string(),
                        err.to_string(),
                    ))
                }
                _ => Err(match err {
                    PipelineError::DownloadFailure(_) => err,
                    other => PipelineError::DownloadFailure(other.to_string()),
                }),
            },
        }
    }
}
