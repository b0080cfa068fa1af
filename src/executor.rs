//! Priority Queue & Sequential Executor
//!
//! Jobs are drained one at a time in ascending priority, FIFO within a
//! priority. A job counts as started once its provider work is either finished
//! or handed off to a background poll, so a slow video never blocks the image
//! jobs behind it. Only the drain loop mutates job status: background tasks
//! report back over a channel and the loop applies their outcomes.

use crate::cache::{CacheKey, ResultCache};
use crate::error::PipelineError;
use crate::events::{EventBus, PipelineEvent};
use crate::fallback::{CascadeProgress, DispatchSignal, FallbackOutcome, ProviderFallbackAdapter};
use crate::job::{AssetLocator, GenerationJob, JobDescriptor, JobSnapshot};
use crate::provider::{GenerationRequest, ProviderRegistry, ProviderResult};
use crate::types::{Category, JobId, JobStatus};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::AbortHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Minimum spacing between consecutive provider-backed job starts (milliseconds)
    #[serde(default = "default_inter_job_delay_ms")]
    pub inter_job_delay_ms: u64,
    /// Maximum number of pending jobs
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

fn default_inter_job_delay_ms() -> u64 {
    1500
}

fn default_max_queue_size() -> usize {
    1000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            inter_job_delay_ms: default_inter_job_delay_ms(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl ExecutorConfig {
    pub fn inter_job_delay(&self) -> Duration {
        Duration::from_millis(self.inter_job_delay_ms)
    }
}

/// One row of [`PipelineStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusEntry {
    pub id: JobId,
    pub category: Category,
    pub subject_id: String,
    pub status: JobStatus,
    pub locator: Option<AssetLocator>,
}

/// Aggregate progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub total: usize,
    pub pending: usize,
    pub generating: usize,
    pub complete: usize,
    pub failed: usize,
    pub currently_generating: Option<JobId>,
    /// Terminal jobs over total, 0..=100. An empty pipeline reports 100.
    pub percent_complete: u8,
    pub jobs: Vec<JobStatusEntry>,
}

/// What one call to [`Executor::run`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Jobs handed to the provider cascade
    pub dispatched: usize,
    pub cache_hits: usize,
    /// Jobs that joined an identical in-flight job
    pub coalesced: usize,
    /// Cascades restarted after a handed-off provider failed
    pub resumed: usize,
}

/// Heap entry. The heap pops the lowest priority value first, then the oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuedJob {
    priority: i32,
    seq: u64,
    id: JobId,
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobId, GenerationJob>,
    /// Insertion order, for reporting.
    order: Vec<JobId>,
    queue: BinaryHeap<QueuedJob>,
    next_seq: u64,
    current: Option<JobId>,
    /// Generating jobs requeued to try their remaining providers.
    resumes: HashMap<JobId, CascadeProgress>,
}

impl JobTable {
    fn insert(&mut self, descriptor: JobDescriptor) -> GenerationJob {
        let job = GenerationJob::from_descriptor(descriptor, self.next_seq);
        self.next_seq += 1;
        self.queue.push(QueuedJob {
            priority: job.priority,
            seq: job.sequence(),
            id: job.id,
        });
        self.order.push(job.id);
        self.jobs.insert(job.id, job.clone());
        job
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }

    fn take_resume(&mut self, id: JobId) -> Option<(GenerationRequest, CascadeProgress)> {
        let progress = self.resumes.remove(&id)?;
        let job = self.jobs.get(&id)?;
        if job.status != JobStatus::Generating {
            return None;
        }
        let request = GenerationRequest::from_job(job);
        self.current = Some(id);
        Some((request, progress))
    }
}

/// Identical jobs waiting on one provider invocation.
struct Inflight {
    leader: JobId,
    followers: Vec<JobId>,
}

/// Reported by a job task when its cascade finishes.
struct JobOutcome {
    job_id: JobId,
    epoch: u64,
    fingerprint: CacheKey,
    outcome: FallbackOutcome,
}

enum StartKind {
    Dispatched,
    CacheHit,
    Coalesced,
    Resumed,
    Skipped,
}

/// Priority queue plus the single drain loop that feeds the fallback adapter.
pub struct Executor {
    config: ExecutorConfig,
    table: RwLock<JobTable>,
    cache: Arc<ResultCache>,
    registry: Arc<ProviderRegistry>,
    adapter: Arc<ProviderFallbackAdapter>,
    events: EventBus,
    inflight: Mutex<HashMap<CacheKey, Inflight>>,
    tasks: Mutex<HashMap<JobId, AbortHandle>>,
    outcome_tx: mpsc::UnboundedSender<JobOutcome>,
    outcome_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobOutcome>>,
    /// Bumped by reset; outcomes from an older epoch are dropped.
    epoch: AtomicU64,
    /// Wakes a drain loop that is parked waiting for in-flight work.
    enqueued: Notify,
    /// Signalled whenever a job reaches a terminal state or the table is reset.
    changed: Notify,
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        cache: Arc<ResultCache>,
        registry: Arc<ProviderRegistry>,
        adapter: Arc<ProviderFallbackAdapter>,
        events: EventBus,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            config,
            table: RwLock::new(JobTable::default()),
            cache,
            registry,
            adapter,
            events,
            inflight: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            outcome_tx,
            outcome_rx: tokio::sync::Mutex::new(outcome_rx),
            epoch: AtomicU64::new(0),
            enqueued: Notify::new(),
            changed: Notify::new(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Validate and queue one job.
    pub fn enqueue(&self, descriptor: JobDescriptor) -> Result<JobId, PipelineError> {
        descriptor.validate()?;
        let job = {
            let mut table = self.table.write();
            if table.pending() >= self.config.max_queue_size {
                warn!(
                    max_queue_size = self.config.max_queue_size,
                    "Generation queue full, rejecting job"
                );
                return Err(PipelineError::Validation(format!(
                    "generation queue is full ({} pending)",
                    self.config.max_queue_size
                )));
            }
            table.insert(descriptor)
        };
        self.announce(&job);
        self.enqueued.notify_one();
        Ok(job.id)
    }

    /// Queue a batch. Every descriptor is validated before any is queued;
    /// a rejected batch leaves the queue untouched.
    pub fn enqueue_batch(
        &self,
        descriptors: Vec<JobDescriptor>,
    ) -> Result<Vec<JobId>, PipelineError> {
        for (index, descriptor) in descriptors.iter().enumerate() {
            descriptor.validate().map_err(|e| {
                PipelineError::Validation(format!("batch item {} rejected: {}", index, e))
            })?;
        }

        let jobs: Vec<GenerationJob> = {
            let mut table = self.table.write();
            if table.pending() + descriptors.len() > self.config.max_queue_size {
                warn!(
                    batch_size = descriptors.len(),
                    pending = table.pending(),
                    max_queue_size = self.config.max_queue_size,
                    "Batch would exceed queue capacity"
                );
                return Err(PipelineError::Validation(format!(
                    "batch of {} would exceed queue capacity {}",
                    descriptors.len(),
                    self.config.max_queue_size
                )));
            }
            descriptors.into_iter().map(|d| table.insert(d)).collect()
        };

        debug!(batch_size = jobs.len(), "Enqueued batch");
        for job in &jobs {
            self.announce(job);
        }
        self.enqueued.notify_one();
        Ok(jobs.iter().map(|job| job.id).collect())
    }

    fn announce(&self, job: &GenerationJob) {
        debug!(
            job_id = %job.id,
            category = %job.category,
            subject_id = %job.subject_id,
            priority = job.priority,
            "Enqueued generation job"
        );
        self.events.emit(PipelineEvent::JobEnqueued {
            job_id: job.id,
            category: job.category,
            subject_id: job.subject_id.clone(),
            priority: job.priority,
        });
    }

    /// Drain the queue. Returns once nothing is pending and nothing is in flight.
    ///
    /// Concurrent callers serialize on the outcome channel, so at most one
    /// drain loop is active.
    pub async fn run(&self) -> RunSummary {
        let mut rx = self.outcome_rx.lock().await;
        let delay = self.config.inter_job_delay();
        let mut summary = RunSummary::default();
        let mut last_start: Option<Instant> = None;

        info!(pending = self.table.read().pending(), "Executor run started");

        loop {
            self.drain_outcomes(&mut rx);

            if self.table.read().pending() == 0 {
                if self.inflight.lock().is_empty() {
                    break;
                }
                tokio::select! {
                    Some(outcome) = rx.recv() => self.apply_outcome(outcome),
                    _ = self.enqueued.notified() => {}
                }
                continue;
            }

            if let Some(last) = last_start {
                self.wait_until(last + delay, &mut rx).await;
            }

            let Some(next) = self.table.write().queue.pop() else {
                continue;
            };
            match self.start(next.id, &mut rx).await {
                StartKind::Dispatched => {
                    summary.dispatched += 1;
                    last_start = Some(Instant::now());
                }
                StartKind::Resumed => {
                    summary.resumed += 1;
                    last_start = Some(Instant::now());
                }
                StartKind::CacheHit => summary.cache_hits += 1,
                StartKind::Coalesced => summary.coalesced += 1,
                StartKind::Skipped => {}
            }
        }

        info!(
            dispatched = summary.dispatched,
            cache_hits = summary.cache_hits,
            coalesced = summary.coalesced,
            resumed = summary.resumed,
            "Executor run finished"
        );
        summary
    }

    /// Sleep until `deadline`, applying outcomes that arrive meanwhile.
    async fn wait_until(&self, deadline: Instant, rx: &mut mpsc::UnboundedReceiver<JobOutcome>) {
        let sleep = sleep_until(deadline);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return,
                Some(outcome) = rx.recv() => self.apply_outcome(outcome),
            }
        }
    }

    fn drain_outcomes(&self, rx: &mut mpsc::UnboundedReceiver<JobOutcome>) {
        while let Ok(outcome) = rx.try_recv() {
            self.apply_outcome(outcome);
        }
    }

    async fn start(&self, id: JobId, rx: &mut mpsc::UnboundedReceiver<JobOutcome>) -> StartKind {
        let resumed = self.table.write().take_resume(id);
        if let Some((request, progress)) = resumed {
            info!(
                job_id = %id,
                category = %request.category,
                next_provider = progress.next,
                "Resuming fallback cascade"
            );
            self.dispatch(request, progress, rx).await;
            return StartKind::Resumed;
        }

        let request = {
            let mut table = self.table.write();
            let Some(job) = table.jobs.get_mut(&id) else {
                return StartKind::Skipped;
            };
            if job.status != JobStatus::Pending {
                return StartKind::Skipped;
            }
            let key = CacheKey::for_job(job);

            if let Some(locator) = self.cache.get(&key) {
                if let Err(e) = job.mark_complete(locator) {
                    error!(job_id = %id, error = %e, "Cache hit on job that cannot complete");
                    return StartKind::Skipped;
                }
                let snapshot = job.snapshot();
                drop(table);
                debug!(job_id = %id, key = %key, "Served from result cache");
                self.events.emit(PipelineEvent::CacheHit {
                    job_id: id,
                    key: key.as_str().to_string(),
                });
                self.finish(&[snapshot], None);
                return StartKind::CacheHit;
            }

            if let Err(e) = job.mark_generating() {
                error!(job_id = %id, error = %e, "Job could not start");
                return StartKind::Skipped;
            }

            let mut inflight = self.inflight.lock();
            if let Some(entry) = inflight.get_mut(&key) {
                entry.followers.push(id);
                let leader = entry.leader;
                drop(inflight);
                drop(table);
                debug!(job_id = %id, leader = %leader, "Coalesced with in-flight job");
                self.events.emit(PipelineEvent::JobCoalesced { job_id: id, leader });
                return StartKind::Coalesced;
            }
            inflight.insert(
                key,
                Inflight {
                    leader: id,
                    followers: Vec::new(),
                },
            );
            let request = GenerationRequest::from_job(job);
            table.current = Some(id);
            request
        };

        info!(
            job_id = %id,
            category = %request.category,
            subject_id = %request.subject_id,
            "Starting generation job"
        );
        self.events.emit(PipelineEvent::JobStarted { job_id: id });

        self.dispatch(request, CascadeProgress::default(), rx).await;
        StartKind::Dispatched
    }

    /// Spawn the cascade for one job and wait until it finishes or hands off.
    async fn dispatch(
        &self,
        request: GenerationRequest,
        progress: CascadeProgress,
        rx: &mut mpsc::UnboundedReceiver<JobOutcome>,
    ) {
        let id = request.job_id;
        let providers = self.registry.route(request.category);
        let adapter = Arc::clone(&self.adapter);
        let tx = self.outcome_tx.clone();
        let epoch = self.epoch.load(AtomicOrdering::SeqCst);
        let (signal, dispatched) = DispatchSignal::new();
        let prior = progress.attempted.clone();

        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(adapter.run_from(&request, &providers, progress, &signal))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| FallbackOutcome {
                    result: ProviderResult::failure("", "provider task panicked"),
                    attempted: prior,
                    resume: None,
                });
            let _ = tx.send(JobOutcome {
                job_id: request.job_id,
                epoch,
                fingerprint: request.fingerprint.clone(),
                outcome,
            });
            signal.fire();
        });
        self.tasks.lock().insert(id, handle.abort_handle());

        // Resolves on hand-off to polling, on completion, or when the task is aborted.
        let _ = dispatched.await;
        self.drain_outcomes(rx);
    }

    fn apply_outcome(&self, outcome: JobOutcome) {
        if outcome.epoch != self.epoch.load(AtomicOrdering::SeqCst) {
            debug!(job_id = %outcome.job_id, "Dropping outcome from before reset");
            return;
        }
        self.tasks.lock().remove(&outcome.job_id);
        if let Some(progress) = outcome.outcome.resume {
            self.requeue(outcome.job_id, progress);
            return;
        }
        let followers = self
            .inflight
            .lock()
            .remove(&outcome.fingerprint)
            .map(|entry| entry.followers)
            .unwrap_or_default();

        let FallbackOutcome { result, attempted, .. } = outcome.outcome;
        let mut snapshots = Vec::with_capacity(1 + followers.len());
        {
            let mut table = self.table.write();
            if table.current == Some(outcome.job_id) {
                table.current = None;
            }
            for id in std::iter::once(outcome.job_id).chain(followers) {
                let Some(job) = table.jobs.get_mut(&id) else {
                    continue;
                };
                if id == outcome.job_id {
                    job.attempted_providers = attempted.clone();
                }
                let applied = match (&result.locator, result.success) {
                    (Some(locator), true) => job.mark_complete(locator.clone()),
                    _ => job.mark_failed(
                        result
                            .error
                            .clone()
                            .unwrap_or_else(|| "generation failed".to_string()),
                    ),
                };
                if let Err(e) = applied {
                    error!(job_id = %id, error = %e, "Discarding outcome for job");
                    continue;
                }
                snapshots.push(job.snapshot());
            }
        }

        if result.success && !result.degraded {
            if let Some(locator) = &result.locator {
                self.cache.put(outcome.fingerprint, locator.clone());
            }
        }
        let provider = (!result.provider_name.is_empty()).then(|| result.provider_name.clone());
        self.finish(&snapshots, provider);
    }

    /// Put a generating job back in the queue at its original position so the
    /// rest of its cascade starts behind the inter-job delay.
    fn requeue(&self, id: JobId, progress: CascadeProgress) {
        let mut table = self.table.write();
        if table.current == Some(id) {
            table.current = None;
        }
        let Some(job) = table.jobs.get_mut(&id) else {
            return;
        };
        job.attempted_providers = progress.attempted.clone();
        let entry = QueuedJob {
            priority: job.priority,
            seq: job.sequence(),
            id,
        };
        debug!(
            job_id = %id,
            next_provider = progress.next,
            attempted = progress.attempted.len(),
            "Requeued job for remaining providers"
        );
        table.queue.push(entry);
        table.resumes.insert(id, progress);
        drop(table);
        self.enqueued.notify_one();
    }

    fn finish(&self, snapshots: &[JobSnapshot], provider: Option<String>) {
        for snapshot in snapshots {
            match (&snapshot.status, &snapshot.locator) {
                (JobStatus::Complete, Some(locator)) => {
                    info!(
                        job_id = %snapshot.id,
                        locator = %locator,
                        provider = provider.as_deref().unwrap_or("cache"),
                        "Generation job complete"
                    );
                    self.events.emit(PipelineEvent::JobCompleted {
                        job_id: snapshot.id,
                        locator: locator.to_string(),
                        provider: provider.clone(),
                    });
                }
                _ => {
                    let error = snapshot.last_error.clone().unwrap_or_default();
                    warn!(job_id = %snapshot.id, error = %error, "Generation job failed");
                    self.events.emit(PipelineEvent::JobFailed {
                        job_id: snapshot.id,
                        error,
                    });
                }
            }
            self.events.asset_ready(snapshot);
        }
        self.changed.notify_waiters();
    }

    pub fn status(&self) -> PipelineStatus {
        let table = self.table.read();
        let mut status = PipelineStatus {
            total: table.order.len(),
            pending: 0,
            generating: 0,
            complete: 0,
            failed: 0,
            currently_generating: table
                .current
                .filter(|id| matches!(table.jobs.get(id), Some(j) if j.status == JobStatus::Generating)),
            percent_complete: 100,
            jobs: Vec::with_capacity(table.order.len()),
        };

        for job in table.order.iter().filter_map(|id| table.jobs.get(id)) {
            match job.status {
                JobStatus::Pending => status.pending += 1,
                JobStatus::Generating => status.generating += 1,
                JobStatus::Complete => status.complete += 1,
                JobStatus::Failed => status.failed += 1,
            }
            status.jobs.push(JobStatusEntry {
                id: job.id,
                category: job.category,
                subject_id: job.subject_id.clone(),
                status: job.status,
                locator: job.locator.clone(),
            });
        }

        if status.total > 0 {
            let terminal = status.complete + status.failed;
            status.percent_complete = (terminal * 100 / status.total) as u8;
        }
        status
    }

    pub fn is_ready(&self, id: JobId) -> bool {
        matches!(
            self.table.read().jobs.get(&id),
            Some(job) if job.status == JobStatus::Complete
        )
    }

    pub fn get_locator(&self, id: JobId) -> Option<AssetLocator> {
        self.table
            .read()
            .jobs
            .get(&id)
            .filter(|job| job.status == JobStatus::Complete)
            .and_then(|job| job.locator.clone())
    }

    pub fn job(&self, id: JobId) -> Result<GenerationJob, PipelineError> {
        self.table
            .read()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(PipelineError::JobNotFound(id))
    }

    /// All jobs in insertion order.
    pub fn jobs(&self) -> Vec<GenerationJob> {
        let table = self.table.read();
        table
            .order
            .iter()
            .filter_map(|id| table.jobs.get(id).cloned())
            .collect()
    }

    /// Highest priority value among pending jobs.
    pub fn max_pending_priority(&self) -> Option<i32> {
        self.table.read().queue.iter().map(|q| q.priority).max()
    }

    /// Wait until every known job is terminal. Requires a concurrent [`run`](Self::run).
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let idle = self.table.read().jobs.values().all(GenerationJob::is_terminal);
            if idle {
                return;
            }
            notified.await;
        }
    }

    /// Drop every job, abandon in-flight work and clear the result cache.
    pub fn reset(&self) {
        let epoch = self.epoch.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let aborted = {
            let mut tasks = self.tasks.lock();
            let count = tasks.len();
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
            count
        };
        self.inflight.lock().clear();
        *self.table.write() = JobTable::default();
        self.cache.clear();
        info!(epoch, aborted, "Executor reset");
        self.changed.notify_waiters();
        self.enqueued.notify_one();
    }
}
