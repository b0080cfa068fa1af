//! Generation pipeline
//!
//! One [`GenerationPipeline`] per game session. It owns the job table, the
//! result cache and the trigger cooldowns, so separate sessions never share
//! state and `reset()` tears one down without touching another.

use crate::cache::{CacheStats, ResultCache};
use crate::config::AtelierConfig;
use crate::error::PipelineError;
use crate::events::{EventBus, PipelineEvent};
use crate::executor::{Executor, PipelineStatus, RunSummary};
use crate::fallback::ProviderFallbackAdapter;
use crate::job::{AssetLocator, GenerationJob, JobDescriptor, JobSnapshot};
use crate::plan::SessionAssetPlan;
use crate::poller::OperationPoller;
use crate::provider::{MediaProvider, ProviderFactory, ProviderRegistry};
use crate::storage::AssetStore;
use crate::trigger::{TriggerClassifier, TriggerDecision, TriggerScore, TriggerSignals};
use crate::types::{Category, JobId};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One turn of gameplay for one subject, as seen by the trigger classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnObservation {
    pub subject_id: String,
    pub turn: u64,
    pub signals: TriggerSignals,
    /// Prompt for the clip if the turn triggers one
    pub prompt: String,
    /// Still to animate, for image-to-video providers
    pub source_asset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnOutcome {
    pub decision: TriggerDecision,
    /// Video job created by this turn
    pub job_id: Option<JobId>,
}

/// Builder for [`GenerationPipeline`].
pub struct PipelineBuilder {
    config: AtelierConfig,
    providers: Vec<Arc<dyn MediaProvider>>,
    routes: Vec<(Category, Vec<String>)>,
    events: EventBus,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: AtelierConfig::default(),
            providers: Vec::new(),
            routes: Vec::new(),
            events: EventBus::new(),
        }
    }

    pub fn config(mut self, config: AtelierConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a provider instance. Replaces a configured provider of the same name.
    pub fn provider(mut self, provider: Arc<dyn MediaProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Override the fallback order for one category.
    pub fn route<I, S>(mut self, category: Category, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes
            .push((category, names.into_iter().map(Into::into).collect()));
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> Result<GenerationPipeline, PipelineError> {
        let PipelineBuilder {
            config,
            providers,
            routes,
            events,
        } = self;

        let mut registry = ProviderRegistry::new();
        for (name, provider_config) in &config.providers {
            registry.register(ProviderFactory::create_client(name, provider_config)?);
        }
        for provider in providers {
            registry.register(provider);
        }
        for category in Category::ALL {
            registry.set_route(category, config.routes.get(category).to_vec());
        }
        for (category, names) in routes {
            registry.set_route(category, names);
        }
        for category in Category::ALL {
            if let Some(missing) = registry
                .route_names(category)
                .iter()
                .find(|name| !registry.contains(name))
            {
                return Err(PipelineError::Config(format!(
                    "route for {} references unknown provider '{}'",
                    category, missing
                )));
            }
        }

        let store = Arc::new(AssetStore::new(&config.storage)?);
        let adapter = ProviderFallbackAdapter::new(
            OperationPoller::new(config.poller.clone()),
            store,
            config.storage.degrade_on_download_failure,
            events.clone(),
        );
        let cache = Arc::new(ResultCache::new(&config.cache));
        let executor = Executor::new(
            config.executor.clone(),
            Arc::clone(&cache),
            Arc::new(registry),
            Arc::new(adapter),
            events.clone(),
        );
        let classifier = TriggerClassifier::new(config.trigger.clone());

        info!(
            providers = config.providers.len(),
            storage_root = %config.storage.root.display(),
            "Generation pipeline ready"
        );

        Ok(GenerationPipeline {
            inner: Arc::new(PipelineInner {
                config,
                executor,
                cache,
                classifier,
                events,
            }),
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct PipelineInner {
    config: AtelierConfig,
    executor: Executor,
    cache: Arc<ResultCache>,
    classifier: TriggerClassifier,
    events: EventBus,
}

/// Session handle. Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct GenerationPipeline {
    inner: Arc<PipelineInner>,
}

impl GenerationPipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn from_config(config: AtelierConfig) -> Result<Self, PipelineError> {
        PipelineBuilder::new().config(config).build()
    }

    pub fn config(&self) -> &AtelierConfig {
        &self.inner.config
    }

    pub fn enqueue(&self, descriptor: JobDescriptor) -> Result<JobId, PipelineError> {
        self.inner.executor.enqueue(descriptor)
    }

    pub fn enqueue_batch(&self, descriptors: Vec<JobDescriptor>) -> Result<Vec<JobId>, PipelineError> {
        self.inner.executor.enqueue_batch(descriptors)
    }

    /// Queue the up-front assets of a session in viewing order.
    pub fn enqueue_plan(&self, plan: SessionAssetPlan) -> Result<Vec<JobId>, PipelineError> {
        let ids = self.enqueue_batch(plan.into_descriptors())?;
        info!(jobs = ids.len(), "Enqueued session asset plan");
        Ok(ids)
    }

    /// Drain the queue, including asynchronous operations still polling.
    pub async fn run(&self) -> RunSummary {
        let pruned = self.inner.cache.prune_expired(Utc::now());
        if pruned > 0 {
            debug!(pruned, "Pruned expired cache entries");
        }
        self.inner.executor.run().await
    }

    /// Run the drain loop on its own task.
    pub fn spawn_run(&self) -> JoinHandle<RunSummary> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.run().await })
    }

    /// Resolve once every known job is terminal. Something must be running the
    /// queue, see [`run`](Self::run) or [`spawn_run`](Self::spawn_run).
    pub async fn wait_until_idle(&self) {
        self.inner.executor.wait_until_idle().await
    }

    pub fn status(&self) -> PipelineStatus {
        self.inner.executor.status()
    }

    pub fn is_ready(&self, id: JobId) -> bool {
        self.inner.executor.is_ready(id)
    }

    /// Final locator of a completed job.
    pub fn get_locator(&self, id: JobId) -> Option<AssetLocator> {
        self.inner.executor.get_locator(id)
    }

    pub fn job(&self, id: JobId) -> Result<GenerationJob, PipelineError> {
        self.inner.executor.job(id)
    }

    pub fn jobs(&self) -> Vec<GenerationJob> {
        self.inner.executor.jobs()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener);
    }

    /// Called once per job when it reaches Complete or Failed.
    pub fn on_asset_ready<F>(&self, listener: F)
    where
        F: Fn(&JobSnapshot) + Send + Sync + 'static,
    {
        self.inner.events.on_asset_ready(listener);
    }

    pub fn score(&self, signals: &TriggerSignals) -> TriggerScore {
        self.inner.classifier.score(signals)
    }

    /// Feed one turn to the trigger classifier, queueing a video job when it fires.
    ///
    /// Triggered videos are served after every job still pending.
    pub fn observe_turn(&self, observation: TurnObservation) -> Result<TurnOutcome, PipelineError> {
        let TurnObservation {
            subject_id,
            turn,
            signals,
            prompt,
            source_asset,
        } = observation;

        let mut descriptor = JobDescriptor::new(
            subject_id.clone(),
            Category::Video,
            prompt,
            self.inner.config.trigger.video_priority,
        );
        if let Some(source) = source_asset {
            descriptor = descriptor.with_source_asset(source);
        }
        descriptor.validate()?;

        let decision = self.inner.classifier.evaluate(&subject_id, turn, &signals);
        if !decision.fires() {
            return Ok(TurnOutcome {
                decision,
                job_id: None,
            });
        }

        if let Some(max_pending) = self.inner.executor.max_pending_priority() {
            descriptor.priority = descriptor.priority.max(max_pending.saturating_add(1));
        }
        let priority = descriptor.priority;
        let job_id = self.enqueue(descriptor)?;

        info!(
            subject_id = %subject_id,
            turn,
            score = decision.score(),
            job_id = %job_id,
            priority,
            "Trigger fired, queued video"
        );
        self.inner.events.emit(PipelineEvent::TriggerFired {
            subject_id,
            turn,
            score: decision.score(),
            job_id,
        });
        Ok(TurnOutcome {
            decision,
            job_id: Some(job_id),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// End the session: drop jobs, cache and cooldowns. Operations still in
    /// flight are abandoned and their late results ignored.
    pub fn reset(&self) {
        self.inner.executor.reset();
        self.inner.classifier.reset();
        info!("Generation pipeline reset");
    }
}
