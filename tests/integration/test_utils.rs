//! Shared helpers for integration tests: scripted providers and a
//! pipeline wired to a temporary asset root.

use async_trait::async_trait;
use atelier::config::AtelierConfig;
use atelier::events::PipelineEvent;
use atelier::provider::{
    GenerationRequest, MediaProvider, ProviderCapabilities, ProviderDescriptor, RemoteAsset,
    Submission,
};
use atelier::{GenerationPipeline, PipelineError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// What a scripted provider does on every submit.
#[derive(Clone)]
pub enum Script {
    Fail(&'static str),
    Empty,
    /// Inline bytes: the prompt itself
    Echo,
}

pub struct ScriptedProvider {
    descriptor: ProviderDescriptor,
    script: Script,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl MediaProvider for ScriptedProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<Submission, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Fail(msg) => Err(PipelineError::ProviderError(msg.to_string())),
            Script::Empty => Ok(Submission::Ready(RemoteAsset::Bytes {
                data: Vec::new(),
                extension: "png".into(),
            })),
            Script::Echo => Ok(Submission::Ready(RemoteAsset::Bytes {
                data: request.prompt.as_bytes().to_vec(),
                extension: request.media.default_extension().into(),
            })),
        }
    }
}

/// Scripted provider plus a counter of its submit calls.
pub fn scripted(
    name: &str,
    script: Script,
    caps: ProviderCapabilities,
) -> (Arc<dyn MediaProvider>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let provider = Arc::new(ScriptedProvider {
        descriptor: ProviderDescriptor {
            name: name.into(),
            model: format!("{}-model", name),
            capabilities: caps,
            submit_endpoint: "http://127.0.0.1:9".into(),
            poll_endpoint: None,
        },
        script,
        calls: Arc::clone(&calls),
    });
    (provider, calls)
}

pub fn image_caps() -> ProviderCapabilities {
    ProviderCapabilities::default()
}

pub fn video_caps() -> ProviderCapabilities {
    ProviderCapabilities {
        supports_image: false,
        supports_video: true,
        supports_image_to_video: true,
        max_duration_secs: Some(5),
        is_async: true,
    }
}

/// Config with storage under `dir`, no inter-job delay and a fast poller.
pub fn test_config(dir: &TempDir) -> AtelierConfig {
    let mut config = AtelierConfig::default();
    config.storage.root = dir.path().join("assets");
    config.executor.inter_job_delay_ms = 0;
    config.poller.interval_ms = 20;
    config.poller.video_max_wait_secs = 10;
    config
}

/// Every event the pipeline emits, in order.
pub fn record_events(pipeline: &GenerationPipeline) -> Arc<Mutex<Vec<PipelineEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    pipeline.subscribe(move |event| sink.lock().push(event.clone()));
    events
}
