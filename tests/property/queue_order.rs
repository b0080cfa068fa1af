//! Dispatch order is priority first, then submission order.

use async_trait::async_trait;
use atelier::provider::{
    GenerationRequest, MediaProvider, ProviderCapabilities, ProviderDescriptor, RemoteAsset,
    Submission,
};
use atelier::{Category, GenerationPipeline, JobDescriptor, PipelineError};
use parking_lot::Mutex;
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use std::sync::Arc;

/// Records the prompt of every submit.
struct Recorder {
    descriptor: ProviderDescriptor,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MediaProvider for Recorder {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<Submission, PipelineError> {
        self.seen.lock().push(request.prompt.clone());
        Ok(Submission::Ready(RemoteAsset::Stored(
            format!("/srv/assets/{}.png", request.job_id).into(),
        )))
    }
}

fn dispatch_order(priorities: &[i32]) -> Vec<String> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::new(Recorder {
        descriptor: ProviderDescriptor {
            name: "recorder".into(),
            model: "recorder".into(),
            capabilities: ProviderCapabilities::default(),
            submit_endpoint: "http://127.0.0.1:9".into(),
            poll_endpoint: None,
        },
        seen: Arc::clone(&seen),
    });

    let mut config = atelier::config::AtelierConfig::default();
    config.executor.inter_job_delay_ms = 0;
    let pipeline = GenerationPipeline::builder()
        .config(config)
        .provider(recorder)
        .route(Category::Scene, ["recorder"])
        .build()
        .unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        for (i, priority) in priorities.iter().enumerate() {
            pipeline
                .enqueue(JobDescriptor::new(
                    "hall",
                    Category::Scene,
                    format!("job {}", i),
                    *priority,
                ))
                .unwrap();
        }
        pipeline.run().await;
    });
    let order = seen.lock().clone();
    order
}

#[test]
fn test_dispatch_order_matches_stable_priority_sort() {
    let mut runner = TestRunner::new(Config::with_cases(32));
    runner
        .run(
            &prop::collection::vec(-20i32..20, 1..12),
            |priorities| {
                let mut expected: Vec<(i32, usize)> = priorities
                    .iter()
                    .copied()
                    .enumerate()
                    .map(|(i, p)| (p, i))
                    .collect();
                expected.sort_by_key(|(p, _)| *p);
                let expected: Vec<String> =
                    expected.iter().map(|(_, i)| format!("job {}", i)).collect();

                prop_assert_eq!(dispatch_order(&priorities), expected);
                Ok(())
            },
        )
        .unwrap();
}
