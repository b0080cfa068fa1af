//! Identical requests reach a provider once.

use super::test_utils::{image_caps, record_events, scripted, test_config, Script};
use atelier::events::PipelineEvent;
use atelier::{Category, GenerationPipeline, JobDescriptor, JobStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn pipeline(dir: &TempDir, script: Script) -> (GenerationPipeline, Arc<AtomicUsize>) {
    let (stills, calls) = scripted("stills", script, image_caps());
    let pipeline = GenerationPipeline::builder()
        .config(test_config(dir))
        .provider(stills)
        .route(Category::Portrait, ["stills"])
        .route(Category::Scene, ["stills"])
        .build()
        .unwrap();
    (pipeline, calls)
}

fn portrait(prompt: &str) -> JobDescriptor {
    JobDescriptor::new("widow", Category::Portrait, prompt, 0)
}

#[tokio::test]
async fn test_duplicates_in_one_batch_share_a_single_call() {
    let dir = TempDir::new().unwrap();
    let (pipeline, calls) = pipeline(&dir, Script::Echo);

    let ids = pipeline
        .enqueue_batch(vec![
            portrait("widow in black veil"),
            portrait("  Widow in BLACK   veil "),
            portrait("widow in black veil"),
        ])
        .unwrap();
    let summary = pipeline.run().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.cache_hits + summary.coalesced, 2);

    let first = pipeline.get_locator(ids[0]).unwrap();
    for id in &ids {
        assert_eq!(pipeline.job(*id).unwrap().status, JobStatus::Complete);
        assert_eq!(pipeline.get_locator(*id), Some(first.clone()));
    }
}

#[tokio::test]
async fn test_later_run_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let (pipeline, calls) = pipeline(&dir, Script::Echo);
    let events = record_events(&pipeline);

    let first = pipeline.enqueue(portrait("widow by the fire")).unwrap();
    pipeline.run().await;
    let second = pipeline.enqueue(portrait("widow by the fire")).unwrap();
    let summary = pipeline.run().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.cache_hits, 1);
    assert_eq!(pipeline.get_locator(first), pipeline.get_locator(second));
    assert!(events.lock().iter().any(|e| matches!(
        e,
        PipelineEvent::CacheHit { job_id, .. } if *job_id == second
    )));
    assert_eq!(pipeline.cache_stats().hits, 1);
}

#[tokio::test]
async fn test_distinct_inputs_are_not_conflated() {
    let dir = TempDir::new().unwrap();
    let (pipeline, calls) = pipeline(&dir, Script::Echo);

    pipeline
        .enqueue_batch(vec![
            portrait("widow smiling"),
            JobDescriptor::new("widow", Category::Scene, "widow smiling", 0),
            JobDescriptor::new("heir", Category::Portrait, "widow smiling", 0),
        ])
        .unwrap();
    pipeline.run().await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(pipeline.cache_stats().entries, 3);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let dir = TempDir::new().unwrap();
    let (pipeline, calls) = pipeline(&dir, Script::Fail("quota exceeded"));

    let first = pipeline.enqueue(portrait("widow weeping")).unwrap();
    pipeline.run().await;
    let second = pipeline.enqueue(portrait("widow weeping")).unwrap();
    pipeline.run().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.job(first).unwrap().status, JobStatus::Failed);
    assert_eq!(pipeline.job(second).unwrap().status, JobStatus::Failed);
    assert_eq!(pipeline.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_reset_forgets_cached_results() {
    let dir = TempDir::new().unwrap();
    let (pipeline, calls) = pipeline(&dir, Script::Echo);

    pipeline.enqueue(portrait("widow at the window")).unwrap();
    pipeline.run().await;
    pipeline.reset();
    assert_eq!(pipeline.cache_stats().entries, 0);
    assert!(pipeline.jobs().is_empty());

    pipeline.enqueue(portrait("widow at the window")).unwrap();
    pipeline.run().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
