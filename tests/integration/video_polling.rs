//! Asynchronous video generation end to end: submit, poll, download.

use super::test_utils::{image_caps, record_events, scripted, test_config, Script};
use atelier::config::{ProviderConfig, ProviderType};
use atelier::events::PipelineEvent;
use atelier::{AssetLocator, Category, GenerationPipeline, JobDescriptor, JobId, JobStatus};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Submit answers with `op-1`; polls report `processing` `pending_polls`
/// times and then `final_poll`. The submit body must ask for the provider's
/// longest clip.
async fn mount_prediction(server: &MockServer, pending_polls: u64, final_poll: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/predictions"))
        .and(body_partial_json(json!({ "input": { "duration": 10 } })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "op-1", "status": "starting" })),
        )
        .expect(1)
        .mount(server)
        .await;
    if pending_polls > 0 {
        Mock::given(method("GET"))
            .and(path("/predictions/op-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "processing" })))
            .up_to_n_times(pending_polls)
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/predictions/op-1"))
        .respond_with(final_poll)
        .mount(server)
        .await;
}

fn succeeded(server: &MockServer) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "status": "succeeded",
        "output": [format!("{}/files/clip.mp4", server.uri())]
    }))
}

async fn mount_file(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/files/clip.mp4"))
        .respond_with(response)
        .mount(server)
        .await;
}

fn pipeline(server: &MockServer, dir: &TempDir, degrade: bool) -> GenerationPipeline {
    let mut config = test_config(dir);
    config.storage.degrade_on_download_failure = degrade;
    config.providers.insert(
        "clips".into(),
        ProviderConfig {
            provider_type: ProviderType::Prediction,
            model: "clip-model".into(),
            endpoint: Some(format!("{}/predictions", server.uri())),
            poll_endpoint: None,
            api_key: Some("clip-key".into()),
            api_key_env: None,
            capabilities: None,
            size: None,
            request_timeout_secs: 5,
        },
    );
    config.routes.video = vec!["clips".into()];
    let (stills, _) = scripted("stills", Script::Echo, image_caps());
    GenerationPipeline::builder()
        .config(config)
        .provider(stills)
        .route(Category::Portrait, ["stills"])
        .build()
        .unwrap()
}

fn finish_order(events: &[PipelineEvent]) -> Vec<JobId> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::JobCompleted { job_id, .. } | PipelineEvent::JobFailed { job_id, .. } => {
                Some(*job_id)
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_polled_video_is_downloaded_without_blocking_images() {
    let server = MockServer::start().await;
    mount_prediction(&server, 2, succeeded(&server)).await;
    mount_file(
        &server,
        ResponseTemplate::new(200).set_body_bytes(b"mp4-bytes".to_vec()),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&server, &dir, true);
    let events = record_events(&pipeline);

    let video = pipeline
        .enqueue(JobDescriptor::new("butler", Category::Video, "butler confesses", 0))
        .unwrap();
    let image = pipeline
        .enqueue(JobDescriptor::new("butler", Category::Portrait, "butler calm", 1))
        .unwrap();
    pipeline.run().await;

    assert_eq!(finish_order(&events.lock()), vec![image, video]);
    assert!(events.lock().iter().any(|e| matches!(
        e,
        PipelineEvent::PollingStarted { reference, .. } if reference == "op-1"
    )));

    let job = pipeline.job(video).unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    let path = match &job.locator {
        Some(AssetLocator::Local(path)) => path.clone(),
        other => panic!("expected a local locator, got {:?}", other),
    };
    assert_eq!(path.extension().unwrap(), "mp4");
    assert_eq!(std::fs::read(&path).unwrap(), b"mp4-bytes");

    let polls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/predictions/op-1")
        .count();
    assert_eq!(polls, 3);
    assert_eq!(pipeline.cache_stats().entries, 2);
}

#[tokio::test]
async fn test_failed_download_degrades_to_remote_url() {
    let server = MockServer::start().await;
    mount_prediction(&server, 0, succeeded(&server)).await;
    mount_file(&server, ResponseTemplate::new(404)).await;

    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&server, &dir, true);
    let events = record_events(&pipeline);
    let id = pipeline
        .enqueue(JobDescriptor::new("maid", Category::Video, "maid flees", 0))
        .unwrap();
    pipeline.run().await;

    let expected = format!("{}/files/clip.mp4", server.uri());
    let job = pipeline.job(id).unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.locator, Some(AssetLocator::Remote(expected.clone())));
    assert!(events.lock().iter().any(|e| matches!(
        e,
        PipelineEvent::LocatorDegraded { remote_url, .. } if *remote_url == expected
    )));
    // expiring URLs never enter the cache
    assert_eq!(pipeline.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_failed_download_is_fatal_when_degrading_is_off() {
    let server = MockServer::start().await;
    mount_prediction(&server, 0, succeeded(&server)).await;
    mount_file(&server, ResponseTemplate::new(500)).await;

    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&server, &dir, false);
    let id = pipeline
        .enqueue(JobDescriptor::new("cook", Category::Video, "cook drops tray", 0))
        .unwrap();
    pipeline.run().await;

    let job = pipeline.job(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.locator.is_none());
    assert!(job.last_error.unwrap().contains("Download failed"));
}

#[tokio::test]
async fn test_remote_failure_fails_the_job() {
    let server = MockServer::start().await;
    mount_prediction(
        &server,
        1,
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "failed",
            "error": "content policy"
        })),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&server, &dir, true);
    let id = pipeline
        .enqueue(JobDescriptor::new("cook", Category::Video, "cook", 0))
        .unwrap();
    pipeline.run().await;

    let job = pipeline.job(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempted_providers, vec!["clips".to_string()]);
    assert!(job.last_error.unwrap().contains("content policy"));
}
