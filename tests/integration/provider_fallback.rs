//! Fallback across real HTTP providers, served by wiremock.

use super::test_utils::{record_events, test_config};
use atelier::config::{AtelierConfig, ProviderConfig, ProviderType};
use atelier::events::PipelineEvent;
use atelier::provider::ProviderCapabilities;
use atelier::{AssetLocator, Category, GenerationPipeline, JobDescriptor, JobStatus};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn images_provider(server: &MockServer, prefix: &str, api_key: Option<&str>) -> ProviderConfig {
    ProviderConfig {
        provider_type: ProviderType::OpenaiImages,
        model: "image-model".into(),
        endpoint: Some(format!("{}/{}/v1", server.uri(), prefix)),
        poll_endpoint: None,
        api_key: api_key.map(str::to_string),
        api_key_env: None,
        capabilities: None,
        size: Some("1024x1024".into()),
        request_timeout_secs: 5,
    }
}

/// A prediction provider that serves stills synchronously.
fn prediction_provider(server: &MockServer, prefix: &str) -> ProviderConfig {
    ProviderConfig {
        provider_type: ProviderType::Prediction,
        model: "still-model".into(),
        endpoint: Some(format!("{}/{}/predictions", server.uri(), prefix)),
        poll_endpoint: None,
        api_key: None,
        api_key_env: None,
        capabilities: Some(ProviderCapabilities {
            is_async: true,
            ..ProviderCapabilities::default()
        }),
        size: None,
        request_timeout_secs: 5,
    }
}

fn with_route(mut config: AtelierConfig, names: &[&str]) -> AtelierConfig {
    config
        .routes
        .set(Category::Portrait, names.iter().map(|n| n.to_string()).collect());
    config
}

#[tokio::test]
async fn test_error_then_empty_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/m1/v1/images/generations"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/m2/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/m3/v1/images/generations"))
        .and(header("authorization", "Bearer key-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "b64_json": BASE64.encode(b"portrait-bytes") }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config
        .providers
        .insert("m1".into(), images_provider(&server, "m1", Some("key-1")));
    config
        .providers
        .insert("m2".into(), images_provider(&server, "m2", Some("key-2")));
    config
        .providers
        .insert("m3".into(), images_provider(&server, "m3", Some("key-3")));
    let config = with_route(config, &["m1", "m2", "m3"]);
    assert!(config.validate().is_ok());

    let pipeline = GenerationPipeline::from_config(config).unwrap();
    let events = record_events(&pipeline);
    let id = pipeline
        .enqueue(JobDescriptor::new("butler", Category::Portrait, "stern butler", 0))
        .unwrap();
    pipeline.run().await;

    let job = pipeline.job(id).unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.attempted_providers, vec!["m1", "m2", "m3"]);
    let path = match &job.locator {
        Some(AssetLocator::Local(path)) => path.clone(),
        other => panic!("expected a local locator, got {:?}", other),
    };
    assert!(path.starts_with(dir.path().join("assets").join("portrait").join("butler")));
    assert_eq!(std::fs::read(&path).unwrap(), b"portrait-bytes");

    let failures: Vec<(String, String)> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::ProviderFailed {
                provider,
                error_kind,
                ..
            } => Some((provider.clone(), error_kind.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        failures,
        vec![
            ("m1".to_string(), "provider_error".to_string()),
            ("m2".to_string(), "empty_result".to_string())
        ]
    );
}

#[tokio::test]
async fn test_missing_key_skips_provider_without_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/m1/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/m2/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "b64_json": BASE64.encode(b"ok") }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config
        .providers
        .insert("m1".into(), images_provider(&server, "m1", None));
    config
        .providers
        .insert("m2".into(), images_provider(&server, "m2", Some("key-2")));
    let pipeline = GenerationPipeline::from_config(with_route(config, &["m1", "m2"])).unwrap();
    let events = record_events(&pipeline);

    let id = pipeline
        .enqueue(JobDescriptor::new("maid", Category::Portrait, "maid", 0))
        .unwrap();
    pipeline.run().await;

    assert!(pipeline.is_ready(id));
    assert!(events.lock().iter().any(|e| matches!(
        e,
        PipelineEvent::ProviderFailed { provider, error_kind, .. }
            if provider == "m1" && error_kind == "provider_unavailable"
    )));
}

#[tokio::test]
async fn test_exhausted_chain_fails_with_every_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config
        .providers
        .insert("m1".into(), images_provider(&server, "m1", Some("k")));
    config
        .providers
        .insert("m2".into(), images_provider(&server, "m2", Some("k")));
    let pipeline = GenerationPipeline::from_config(with_route(config, &["m1", "m2"])).unwrap();

    let id = pipeline
        .enqueue(JobDescriptor::new("cook", Category::Portrait, "cook", 0))
        .unwrap();
    pipeline.run().await;

    let job = pipeline.job(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.last_error.unwrap();
    assert!(error.starts_with("all 2 providers failed"));
    assert!(error.contains("m1:") && error.contains("m2:"));
    assert!(error.contains("rejected credentials"));
}

#[tokio::test]
async fn test_unresolved_key_env_never_reaches_prediction_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clips/predictions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p-1" })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/m2/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "b64_json": BASE64.encode(b"ok") }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    let mut clips = prediction_provider(&server, "clips");
    clips.api_key_env = Some("ATELIER_TEST_UNSET_CLIPS_KEY".into());
    std::env::remove_var("ATELIER_TEST_UNSET_CLIPS_KEY");
    config.providers.insert("clips".into(), clips);
    config
        .providers
        .insert("m2".into(), images_provider(&server, "m2", Some("key-2")));
    let pipeline = GenerationPipeline::from_config(with_route(config, &["clips", "m2"])).unwrap();
    let events = record_events(&pipeline);

    let id = pipeline
        .enqueue(JobDescriptor::new("maid", Category::Portrait, "maid", 0))
        .unwrap();
    pipeline.run().await;

    let job = pipeline.job(id).unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.attempted_providers, vec!["clips", "m2"]);
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.url.path().starts_with("/clips")));
    assert!(events.lock().iter().any(|e| matches!(
        e,
        PipelineEvent::ProviderFailed { provider, error_kind, .. }
            if provider == "clips" && error_kind == "provider_unavailable"
    )));
}

#[tokio::test]
async fn test_non_url_output_cascades_to_next_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stills/predictions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "status": "succeeded", "output": "x" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/m2/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "b64_json": BASE64.encode(b"real-bytes") }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config
        .providers
        .insert("stills".into(), prediction_provider(&server, "stills"));
    config
        .providers
        .insert("m2".into(), images_provider(&server, "m2", Some("key-2")));
    let pipeline =
        GenerationPipeline::from_config(with_route(config, &["stills", "m2"])).unwrap();
    let events = record_events(&pipeline);

    let id = pipeline
        .enqueue(JobDescriptor::new("gardener", Category::Portrait, "gardener", 0))
        .unwrap();
    pipeline.run().await;

    let job = pipeline.job(id).unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.attempted_providers, vec!["stills", "m2"]);
    match &job.locator {
        Some(AssetLocator::Local(path)) => {
            assert_eq!(std::fs::read(path).unwrap(), b"real-bytes");
        }
        other => panic!("expected a local locator, got {:?}", other),
    }
    assert!(!events
        .lock()
        .iter()
        .any(|e| matches!(e, PipelineEvent::LocatorDegraded { .. })));
}
