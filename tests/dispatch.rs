//! End-to-end delivery through the real HTTP sinks.

use serde_json::json;
use statwatch::{
    config::{Config, ConfigEvent},
    core::CpuSnapshot,
    location::LocationAcquisition,
    prefs::FilePrefs,
    service::Service,
    testing::StaticSource,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn wait_for_ticks(service: &Service, n: u64) -> bool {
    for _ in 0..500 {
        if service.ticks_completed() >= n {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn build_service(dir: &TempDir) -> Service {
    let mut config = Config::default();
    config.http.timeout_seconds = 1;
    Service::builder(config)
        .source_override(Arc::new(
            StaticSource::new().with_cpu([CpuSnapshot::new([1, 0, 0, 1, 0, 0, 0])]),
        ))
        .location_override(LocationAcquisition::disabled())
        .prefs_override(Arc::new(FilePrefs::open(dir.path().join("prefs.json"))))
        .build()
        .unwrap()
}

fn event(server: &MockServer, api_key: &str) -> ConfigEvent {
    ConfigEvent {
        webhook: Some(format!("{}/hook", server.uri())),
        api: Some(format!("{}/ingest", server.uri())),
        api_key: Some(api_key.to_string()),
        enable_periodic: Some(false),
        trigger_immediate: Some(true),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_tick_posts_text_and_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("content-type", "application/json; charset=utf-8"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .and(header("authorization", "Bearer k-123"))
        .and(body_partial_json(json!({
            "deviceId": "9ea5006ef6b50d20",
            "deviceName": "atom1",
            "memoryPct": 42.0,
            "tempC": 40.0,
            "batteryPct": 90,
            "voltageV": 4.1
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let service = build_service(&dir);
    service.handle_event(&event(&server, "k-123")).await;
    assert!(wait_for_ticks(&service, 1).await);
    service.stop();

    let requests = server.received_requests().await.unwrap();
    let hook = requests
        .iter()
        .find(|r| r.url.path() == "/hook")
        .expect("webhook request");
    let body: serde_json::Value = serde_json::from_slice(&hook.body).unwrap();
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("NOTIFICATION [Camera atom1]"), "{text}");
    assert!(text.contains("MEM: 42.0% | temp=40.0'C | Battery: 90% | Voltage: 4.10V"), "{text}");
}

#[tokio::test]
async fn test_webhook_failure_does_not_block_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let service = build_service(&dir);
    service.handle_event(&event(&server, "k")).await;
    assert!(wait_for_ticks(&service, 1).await);
    service.stop();
}

#[tokio::test]
async fn test_hung_api_is_bounded_by_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let service = build_service(&dir);
    service.handle_event(&event(&server, "k")).await;
    assert!(service.trigger());

    // Both ticks finish even though every API call hangs.
    assert!(wait_for_ticks(&service, 2).await);
    service.stop();
}

#[tokio::test]
async fn test_empty_api_key_sends_no_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let service = build_service(&dir);
    service.handle_event(&event(&server, "")).await;
    assert!(wait_for_ticks(&service, 1).await);
    service.stop();

    let requests = server.received_requests().await.unwrap();
    let ingest = requests
        .iter()
        .find(|r| r.url.path() == "/ingest")
        .expect("api request");
    assert!(!ingest.headers.contains_key("authorization"));
}
