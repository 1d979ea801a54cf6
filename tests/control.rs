//! The control server's HTTP surface.

use serde_json::{json, Value};
use statwatch::control::{ControlServer, TokenResponse};
use statwatch::prefs::SavedSettings;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

mod helpers;
use helpers::{TestService, TestServiceBuilder};

struct Running {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

async fn serve(t: &TestService) -> Running {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = ControlServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        t.service.clone(),
        shutdown_rx,
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn(server.run());
    Running {
        addr,
        shutdown_tx,
        handle,
    }
}

#[tokio::test]
async fn test_event_starts_scheduler_and_status_reports_it() {
    let t = TestServiceBuilder::new().build();
    let running = serve(&t).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", running.addr);

    let status: Value = client
        .get(format!("{base}/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["state"], "stopped");

    let response = client
        .post(format!("{base}/events"))
        .json(&json!({
            "webhook": "http://chat.test/hook",
            "enableApi": false,
            "enablePeriodic": false,
            "triggerImmediate": true
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    assert!(t.wait_for_ticks(1, Duration::from_secs(5)).await);

    let status: Value = client
        .get(format!("{base}/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["state"], "running");
    assert_eq!(status["interval_secs"], 30);
    assert_eq!(status["ticks_completed"], 1);
    assert_eq!(status["webhook_enabled"], true);
    assert_eq!(status["api_enabled"], false);
    assert_eq!(status["periodic_enabled"], false);
    assert_eq!(t.chat.sent().len(), 1);
    assert!(t.api.sent().is_empty());

    t.service.stop();
    running.shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(1), running.handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_push_route_distinguishes_message_types() {
    let t = TestServiceBuilder::new()
        .with_saved(SavedSettings {
            api_endpoint: "http://api.test/ingest".to_string(),
            ..Default::default()
        })
        .build();
    let running = serve(&t).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", running.addr);

    let ignored = client
        .post(format!("{base}/push"))
        .json(&json!({ "type": "PING" }))
        .send()
        .await
        .unwrap();
    assert_eq!(ignored.status(), reqwest::StatusCode::NO_CONTENT);

    let accepted = client
        .post(format!("{base}/push"))
        .json(&json!({ "type": "REQUEST_LOCATION" }))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), reqwest::StatusCode::ACCEPTED);
    assert!(t.wait_for_ticks(1, Duration::from_secs(5)).await);
    assert_eq!(t.api.sent().len(), 1);

    t.service.stop();
    running.shutdown_tx.send(true).unwrap();
}

#[tokio::test]
async fn test_token_route_reports_registration() {
    let t = TestServiceBuilder::new().build();
    let running = serve(&t).await;
    let client = reqwest::Client::new();

    let response: TokenResponse = client
        .post(format!("http://{}/token", running.addr))
        .json(&json!({ "token": "tok" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // No API endpoint has been saved.
    assert_eq!(response, TokenResponse { registered: false });

    running.shutdown_tx.send(true).unwrap();
}

#[tokio::test]
async fn test_malformed_event_is_rejected() {
    let t = TestServiceBuilder::new().build();
    let running = serve(&t).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/events", running.addr))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert!(response.status().is_client_error());
    assert!(!t.service.state().is_running());

    running.shutdown_tx.send(true).unwrap();
}
