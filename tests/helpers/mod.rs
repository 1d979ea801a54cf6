#![allow(dead_code)]
//! Test helpers for running a fully wired service with fake seams.

use statwatch::{
    config::{Config, ConfigEvent},
    core::CpuSnapshot,
    location::LocationAcquisition,
    prefs::{FilePrefs, SavedSettings},
    service::Service,
    testing::{RecordingApiSink, RecordingChatSink, StaticSource},
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Routes log output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("statwatch=debug"))
        .with_test_writer()
        .try_init();
}

pub const WEBHOOK: &str = "http://chat.test/hook";
pub const API: &str = "http://api.test/ingest";

/// A service built against recording sinks, a static source and a
/// settings file in a private temp dir.
pub struct TestService {
    pub service: Arc<Service>,
    pub chat: Arc<RecordingChatSink>,
    pub api: Arc<RecordingApiSink>,
    pub source: Arc<StaticSource>,
    pub dir: TempDir,
}

impl TestService {
    /// Polls until `n` ticks have completed or `limit` elapses.
    pub async fn wait_for_ticks(&self, n: u64, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.service.ticks_completed() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.service.ticks_completed() >= n
    }
}

/// A builder for creating `TestService` instances.
pub struct TestServiceBuilder {
    config: Config,
    source: StaticSource,
    location: Option<LocationAcquisition>,
    chat: Arc<RecordingChatSink>,
    api: Arc<RecordingApiSink>,
    saved: Option<SavedSettings>,
}

impl Default for TestServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            source: StaticSource::new().with_cpu([
                CpuSnapshot::new([100, 0, 0, 100, 0, 0, 0]),
                CpuSnapshot::new([150, 0, 0, 150, 0, 0, 0]),
            ]),
            location: None,
            chat: Arc::new(RecordingChatSink::new()),
            api: Arc::new(RecordingApiSink::new()),
            saved: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_source(mut self, source: StaticSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_location(mut self, location: LocationAcquisition) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_chat(mut self, chat: Arc<RecordingChatSink>) -> Self {
        self.chat = chat;
        self
    }

    pub fn with_api(mut self, api: Arc<RecordingApiSink>) -> Self {
        self.api = api;
        self
    }

    /// Persists `settings` before the service is built.
    pub fn with_saved(mut self, settings: SavedSettings) -> Self {
        self.saved = Some(settings);
        self
    }

    pub fn build(self) -> TestService {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let prefs = Arc::new(FilePrefs::open(dir.path().join("prefs.json")));
        if let Some(settings) = &self.saved {
            settings.save(prefs.as_ref()).unwrap();
        }
        let source = Arc::new(self.source);

        let service = Service::builder(self.config)
            .source_override(source.clone())
            .chat_override(self.chat.clone())
            .api_override(self.api.clone())
            .location_override(self.location.unwrap_or_else(LocationAcquisition::disabled))
            .prefs_override(prefs)
            .build()
            .unwrap();

        TestService {
            service: Arc::new(service),
            chat: self.chat,
            api: self.api,
            source,
            dir,
        }
    }
}

/// A start event pointing both sinks at the test targets.
pub fn start_event(enable_periodic: bool, trigger_immediate: bool) -> ConfigEvent {
    ConfigEvent {
        webhook: Some(WEBHOOK.to_string()),
        api: Some(API.to_string()),
        api_key: Some("test-key".to_string()),
        enable_webhook: Some(true),
        enable_api: Some(true),
        enable_periodic: Some(enable_periodic),
        trigger_immediate: Some(trigger_immediate),
    }
}
