//! Fakes for the service's seams, shared by unit and integration tests.
#![allow(dead_code)]

use crate::core::{ApiSink, BatteryInfo, ChatSink, CpuSnapshot, LocationFix, MetricsSource};
use crate::location::{FixMailbox, LocationError, LocationProvider, LocationRequest};
use crate::notification::SendError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

fn injected_failure() -> SendError {
    SendError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "injected failure".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCall {
    pub url: String,
    pub text: String,
}

/// Records every post; optionally fails each one.
#[derive(Debug, Default)]
pub struct RecordingChatSink {
    sent: Mutex<Vec<ChatCall>>,
    fail: AtomicBool,
}

impl RecordingChatSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_fail(true);
        sink
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<ChatCall> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatSink for RecordingChatSink {
    async fn post_text(&self, webhook_url: &str, text: &str) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(ChatCall {
            url: webhook_url.to_string(),
            text: text.to_string(),
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub endpoint: String,
    pub body: serde_json::Value,
    pub api_key: Option<String>,
}

/// Records every JSON post; optionally fails each one.
#[derive(Debug, Default)]
pub struct RecordingApiSink {
    sent: Mutex<Vec<ApiCall>>,
    fail: AtomicBool,
}

impl RecordingApiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_fail(true);
        sink
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<ApiCall> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiSink for RecordingApiSink {
    async fn post_json(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
        api_key: Option<&str>,
    ) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(ApiCall {
            endpoint: endpoint.to_string(),
            body: body.clone(),
            api_key: api_key.map(str::to_string),
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        Ok(())
    }
}

/// A metrics source with fixed readings. CPU snapshots are served from a
/// queue; once it runs dry the last one repeats.
#[derive(Debug)]
pub struct StaticSource {
    cpu: Mutex<VecDeque<CpuSnapshot>>,
    last_cpu: Mutex<Option<CpuSnapshot>>,
    cpu_reads: AtomicUsize,
    pub memory_pct: f64,
    pub temp_c: Option<f64>,
    pub battery: BatteryInfo,
    pub device_id: String,
}

impl Default for StaticSource {
    fn default() -> Self {
        Self {
            cpu: Mutex::new(VecDeque::new()),
            last_cpu: Mutex::new(None),
            cpu_reads: AtomicUsize::new(0),
            memory_pct: 42.0,
            temp_c: Some(40.0),
            battery: BatteryInfo {
                level: 90,
                voltage_mv: 4100,
                charging: false,
            },
            device_id: "9ea5006ef6b50d20".to_string(),
        }
    }
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues CPU snapshots to be returned in order.
    pub fn with_cpu(self, snapshots: impl IntoIterator<Item = CpuSnapshot>) -> Self {
        self.cpu.lock().unwrap().extend(snapshots);
        self
    }

    /// How many times the CPU counters were read.
    pub fn cpu_reads(&self) -> usize {
        self.cpu_reads.load(Ordering::SeqCst)
    }
}

impl MetricsSource for StaticSource {
    fn cpu_stat(&self) -> Option<CpuSnapshot> {
        self.cpu_reads.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last_cpu.lock().unwrap();
        if let Some(next) = self.cpu.lock().unwrap().pop_front() {
            *last = Some(next);
        }
        *last
    }

    fn mem_usage_percent(&self) -> f64 {
        self.memory_pct
    }

    fn temp_celsius(&self) -> Option<f64> {
        self.temp_c
    }

    fn battery(&self) -> BatteryInfo {
        self.battery
    }

    fn device_id(&self) -> String {
        self.device_id.clone()
    }
}

#[derive(Debug, Clone)]
enum FakeBehavior {
    Denied,
    Streaming(LocationFix),
    LastKnown(LocationFix),
    Stalled,
}

/// A location provider with scripted behaviour.
#[derive(Debug)]
pub struct FakeLocationProvider {
    name: &'static str,
    behavior: FakeBehavior,
    subscriptions: Arc<AtomicUsize>,
}

impl FakeLocationProvider {
    fn with_behavior(name: &'static str, behavior: FakeBehavior) -> Self {
        Self {
            name,
            behavior,
            subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Refuses both subscriptions and queries.
    pub fn denied(name: &'static str) -> Self {
        Self::with_behavior(name, FakeBehavior::Denied)
    }

    /// Posts `fix` once on subscription and then stays subscribed.
    pub fn streaming(name: &'static str, fix: LocationFix) -> Self {
        Self::with_behavior(name, FakeBehavior::Streaming(fix))
    }

    /// Cannot subscribe but reports `fix` as last known.
    pub fn with_last_known(name: &'static str, fix: LocationFix) -> Self {
        Self::with_behavior(name, FakeBehavior::LastKnown(fix))
    }

    /// Never answers a subscription request and knows no fix.
    pub fn stalled(name: &'static str) -> Self {
        Self::with_behavior(name, FakeBehavior::Stalled)
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationProvider for FakeLocationProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn request_updates(
        &self,
        _request: LocationRequest,
        mailbox: FixMailbox,
    ) -> Result<JoinHandle<()>, LocationError> {
        match &self.behavior {
            FakeBehavior::Denied => Err(LocationError::PermissionDenied {
                provider: self.name,
            }),
            FakeBehavior::LastKnown(_) => Err(LocationError::unavailable(self.name, "scripted")),
            FakeBehavior::Stalled => std::future::pending().await,
            FakeBehavior::Streaming(fix) => {
                self.subscriptions.fetch_add(1, Ordering::SeqCst);
                mailbox.post(fix.clone());
                Ok(tokio::spawn(async move {
                    let _mailbox = mailbox;
                    std::future::pending::<()>().await;
                }))
            }
        }
    }

    async fn last_known(&self) -> Result<Option<LocationFix>, LocationError> {
        match &self.behavior {
            FakeBehavior::Denied => Err(LocationError::PermissionDenied {
                provider: self.name,
            }),
            FakeBehavior::Streaming(fix) | FakeBehavior::LastKnown(fix) => Ok(Some(fix.clone())),
            FakeBehavior::Stalled => Ok(None),
        }
    }
}
