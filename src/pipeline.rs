//! One tick: sample, format, dispatch.
//!
//! [`Sampler`] owns the derivation state (the previous CPU counters) and is
//! the only place that state changes. [`Pipeline`] adds formatting and
//! delivery on top and is what the scheduler's worker runs.

use crate::config::DispatchConfig;
use crate::core::{BatteryInfo, CpuSnapshot, DeviceIdentity, MetricsSource, Sample};
use crate::formatting::{format_text_line, round_half_up, ApiPayload};
use crate::location::LocationAcquisition;
use crate::notification::{DispatchReport, Dispatcher};
use crate::sources::resolve_device_name;
use arc_swap::ArcSwap;
use chrono::Local;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, instrument, warn};

/// CPU counters carried from one tick to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DerivationState {
    previous_total: Option<u64>,
    previous_idle: Option<u64>,
}

impl DerivationState {
    pub fn is_primed(&self) -> bool {
        self.previous_total.is_some()
    }

    /// Returns the busy percentage since the previous snapshot and stores
    /// `snapshot` as the new baseline. An unavailable snapshot leaves the
    /// baseline untouched and yields `0.0`.
    pub fn advance(&mut self, snapshot: Option<CpuSnapshot>) -> f64 {
        let Some(snapshot) = snapshot else {
            return 0.0;
        };
        let total = snapshot.total_ticks();
        let idle = snapshot.idle_ticks();
        let percent = match (self.previous_total, self.previous_idle) {
            (Some(prev_total), Some(prev_idle)) => cpu_percent(prev_total, prev_idle, total, idle),
            _ => 0.0,
        };
        self.previous_total = Some(total);
        self.previous_idle = Some(idle);
        percent
    }
}

/// `((Δtotal - Δidle) / Δtotal) × 100`, or `0.0` unless total grew.
pub fn cpu_percent(prev_total: u64, prev_idle: u64, total: u64, idle: u64) -> f64 {
    if total <= prev_total {
        return 0.0;
    }
    let total_delta = (total - prev_total) as f64;
    let idle_delta = idle.saturating_sub(prev_idle) as f64;
    ((total_delta - idle_delta) / total_delta * 100.0).clamp(0.0, 100.0)
}

/// Reads every telemetry source into a [`Sample`].
pub struct Sampler {
    source: Arc<dyn MetricsSource>,
    location: Arc<LocationAcquisition>,
    state: DerivationState,
}

impl Sampler {
    pub fn new(source: Arc<dyn MetricsSource>, location: Arc<LocationAcquisition>) -> Self {
        Self {
            source,
            location,
            state: DerivationState::default(),
        }
    }

    /// Takes the baseline CPU reading. Nothing is sent.
    pub async fn prime(&mut self) {
        let snapshot = off_runtime(&self.source, |source| source.cpu_stat()).await;
        self.state.advance(snapshot);
        debug!(primed = self.state.is_primed(), "CPU baseline taken");
    }

    pub async fn sample(&mut self) -> Sample {
        let readings = off_runtime(&self.source, Readings::take).await;
        let cpu_percent = self.state.advance(readings.cpu);
        let device = DeviceIdentity {
            name: resolve_device_name(&readings.device_id).map(str::to_string),
            id: readings.device_id,
        };

        Sample {
            timestamp: Local::now().fixed_offset(),
            cpu_percent,
            memory_pct: round_half_up(readings.memory_pct, 1),
            temp_c: readings.temp_c,
            battery: readings.battery,
            device,
            location: self.location.current_fix().await,
        }
    }
}

/// Everything a tick reads from the metrics source in one go.
struct Readings {
    cpu: Option<CpuSnapshot>,
    memory_pct: f64,
    temp_c: Option<f64>,
    battery: BatteryInfo,
    device_id: String,
}

impl Readings {
    fn take(source: &dyn MetricsSource) -> Self {
        Self {
            cpu: source.cpu_stat(),
            memory_pct: source.mem_usage_percent(),
            temp_c: source.temp_celsius(),
            battery: source.battery(),
            device_id: source.device_id(),
        }
    }
}

/// Runs blocking procfs/sysfs reads on the blocking pool. A panic in `read`
/// is resumed on the caller so the scheduler's guard still sees it.
async fn off_runtime<T, F>(source: &Arc<dyn MetricsSource>, read: F) -> T
where
    T: Send + 'static,
    F: Fn(&dyn MetricsSource) -> T + Clone + Send + 'static,
{
    let task = {
        let source = Arc::clone(source);
        let read = read.clone();
        task::spawn_blocking(move || read(source.as_ref()))
    };
    match task.await {
        Ok(value) => value,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            warn!(error = %e, "Blocking read cancelled, reading inline");
            read(source.as_ref())
        }
    }
}

/// What one tick produced.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub sample: Sample,
    pub text: String,
    pub dispatch: DispatchReport,
}

/// The sample-format-dispatch sequence run by the scheduler worker.
pub struct Pipeline {
    sampler: Sampler,
    dispatcher: Dispatcher,
    config: Arc<ArcSwap<DispatchConfig>>,
}

impl Pipeline {
    pub fn new(
        sampler: Sampler,
        dispatcher: Dispatcher,
        config: Arc<ArcSwap<DispatchConfig>>,
    ) -> Self {
        Self {
            sampler,
            dispatcher,
            config,
        }
    }

    pub async fn prime(&mut self) {
        self.sampler.prime().await;
    }

    /// Runs one tick against the configuration current at its start.
    #[instrument(skip(self))]
    pub async fn run_tick(&mut self) -> TickReport {
        let sample = self.sampler.sample().await;
        let text = format_text_line(&sample);
        let payload = ApiPayload::from_sample(&sample);
        let config = self.config.load_full();
        let dispatch = self.dispatcher.dispatch(&config, &text, &payload).await;
        debug!(cpu = sample.cpu_percent, ?dispatch, "Tick finished");
        TickReport {
            sample,
            text,
            dispatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LocationFix;
    use crate::testing::{RecordingApiSink, RecordingChatSink, StaticSource};

    fn snap(busy: u64, idle: u64) -> CpuSnapshot {
        CpuSnapshot::new([busy, 0, 0, idle, 0, 0, 0])
    }

    #[test]
    fn test_first_snapshot_yields_zero() {
        let mut state = DerivationState::default();
        assert_eq!(state.advance(Some(snap(100, 100))), 0.0);
        assert!(state.is_primed());
    }

    #[test]
    fn test_delta_percent() {
        let mut state = DerivationState::default();
        state.advance(Some(snap(100, 300)));
        // Δtotal = 200, Δidle = 150
        assert_eq!(state.advance(Some(snap(150, 450))), 25.0);
    }

    #[test]
    fn test_non_increasing_total_yields_zero() {
        let mut state = DerivationState::default();
        state.advance(Some(snap(100, 100)));
        assert_eq!(state.advance(Some(snap(100, 100))), 0.0);
        assert_eq!(state.advance(Some(snap(50, 50))), 0.0);
    }

    #[test]
    fn test_unavailable_snapshot_keeps_baseline() {
        let mut state = DerivationState::default();
        state.advance(Some(snap(100, 100)));
        let before = state;
        assert_eq!(state.advance(None), 0.0);
        assert_eq!(state, before);
    }

    #[test]
    fn test_cpu_percent_is_clamped() {
        // Idle counter went backwards relative to the total.
        assert_eq!(cpu_percent(100, 50, 110, 40), 100.0);
        for (busy, idle) in [(0, 10), (10, 0), (3, 7)] {
            let pct = cpu_percent(0, 0, busy + idle, idle);
            assert!((0.0..=100.0).contains(&pct));
        }
    }

    /// Notes the thread each CPU read runs on.
    struct ThreadRecordingSource {
        inner: StaticSource,
        threads: std::sync::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl MetricsSource for ThreadRecordingSource {
        fn cpu_stat(&self) -> Option<CpuSnapshot> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            self.inner.cpu_stat()
        }
        fn mem_usage_percent(&self) -> f64 {
            self.inner.mem_usage_percent()
        }
        fn temp_celsius(&self) -> Option<f64> {
            self.inner.temp_celsius()
        }
        fn battery(&self) -> BatteryInfo {
            self.inner.battery()
        }
        fn device_id(&self) -> String {
            self.inner.device_id()
        }
    }

    #[tokio::test]
    async fn test_source_reads_leave_the_runtime_thread() {
        let source = Arc::new(ThreadRecordingSource {
            inner: StaticSource::new().with_cpu([snap(10, 10), snap(20, 20)]),
            threads: std::sync::Mutex::new(Vec::new()),
        });
        let mut sampler = Sampler::new(source.clone(), Arc::new(LocationAcquisition::disabled()));

        sampler.prime().await;
        let sample = sampler.sample().await;

        assert_eq!(sample.cpu_percent, 50.0);
        let here = std::thread::current().id();
        let threads = source.threads.lock().unwrap();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|id| *id != here));
    }

    #[tokio::test]
    async fn test_tick_dispatches_formatted_outputs() {
        let source = Arc::new(StaticSource::new().with_cpu([snap(100, 100), snap(150, 150)]));
        let location = Arc::new(LocationAcquisition::disabled());
        location.mailbox().post(LocationFix::at(40.712345678, -74.0059731));
        let chat = Arc::new(RecordingChatSink::new());
        let api = Arc::new(RecordingApiSink::new());
        let config = Arc::new(ArcSwap::from_pointee(DispatchConfig {
            webhook_url: Some("http://chat".to_string()),
            api_endpoint: Some("http://api".to_string()),
            ..Default::default()
        }));

        let mut pipeline = Pipeline::new(
            Sampler::new(source, location),
            Dispatcher::new(chat.clone(), api.clone()),
            config,
        );
        pipeline.prime().await;
        let report = pipeline.run_tick().await;

        assert_eq!(report.sample.cpu_percent, 50.0);
        assert_eq!(report.sample.device.name.as_deref(), Some("atom1"));
        assert!(chat.sent()[0].text.contains("[Camera atom1]"));
        let body = &api.sent()[0].body;
        assert_eq!(body["lat"], serde_json::json!(40.71235));
        assert_eq!(body["memoryPct"], serde_json::json!(42.0));
    }
}
