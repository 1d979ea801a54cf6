//! Scheduling of ticks.
//!
//! The lifecycle is an explicit two-state machine whose transitions are pure
//! functions returning the [`Actions`] to perform. [`Scheduler`] applies
//! those actions: it owns one worker task that runs every tick serially,
//! fed by an optional periodic interval and an unbounded queue of immediate
//! triggers (one message, one tick).

use crate::pipeline::Pipeline;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running { interval_secs: u64 },
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Actions {
    /// Spawn the worker, which primes the CPU baseline before anything else.
    pub launch_worker: bool,
    /// Period of the repeating tick, if periodic sending is enabled.
    pub periodic: Option<Duration>,
    /// Queue exactly one extra tick.
    pub enqueue_tick: bool,
    /// Signal the worker to exit after any in-flight tick.
    pub halt_worker: bool,
}

impl SchedulerState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// A start command. While already running the timer is left alone and
    /// only the trigger takes effect.
    pub fn on_start(self, enable_periodic: bool, interval_secs: u64, trigger: bool) -> (Self, Actions) {
        match self {
            Self::Stopped => (
                Self::Running { interval_secs },
                Actions {
                    launch_worker: true,
                    periodic: enable_periodic.then(|| Duration::from_secs(interval_secs)),
                    enqueue_tick: trigger,
                    halt_worker: false,
                },
            ),
            running @ Self::Running { .. } => (
                running,
                Actions {
                    enqueue_tick: trigger,
                    ..Actions::default()
                },
            ),
        }
    }

    pub fn on_trigger(self) -> Actions {
        Actions {
            enqueue_tick: self.is_running(),
            ..Actions::default()
        }
    }

    pub fn on_stop(self) -> (Self, Actions) {
        let actions = Actions {
            halt_worker: self.is_running(),
            ..Actions::default()
        };
        (Self::Stopped, actions)
    }
}

struct Worker {
    triggers: mpsc::UnboundedSender<()>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    state: SchedulerState,
    worker: Option<Worker>,
}

/// Owns the worker task and applies state transitions.
pub struct Scheduler {
    pipeline: Arc<tokio::sync::Mutex<Pipeline>>,
    inner: Mutex<Inner>,
    completed: Arc<AtomicU64>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("completed", &self.ticks_completed())
            .finish()
    }
}

impl Scheduler {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(tokio::sync::Mutex::new(pipeline)),
            inner: Mutex::new(Inner {
                state: SchedulerState::Stopped,
                worker: None,
            }),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.lock().state
    }

    /// Ticks that ran to completion, whatever their delivery outcome.
    pub fn ticks_completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Applies a start command. Must be called within a Tokio runtime.
    pub fn start(&self, enable_periodic: bool, interval_secs: u64, trigger: bool) {
        let mut inner = self.lock();
        let (next, actions) = inner.state.on_start(enable_periodic, interval_secs, trigger);
        inner.state = next;
        self.apply(&mut inner, actions);
    }

    /// Queues one extra tick. Returns false when stopped.
    pub fn trigger(&self) -> bool {
        let mut inner = self.lock();
        let actions = inner.state.on_trigger();
        self.apply(&mut inner, actions);
        actions.enqueue_tick
    }

    /// Stops future ticks. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        let mut inner = self.lock();
        let (next, actions) = inner.state.on_stop();
        inner.state = next;
        self.apply(&mut inner, actions);
    }

    fn apply(&self, inner: &mut Inner, actions: Actions) {
        if actions.halt_worker {
            if let Some(worker) = inner.worker.take() {
                let _ = worker.shutdown.send(true);
                info!("Scheduler stopped");
                // The in-flight tick, if any, finishes on its own.
                drop(worker.handle);
            }
        }

        if actions.launch_worker {
            let (triggers, trigger_rx) = mpsc::unbounded_channel();
            let (shutdown, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(run_worker(
                self.pipeline.clone(),
                trigger_rx,
                shutdown_rx,
                actions.periodic,
                self.completed.clone(),
            ));
            info!(periodic = ?actions.periodic, "Scheduler started");
            inner.worker = Some(Worker {
                triggers,
                shutdown,
                handle,
            });
        }

        if actions.enqueue_tick {
            match &inner.worker {
                Some(worker) if worker.triggers.send(()).is_ok() => {
                    debug!("Immediate tick queued")
                }
                _ => error!("Immediate tick requested but the worker is gone"),
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn next_periodic(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_worker(
    pipeline: Arc<tokio::sync::Mutex<Pipeline>>,
    mut triggers: mpsc::UnboundedReceiver<()>,
    mut shutdown: watch::Receiver<bool>,
    periodic: Option<Duration>,
    completed: Arc<AtomicU64>,
) {
    pipeline.lock().await.prime().await;

    let mut ticker = periodic.map(|period| {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let reason = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            Some(()) = triggers.recv() => "immediate",
            _ = next_periodic(&mut ticker) => "periodic",
        };
        run_guarded(&pipeline, reason, &completed).await;
    }
    debug!("Scheduler worker exited");
}

/// Runs one tick, containing any panic so the worker survives it.
#[instrument(skip(pipeline, completed))]
async fn run_guarded(
    pipeline: &tokio::sync::Mutex<Pipeline>,
    reason: &'static str,
    completed: &AtomicU64,
) {
    let tick = async { pipeline.lock().await.run_tick().await };
    match AssertUnwindSafe(tick).catch_unwind().await {
        Ok(report) => {
            completed.fetch_add(1, Ordering::SeqCst);
            info!(
                webhook = ?report.dispatch.webhook,
                api = ?report.dispatch.api,
                "Tick complete"
            );
        }
        Err(_) => error!("Tick panicked; the scheduler keeps running"),
    }
}
