//! Location acquisition
//!
//! Providers push fixes into a shared [`FixMailbox`]; the tick reads whatever
//! is there without waiting. [`LocationAcquisition`] owns at most one
//! subscription (a set of provider tasks) and offers a one-shot query across
//! the providers' last-known fixes for when no subscription has produced
//! anything yet.

pub mod fused;
pub mod gpsd;
pub mod network;
pub mod passive;

use crate::config::LocationConfig;
use crate::core::LocationFix;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use fused::FusedProvider;
pub use gpsd::GpsdProvider;
pub use network::HttpGeoProvider;
pub use passive::PassiveProvider;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("permission denied by {provider} provider")]
    PermissionDenied { provider: &'static str },
    #[error("{provider} provider unavailable: {reason}")]
    Unavailable {
        provider: &'static str,
        reason: String,
    },
}

impl LocationError {
    pub(crate) fn unavailable(provider: &'static str, reason: impl ToString) -> Self {
        Self::Unavailable {
            provider,
            reason: reason.to_string(),
        }
    }
}

/// How often a subscription wants fixes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationRequest {
    pub interval: Duration,
    /// Fixes arriving closer together than this are dropped.
    pub min_interval: Duration,
    /// Hold back inaccurate fixes until an accurate one arrives or one
    /// interval has passed.
    pub wait_for_accurate: bool,
}

impl LocationRequest {
    pub const UPDATE_INTERVAL: Duration = Duration::from_secs(10);

    /// The request used for the fused provider.
    pub fn high_accuracy() -> Self {
        Self {
            interval: Self::UPDATE_INTERVAL,
            min_interval: Duration::from_secs(5),
            wait_for_accurate: true,
        }
    }

    /// The request used for each individual provider on the fallback path.
    pub fn legacy() -> Self {
        Self {
            interval: Self::UPDATE_INTERVAL,
            min_interval: Self::UPDATE_INTERVAL,
            wait_for_accurate: false,
        }
    }
}

/// Latest-wins slot for location fixes. Writers never block and never queue;
/// each post replaces the previous fix.
#[derive(Debug, Clone)]
pub struct FixMailbox {
    tx: Arc<watch::Sender<Option<LocationFix>>>,
}

impl Default for FixMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl FixMailbox {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn post(&self, fix: LocationFix) {
        self.tx.send_replace(Some(fix));
    }

    pub fn latest(&self) -> Option<LocationFix> {
        self.tx.borrow().clone()
    }

    /// A receiver notified on every post.
    pub fn subscribe(&self) -> watch::Receiver<Option<LocationFix>> {
        self.tx.subscribe()
    }
}

/// A source of location fixes.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Provider name reported in fixes, e.g. `gps`.
    fn name(&self) -> &'static str;

    /// Starts streaming fixes into `mailbox`. The returned task is the
    /// subscription; aborting it stops the updates.
    async fn request_updates(
        &self,
        request: LocationRequest,
        mailbox: FixMailbox,
    ) -> Result<JoinHandle<()>, LocationError>;

    /// The most recent fix the provider knows about, if any.
    async fn last_known(&self) -> Result<Option<LocationFix>, LocationError>;
}

/// Picks the fix with the smallest accuracy. Fixes without an accuracy rank
/// last; on a tie the earlier fix wins.
pub fn pick_most_accurate(fixes: impl IntoIterator<Item = LocationFix>) -> Option<LocationFix> {
    fixes.into_iter().fold(None, |best, fix| match best {
        Some(current) if current.ranking_accuracy() <= fix.ranking_accuracy() => Some(current),
        _ => Some(fix),
    })
}

/// Aborts the wrapped tasks when dropped.
#[derive(Debug, Default)]
pub(crate) struct AbortOnDrop(pub(crate) Vec<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Manages the long-lived subscription and the one-shot fallback query.
pub struct LocationAcquisition {
    fused: Option<Arc<dyn LocationProvider>>,
    legacy: Vec<Arc<dyn LocationProvider>>,
    one_shot: Vec<Arc<dyn LocationProvider>>,
    mailbox: FixMailbox,
    subscription: Mutex<Subscription>,
}

/// The running provider tasks. `generation` moves on every stop so a start
/// that finishes late can tell it was superseded.
#[derive(Debug, Default)]
struct Subscription {
    generation: u64,
    tasks: AbortOnDrop,
    pending: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for LocationAcquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationAcquisition")
            .field("fused", &self.fused.as_ref().map(|p| p.name()))
            .field("legacy", &self.legacy.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("one_shot", &self.one_shot.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl LocationAcquisition {
    /// `fused` is tried first; `legacy` providers are subscribed together
    /// when it fails. `one_shot` providers answer the last-known query.
    pub fn new(
        fused: Option<Arc<dyn LocationProvider>>,
        legacy: Vec<Arc<dyn LocationProvider>>,
        one_shot: Vec<Arc<dyn LocationProvider>>,
    ) -> Self {
        Self {
            fused,
            legacy,
            one_shot,
            mailbox: FixMailbox::new(),
            subscription: Mutex::new(Subscription::default()),
        }
    }

    /// An acquisition with no providers; every query yields no fix.
    pub fn disabled() -> Self {
        Self::new(None, Vec::new(), Vec::new())
    }

    /// Wires up the providers named in `config`.
    pub fn from_config(config: &LocationConfig, client: reqwest::Client) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let gps: Option<Arc<dyn LocationProvider>> = config
            .gpsd_addr
            .as_ref()
            .map(|addr| Arc::new(GpsdProvider::new(addr.clone())) as Arc<dyn LocationProvider>);
        let network: Option<Arc<dyn LocationProvider>> =
            config.network_url.as_ref().map(|url| {
                Arc::new(HttpGeoProvider::new(client.clone(), url.clone()))
                    as Arc<dyn LocationProvider>
            });
        let passive: Option<Arc<dyn LocationProvider>> = config
            .passive_path
            .as_ref()
            .map(|path| Arc::new(PassiveProvider::new(path.clone())) as Arc<dyn LocationProvider>);

        let legacy: Vec<_> = gps.iter().chain(network.iter()).cloned().collect();
        let fused = (config.fused && !legacy.is_empty()).then(|| {
            Arc::new(FusedProvider::new(legacy.clone(), config.accurate_fix_meters))
                as Arc<dyn LocationProvider>
        });
        let one_shot = gps.into_iter().chain(network).chain(passive).collect();

        Self::new(fused, legacy, one_shot)
    }

    pub fn mailbox(&self) -> &FixMailbox {
        &self.mailbox
    }

    /// The last fix delivered by the subscription.
    pub fn latest(&self) -> Option<LocationFix> {
        self.mailbox.latest()
    }

    /// True while a subscription runs or is still being set up.
    pub fn is_active(&self) -> bool {
        let slot = self.lock_subscription();
        slot.pending.as_ref().is_some_and(|h| !h.is_finished())
            || slot.tasks.0.iter().any(|h| !h.is_finished())
    }

    /// Starts a subscription, replacing any previous one, and waits for
    /// the providers to answer. Failures degrade to no subscription and are
    /// only logged.
    pub async fn start(&self) {
        let generation = self.teardown();
        let handles = self.subscribe().await;
        self.install(generation, handles);
    }

    /// Like [`start`](Self::start) but returns at once; the providers are
    /// asked from a background task so slow ones never hold up the caller.
    /// A [`stop`](Self::stop) issued meanwhile cancels the pending start.
    pub fn start_in_background(self: &Arc<Self>) {
        let generation = self.teardown();
        let this = Arc::clone(self);
        let pending = tokio::spawn(async move {
            let handles = this.subscribe().await;
            this.install(generation, handles);
        });

        let mut slot = self.lock_subscription();
        if slot.generation == generation {
            slot.pending = Some(pending);
        } else {
            pending.abort();
        }
    }

    async fn subscribe(&self) -> Vec<JoinHandle<()>> {
        if let Some(fused) = &self.fused {
            match fused
                .request_updates(LocationRequest::high_accuracy(), self.mailbox.clone())
                .await
            {
                Ok(handle) => {
                    info!(provider = fused.name(), "Location updates started");
                    return vec![handle];
                }
                Err(e) => warn!(error = %e, "Fused location unavailable, falling back"),
            }
        }

        let mut handles = Vec::new();
        for provider in &self.legacy {
            match provider
                .request_updates(LocationRequest::legacy(), self.mailbox.clone())
                .await
            {
                Ok(handle) => {
                    info!(provider = provider.name(), "Location updates started");
                    handles.push(handle);
                }
                Err(e @ LocationError::PermissionDenied { .. }) => {
                    warn!(error = %e, "Location permission denied")
                }
                Err(e) => debug!(error = %e, "Provider not started"),
            }
        }
        if handles.is_empty() && !self.legacy.is_empty() {
            warn!("No location provider could be started");
        }
        handles
    }

    /// Keeps `handles` only if no stop or restart happened since
    /// `generation` was taken; otherwise they are aborted.
    fn install(&self, generation: u64, handles: Vec<JoinHandle<()>>) {
        let stale = {
            let mut slot = self.lock_subscription();
            if slot.generation == generation {
                slot.tasks.0.extend(handles);
                None
            } else {
                Some(AbortOnDrop(handles))
            }
        };
        if stale.is_some() {
            debug!("Location start superseded, dropping its subscription");
        }
    }

    /// Tears down the subscription and cancels a pending start. Safe to call
    /// repeatedly.
    pub fn stop(&self) {
        self.teardown();
    }

    fn teardown(&self) -> u64 {
        let (generation, previous, pending) = {
            let mut slot = self.lock_subscription();
            slot.generation += 1;
            (
                slot.generation,
                std::mem::take(&mut slot.tasks),
                slot.pending.take(),
            )
        };
        if let Some(pending) = pending {
            pending.abort();
        }
        if !previous.0.is_empty() {
            debug!(tasks = previous.0.len(), "Stopping location updates");
        }
        generation
    }

    /// Queries every one-shot provider and keeps the most accurate fix.
    pub async fn best_last_known(&self) -> Option<LocationFix> {
        let mut fixes = Vec::new();
        for provider in &self.one_shot {
            match provider.last_known().await {
                Ok(Some(fix)) => fixes.push(fix),
                Ok(None) => {}
                Err(e) => debug!(provider = provider.name(), error = %e, "Skipping provider"),
            }
        }
        pick_most_accurate(fixes)
    }

    /// The fix a tick should report: the subscription's latest if it has
    /// coordinates, else the one-shot query.
    pub async fn current_fix(&self) -> Option<LocationFix> {
        match self.latest() {
            Some(fix) if fix.coordinates().is_some() => Some(fix),
            _ => self.best_last_known().await,
        }
    }

    fn lock_subscription(&self) -> std::sync::MutexGuard<'_, Subscription> {
        self.subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for LocationAcquisition {
    fn drop(&mut self) {
        self.stop();
    }
}
