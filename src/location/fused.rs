//! Fused location: merges several providers into one throttled stream.

use super::{
    pick_most_accurate, AbortOnDrop, FixMailbox, LocationError, LocationProvider, LocationRequest,
};
use crate::core::LocationFix;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

const PROVIDER: &str = "fused";

/// Decides which incoming fixes are forwarded.
#[derive(Debug)]
struct FixGate {
    request: LocationRequest,
    accurate_meters: f32,
    started: Instant,
    settled: bool,
    last_emit: Option<Instant>,
    /// The latest inaccurate fix withheld during the accuracy wait.
    held: Option<LocationFix>,
}

impl FixGate {
    fn new(request: LocationRequest, accurate_meters: f32, now: Instant) -> Self {
        Self {
            request,
            accurate_meters,
            started: now,
            settled: !request.wait_for_accurate,
            last_emit: None,
            held: None,
        }
    }

    fn admit(&mut self, fix: &LocationFix, now: Instant) -> bool {
        if !self.settled {
            let accurate = fix.accuracy.is_some_and(|a| a <= self.accurate_meters);
            if !accurate && now < self.wait_deadline() {
                self.held = Some(fix.clone());
                return false;
            }
            self.settled = true;
            self.held = None;
        }
        if self
            .last_emit
            .is_some_and(|last| now.duration_since(last) < self.request.min_interval)
        {
            return false;
        }
        self.last_emit = Some(now);
        true
    }

    fn wait_deadline(&self) -> Instant {
        self.started + self.request.interval
    }

    /// When a fix is being withheld, the instant it should be let through.
    fn release_at(&self) -> Option<Instant> {
        self.held.as_ref().map(|_| self.wait_deadline())
    }

    /// Lets the withheld fix through once the wait is over.
    fn release(&mut self, now: Instant) -> Option<LocationFix> {
        if now < self.wait_deadline() {
            return None;
        }
        let fix = self.held.take()?;
        self.admit(&fix, now).then_some(fix)
    }
}

/// Combines inner providers (typically gps and network).
pub struct FusedProvider {
    inner: Vec<Arc<dyn LocationProvider>>,
    accurate_fix_meters: f32,
}

impl std::fmt::Debug for FusedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusedProvider")
            .field("inner", &self.inner.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("accurate_fix_meters", &self.accurate_fix_meters)
            .finish()
    }
}

impl FusedProvider {
    pub fn new(inner: Vec<Arc<dyn LocationProvider>>, accurate_fix_meters: f32) -> Self {
        Self {
            inner,
            accurate_fix_meters,
        }
    }
}

#[async_trait]
impl LocationProvider for FusedProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn request_updates(
        &self,
        request: LocationRequest,
        mailbox: FixMailbox,
    ) -> Result<JoinHandle<()>, LocationError> {
        let merged = FixMailbox::new();
        let mut rx = merged.subscribe();

        let mut guard = AbortOnDrop::default();
        let mut last_error = None;
        for provider in &self.inner {
            match provider.request_updates(request, merged.clone()).await {
                Ok(handle) => guard.0.push(handle),
                Err(e) => {
                    debug!(provider = provider.name(), error = %e, "Inner provider not started");
                    last_error = Some(e);
                }
            }
        }
        if guard.0.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| LocationError::unavailable(PROVIDER, "no inner providers")));
        }

        let accurate_meters = self.accurate_fix_meters;
        Ok(tokio::spawn(async move {
            let _inner = guard;
            let mut gate = FixGate::new(request, accurate_meters, Instant::now());
            loop {
                let release_at = gate.release_at();
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let Some(fix) = rx.borrow_and_update().clone() else {
                            continue;
                        };
                        if gate.admit(&fix, Instant::now()) {
                            mailbox.post(fix);
                        }
                    }
                    _ = sleep_until(release_at.unwrap_or_else(Instant::now)), if release_at.is_some() => {
                        if let Some(fix) = gate.release(Instant::now()) {
                            debug!("Accuracy wait over, forwarding held fix");
                            mailbox.post(fix);
                        }
                    }
                }
            }
        }))
    }

    async fn last_known(&self) -> Result<Option<LocationFix>, LocationError> {
        let mut fixes = Vec::new();
        for provider in &self.inner {
            if let Ok(Some(fix)) = provider.last_known().await {
                fixes.push(fix);
            }
        }
        Ok(pick_most_accurate(fixes))
    }
}
