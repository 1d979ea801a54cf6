//! Passive location: a JSON fix file maintained by another process.

use super::{FixMailbox, LocationError, LocationProvider, LocationRequest};
use crate::core::LocationFix;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

const PROVIDER: &str = "passive";

/// Reads fixes someone else has already acquired. Never triggers a lookup.
#[derive(Debug, Clone)]
pub struct PassiveProvider {
    path: PathBuf,
}

impl PassiveProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_fix(&self) -> Result<Option<LocationFix>, LocationError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(LocationError::PermissionDenied { provider: PROVIDER })
            }
            Err(e) => return Err(LocationError::unavailable(PROVIDER, e)),
        };
        let mut fix: LocationFix = serde_json::from_str(&contents)
            .map_err(|e| LocationError::unavailable(PROVIDER, e))?;
        if fix.coordinates().is_none() {
            return Ok(None);
        }
        if fix.provider.is_none() {
            fix.provider = Some(PROVIDER.to_string());
        }
        Ok(Some(fix))
    }
}

#[async_trait]
impl LocationProvider for PassiveProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn request_updates(
        &self,
        request: LocationRequest,
        mailbox: FixMailbox,
    ) -> Result<JoinHandle<()>, LocationError> {
        let provider = self.clone();
        Ok(tokio::spawn(async move {
            let mut ticker = interval(request.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<LocationFix> = None;
            loop {
                ticker.tick().await;
                match provider.read_fix().await {
                    Ok(Some(fix)) if last.as_ref() != Some(&fix) => {
                        last = Some(fix.clone());
                        mailbox.post(fix);
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "Passive fix unavailable"),
                }
            }
        }))
    }

    async fn last_known(&self) -> Result<Option<LocationFix>, LocationError> {
        self.read_fix().await
    }
}
