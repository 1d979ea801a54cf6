//! Network location from an HTTP geolocation endpoint.

use super::{FixMailbox, LocationError, LocationProvider, LocationRequest};
use crate::core::LocationFix;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, instrument};

const PROVIDER: &str = "network";

#[derive(Debug, Deserialize)]
struct GeoResponse {
    #[serde(alias = "latitude")]
    lat: f64,
    #[serde(alias = "longitude")]
    lon: f64,
    accuracy: Option<f32>,
}

/// Polls a geolocation endpoint returning `{lat, lon, accuracy}`.
#[derive(Debug, Clone)]
pub struct HttpGeoProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpGeoProvider {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<LocationFix, LocationError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| LocationError::unavailable(PROVIDER, e))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(LocationError::PermissionDenied { provider: PROVIDER })
            }
            status if !status.is_success() => {
                return Err(LocationError::unavailable(PROVIDER, status))
            }
            _ => {}
        }

        let body: GeoResponse = response
            .json()
            .await
            .map_err(|e| LocationError::unavailable(PROVIDER, e))?;
        let mut fix = LocationFix::at(body.lat, body.lon).with_provider(PROVIDER);
        fix.accuracy = body.accuracy;
        Ok(fix)
    }
}

#[async_trait]
impl LocationProvider for HttpGeoProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn request_updates(
        &self,
        request: LocationRequest,
        mailbox: FixMailbox,
    ) -> Result<JoinHandle<()>, LocationError> {
        // The first lookup runs inline so a refusal reaches the caller.
        match self.fetch().await {
            Ok(fix) => mailbox.post(fix),
            Err(e @ LocationError::PermissionDenied { .. }) => return Err(e),
            Err(e) => debug!(error = %e, "Initial network fix failed"),
        }

        let provider = self.clone();
        Ok(tokio::spawn(async move {
            let mut ticker = interval(request.interval.max(request.min_interval));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match provider.fetch().await {
                    Ok(fix) => mailbox.post(fix),
                    Err(e) => debug!(error = %e, "Network fix failed"),
                }
            }
        }))
    }

    async fn last_known(&self) -> Result<Option<LocationFix>, LocationError> {
        self.fetch().await.map(Some)
    }
}
