//! The service object, decoupled from the entry point.
//!
//! A [`Service`] is built once per process and owns everything a tick
//! needs: the HTTP client (through the sinks), the live dispatch
//! configuration, the scheduler and location acquisition. Inbound events
//! (start/configure commands, push messages, token refreshes) all arrive
//! as method calls on it.

use crate::config::{Config, ConfigEvent, DispatchConfig};
use crate::core::{ApiSink, ChatSink, MetricsSource};
use crate::formatting::TokenRegistration;
use crate::location::LocationAcquisition;
use crate::notification::{http_client, ApiClient, Dispatcher, WebhookClient};
use crate::pipeline::{Pipeline, Sampler};
use crate::prefs::{FilePrefs, KeyValueStore, SavedSettings};
use crate::scheduler::{Scheduler, SchedulerState};
use crate::sources::SysfsReader;
use anyhow::Result;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// A data message delivered by the push collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl PushMessage {
    pub fn is_location_request(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|kind| kind.eq_ignore_ascii_case("REQUEST_LOCATION"))
    }
}

pub struct Service {
    config: Arc<ArcSwap<DispatchConfig>>,
    scheduler: Scheduler,
    location: Arc<LocationAcquisition>,
    prefs: Arc<dyn KeyValueStore>,
    api: Arc<dyn ApiSink>,
    device_id: String,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("device_id", &self.device_id)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Service {
    pub fn builder(config: Config) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    /// The start/configure command. Present fields overwrite the live
    /// configuration and the scheduler is started if it is not already
    /// running. Location updates are then restarted in the background, so
    /// the first tick never waits on a provider.
    #[instrument(skip(self))]
    pub async fn handle_event(&self, event: &ConfigEvent) {
        self.config.rcu(|current| {
            let mut next = DispatchConfig::clone(current);
            next.apply(event);
            next
        });
        let config = self.config.load_full();

        self.scheduler.start(
            config.enable_periodic,
            config.interval_seconds,
            event.wants_immediate(),
        );
        self.location.start_in_background();
    }

    /// Queues one extra tick without touching the configuration.
    pub fn trigger(&self) -> bool {
        self.scheduler.trigger()
    }

    /// Acts on a push message. Returns false when the message is ignored.
    pub async fn handle_push(&self, message: &PushMessage) -> bool {
        if !message.is_location_request() {
            info!(kind = ?message.kind, "Ignoring push message");
            return false;
        }
        let event = SavedSettings::load(self.prefs.as_ref()).request_location_event();
        self.handle_event(&event).await;
        true
    }

    /// Posts a refreshed push token to the persisted API endpoint.
    /// Returns whether the registration was delivered.
    #[instrument(skip_all)]
    pub async fn register_push_token(&self, token: &str) -> bool {
        let settings = SavedSettings::load(self.prefs.as_ref());
        if settings.api_endpoint.is_empty() {
            info!("No API endpoint saved; skipping token registration");
            return false;
        }
        let body = match serde_json::to_value(TokenRegistration::new(&self.device_id, token)) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to encode token registration");
                return false;
            }
        };
        let api_key = Some(settings.api_key.as_str()).filter(|key| !key.is_empty());
        let delivered = match self
            .api
            .post_json(&settings.api_endpoint, &body, api_key)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(sink = "api", error = %e, "Token registration failed");
                false
            }
        };
        info!(sink = "api", delivered, "Token registration posted");
        delivered
    }

    /// Stops ticks and location updates. Idempotent.
    pub fn stop(&self) {
        self.scheduler.stop();
        self.location.stop();
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn ticks_completed(&self) -> u64 {
        self.scheduler.ticks_completed()
    }

    pub fn location_active(&self) -> bool {
        self.location.is_active()
    }

    /// A snapshot of the live dispatch configuration.
    pub fn dispatch_config(&self) -> Arc<DispatchConfig> {
        self.config.load_full()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Builder for [`Service`], with overrides for every external seam.
pub struct ServiceBuilder {
    config: Config,
    source_override: Option<Arc<dyn MetricsSource>>,
    chat_override: Option<Arc<dyn ChatSink>>,
    api_override: Option<Arc<dyn ApiSink>>,
    location_override: Option<LocationAcquisition>,
    prefs_override: Option<Arc<dyn KeyValueStore>>,
}

impl ServiceBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            source_override: None,
            chat_override: None,
            api_override: None,
            location_override: None,
            prefs_override: None,
        }
    }

    /// Overrides the telemetry source for testing.
    pub fn source_override(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source_override = Some(source);
        self
    }

    /// Overrides the chat sink for testing.
    pub fn chat_override(mut self, sink: Arc<dyn ChatSink>) -> Self {
        self.chat_override = Some(sink);
        self
    }

    /// Overrides the API sink for testing.
    pub fn api_override(mut self, sink: Arc<dyn ApiSink>) -> Self {
        self.api_override = Some(sink);
        self
    }

    pub fn location_override(mut self, location: LocationAcquisition) -> Self {
        self.location_override = Some(location);
        self
    }

    pub fn prefs_override(mut self, prefs: Arc<dyn KeyValueStore>) -> Self {
        self.prefs_override = Some(prefs);
        self
    }

    #[instrument(skip_all)]
    pub fn build(self) -> Result<Service> {
        let config = self.config;
        let client = http_client(config.http.timeout())?;

        let source = self
            .source_override
            .unwrap_or_else(|| Arc::new(SysfsReader::new(config.sources.root.clone())));
        let chat = self
            .chat_override
            .unwrap_or_else(|| Arc::new(WebhookClient::new(client.clone())));
        let api = self
            .api_override
            .unwrap_or_else(|| Arc::new(ApiClient::new(client.clone())));
        let location = Arc::new(
            self.location_override
                .unwrap_or_else(|| LocationAcquisition::from_config(&config.location, client)),
        );
        let prefs = self
            .prefs_override
            .unwrap_or_else(|| Arc::new(FilePrefs::open(&config.prefs.path)));

        let mut dispatch = config.dispatch.clone();
        if !prefs.is_empty() {
            SavedSettings::load(prefs.as_ref()).apply_to(&mut dispatch);
            info!("Dispatch settings loaded from saved preferences");
        }
        info!(
            webhook = dispatch.webhook_target().is_some(),
            api = dispatch.api_target().is_some(),
            periodic = dispatch.enable_periodic,
            interval_seconds = dispatch.interval_seconds,
            "Dispatch configuration"
        );
        let dispatch = Arc::new(ArcSwap::from_pointee(dispatch));

        let device_id = source.device_id();
        let pipeline = Pipeline::new(
            Sampler::new(source, location.clone()),
            Dispatcher::new(chat, api.clone()),
            dispatch.clone(),
        );

        Ok(Service {
            config: dispatch,
            scheduler: Scheduler::new(pipeline),
            location,
            prefs,
            api,
            device_id,
        })
    }
}
