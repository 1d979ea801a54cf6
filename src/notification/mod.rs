//! Delivery of formatted samples to the chat webhook and the generic API.
//!
//! The [`Dispatcher`] decides which sinks a tick goes to and isolates their
//! failures: each sink's error is logged and reduced to a boolean in the
//! [`DispatchReport`], never propagated, never retried.
pub mod api;
pub mod webhook;

use crate::config::DispatchConfig;
use crate::core::{ApiSink, ChatSink};
use crate::formatting::ApiPayload;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

pub use api::ApiClient;
pub use webhook::WebhookClient;

/// Content type used for every outbound JSON body.
pub(crate) const JSON_UTF8: &str = "application/json; charset=utf-8";

/// Why a single delivery failed.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("endpoint responded with status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Builds the HTTP client shared by both sinks and the network location
/// provider. Every request is bounded by `timeout`.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Maps a response to success iff its status is 2xx.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<(), SendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(SendError::Status { status, body })
}

/// Outcome of one dispatch. `None` means the sink was skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub webhook: Option<bool>,
    pub api: Option<bool>,
}

/// Sends a tick's outputs to the independently enabled sinks.
#[derive(Clone)]
pub struct Dispatcher {
    chat: Arc<dyn ChatSink>,
    api: Arc<dyn ApiSink>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(chat: Arc<dyn ChatSink>, api: Arc<dyn ApiSink>) -> Self {
        Self { chat, api }
    }

    /// Delivers `text` to the webhook and `payload` to the API, in that
    /// order, according to `config`. Neither sink's failure affects the other.
    #[instrument(skip_all)]
    pub async fn dispatch(
        &self,
        config: &DispatchConfig,
        text: &str,
        payload: &ApiPayload,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        match config.webhook_target() {
            Some(url) => {
                let delivered = match self.chat.post_text(url, text).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(sink = "webhook", error = %e, "Webhook delivery failed");
                        false
                    }
                };
                info!(sink = "webhook", delivered, "Posted to webhook");
                report.webhook = Some(delivered);
            }
            None => info!(line = text, "Webhook disabled or not configured"),
        }

        match config.api_target() {
            Some(endpoint) => {
                let delivered = match self.post_payload(endpoint, payload, config.api_key()).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(sink = "api", error = %e, "API delivery failed");
                        false
                    }
                };
                info!(sink = "api", delivered, "Posted to API");
                report.api = Some(delivered);
            }
            None => info!("API disabled or endpoint not set; skipping API post"),
        }

        report
    }

    async fn post_payload(
        &self,
        endpoint: &str,
        payload: &ApiPayload,
        api_key: Option<&str>,
    ) -> Result<(), SendError> {
        let body = serde_json::to_value(payload)?;
        self.api.post_json(endpoint, &body, api_key).await
    }
}
