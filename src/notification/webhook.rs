//! A client for posting text lines to a chat incoming webhook.

use super::{check_status, SendError, JSON_UTF8};
use crate::core::ChatSink;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::json;
use tracing::{debug, instrument};

/// Posts `{"text": ...}` to a webhook URL. No authentication.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
}

impl WebhookClient {
    /// Creates a new `WebhookClient` sharing the given HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatSink for WebhookClient {
    #[instrument(skip(self, text))]
    async fn post_text(&self, webhook_url: &str, text: &str) -> Result<(), SendError> {
        let body = serde_json::to_vec(&json!({ "text": text }))?;
        let response = self
            .client
            .post(webhook_url)
            .header(CONTENT_TYPE, JSON_UTF8)
            .body(body)
            .send()
            .await?;
        check_status(response).await?;
        debug!("Webhook accepted message.");
        Ok(())
    }
}
