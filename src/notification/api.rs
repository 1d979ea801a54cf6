//! A client for posting JSON documents to the generic API endpoint.

use super::{check_status, SendError, JSON_UTF8};
use crate::core::ApiSink;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, instrument};

/// Posts JSON bodies with an optional bearer token.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
}

impl ApiClient {
    /// Creates a new `ApiClient` sharing the given HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ApiSink for ApiClient {
    #[instrument(skip(self, body, api_key))]
    async fn post_json(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
        api_key: Option<&str>,
    ) -> Result<(), SendError> {
        let mut request = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, JSON_UTF8)
            .body(serde_json::to_vec(body)?);
        if let Some(key) = api_key.filter(|key| !key.is_empty()) {
            request = request.header(AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = request.send().await?;
        check_status(response).await?;
        debug!("API accepted payload.");
        Ok(())
    }
}

#[cfg(test)]
mod api_client_tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_post_with_bearer_token() {
        let server = MockServer::start().await;
        let body = json!({ "deviceId": "dev", "batteryPct": 50 });
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .and(header("authorization", "Bearer s3cret"))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(reqwest::Client::new());
        let result = client
            .post_json(&format!("{}/ingest", server.uri()), &body, Some("s3cret"))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_empty_key_sends_no_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = ApiClient::new(reqwest::Client::new());
        client
            .post_json(&server.uri(), &json!({}), Some(""))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_non_2xx_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = ApiClient::new(reqwest::Client::new());
        let result = client.post_json(&server.uri(), &json!({}), None).await;
        assert!(matches!(result, Err(SendError::Status { .. })));
    }
}
