//! HTTP client for the widget REST endpoints.

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use innchat_core::Message;

use crate::error::ClientError;
use crate::transport::Transport;
use crate::wire::{decode_batch, FetchQuery, OutboundMessage, SendReceipt};

/// HTTP client for the widget REST API.
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(base_url: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a client whose requests give up after `timeout`.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a URL from path segments, escaping each one.
    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Get JSON from an endpoint.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        debug!(url = %url, "GET request");

        let response = self.inner.get(url.clone()).query(query).send().await?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                status: response.status().as_u16(),
                path: url.path().to_string(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }

    /// Post JSON to an endpoint and decode the JSON answer.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, ClientError> {
        debug!(url = %url, "POST request");

        let response = self.inner.post(url.clone()).json(body).send().await?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                status: response.status().as_u16(),
                path: url.path().to_string(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send_message(&self, message: &OutboundMessage) -> Result<SendReceipt, ClientError> {
        let url = self.url(&["widget", "message"])?;
        self.post_json(url, message).await
    }

    async fn fetch_messages(&self, query: &FetchQuery) -> Result<Vec<Message>, ClientError> {
        let url = self.url(&["widget", "session", query.session_id.as_str(), "messages"])?;

        let mut params = vec![(
            "since",
            query.since.to_rfc3339_opts(SecondsFormat::Millis, true),
        )];
        if let Some(conversation_id) = &query.conversation_id {
            params.push(("conversationId", conversation_id.to_string()));
        }

        let payload: Value = self.get_json(url, &params).await?;
        let batch = decode_batch(payload)?;
        debug!(count = batch.len(), session_id = %query.session_id, "Fetched messages");
        Ok(batch)
    }
}
