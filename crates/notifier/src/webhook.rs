//! HTTP webhook delivery backend.
//!
//! POSTs the notification as JSON. Status handling:
//! - 2xx: delivered (backend id read from an optional `{"message_id": ...}` body)
//! - 5xx / 429 / connection errors: transport failure, eligible for retry
//! - any other status: rejected by the backend, not retried

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use herald_common::error::ProviderError;
use herald_common::types::{NotificationMessage, ProviderResponse};

use crate::provider::Provider;

/// Per-request timeout of the default client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Deserialize)]
struct WebhookAck {
    message_id: Option<String>,
}

pub struct WebhookProvider {
    name: String,
    url: String,
    health_url: String,
    client: Client,
}

impl WebhookProvider {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: name.into(),
            health_url: url.clone(),
            url,
            client: Self::client_with_timeout(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// Replace the client with one whose requests give up after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = Self::client_with_timeout(timeout);
        self
    }

    /// Health-check a dedicated endpoint instead of the delivery URL.
    pub fn with_health_url(mut self, health_url: impl Into<String>) -> Self {
        self.health_url = health_url.into();
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn client_with_timeout(timeout: Duration) -> Client {
        Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to build webhook client, using defaults");
            Client::new()
        })
    }

    fn is_transient(status: StatusCode) -> bool {
        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
    }
}

#[async_trait]
impl Provider for WebhookProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        notification: &NotificationMessage,
    ) -> Result<ProviderResponse, ProviderError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("{}: {}", self.name, e)))?;

        let status = response.status();

        if status.is_success() {
            let ack: WebhookAck = response.json().await.unwrap_or_default();
            let message_id = ack
                .message_id
                .unwrap_or_else(|| format!("{}_{}", self.name, notification.id));
            tracing::debug!(provider = %self.name, %status, message_id = %message_id, "Webhook accepted notification");
            return Ok(ProviderResponse::delivered(message_id));
        }

        if Self::is_transient(status) {
            return Err(ProviderError::Transport(format!(
                "{} returned {}",
                self.name, status
            )));
        }

        let body = response.text().await.unwrap_or_default();
        let reason = if body.trim().is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            format!("HTTP {}: {}", status.as_u16(), body.trim())
        };
        tracing::debug!(provider = %self.name, %status, reason = %reason, "Webhook rejected notification");
        Ok(ProviderResponse::rejected(reason))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(&self.health_url)
            .send()
            .await
            .map_err(|e| ProviderError::Unhealthy {
                provider: self.name.clone(),
                reason: e.to_string(),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::Unhealthy {
                provider: self.name.clone(),
                reason: format!("health endpoint returned {}", response.status()),
            })
        }
    }
}
