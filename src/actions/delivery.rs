//! Outbound delivery over HTTP
//!
//! When a delivery endpoint is configured, outbound messages are POSTed to it
//! as JSON (an email/SMS gateway or relay). Without one, messages stay in the
//! tenant outbox with status `queued` for another process to pick up.

use crate::error::ActionError;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DeliveryClient {
    http: reqwest::Client,
    endpoint: Option<String>,
}

/// What happened to a message handed to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued,
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delivery::Sent => "sent",
            Delivery::Queued => "queued",
        }
    }
}

impl DeliveryClient {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build delivery HTTP client: {}", e))?;
        Ok(Self { http, endpoint })
    }

    /// Client that never leaves the process
    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Hand a message to the delivery endpoint
    ///
    /// Network errors, 429 and 5xx are retryable; other 4xx responses mean the
    /// message itself was rejected.
    pub async fn deliver(&self, channel: &str, message: &Value) -> Result<Delivery, ActionError> {
        let Some(endpoint) = &self.endpoint else {
            tracing::debug!("📭 No delivery endpoint configured, {} message stays queued", channel);
            return Ok(Delivery::Queued);
        };

        tracing::debug!("🌍 Delivering {} message to {}", channel, endpoint);
        let response = self
            .http
            .post(endpoint)
            .json(&json!({ "channel": channel, "message": message }))
            .send()
            .await
            .map_err(|e| ActionError::failed(format!("delivery request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("✅ Delivered {} message (status: {})", channel, status);
            Ok(Delivery::Sent)
        } else if status.is_server_error() || status.as_u16() == 429 {
            Err(ActionError::failed(format!("delivery endpoint returned {status}")))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ActionError::invalid(format!(
                "delivery endpoint rejected message ({status}): {body}"
            )))
        }
    }
}
