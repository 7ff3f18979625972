//! Generic webhook delivery adapter.
//!
//! Posts outbound responses as JSON to a configured endpoint, for setups
//! where a separate gateway service owns the provider integration. The
//! message id doubles as an idempotency key so gateway-side dedup can
//! absorb redeliveries.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::domain::{DeliveryStatus, OutboundMessageEvent};

use super::{ChannelAdapter, DeliveryError, DeliveryReceipt};

/// Response body the gateway may return
#[derive(Debug, Deserialize)]
struct WebhookResponse {
    provider_message_id: Option<String>,
}

/// HTTP delivery adapter
pub struct WebhookAdapter {
    endpoint: String,
    client: reqwest::Client,
}

impl WebhookAdapter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(
        &self,
        outbound: &OutboundMessageEvent,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", outbound.message_id.to_string())
            .json(outbound)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            let provider_message_id = response
                .json::<WebhookResponse>()
                .await
                .ok()
                .and_then(|body| body.provider_message_id);

            debug!(
                message_id = %outbound.message_id,
                channel = %outbound.channel,
                "Outbound message accepted by gateway"
            );

            return Ok(DeliveryReceipt {
                status: DeliveryStatus::Sent,
                provider_message_id,
            });
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(DeliveryError::Transient(format!("{}: {}", status, body)))
        } else {
            Err(DeliveryError::Rejected(format!("{}: {}", status, body)))
        }
    }
}
