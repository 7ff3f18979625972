//! Channel adapter interfaces for external messaging providers.
//!
//! Adapters translate between provider payloads and the core's canonical
//! message format. Inbound, they validate provider authenticity and hand
//! `CanonicalMessage`s to ingestion; outbound, they deliver formatted
//! responses. Delivery must be safely retriable; the core may hand the
//! same outbound event to an adapter more than once.

pub mod webhook;

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{DeliveryStatus, OutboundMessageEvent};

// Re-export the webhook adapter
pub use webhook::WebhookAdapter;

/// What an adapter reports after a delivery attempt
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// `Sent` when accepted by the provider, `Delivered` when confirmed
    pub status: DeliveryStatus,

    /// Provider-assigned id for the delivered message, when available
    pub provider_message_id: Option<String>,
}

/// Delivery failures
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Worth retrying (timeout, 5xx, connection refused)
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The provider refused the message; retrying cannot help
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Outbound side of the channel adapter contract
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Deliver one formatted response
    ///
    /// Must be idempotent on the event's `message_id`: redelivering the
    /// same event must not produce a second provider-side message where
    /// the provider supports an idempotency key.
    async fn deliver(&self, outbound: &OutboundMessageEvent)
        -> Result<DeliveryReceipt, DeliveryError>;
}

/// In-memory adapter that records deliveries; used by the CLI dry run and
/// in tests
#[derive(Default)]
pub struct LoopbackAdapter {
    deliveries: Mutex<Vec<OutboundMessageEvent>>,
}

impl LoopbackAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far
    pub fn deliveries(&self) -> Vec<OutboundMessageEvent> {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ChannelAdapter for LoopbackAdapter {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn deliver(
        &self,
        outbound: &OutboundMessageEvent,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let mut deliveries = self.deliveries.lock().unwrap_or_else(|e| e.into_inner());

        // Idempotent on message id
        if !deliveries.iter().any(|d| d.message_id == outbound.message_id) {
            deliveries.push(outbound.clone());
        }

        Ok(DeliveryReceipt {
            status: DeliveryStatus::Sent,
            provider_message_id: Some(format!("loopback-{}", outbound.message_id)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Channel;
    use uuid::Uuid;

    fn outbound() -> OutboundMessageEvent {
        OutboundMessageEvent {
            message_id: Uuid::new_v4(),
            ticket_id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            channel: Channel::Sms,
            recipient: "+14155550100".to_string(),
            body: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn test_loopback_records_delivery() {
        let adapter = LoopbackAdapter::new();
        let event = outbound();

        let receipt = adapter.deliver(&event).await.unwrap();
        assert_eq!(receipt.status, DeliveryStatus::Sent);
        assert_eq!(adapter.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn test_loopback_redelivery_is_idempotent() {
        let adapter = LoopbackAdapter::new();
        let event = outbound();

        adapter.deliver(&event).await.unwrap();
        adapter.deliver(&event).await.unwrap();

        assert_eq!(adapter.deliveries().len(), 1);
    }
}
