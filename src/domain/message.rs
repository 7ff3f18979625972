//! Canonical message types shared by channel adapters and the core.
//!
//! Adapters translate provider payloads into `CanonicalMessage` before
//! anything enters the pipeline; everything past the adapter boundary is
//! channel-agnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A communication channel with its own provider and message format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Inbound email (IMAP poller, mail webhook, ...)
    Email,

    /// Web support form
    WebForm,

    /// Chat/SMS gateway (length-constrained)
    Sms,
}

impl Channel {
    /// Stable name used in topic names and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::WebForm => "webform",
            Channel::Sms => "sms",
        }
    }

}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message direction relative to the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Customer,
    Agent,
    System,
}

/// Delivery state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Queued, not yet handed to an adapter
    Pending,

    /// Accepted by the channel adapter
    Sent,

    /// Confirmed delivered by the provider
    Delivered,

    /// Gave up after delivery retries
    Failed,
}

impl DeliveryStatus {
    /// Legal delivery-status transitions (the only mutation messages allow)
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Sent, Delivered) | (Pending, Failed) | (Sent, Failed)
        )
    }
}

/// The channel-agnostic representation of an inbound message
///
/// Produced by channel adapters after provider-specific signature and
/// authenticity validation. `provider_message_id` is the provider's own id,
/// unique within the channel, and drives ingestion idempotency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMessage {
    /// Originating channel
    pub channel: Channel,

    /// Raw sender identifier (email address or phone number)
    pub sender: String,

    /// Message body text
    pub body: String,

    /// Provider-assigned message id, unique within the channel
    pub provider_message_id: String,

    /// When the provider received the message
    pub received_at: DateTime<Utc>,
}

/// Rejections at the canonical-message boundary; dropped, never retried
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("empty message body")]
    EmptyBody,

    #[error("empty sender identifier")]
    EmptySender,

    #[error("missing provider message id")]
    MissingProviderId,
}

impl CanonicalMessage {
    /// Check structural validity before the message may enter ingestion
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.body.trim().is_empty() {
            return Err(ValidationError::EmptyBody);
        }
        if self.sender.trim().is_empty() {
            return Err(ValidationError::EmptySender);
        }
        if self.provider_message_id.trim().is_empty() {
            return Err(ValidationError::MissingProviderId);
        }
        Ok(())
    }
}

/// A stored message belonging to exactly one conversation
///
/// Immutable once created except for `delivery_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier
    pub id: Uuid,

    /// Owning conversation
    pub conversation_id: Uuid,

    /// Channel this message travelled on
    pub channel: Channel,

    /// Inbound or outbound
    pub direction: Direction,

    /// Author role
    pub role: MessageRole,

    /// Body text
    pub body: String,

    /// Provider delivery id (inbound: assigned by provider; outbound: set
    /// after the adapter reports delivery)
    pub provider_message_id: Option<String>,

    /// Current delivery state
    pub delivery_status: DeliveryStatus,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build the stored record for an admitted inbound message
    pub fn inbound(conversation_id: Uuid, canonical: &CanonicalMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            channel: canonical.channel,
            direction: Direction::Inbound,
            role: MessageRole::Customer,
            body: canonical.body.clone(),
            provider_message_id: Some(canonical.provider_message_id.clone()),
            delivery_status: DeliveryStatus::Delivered,
            created_at: canonical.received_at,
        }
    }

    /// Build a pending outbound agent response
    pub fn outbound(conversation_id: Uuid, channel: Channel, body: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            channel,
            direction: Direction::Outbound,
            role: MessageRole::Agent,
            body,
            provider_message_id: None,
            delivery_status: DeliveryStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(body: &str) -> CanonicalMessage {
        CanonicalMessage {
            channel: Channel::Email,
            sender: "a@example.com".to_string(),
            body: body.to_string(),
            provider_message_id: "prov-1".to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_validation_rejects_empty_body() {
        let msg = canonical("   ");
        assert!(matches!(msg.validate(), Err(ValidationError::EmptyBody)));
    }

    #[test]
    fn test_validation_rejects_missing_provider_id() {
        let mut msg = canonical("hello");
        msg.provider_message_id = String::new();
        assert!(matches!(
            msg.validate(),
            Err(ValidationError::MissingProviderId)
        ));
    }

    #[test]
    fn test_delivery_status_transitions() {
        use DeliveryStatus::*;
        assert!(Pending.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Sent.can_transition_to(Failed));
        assert!(!Delivered.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Sent));
        assert!(!Pending.can_transition_to(Delivered));
    }

    #[test]
    fn test_inbound_message_carries_provider_id() {
        let msg = canonical("need help");
        let stored = Message::inbound(Uuid::new_v4(), &msg);
        assert_eq!(stored.direction, Direction::Inbound);
        assert_eq!(stored.role, MessageRole::Customer);
        assert_eq!(stored.provider_message_id.as_deref(), Some("prov-1"));
        assert_eq!(stored.delivery_status, DeliveryStatus::Delivered);
    }
}
