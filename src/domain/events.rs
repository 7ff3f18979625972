//! Bus event payloads and topic naming.
//!
//! Topics are partitioned by direction and channel so a slow outbound
//! channel never backpressures inbound ingestion of another channel.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Channel;

/// Control topic for escalated tickets
pub const TOPIC_ESCALATIONS: &str = "escalations";

/// Dead-letter topic for events that exhausted processing retries
pub const TOPIC_DLQ: &str = "dlq";

/// Topic carrying admitted inbound messages for a channel
pub fn inbound_topic(channel: Channel) -> String {
    format!("inbound.{}", channel)
}

/// Topic carrying queued outbound responses for a channel
pub fn outbound_topic(channel: Channel) -> String {
    format!("outbound.{}", channel)
}

/// An admitted inbound message, ready for pipeline processing
///
/// Keyed on `conversation_id` so a conversation's events are consumed in
/// arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessageEvent {
    pub ticket_id: Uuid,
    pub conversation_id: Uuid,
    pub customer_id: Uuid,
    pub message_id: Uuid,
    pub channel: Channel,
}

/// A formatted response queued for delivery through a channel adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessageEvent {
    pub message_id: Uuid,
    pub ticket_id: Uuid,
    pub conversation_id: Uuid,
    pub channel: Channel,

    /// Normalized recipient identifier value
    pub recipient: String,

    /// Final channel-formatted body
    pub body: String,
}

/// Notification that a ticket left automation for a human
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub ticket_id: Uuid,
    pub customer_id: Uuid,
    pub channel: Channel,
    pub reason: String,
    pub urgency: String,
}

/// An event parked after processing could not complete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    /// Topic the event originally arrived on
    pub source_topic: String,

    /// Last error observed
    pub error: String,

    /// Original payload, verbatim
    pub payload: serde_json::Value,
}
