//! Conversations: the thread of messages a ticket tracks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Channel;

/// Lifecycle state of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Accepting new messages
    Active,

    /// Closed; later messages start a new conversation
    Ended,
}

/// Why a conversation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationResolution {
    /// Pipeline answered and resolved the ticket
    Resolved,

    /// Handed to a human
    Escalated,

    /// Customer went silent past the re-engagement window
    TimedOut,
}

/// A conversation belonging to exactly one customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier
    pub id: Uuid,

    /// Owning customer
    pub customer_id: Uuid,

    /// Channel the conversation started on
    pub channel: Channel,

    /// Current lifecycle state
    pub status: ConversationStatus,

    /// Last scored sentiment of the customer, in [0, 1]
    pub sentiment_score: Option<f32>,

    /// How the conversation ended, once it has
    pub resolution: Option<ConversationResolution>,

    /// Human owner after escalation (team or queue name)
    pub escalation_target: Option<String>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Timestamp of the most recent message
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    /// Start a new active conversation
    pub fn start(customer_id: Uuid, channel: Channel, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            channel,
            status: ConversationStatus::Active,
            sentiment_score: None,
            resolution: None,
            escalation_target: None,
            created_at: at,
            last_activity_at: at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConversationStatus::Active
    }

    /// Close the conversation with a resolution classification
    pub fn end(&mut self, resolution: ConversationResolution, at: DateTime<Utc>) {
        self.status = ConversationStatus::Ended;
        self.resolution = Some(resolution);
        self.last_activity_at = at;
    }
}
