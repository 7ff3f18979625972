//! Tickets: the work-tracking record the automated pipeline drives.
//!
//! Status transitions are monotonic; `resolved` and `escalated` are terminal
//! for automation. A resolved ticket is never reopened in place; a later
//! inbound message opens a new ticket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Channel;

/// Pipeline-visible ticket state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Created, waiting for a worker
    Open,

    /// Claimed by a pipeline run
    InProgress,

    /// Answered; terminal for automation
    Resolved,

    /// Handed to a human; terminal for automation
    Escalated,
}

impl TicketStatus {
    /// Terminal states admit no further automated transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Resolved | TicketStatus::Escalated)
    }

    /// The legal transition edges
    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, next),
            (Open, InProgress) | (InProgress, Resolved) | (InProgress, Escalated)
        )
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// Ticket priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
}

impl Default for TicketPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// A support ticket tied 1:1 to a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique identifier
    pub id: Uuid,

    /// The conversation this ticket tracks
    pub conversation_id: Uuid,

    /// The customer the ticket belongs to
    pub customer_id: Uuid,

    /// Channel the originating message arrived on
    pub source_channel: Channel,

    /// Classification assigned by retrieval/escalation
    pub category: Option<String>,

    /// Priority
    pub priority: TicketPriority,

    /// Current status
    pub status: TicketStatus,

    /// When a pipeline run claimed the ticket (stale claims are reclaimable)
    pub processing_claimed_at: Option<DateTime<Utc>>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Set on transition to `resolved`
    pub resolved_at: Option<DateTime<Utc>>,

    /// Set on transition to `escalated`
    pub escalated_at: Option<DateTime<Utc>>,

    /// Free-text notes recorded at resolution or escalation
    pub resolution_notes: Option<String>,
}

impl Ticket {
    /// Open a new ticket for a conversation
    pub fn open(
        conversation_id: Uuid,
        customer_id: Uuid,
        source_channel: Channel,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            customer_id,
            source_channel,
            category: None,
            priority: TicketPriority::default(),
            status: TicketStatus::Open,
            processing_claimed_at: None,
            created_at: at,
            resolved_at: None,
            escalated_at: None,
            resolution_notes: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_edges() {
        use TicketStatus::*;
        assert!(Open.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Resolved));
        assert!(InProgress.can_transition_to(Escalated));
    }

    #[test]
    fn test_illegal_edges() {
        use TicketStatus::*;
        assert!(!Open.can_transition_to(Resolved));
        assert!(!Open.can_transition_to(Escalated));
        assert!(!Resolved.can_transition_to(InProgress));
        assert!(!Resolved.can_transition_to(Open));
        assert!(!Escalated.can_transition_to(Resolved));
        assert!(!InProgress.can_transition_to(Open));
    }

    #[test]
    fn test_terminal_states() {
        assert!(TicketStatus::Resolved.is_terminal());
        assert!(TicketStatus::Escalated.is_terminal());
        assert!(!TicketStatus::Open.is_terminal());
        assert!(!TicketStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_open_ticket_defaults() {
        let ticket = Ticket::open(Uuid::new_v4(), Uuid::new_v4(), Channel::WebForm, Utc::now());
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.priority, TicketPriority::Medium);
        assert!(ticket.processing_claimed_at.is_none());
        assert!(ticket.resolution_notes.is_none());
    }
}
