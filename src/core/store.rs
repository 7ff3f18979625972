//! Conversation/ticket store: the source of truth for status.
//!
//! Holds conversations, their messages, and the 1:1 ticket per
//! conversation. All mutation goes through one lock, so a pipeline
//! outcome (status transition + outbound message + conversation close)
//! commits atomically.
//!
//! Windowing policy: an inbound message joins the customer's active
//! conversation while its ticket is non-terminal and the conversation saw
//! activity within the re-engagement window. A stale conversation is ended
//! as timed out (its ticket keeps its state and is still processed; the
//! result applies to the ended conversation). Anything else starts a new
//! conversation and a new ticket; terminal tickets are never reopened.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    CanonicalMessage, Conversation, ConversationResolution, DeliveryStatus, Direction, Message,
    Ticket, TicketStatus,
};

/// Store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ticket not found: {0}")]
    TicketNotFound(Uuid),

    #[error("conversation not found: {0}")]
    ConversationNotFound(Uuid),

    #[error("message not found: {0}")]
    MessageNotFound(Uuid),

    #[error("conversation {0} has no inbound message")]
    NoInboundMessage(Uuid),

    #[error("illegal ticket transition: {from} -> {to}")]
    IllegalTransition { from: TicketStatus, to: TicketStatus },

    #[error("illegal delivery transition: {from:?} -> {to:?}")]
    IllegalDelivery {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
}

/// What recording an inbound message produced
#[derive(Debug, Clone)]
pub struct InboundRecord {
    pub conversation: Conversation,
    pub ticket: Ticket,
    pub message: Message,

    /// Whether a new ticket was opened for this message
    pub new_ticket: bool,
}

/// Outcome of trying to claim a ticket for processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Claim acquired; caller owns the run
    Claimed,

    /// Another worker holds a fresh claim
    AlreadyClaimed,

    /// Ticket is terminal; processing must no-op
    NotPending,
}

/// The decision a pipeline run commits for a ticket
#[derive(Debug, Clone)]
pub enum TicketOutcome {
    Resolved {
        /// Final channel-formatted response queued outbound
        response_body: String,
        sentiment: Option<f32>,
        category: Option<String>,
        notes: Option<String>,
    },
    Escalated {
        reason: String,
        urgency: String,
        sentiment: Option<f32>,
        /// Human queue that owns the ticket now
        target: String,
    },
}

/// Immutable view handed to the pipeline
#[derive(Debug, Clone)]
pub struct TicketContext {
    pub ticket: Ticket,
    pub conversation: Conversation,
    pub latest_inbound: Message,

    /// An escalation already occurred in this conversation's recent lineage
    pub prior_escalated: bool,
}

/// Aggregate ticket counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TicketCounts {
    pub open: usize,
    pub in_progress: usize,
    pub resolved: usize,
    pub escalated: usize,
}

#[derive(Default)]
struct StoreState {
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Message>,
    /// Message ids per conversation, in arrival order
    conversation_messages: HashMap<Uuid, Vec<Uuid>>,
    tickets: HashMap<Uuid, Ticket>,
    conversation_ticket: HashMap<Uuid, Uuid>,
    /// Customer -> most recent active conversation
    active_by_customer: HashMap<Uuid, Uuid>,
    /// Customer -> last escalation time
    last_escalation: HashMap<Uuid, DateTime<Utc>>,
}

/// In-memory store with atomic commits
pub struct TicketStore {
    inner: std::sync::Mutex<StoreState>,
    reengagement_window: Duration,
    claim_timeout: Duration,
}

impl TicketStore {
    pub fn new(reengagement_window: Duration, claim_timeout: std::time::Duration) -> Self {
        Self {
            inner: std::sync::Mutex::new(StoreState::default()),
            reengagement_window,
            claim_timeout: Duration::from_std(claim_timeout)
                .unwrap_or_else(|_| Duration::seconds(300)),
        }
    }

    /// Record an admitted inbound message, applying the windowing policy
    pub fn record_inbound(
        &self,
        customer_id: Uuid,
        canonical: &CanonicalMessage,
    ) -> Result<InboundRecord, StoreError> {
        let now = canonical.received_at;
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        // Try to continue the customer's active conversation
        if let Some(&conv_id) = state.active_by_customer.get(&customer_id) {
            let continues = {
                let conv = state
                    .conversations
                    .get(&conv_id)
                    .ok_or(StoreError::ConversationNotFound(conv_id))?;
                let ticket_id = state
                    .conversation_ticket
                    .get(&conv_id)
                    .copied()
                    .ok_or(StoreError::TicketNotFound(conv_id))?;
                let ticket = state
                    .tickets
                    .get(&ticket_id)
                    .ok_or(StoreError::TicketNotFound(ticket_id))?;

                conv.is_active()
                    && !ticket.is_terminal()
                    && now - conv.last_activity_at <= self.reengagement_window
            };

            if continues {
                let message = Message::inbound(conv_id, canonical);
                let conv = state
                    .conversations
                    .get_mut(&conv_id)
                    .ok_or(StoreError::ConversationNotFound(conv_id))?;
                conv.last_activity_at = now;
                let conversation = conv.clone();

                state
                    .conversation_messages
                    .entry(conv_id)
                    .or_default()
                    .push(message.id);
                state.messages.insert(message.id, message.clone());

                let ticket_id = state
                    .conversation_ticket
                    .get(&conv_id)
                    .copied()
                    .ok_or(StoreError::TicketNotFound(conv_id))?;
                let ticket = state
                    .tickets
                    .get(&ticket_id)
                    .cloned()
                    .ok_or(StoreError::TicketNotFound(ticket_id))?;

                debug!(conversation_id = %conv_id, ticket_id = %ticket.id, "Message joins active conversation");

                return Ok(InboundRecord {
                    conversation,
                    ticket,
                    message,
                    new_ticket: false,
                });
            }

            // Stale conversation: close it; a non-terminal ticket keeps its
            // state and will still be processed against the ended thread
            if let Some(conv) = state.conversations.get_mut(&conv_id) {
                if conv.is_active() {
                    conv.end(ConversationResolution::TimedOut, now);
                    info!(conversation_id = %conv_id, "Conversation timed out");
                }
            }
            state.active_by_customer.remove(&customer_id);
        }

        // Fresh conversation and ticket
        let conversation = Conversation::start(customer_id, canonical.channel, now);
        let ticket = Ticket::open(conversation.id, customer_id, canonical.channel, now);
        let message = Message::inbound(conversation.id, canonical);

        state.active_by_customer.insert(customer_id, conversation.id);
        state
            .conversation_ticket
            .insert(conversation.id, ticket.id);
        state
            .conversation_messages
            .insert(conversation.id, vec![message.id]);
        state.messages.insert(message.id, message.clone());
        state.conversations.insert(conversation.id, conversation.clone());
        state.tickets.insert(ticket.id, ticket.clone());

        info!(
            ticket_id = %ticket.id,
            conversation_id = %conversation.id,
            channel = %canonical.channel,
            "Opened ticket"
        );

        Ok(InboundRecord {
            conversation,
            ticket,
            message,
            new_ticket: true,
        })
    }

    pub fn ticket(&self, id: Uuid) -> Result<Ticket, StoreError> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state
            .tickets
            .get(&id)
            .cloned()
            .ok_or(StoreError::TicketNotFound(id))
    }

    pub fn conversation(&self, id: Uuid) -> Result<Conversation, StoreError> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state
            .conversations
            .get(&id)
            .cloned()
            .ok_or(StoreError::ConversationNotFound(id))
    }

    /// Messages of a conversation in arrival order
    pub fn conversation_messages(&self, conversation_id: Uuid) -> Vec<Message> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state
            .conversation_messages
            .get(&conversation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Build the immutable snapshot a pipeline run works from
    pub fn ticket_context(&self, ticket_id: Uuid) -> Result<TicketContext, StoreError> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let ticket = state
            .tickets
            .get(&ticket_id)
            .cloned()
            .ok_or(StoreError::TicketNotFound(ticket_id))?;
        let conversation = state
            .conversations
            .get(&ticket.conversation_id)
            .cloned()
            .ok_or(StoreError::ConversationNotFound(ticket.conversation_id))?;

        let latest_inbound = state
            .conversation_messages
            .get(&conversation.id)
            .and_then(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| state.messages.get(id))
                    .find(|m| m.direction == Direction::Inbound)
            })
            .cloned()
            .ok_or(StoreError::NoInboundMessage(conversation.id))?;

        let prior_escalated = state
            .last_escalation
            .get(&ticket.customer_id)
            .map(|at| latest_inbound.created_at - *at <= self.reengagement_window)
            .unwrap_or(false);

        Ok(TicketContext {
            ticket,
            conversation,
            latest_inbound,
            prior_escalated,
        })
    }

    /// Claim a ticket for processing (the in-progress mutual exclusion)
    ///
    /// Compare-and-set on status plus a claim timestamp: `open` claims
    /// immediately; an `in_progress` claim older than the stale timeout is
    /// reclaimed (worker crash); a fresh claim refuses; terminal tickets
    /// report `NotPending` so duplicate triggers no-op.
    pub fn begin_processing(
        &self,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let ticket = state
            .tickets
            .get_mut(&ticket_id)
            .ok_or(StoreError::TicketNotFound(ticket_id))?;

        match ticket.status {
            TicketStatus::Open => {
                ticket.status = TicketStatus::InProgress;
                ticket.processing_claimed_at = Some(now);
                Ok(ClaimOutcome::Claimed)
            }
            TicketStatus::InProgress => {
                let stale = ticket
                    .processing_claimed_at
                    .map(|claimed| now - claimed > self.claim_timeout)
                    .unwrap_or(true);

                if stale {
                    info!(%ticket_id, "Reclaiming stale processing claim");
                    ticket.processing_claimed_at = Some(now);
                    Ok(ClaimOutcome::Claimed)
                } else {
                    Ok(ClaimOutcome::AlreadyClaimed)
                }
            }
            TicketStatus::Resolved | TicketStatus::Escalated => Ok(ClaimOutcome::NotPending),
        }
    }

    /// Commit a pipeline outcome atomically
    ///
    /// Transitions the ticket, closes the conversation, and (on resolution)
    /// creates the pending outbound message, all under one lock. Returns the
    /// outbound message when one was queued.
    pub fn commit(
        &self,
        ticket_id: Uuid,
        outcome: TicketOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let (customer_id, conversation_id, channel, from) = {
            let ticket = state
                .tickets
                .get(&ticket_id)
                .ok_or(StoreError::TicketNotFound(ticket_id))?;
            (
                ticket.customer_id,
                ticket.conversation_id,
                ticket.source_channel,
                ticket.status,
            )
        };

        let to = match outcome {
            TicketOutcome::Resolved { .. } => TicketStatus::Resolved,
            TicketOutcome::Escalated { .. } => TicketStatus::Escalated,
        };
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition { from, to });
        }

        // Reply on the channel the customer last wrote from, which may
        // differ from the one the conversation started on
        let reply_channel = state
            .conversation_messages
            .get(&conversation_id)
            .and_then(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| state.messages.get(id))
                    .find(|m| m.direction == Direction::Inbound)
            })
            .map(|m| m.channel)
            .unwrap_or(channel);

        let queued = match outcome {
            TicketOutcome::Resolved {
                response_body,
                sentiment,
                category,
                notes,
            } => {
                let message = Message::outbound(conversation_id, reply_channel, response_body);

                let ticket = state
                    .tickets
                    .get_mut(&ticket_id)
                    .ok_or(StoreError::TicketNotFound(ticket_id))?;
                ticket.status = TicketStatus::Resolved;
                ticket.resolved_at = Some(now);
                ticket.processing_claimed_at = None;
                ticket.category = category;
                ticket.resolution_notes = notes;

                if let Some(conv) = state.conversations.get_mut(&conversation_id) {
                    if sentiment.is_some() {
                        conv.sentiment_score = sentiment;
                    }
                    conv.end(ConversationResolution::Resolved, now);
                }

                state
                    .conversation_messages
                    .entry(conversation_id)
                    .or_default()
                    .push(message.id);
                state.messages.insert(message.id, message.clone());

                info!(%ticket_id, "Ticket resolved");
                Some(message)
            }
            TicketOutcome::Escalated {
                reason,
                urgency,
                sentiment,
                target,
            } => {
                let ticket = state
                    .tickets
                    .get_mut(&ticket_id)
                    .ok_or(StoreError::TicketNotFound(ticket_id))?;
                ticket.status = TicketStatus::Escalated;
                ticket.escalated_at = Some(now);
                ticket.processing_claimed_at = None;
                ticket.resolution_notes = Some(reason.clone());

                if let Some(conv) = state.conversations.get_mut(&conversation_id) {
                    if sentiment.is_some() {
                        conv.sentiment_score = sentiment;
                    }
                    conv.escalation_target = Some(target);
                    conv.end(ConversationResolution::Escalated, now);
                }

                state.last_escalation.insert(customer_id, now);

                info!(%ticket_id, reason, urgency, "Ticket escalated");
                None
            }
        };

        if state.active_by_customer.get(&customer_id) == Some(&conversation_id) {
            state.active_by_customer.remove(&customer_id);
        }

        Ok(queued)
    }

    /// Apply a delivery-status transition to a message
    pub fn update_delivery(
        &self,
        message_id: Uuid,
        status: DeliveryStatus,
        provider_message_id: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let message = state
            .messages
            .get_mut(&message_id)
            .ok_or(StoreError::MessageNotFound(message_id))?;

        if !message.delivery_status.can_transition_to(status) {
            return Err(StoreError::IllegalDelivery {
                from: message.delivery_status,
                to: status,
            });
        }

        message.delivery_status = status;
        if provider_message_id.is_some() {
            message.provider_message_id = provider_message_id;
        }

        Ok(())
    }

    /// Tickets eligible for processing: open, or holding a stale claim
    pub fn pending_tickets(&self, now: DateTime<Utc>) -> Vec<Ticket> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut pending: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| match t.status {
                TicketStatus::Open => true,
                TicketStatus::InProgress => t
                    .processing_claimed_at
                    .map(|claimed| now - claimed > self.claim_timeout)
                    .unwrap_or(true),
                _ => false,
            })
            .cloned()
            .collect();

        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    /// Aggregate counts across all tickets
    pub fn counts(&self) -> TicketCounts {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts = TicketCounts::default();
        for ticket in state.tickets.values() {
            match ticket.status {
                TicketStatus::Open => counts.open += 1,
                TicketStatus::InProgress => counts.in_progress += 1,
                TicketStatus::Resolved => counts.resolved += 1,
                TicketStatus::Escalated => counts.escalated += 1,
            }
        }
        counts
    }

    /// Re-point all conversations and tickets of a merged-away customer
    pub fn reassign_customer(&self, from: Uuid, to: Uuid) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        for conv in state.conversations.values_mut() {
            if conv.customer_id == from {
                conv.customer_id = to;
            }
        }
        for ticket in state.tickets.values_mut() {
            if ticket.customer_id == from {
                ticket.customer_id = to;
            }
        }

        // Keep at most one active pointer for the survivor: prefer the most
        // recently active conversation; the other keeps running to term
        if let Some(moved) = state.active_by_customer.remove(&from) {
            match state.active_by_customer.get(&to).copied() {
                Some(existing) => {
                    let moved_at = state.conversations.get(&moved).map(|c| c.last_activity_at);
                    let existing_at = state
                        .conversations
                        .get(&existing)
                        .map(|c| c.last_activity_at);
                    if moved_at > existing_at {
                        state.active_by_customer.insert(to, moved);
                    }
                }
                None => {
                    state.active_by_customer.insert(to, moved);
                }
            }
        }

        if let Some(at) = state.last_escalation.remove(&from) {
            let entry = state.last_escalation.entry(to).or_insert(at);
            if *entry < at {
                *entry = at;
            }
        }

        debug!(%from, %to, "Reassigned conversations and tickets");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Channel;

    fn store() -> TicketStore {
        TicketStore::new(Duration::hours(24), std::time::Duration::from_secs(300))
    }

    fn canonical(provider_id: &str, at: DateTime<Utc>) -> CanonicalMessage {
        CanonicalMessage {
            channel: Channel::Email,
            sender: "a@example.com".to_string(),
            body: "where is my invoice".to_string(),
            provider_message_id: provider_id.to_string(),
            received_at: at,
        }
    }

    #[test]
    fn test_first_message_opens_ticket() {
        let store = store();
        let customer = Uuid::new_v4();

        let record = store
            .record_inbound(customer, &canonical("p1", Utc::now()))
            .unwrap();
        assert!(record.new_ticket);
        assert_eq!(record.ticket.status, TicketStatus::Open);
        assert_eq!(record.ticket.conversation_id, record.conversation.id);
    }

    #[test]
    fn test_followup_within_window_joins_conversation() {
        let store = store();
        let customer = Uuid::new_v4();
        let start = Utc::now();

        let first = store
            .record_inbound(customer, &canonical("p1", start))
            .unwrap();
        let second = store
            .record_inbound(customer, &canonical("p2", start + Duration::hours(1)))
            .unwrap();

        assert!(!second.new_ticket);
        assert_eq!(second.conversation.id, first.conversation.id);
        assert_eq!(second.ticket.id, first.ticket.id);
        assert_eq!(store.conversation_messages(first.conversation.id).len(), 2);
    }

    #[test]
    fn test_message_past_window_starts_new_conversation() {
        let store = store();
        let customer = Uuid::new_v4();
        let start = Utc::now();

        let first = store
            .record_inbound(customer, &canonical("p1", start))
            .unwrap();
        let second = store
            .record_inbound(customer, &canonical("p2", start + Duration::hours(30)))
            .unwrap();

        assert!(second.new_ticket);
        assert_ne!(second.conversation.id, first.conversation.id);

        // Old conversation ended by timeout
        let old = store.conversation(first.conversation.id).unwrap();
        assert_eq!(old.resolution, Some(ConversationResolution::TimedOut));
    }

    #[test]
    fn test_message_after_resolution_opens_new_ticket() {
        let store = store();
        let customer = Uuid::new_v4();
        let start = Utc::now();

        let first = store
            .record_inbound(customer, &canonical("p1", start))
            .unwrap();
        store.begin_processing(first.ticket.id, start).unwrap();
        store
            .commit(
                first.ticket.id,
                TicketOutcome::Resolved {
                    response_body: "done".to_string(),
                    sentiment: Some(0.7),
                    category: None,
                    notes: None,
                },
                start,
            )
            .unwrap();

        let second = store
            .record_inbound(customer, &canonical("p2", start + Duration::minutes(5)))
            .unwrap();
        assert!(second.new_ticket);
        assert_ne!(second.ticket.id, first.ticket.id);

        // Resolved ticket untouched
        let resolved = store.ticket(first.ticket.id).unwrap();
        assert_eq!(resolved.status, TicketStatus::Resolved);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let store = store();
        let customer = Uuid::new_v4();
        let now = Utc::now();
        let record = store.record_inbound(customer, &canonical("p1", now)).unwrap();

        assert_eq!(
            store.begin_processing(record.ticket.id, now).unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            store.begin_processing(record.ticket.id, now).unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
    }

    #[test]
    fn test_stale_claim_reclaimed() {
        let store = store();
        let customer = Uuid::new_v4();
        let now = Utc::now();
        let record = store.record_inbound(customer, &canonical("p1", now)).unwrap();

        store.begin_processing(record.ticket.id, now).unwrap();

        // Worker crashed; ten minutes later the claim is stale
        let later = now + Duration::minutes(10);
        assert_eq!(
            store.begin_processing(record.ticket.id, later).unwrap(),
            ClaimOutcome::Claimed
        );
    }

    #[test]
    fn test_terminal_ticket_not_pending() {
        let store = store();
        let customer = Uuid::new_v4();
        let now = Utc::now();
        let record = store.record_inbound(customer, &canonical("p1", now)).unwrap();

        store.begin_processing(record.ticket.id, now).unwrap();
        store
            .commit(
                record.ticket.id,
                TicketOutcome::Escalated {
                    reason: "keyword_detected:refund".to_string(),
                    urgency: "immediate".to_string(),
                    sentiment: Some(0.1),
                    target: "support-humans".to_string(),
                },
                now,
            )
            .unwrap();

        assert_eq!(
            store.begin_processing(record.ticket.id, now).unwrap(),
            ClaimOutcome::NotPending
        );
    }

    #[test]
    fn test_commit_requires_in_progress() {
        let store = store();
        let customer = Uuid::new_v4();
        let now = Utc::now();
        let record = store.record_inbound(customer, &canonical("p1", now)).unwrap();

        // Still open; commit must refuse
        let result = store.commit(
            record.ticket.id,
            TicketOutcome::Resolved {
                response_body: "hi".to_string(),
                sentiment: None,
                category: None,
                notes: None,
            },
            now,
        );
        assert!(matches!(
            result,
            Err(StoreError::IllegalTransition {
                from: TicketStatus::Open,
                to: TicketStatus::Resolved
            })
        ));
    }

    #[test]
    fn test_resolution_queues_outbound_message() {
        let store = store();
        let customer = Uuid::new_v4();
        let now = Utc::now();
        let record = store.record_inbound(customer, &canonical("p1", now)).unwrap();

        store.begin_processing(record.ticket.id, now).unwrap();
        let queued = store
            .commit(
                record.ticket.id,
                TicketOutcome::Resolved {
                    response_body: "answer".to_string(),
                    sentiment: Some(0.6),
                    category: Some("billing".to_string()),
                    notes: None,
                },
                now,
            )
            .unwrap()
            .unwrap();

        assert_eq!(queued.direction, Direction::Outbound);
        assert_eq!(queued.delivery_status, DeliveryStatus::Pending);

        let conv = store.conversation(record.conversation.id).unwrap();
        assert_eq!(conv.resolution, Some(ConversationResolution::Resolved));
        assert_eq!(conv.sentiment_score, Some(0.6));
    }

    #[test]
    fn test_escalation_queues_nothing_and_marks_history() {
        let store = store();
        let customer = Uuid::new_v4();
        let now = Utc::now();
        let record = store.record_inbound(customer, &canonical("p1", now)).unwrap();

        store.begin_processing(record.ticket.id, now).unwrap();
        let queued = store
            .commit(
                record.ticket.id,
                TicketOutcome::Escalated {
                    reason: "hostile_sentiment".to_string(),
                    urgency: "immediate".to_string(),
                    sentiment: Some(0.05),
                    target: "support-humans".to_string(),
                },
                now,
            )
            .unwrap();
        assert!(queued.is_none());

        // A new ticket in the window sees the prior escalation
        let next = store
            .record_inbound(customer, &canonical("p2", now + Duration::minutes(1)))
            .unwrap();
        let context = store.ticket_context(next.ticket.id).unwrap();
        assert!(context.prior_escalated);
    }

    #[test]
    fn test_reply_follows_latest_inbound_channel() {
        let store = store();
        let customer = Uuid::new_v4();
        let start = Utc::now();

        let first = store.record_inbound(customer, &canonical("p1", start)).unwrap();

        // Follow-up arrives on SMS within the window and joins the thread
        let mut followup = canonical("p2", start + Duration::minutes(5));
        followup.channel = Channel::Sms;
        followup.sender = "+14155550100".to_string();
        let second = store.record_inbound(customer, &followup).unwrap();
        assert_eq!(second.ticket.id, first.ticket.id);

        store.begin_processing(first.ticket.id, start).unwrap();
        let queued = store
            .commit(
                first.ticket.id,
                TicketOutcome::Resolved {
                    response_body: "ok".to_string(),
                    sentiment: None,
                    category: None,
                    notes: None,
                },
                start,
            )
            .unwrap()
            .unwrap();

        // The response goes out on the channel of the latest inbound message
        assert_eq!(queued.channel, Channel::Sms);
    }

    #[test]
    fn test_delivery_transitions_guarded() {
        let store = store();
        let customer = Uuid::new_v4();
        let now = Utc::now();
        let record = store.record_inbound(customer, &canonical("p1", now)).unwrap();

        store.begin_processing(record.ticket.id, now).unwrap();
        let queued = store
            .commit(
                record.ticket.id,
                TicketOutcome::Resolved {
                    response_body: "ok".to_string(),
                    sentiment: None,
                    category: None,
                    notes: None,
                },
                now,
            )
            .unwrap()
            .unwrap();

        store
            .update_delivery(queued.id, DeliveryStatus::Sent, Some("prov-9".to_string()))
            .unwrap();
        let result = store.update_delivery(queued.id, DeliveryStatus::Pending, None);
        assert!(matches!(result, Err(StoreError::IllegalDelivery { .. })));
    }

    #[test]
    fn test_pending_includes_stale_claims() {
        let store = store();
        let customer = Uuid::new_v4();
        let now = Utc::now();
        let record = store.record_inbound(customer, &canonical("p1", now)).unwrap();

        assert_eq!(store.pending_tickets(now).len(), 1);

        store.begin_processing(record.ticket.id, now).unwrap();
        assert!(store.pending_tickets(now).is_empty());

        let later = now + Duration::minutes(10);
        assert_eq!(store.pending_tickets(later).len(), 1);
    }

    #[test]
    fn test_reassign_customer_moves_rows() {
        let store = store();
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let now = Utc::now();
        let record = store.record_inbound(from, &canonical("p1", now)).unwrap();

        store.reassign_customer(from, to);

        assert_eq!(store.ticket(record.ticket.id).unwrap().customer_id, to);
        assert_eq!(
            store.conversation(record.conversation.id).unwrap().customer_id,
            to
        );

        // Follow-up from the survivor joins the moved conversation
        let next = store
            .record_inbound(to, &canonical("p2", now + Duration::minutes(1)))
            .unwrap();
        assert!(!next.new_ticket);
        assert_eq!(next.conversation.id, record.conversation.id);
    }
}
