//! Inbound ingestion: validate, dedup, resolve identity, open the ticket,
//! and publish to the bus.
//!
//! This is the only path by which channel traffic enters the system.
//! Malformed messages are dropped at the boundary and never reach the bus;
//! a duplicate provider id is absorbed silently; an unreachable dedup
//! store rejects the event so the adapter retries later (fail closed).

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::bus::{BusError, EventBus};
use crate::core::dedup::{Admission, Deduplicator};
use crate::core::identity::IdentityResolver;
use crate::core::store::{StoreError, TicketStore};
use crate::domain::{
    inbound_topic, CanonicalMessage, Identifier, IdentifierError, InboundMessageEvent,
    ValidationError,
};

/// Ingestion failures
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed canonical message; dropped, not retried
    #[error("invalid canonical message: {0}")]
    Validation(#[from] ValidationError),

    /// Sender identifier failed normalization; dropped, not retried
    #[error("invalid sender identifier: {0}")]
    Identifier(#[from] IdentifierError),

    /// Dedup store unreachable; rejected so the adapter can retry
    #[error("dedup gate unavailable: {0}")]
    DedupUnavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// What ingesting a message produced
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Message admitted; exactly one ticket row exists for it
    Accepted {
        ticket_id: Uuid,
        conversation_id: Uuid,
        customer_id: Uuid,
        message_id: Uuid,

        /// Whether this message opened a new ticket
        new_ticket: bool,
    },

    /// Redelivery of an already-admitted provider message id
    Duplicate,
}

/// The ingestion pipeline stage
pub struct Ingestor {
    dedup: Deduplicator,
    resolver: Arc<IdentityResolver>,
    store: Arc<TicketStore>,
    bus: Arc<EventBus>,
}

impl Ingestor {
    pub fn new(
        dedup: Deduplicator,
        resolver: Arc<IdentityResolver>,
        store: Arc<TicketStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            dedup,
            resolver,
            store,
            bus,
        }
    }

    /// Ingest one canonical message from a channel adapter
    #[instrument(skip(self, message), fields(channel = %message.channel))]
    pub async fn ingest(&self, message: CanonicalMessage) -> Result<IngestOutcome, IngestError> {
        message.validate()?;
        let identifier = Identifier::from_channel(message.channel, &message.sender)?;

        let admission = self
            .dedup
            .admit(message.channel, &message.provider_message_id, Utc::now())
            .await
            .map_err(|e| IngestError::DedupUnavailable(e.to_string()))?;

        if admission == Admission::Duplicate {
            warn!(
                provider_message_id = %message.provider_message_id,
                "Dropping duplicate delivery"
            );
            return Ok(IngestOutcome::Duplicate);
        }

        let resolution = self.resolver.resolve(&identifier);
        let record = self.store.record_inbound(resolution.customer_id, &message)?;

        let event = InboundMessageEvent {
            ticket_id: record.ticket.id,
            conversation_id: record.conversation.id,
            customer_id: resolution.customer_id,
            message_id: record.message.id,
            channel: message.channel,
        };
        self.bus.publish_event(
            &inbound_topic(message.channel),
            &record.conversation.id.to_string(),
            &event,
        )?;

        info!(
            ticket_id = %record.ticket.id,
            customer_id = %resolution.customer_id,
            new_customer = resolution.created,
            new_ticket = record.new_ticket,
            "Inbound message admitted"
        );

        Ok(IngestOutcome::Accepted {
            ticket_id: record.ticket.id,
            conversation_id: record.conversation.id,
            customer_id: resolution.customer_id,
            message_id: record.message.id,
            new_ticket: record.new_ticket,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dedup::{DedupBackend, DedupError, MemoryDedupBackend};
    use crate::domain::Channel;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};

    fn ingestor_with_backend(backend: Box<dyn DedupBackend>) -> Ingestor {
        Ingestor::new(
            Deduplicator::new(backend, Duration::days(7)),
            Arc::new(IdentityResolver::new()),
            Arc::new(TicketStore::new(
                Duration::hours(24),
                std::time::Duration::from_secs(300),
            )),
            Arc::new(EventBus::new()),
        )
    }

    fn ingestor() -> Ingestor {
        ingestor_with_backend(Box::new(MemoryDedupBackend::new()))
    }

    fn message(provider_id: &str) -> CanonicalMessage {
        CanonicalMessage {
            channel: Channel::Sms,
            sender: "+10000000001".to_string(),
            body: "need help with my account".to_string(),
            provider_message_id: provider_id.to_string(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_accepted_message_opens_ticket() {
        let ingestor = ingestor();
        let outcome = ingestor.ingest(message("wa-1")).await.unwrap();

        match outcome {
            IngestOutcome::Accepted { new_ticket, .. } => assert!(new_ticket),
            other => panic!("expected acceptance, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_delivery_absorbed() {
        let ingestor = ingestor();

        ingestor.ingest(message("wa-1")).await.unwrap();
        let outcome = ingestor.ingest(message("wa-1")).await.unwrap();

        assert!(matches!(outcome, IngestOutcome::Duplicate));
    }

    #[tokio::test]
    async fn test_malformed_message_dropped() {
        let ingestor = ingestor();

        let mut bad = message("wa-1");
        bad.body = "  ".to_string();
        let result = ingestor.ingest(bad).await;
        assert!(matches!(result, Err(IngestError::Validation(_))));

        let mut bad = message("wa-2");
        bad.sender = "not-a-phone".to_string();
        let result = ingestor.ingest(bad).await;
        assert!(matches!(result, Err(IngestError::Identifier(_))));
    }

    #[tokio::test]
    async fn test_dedup_outage_fails_closed() {
        struct DownBackend;

        #[async_trait]
        impl DedupBackend for DownBackend {
            async fn insert(
                &self,
                _key: &str,
                _at: DateTime<Utc>,
                _cutoff: DateTime<Utc>,
            ) -> Result<bool, DedupError> {
                Err(DedupError::Unavailable("store offline".to_string()))
            }
        }

        let ingestor = ingestor_with_backend(Box::new(DownBackend));
        let result = ingestor.ingest(message("wa-1")).await;
        assert!(matches!(result, Err(IngestError::DedupUnavailable(_))));
    }
}
