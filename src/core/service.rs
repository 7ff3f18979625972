//! Operational facade: wires the resolver, store, bus, dedup gate,
//! pipeline, and adapters into one service.
//!
//! This is the surface external collaborators call: ingest a canonical
//! message, trigger processing for one ticket or all pending tickets,
//! fetch ticket status, look up a customer, drain outbound deliveries.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::{ChannelAdapter, DeliveryError};
use crate::config::ResolvedConfig;
use crate::core::bus::EventBus;
use crate::core::dedup::{DedupBackend, Deduplicator, MemoryDedupBackend};
use crate::core::identity::{IdentityError, IdentityResolver, LinkOutcome};
use crate::core::ingest::{IngestError, IngestOutcome, Ingestor};
use crate::core::pipeline::{RetryPolicy, Step};
use crate::core::processor::{BatchReport, ProcessReport, Processor};
use crate::core::store::{StoreError, TicketCounts, TicketStore};
use crate::core::worker::Dispatcher;
use crate::domain::{
    inbound_topic, outbound_topic, CanonicalMessage, Channel, Customer, DeadLetterEvent,
    DeliveryStatus, Identifier, OutboundMessageEvent, Ticket, TOPIC_DLQ,
};
use crate::steps::{
    ChannelFormatter, EscalationGate, KnowledgeBase, KnowledgeRetrieval, LexiconSentiment,
    TemplateGenerator,
};

/// Consumer group names
const WORKER_GROUP: &str = "workers";
const DELIVERY_GROUP: &str = "delivery";

/// Aggregate result of an outbound delivery sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
}

/// The assembled support pipeline
pub struct SupportService {
    resolver: Arc<IdentityResolver>,
    store: Arc<TicketStore>,
    bus: Arc<EventBus>,
    ingestor: Ingestor,
    processor: Processor,
    dispatcher: Dispatcher,
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    retry: RetryPolicy,
}

impl SupportService {
    /// Assemble the service with the in-memory dedup backend
    pub fn new(config: &ResolvedConfig) -> Result<Self> {
        Self::with_dedup_backend(config, Box::new(MemoryDedupBackend::new()))
    }

    /// Assemble the service with a specific dedup backend
    pub fn with_dedup_backend(
        config: &ResolvedConfig,
        dedup_backend: Box<dyn DedupBackend>,
    ) -> Result<Self> {
        let mut kb = KnowledgeBase::default();
        if let Some(path) = &config.pipeline.knowledge_file {
            kb.extend(KnowledgeBase::from_file(path)?);
        }

        let steps: Vec<Arc<dyn Step>> = vec![
            Arc::new(LexiconSentiment::new()),
            Arc::new(KnowledgeRetrieval::new(kb)),
            Arc::new(EscalationGate::new(&config.pipeline)),
            Arc::new(TemplateGenerator::new()),
            Arc::new(ChannelFormatter::new(&config.channels)),
        ];

        Self::assemble(config, dedup_backend, steps)
    }

    /// Assemble with a custom step sequence (stub steps in tests)
    pub fn with_steps(
        config: &ResolvedConfig,
        dedup_backend: Box<dyn DedupBackend>,
        steps: Vec<Arc<dyn Step>>,
    ) -> Result<Self> {
        Self::assemble(config, dedup_backend, steps)
    }

    fn assemble(
        config: &ResolvedConfig,
        dedup_backend: Box<dyn DedupBackend>,
        steps: Vec<Arc<dyn Step>>,
    ) -> Result<Self> {
        let resolver = Arc::new(IdentityResolver::new());
        let store = Arc::new(TicketStore::new(
            config.tickets.reengagement_window,
            config.tickets.processing_claim_timeout,
        ));
        let bus = Arc::new(EventBus::new());

        let dedup = Deduplicator::new(dedup_backend, config.ingest.dedup_retention);
        let ingestor = Ingestor::new(
            dedup,
            Arc::clone(&resolver),
            Arc::clone(&store),
            Arc::clone(&bus),
        );

        let processor = Processor::new(
            Arc::clone(&store),
            Arc::clone(&resolver),
            Arc::clone(&bus),
            steps,
            config.pipeline.retry.clone(),
            config.workers.concurrency,
        );

        let dispatcher = Dispatcher::new(
            processor.clone(),
            Arc::clone(&bus),
            config.workers.concurrency,
        );

        Ok(Self {
            resolver,
            store,
            bus,
            ingestor,
            processor,
            dispatcher,
            adapters: HashMap::new(),
            retry: config.pipeline.retry.clone(),
        })
    }

    /// Register the outbound adapter for a channel
    pub fn register_adapter(&mut self, channel: Channel, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(channel, adapter);
    }

    /// Ingest a canonical message from a channel adapter
    pub async fn ingest(&self, message: CanonicalMessage) -> Result<IngestOutcome, IngestError> {
        self.ingestor.ingest(message).await
    }

    /// Trigger pipeline processing for one ticket
    pub async fn process_ticket(&self, ticket_id: Uuid) -> ProcessReport {
        self.processor.process_ticket(ticket_id).await
    }

    /// Trigger pipeline processing for all pending tickets
    pub async fn process_pending(&self) -> BatchReport {
        self.processor.process_pending().await
    }

    /// Consume every inbound topic until drained, preserving per-conversation
    /// order
    pub async fn run_workers_until_idle(&self) -> BatchReport {
        let mut total = BatchReport::default();

        for channel in [Channel::Email, Channel::WebForm, Channel::Sms] {
            let mut sub = self.bus.subscribe(&inbound_topic(channel), WORKER_GROUP);
            let report = self.dispatcher.run_until_idle(&mut sub).await;
            total.processed += report.processed;
            total.resolved += report.resolved;
            total.escalated += report.escalated;
            total.skipped += report.skipped;
            total.failed += report.failed;
        }

        total
    }

    /// Fetch current ticket status
    pub fn ticket_status(&self, ticket_id: Uuid) -> Result<Ticket, StoreError> {
        self.store.ticket(ticket_id)
    }

    /// Look up a customer by identifier
    pub fn find_customer(&self, identifier: &Identifier) -> Option<Customer> {
        let id = self.resolver.find(identifier)?;
        self.resolver.customer(id)
    }

    /// Attach an identifier observed mid-conversation, merging records when
    /// it already belongs to another customer
    pub fn link_identifier(
        &self,
        customer_id: Uuid,
        identifier: Identifier,
    ) -> Result<Uuid, IdentityError> {
        match self.resolver.link(customer_id, identifier)? {
            LinkOutcome::Linked | LinkOutcome::AlreadyLinked => Ok(customer_id),
            LinkOutcome::BelongsTo(other) => {
                info!(primary = %customer_id, secondary = %other, "Identifier collision, merging");
                let survivor = self.resolver.merge(customer_id, other)?;
                self.store.reassign_customer(other, survivor);
                Ok(survivor)
            }
        }
    }

    /// Drain outbound topics through the registered adapters
    ///
    /// Transient delivery failures are retried with backoff; exhausted or
    /// rejected deliveries mark the message failed and park the event on
    /// the dead-letter topic. The customer never receives a partial
    /// response: either the formatted message is delivered or nothing is.
    pub async fn deliver_outbound(&self) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for (&channel, adapter) in &self.adapters {
            let mut sub = self.bus.subscribe(&outbound_topic(channel), DELIVERY_GROUP);

            while let Some(event) = sub.try_recv() {
                let outbound: OutboundMessageEvent = match event.decode() {
                    Ok(outbound) => outbound,
                    Err(e) => {
                        error!(offset = event.offset, error = %e, "Dropping undecodable outbound event");
                        sub.ack(event.offset);
                        continue;
                    }
                };

                report.attempted += 1;
                match self.deliver_with_retry(adapter.as_ref(), &outbound).await {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        warn!(message_id = %outbound.message_id, error = %e, "Delivery failed");
                        let _ = self
                            .store
                            .update_delivery(outbound.message_id, DeliveryStatus::Failed, None);
                        let dead = DeadLetterEvent {
                            source_topic: outbound_topic(channel),
                            error: e.to_string(),
                            payload: event.payload.clone(),
                        };
                        let _ = self.bus.publish_event(TOPIC_DLQ, &event.key, &dead);
                        report.failed += 1;
                    }
                }
                sub.ack(event.offset);
            }
        }

        report
    }

    async fn deliver_with_retry(
        &self,
        adapter: &dyn ChannelAdapter,
        outbound: &OutboundMessageEvent,
    ) -> Result<(), DeliveryError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match adapter.deliver(outbound).await {
                Ok(receipt) => {
                    if let Err(e) = self.store.update_delivery(
                        outbound.message_id,
                        receipt.status,
                        receipt.provider_message_id,
                    ) {
                        warn!(message_id = %outbound.message_id, error = %e, "Delivery status update refused");
                    }
                    return Ok(());
                }
                Err(DeliveryError::Transient(reason)) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        adapter = adapter.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Aggregate ticket counts
    pub fn counts(&self) -> TicketCounts {
        self.store.counts()
    }

    /// Tickets still waiting for processing
    pub fn pending_count(&self) -> usize {
        self.store.pending_tickets(Utc::now()).len()
    }

    /// Shared store handle (inspection and tests)
    pub fn store(&self) -> Arc<TicketStore> {
        Arc::clone(&self.store)
    }

    /// Shared bus handle (inspection and tests)
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Shared resolver handle (inspection and tests)
    pub fn resolver(&self) -> Arc<IdentityResolver> {
        Arc::clone(&self.resolver)
    }
}
