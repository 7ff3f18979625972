//! Pipeline driver: claims a ticket, runs the step sequence, commits.
//!
//! Coordinates step execution, retry handling for transient failures, and
//! the forced-escalation path when a required step fails past its retry
//! budget. Steps work from an immutable snapshot; every observable effect
//! (status transition, outbound message, bus events) happens here, after
//! the steps finish.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::bus::EventBus;
use crate::core::identity::IdentityResolver;
use crate::core::pipeline::{
    FailurePolicy, RetryPolicy, Step, StepData, TicketSnapshot, Urgency,
};
use crate::core::store::{ClaimOutcome, TicketOutcome, TicketStore};
use crate::domain::{
    outbound_topic, Channel, Customer, EscalationEvent, IdentifierType, OutboundMessageEvent,
    TOPIC_ESCALATIONS,
};

/// Queue owning tickets once automation hands them off
const ESCALATION_TARGET: &str = "human-support";

/// Why a pipeline run did not process its ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Ticket already resolved or escalated
    Terminal,

    /// Another worker holds the processing claim
    Claimed,
}

/// Result of one pipeline run
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Response generated and queued outbound
    Resolved { message_id: Uuid },

    /// Handed to a human
    Escalated { reason: String },

    /// No-op (idempotent re-trigger)
    Skipped(SkipReason),

    /// Run aborted without a commit (ticket state unchanged)
    Failed(String),
}

/// Report for one ticket
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub ticket_id: Uuid,
    pub outcome: ProcessOutcome,
}

/// Aggregate counts for a batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub resolved: usize,
    pub escalated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    /// Fold one ticket report into the aggregate
    pub fn absorb(&mut self, report: &ProcessReport) {
        self.processed += 1;
        match report.outcome {
            ProcessOutcome::Resolved { .. } => self.resolved += 1,
            ProcessOutcome::Escalated { .. } => self.escalated += 1,
            ProcessOutcome::Skipped(_) => self.skipped += 1,
            ProcessOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// A forced escalation raised by the driver itself
struct ForcedEscalation {
    reason: String,
}

/// The pipeline driver
#[derive(Clone)]
pub struct Processor {
    store: Arc<TicketStore>,
    resolver: Arc<IdentityResolver>,
    bus: Arc<EventBus>,
    steps: Vec<Arc<dyn Step>>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Processor {
    pub fn new(
        store: Arc<TicketStore>,
        resolver: Arc<IdentityResolver>,
        bus: Arc<EventBus>,
        steps: Vec<Arc<dyn Step>>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            resolver,
            bus,
            steps,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// Run the pipeline for one ticket
    ///
    /// Idempotent: a terminal or freshly-claimed ticket is skipped without
    /// producing output, so duplicate triggers cannot duplicate responses.
    #[instrument(skip(self), fields(ticket_id = %ticket_id))]
    pub async fn process_ticket(&self, ticket_id: Uuid) -> ProcessReport {
        let now = Utc::now();

        match self.store.begin_processing(ticket_id, now) {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::AlreadyClaimed) => {
                debug!("Ticket already claimed, skipping");
                return ProcessReport {
                    ticket_id,
                    outcome: ProcessOutcome::Skipped(SkipReason::Claimed),
                };
            }
            Ok(ClaimOutcome::NotPending) => {
                debug!("Ticket terminal, skipping");
                return ProcessReport {
                    ticket_id,
                    outcome: ProcessOutcome::Skipped(SkipReason::Terminal),
                };
            }
            Err(e) => {
                return ProcessReport {
                    ticket_id,
                    outcome: ProcessOutcome::Failed(e.to_string()),
                };
            }
        }

        // Claim held from here on; every exit path below commits a terminal
        // status so the ticket is never left in progress
        let snapshot = match self.build_snapshot(ticket_id) {
            Ok(snapshot) => snapshot,
            Err(forced) => return self.commit_escalation(ticket_id, None, forced).await,
        };

        let data = match self.run_steps(&snapshot).await {
            Ok(data) => data,
            Err(forced) => {
                return self
                    .commit_escalation(ticket_id, Some(&snapshot), forced)
                    .await
            }
        };

        self.commit_outcome(ticket_id, &snapshot, data).await
    }

    /// Process every pending ticket once, independently
    ///
    /// Tickets run concurrently under the worker cap; one ticket's failure
    /// never blocks the rest.
    pub async fn process_pending(&self) -> BatchReport {
        let pending = self.store.pending_tickets(Utc::now());
        info!(count = pending.len(), "Processing pending tickets");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(pending.len());

        for ticket in pending {
            let processor = self.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                processor.process_ticket(ticket.id).await
            }));
        }

        let mut report = BatchReport::default();
        for handle in handles {
            match handle.await {
                Ok(ticket_report) => report.absorb(&ticket_report),
                Err(e) => {
                    error!(error = %e, "Ticket task panicked");
                    report.processed += 1;
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn build_snapshot(&self, ticket_id: Uuid) -> Result<TicketSnapshot, ForcedEscalation> {
        let context = self.store.ticket_context(ticket_id).map_err(|e| ForcedEscalation {
            reason: format!("snapshot_unavailable: {}", e),
        })?;

        let customer = self
            .resolver
            .customer(context.ticket.customer_id)
            .ok_or_else(|| ForcedEscalation {
                reason: format!("unknown_customer: {}", context.ticket.customer_id),
            })?;

        Ok(TicketSnapshot {
            ticket: context.ticket,
            conversation: context.conversation,
            customer,
            latest_message: context.latest_inbound,
            prior_escalated: context.prior_escalated,
        })
    }

    /// Run the step sequence with per-step retry
    ///
    /// A step that records an escalate verdict ends the sequence; later
    /// steps (generation, formatting) are never invoked for an escalated
    /// ticket.
    async fn run_steps(&self, snapshot: &TicketSnapshot) -> Result<StepData, ForcedEscalation> {
        let mut data = StepData::default();

        for step in &self.steps {
            data = self.run_step_with_retry(step.as_ref(), snapshot, data).await?;

            if data
                .escalation
                .as_ref()
                .map(|d| d.escalate)
                .unwrap_or(false)
            {
                break;
            }
        }

        Ok(data)
    }

    async fn run_step_with_retry(
        &self,
        step: &dyn Step,
        snapshot: &TicketSnapshot,
        data: StepData,
    ) -> Result<StepData, ForcedEscalation> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match step.apply(snapshot, data.clone()).await {
                Ok(next) => return Ok(next),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        step = step.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Step failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => match step.on_failure() {
                    FailurePolicy::Degrade => {
                        warn!(step = step.name(), error = %e, "Step failed, continuing with defaults");
                        return Ok(data);
                    }
                    FailurePolicy::Escalate => {
                        error!(step = step.name(), error = %e, "Step failed permanently");
                        return Err(ForcedEscalation {
                            reason: format!("{}_failed: {}", step.name(), e),
                        });
                    }
                },
            }
        }
    }

    /// Commit the step verdict and publish the matching bus event
    async fn commit_outcome(
        &self,
        ticket_id: Uuid,
        snapshot: &TicketSnapshot,
        data: StepData,
    ) -> ProcessReport {
        let sentiment = data.sentiment.map(|s| s.score);

        let escalation = data
            .escalation
            .as_ref()
            .filter(|d| d.escalate)
            .cloned();

        if let Some(decision) = escalation {
            let outcome = TicketOutcome::Escalated {
                reason: decision.reason.clone(),
                urgency: decision.urgency.as_str().to_string(),
                sentiment,
                target: ESCALATION_TARGET.to_string(),
            };

            return match self.store.commit(ticket_id, outcome, Utc::now()) {
                Ok(_) => {
                    self.publish_escalation(snapshot, &decision.reason, decision.urgency);
                    ProcessReport {
                        ticket_id,
                        outcome: ProcessOutcome::Escalated {
                            reason: decision.reason,
                        },
                    }
                }
                Err(e) => ProcessReport {
                    ticket_id,
                    outcome: ProcessOutcome::Failed(e.to_string()),
                },
            };
        }

        // No escalation: a formatted response must exist
        let Some(body) = data.formatted_response.clone() else {
            return self
                .commit_escalation(
                    ticket_id,
                    Some(snapshot),
                    ForcedEscalation {
                        reason: "pipeline_produced_no_response".to_string(),
                    },
                )
                .await;
        };

        let category = data.references.first().map(|r| r.category.clone());
        let outcome = TicketOutcome::Resolved {
            response_body: body.clone(),
            sentiment,
            category,
            notes: None,
        };

        match self.store.commit(ticket_id, outcome, Utc::now()) {
            Ok(Some(message)) => {
                if let Some(recipient) = deliverable_identifier(&snapshot.customer, message.channel)
                {
                    let event = OutboundMessageEvent {
                        message_id: message.id,
                        ticket_id,
                        conversation_id: message.conversation_id,
                        channel: message.channel,
                        recipient,
                        body,
                    };
                    let topic = outbound_topic(message.channel);
                    if let Err(e) = self.bus.publish_event(
                        &topic,
                        &message.conversation_id.to_string(),
                        &event,
                    ) {
                        error!(error = %e, "Failed to queue outbound event");
                    }
                } else {
                    warn!(customer_id = %snapshot.customer.id, "No deliverable identifier for customer");
                }

                ProcessReport {
                    ticket_id,
                    outcome: ProcessOutcome::Resolved {
                        message_id: message.id,
                    },
                }
            }
            Ok(None) => ProcessReport {
                ticket_id,
                outcome: ProcessOutcome::Failed("resolution committed without a message".to_string()),
            },
            Err(e) => ProcessReport {
                ticket_id,
                outcome: ProcessOutcome::Failed(e.to_string()),
            },
        }
    }

    /// Force the ticket to escalated with a recorded reason
    ///
    /// Terminal path for exhausted retries and driver-level failures; the
    /// ticket must never stay in progress.
    async fn commit_escalation(
        &self,
        ticket_id: Uuid,
        snapshot: Option<&TicketSnapshot>,
        forced: ForcedEscalation,
    ) -> ProcessReport {
        let outcome = TicketOutcome::Escalated {
            reason: forced.reason.clone(),
            urgency: Urgency::High.as_str().to_string(),
            sentiment: None,
            target: ESCALATION_TARGET.to_string(),
        };

        match self.store.commit(ticket_id, outcome, Utc::now()) {
            Ok(_) => {
                if let Some(snapshot) = snapshot {
                    self.publish_escalation(snapshot, &forced.reason, Urgency::High);
                }
                ProcessReport {
                    ticket_id,
                    outcome: ProcessOutcome::Escalated {
                        reason: forced.reason,
                    },
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to commit forced escalation");
                ProcessReport {
                    ticket_id,
                    outcome: ProcessOutcome::Failed(e.to_string()),
                }
            }
        }
    }

    fn publish_escalation(&self, snapshot: &TicketSnapshot, reason: &str, urgency: Urgency) {
        let event = EscalationEvent {
            ticket_id: snapshot.ticket.id,
            customer_id: snapshot.customer.id,
            channel: snapshot.latest_message.channel,
            reason: reason.to_string(),
            urgency: urgency.as_str().to_string(),
        };

        if let Err(e) = self.bus.publish_event(
            TOPIC_ESCALATIONS,
            &snapshot.conversation.id.to_string(),
            &event,
        ) {
            error!(error = %e, "Failed to publish escalation event");
        }
    }
}

/// Pick the customer identifier a channel can deliver to
fn deliverable_identifier(customer: &Customer, channel: Channel) -> Option<String> {
    let wanted = match channel {
        Channel::Email | Channel::WebForm => IdentifierType::Email,
        Channel::Sms => IdentifierType::Phone,
    };

    customer
        .identifiers
        .iter()
        .find(|row| row.identifier.kind() == wanted)
        .or_else(|| customer.identifiers.first())
        .map(|row| row.identifier.value().to_string())
}
