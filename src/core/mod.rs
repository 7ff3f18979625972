//! Core orchestration logic.
//!
//! This module contains:
//! - Identity: cross-channel customer resolution and merging
//! - Dedup: the idempotent ingestion gate
//! - Bus: ordered, at-least-once event delivery between components
//! - Store: conversation/ticket state machine and atomic commits
//! - Pipeline/Processor: the step contract and its driver
//! - Ingest/Worker/Service: the inbound path, dispatch, and the facade

pub mod bus;
pub mod dedup;
pub mod identity;
pub mod ingest;
pub mod pipeline;
pub mod processor;
pub mod service;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub use bus::{BusError, BusEvent, EventBus, Subscription};
pub use dedup::{Admission, DedupBackend, DedupError, Deduplicator, JournalDedupBackend, MemoryDedupBackend};
pub use identity::{IdentityError, IdentityResolver, LinkOutcome, Resolution};
pub use ingest::{IngestError, IngestOutcome, Ingestor};
pub use pipeline::{
    EscalationDecision, FailurePolicy, Reference, RetryPolicy, SentimentLabel, SentimentScore,
    Step, StepData, StepError, TicketSnapshot, Urgency,
};
pub use processor::{BatchReport, ProcessOutcome, ProcessReport, Processor, SkipReason};
pub use service::{DeliveryReport, SupportService};
pub use store::{
    ClaimOutcome, InboundRecord, StoreError, TicketContext, TicketCounts, TicketOutcome,
    TicketStore,
};
pub use worker::Dispatcher;
