//! deskpipe - multi-channel support ticket pipeline
//!
//! Routes customer messages from independent channels (email, web form,
//! chat/SMS gateway) into one ticket pipeline: identity resolution across
//! channels, idempotent ingestion, an ordered event bus, a ticket state
//! machine, and an automated response pipeline that either answers or
//! escalates to a human.
//!
//! # Architecture
//!
//! Control flow: adapter -> ingestion dedup -> event bus (topic per
//! direction and channel) -> identity resolver -> ticket state machine ->
//! response pipeline -> outbound event -> adapter.
//!
//! Guarantees:
//! - Exactly one ticket per admitted provider message id
//! - Per-conversation processing order, no ordering across conversations
//! - Terminal tickets never change state; re-triggering them is a no-op
//!
//! # Modules
//!
//! - `adapters`: Channel adapter contract and delivery implementations
//! - `core`: Orchestration (identity, dedup, bus, store, pipeline, service)
//! - `domain`: Data structures (Customer, Conversation, Ticket, Message)
//! - `steps`: Built-in pipeline capability implementations
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Ingest a batch of canonical messages and run the pipeline
//! deskpipe run --input messages.jsonl
//!
//! # Show resolved configuration
//! deskpipe config
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod steps;

// Re-export main types at crate root for convenience
pub use crate::core::{
    Admission, BatchReport, Deduplicator, EventBus, IdentityResolver, IngestOutcome, Processor,
    SupportService, TicketStore,
};
pub use crate::domain::{
    CanonicalMessage, Channel, Conversation, Customer, Identifier, Message, Ticket, TicketStatus,
};
