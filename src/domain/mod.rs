//! Domain types for the support pipeline.
//!
//! This module contains the shared data structures:
//! - Messages: canonical inbound form and stored conversation messages
//! - Customers: identity records and normalized channel identifiers
//! - Conversations and Tickets: the state the pipeline drives
//! - Events: payloads carried on the bus

pub mod conversation;
pub mod customer;
pub mod events;
pub mod message;
pub mod ticket;

// Re-export commonly used types
pub use conversation::{Conversation, ConversationResolution, ConversationStatus};
pub use customer::{Customer, CustomerIdentifier, Identifier, IdentifierError, IdentifierType};
pub use events::{
    inbound_topic, outbound_topic, DeadLetterEvent, EscalationEvent, InboundMessageEvent,
    OutboundMessageEvent, TOPIC_DLQ, TOPIC_ESCALATIONS,
};
pub use message::{
    CanonicalMessage, Channel, DeliveryStatus, Direction, Message, MessageRole, ValidationError,
};
pub use ticket::{Ticket, TicketPriority, TicketStatus};
