//! Pipeline step contract and retry policy.
//!
//! The response pipeline is an ordered list of capability-typed steps
//! composed by a fixed driver. Each step receives the immutable
//! ticket-plus-latest-message snapshot and the data accumulated by earlier
//! steps; it returns new data and never touches shared state. The driver
//! applies the final outcome atomically.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Conversation, Customer, Message, Ticket};

/// Immutable view of a ticket handed to every step
#[derive(Debug, Clone)]
pub struct TicketSnapshot {
    pub ticket: Ticket,
    pub conversation: Conversation,
    pub customer: Customer,

    /// The inbound message being answered
    pub latest_message: Message,

    /// An escalation already occurred in this conversation's recent lineage
    pub prior_escalated: bool,
}

/// Sentiment classification label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
    Hostile,
}

/// A scored sentiment in [0, 1]; 0 hostile, 1 very positive
#[derive(Debug, Clone, Copy)]
pub struct SentimentScore {
    pub score: f32,
    pub label: SentimentLabel,
}

impl SentimentScore {
    /// The neutral default used when scoring fails
    pub fn neutral() -> Self {
        Self {
            score: 0.5,
            label: SentimentLabel::Neutral,
        }
    }
}

/// A piece of reference material retrieved for the message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    pub body: String,
    pub category: String,

    /// Match strength in [0, 1]
    pub relevance: f32,

    /// The reference itself demands a human (billing review etc.)
    pub requires_human: bool,
}

/// Urgency attached to an escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Immediate,
    High,
    Normal,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Immediate => "immediate",
            Urgency::High => "high",
            Urgency::Normal => "normal",
        }
    }
}

/// The escalation step's verdict
#[derive(Debug, Clone)]
pub struct EscalationDecision {
    pub escalate: bool,
    pub reason: String,
    pub urgency: Urgency,
}

impl EscalationDecision {
    pub fn keep_automated() -> Self {
        Self {
            escalate: false,
            reason: String::new(),
            urgency: Urgency::Normal,
        }
    }

    pub fn escalate(reason: impl Into<String>, urgency: Urgency) -> Self {
        Self {
            escalate: true,
            reason: reason.into(),
            urgency,
        }
    }
}

/// Data accumulated across the step sequence
#[derive(Debug, Clone, Default)]
pub struct StepData {
    /// Sentiment of the latest inbound message
    pub sentiment: Option<SentimentScore>,

    /// Retrieved reference material, best match first
    pub references: Vec<Reference>,

    /// Escalation verdict
    pub escalation: Option<EscalationDecision>,

    /// Draft response text
    pub response: Option<String>,

    /// Channel-formatted response, ready to queue outbound
    pub formatted_response: Option<String>,
}

/// Step failures
#[derive(Debug, Error)]
pub enum StepError {
    /// Expected to succeed on retry (dependency hiccup)
    #[error("transient failure in {step}: {reason}")]
    Transient { step: &'static str, reason: String },

    /// The step cannot produce a usable result at all
    #[error("{step} produced no usable result: {reason}")]
    Unusable { step: &'static str, reason: String },
}

impl StepError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StepError::Transient { .. })
    }
}

/// What the driver does when a step fails past retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Continue with the step's neutral/default contribution
    Degrade,

    /// No response can be fabricated; force escalation
    Escalate,
}

/// A replaceable pipeline capability
#[async_trait]
pub trait Step: Send + Sync {
    /// Step name for logs and failure reasons
    fn name(&self) -> &'static str;

    /// How the driver treats this step's failure after retries
    fn on_failure(&self) -> FailurePolicy;

    /// Produce this step's contribution
    async fn apply(&self, snapshot: &TicketSnapshot, data: StepData) -> Result<StepData, StepError>;
}

/// Retry policy for transient step failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000)); // Capped
    }

    #[test]
    fn test_retry_exhaustion() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_neutral_sentiment_default() {
        let neutral = SentimentScore::neutral();
        assert!((neutral.score - 0.5).abs() < f32::EPSILON);
        assert_eq!(neutral.label, SentimentLabel::Neutral);
    }

    #[test]
    fn test_step_error_classification() {
        let transient = StepError::Transient {
            step: "sentiment",
            reason: "timeout".to_string(),
        };
        let unusable = StepError::Unusable {
            step: "generation",
            reason: "empty render".to_string(),
        };

        assert!(transient.is_transient());
        assert!(!unusable.is_transient());
    }
}
