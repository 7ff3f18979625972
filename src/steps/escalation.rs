//! Escalation decision: the deterministic gate between automation and a human.
//!
//! Any single trigger escalates: high-risk terms, an explicit request for a
//! person, sentiment under the configured threshold, an unanswerable message
//! past the complexity bound, a matched reference that demands a human, or a
//! recent prior escalation in the conversation's lineage.

use async_trait::async_trait;

use crate::config::PipelineSettings;
use crate::core::pipeline::{
    EscalationDecision, FailurePolicy, SentimentScore, Step, StepData, StepError, TicketSnapshot,
    Urgency,
};

/// Deterministic escalation gate
pub struct EscalationGate {
    sentiment_threshold: f32,
    max_unassisted_words: usize,
    high_risk_keywords: Vec<String>,
    human_request_keywords: Vec<String>,
}

impl EscalationGate {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            sentiment_threshold: settings.sentiment_escalation_threshold,
            max_unassisted_words: settings.max_unassisted_words,
            high_risk_keywords: settings
                .high_risk_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            human_request_keywords: settings
                .human_request_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
        }
    }

    fn decide(&self, snapshot: &TicketSnapshot, data: &StepData) -> EscalationDecision {
        let body = snapshot.latest_message.body.to_lowercase();

        for kw in &self.high_risk_keywords {
            if word_match(&body, kw) {
                return EscalationDecision::escalate(
                    format!("keyword_detected:{}", kw),
                    Urgency::Immediate,
                );
            }
        }

        for kw in &self.human_request_keywords {
            if word_match(&body, kw) {
                return EscalationDecision::escalate("customer_requested_human", Urgency::High);
            }
        }

        let sentiment = data.sentiment.unwrap_or_else(SentimentScore::neutral);
        if sentiment.score < self.sentiment_threshold {
            let urgency = if sentiment.score < self.sentiment_threshold - 0.1 {
                Urgency::Immediate
            } else {
                Urgency::High
            };
            let reason = match urgency {
                Urgency::Immediate => "hostile_sentiment",
                _ => "negative_sentiment",
            };
            return EscalationDecision::escalate(reason, urgency);
        }

        if let Some(best) = data.references.first() {
            if best.requires_human {
                return EscalationDecision::escalate(
                    format!("reference_requires_human:{}", best.category),
                    Urgency::High,
                );
            }
        }

        let words = snapshot.latest_message.body.split_whitespace().count();
        if data.references.is_empty() && words > self.max_unassisted_words {
            return EscalationDecision::escalate("no_reference_for_complex_message", Urgency::Normal);
        }

        if snapshot.prior_escalated {
            return EscalationDecision::escalate("prior_escalation_in_conversation", Urgency::High);
        }

        EscalationDecision::keep_automated()
    }
}

/// Whole-word match: "agent" must not fire inside "user-agent-id"
fn word_match(haystack: &str, term: &str) -> bool {
    let mut start = 0;
    while let Some(idx) = haystack[start..].find(term) {
        let idx = start + idx;
        let before_ok = idx == 0
            || !haystack[..idx]
                .chars()
                .next_back()
                .map(char::is_alphanumeric)
                .unwrap_or(false);
        let end = idx + term.len();
        let after_ok = end >= haystack.len()
            || !haystack[end..]
                .chars()
                .next()
                .map(char::is_alphanumeric)
                .unwrap_or(false);

        if before_ok && after_ok {
            return true;
        }
        start = idx + 1;
    }
    false
}

#[async_trait]
impl Step for EscalationGate {
    fn name(&self) -> &'static str {
        "escalation"
    }

    // Deterministic gate; a failure means the snapshot itself is unusable
    fn on_failure(&self) -> FailurePolicy {
        FailurePolicy::Escalate
    }

    async fn apply(
        &self,
        snapshot: &TicketSnapshot,
        mut data: StepData,
    ) -> Result<StepData, StepError> {
        data.escalation = Some(self.decide(snapshot, &data));
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::{Reference, SentimentLabel};
    use crate::domain::{
        CanonicalMessage, Channel, Conversation, Customer, Identifier, Message, Ticket,
    };
    use chrono::Utc;

    fn gate() -> EscalationGate {
        EscalationGate::new(&PipelineSettings::default())
    }

    fn snapshot(body: &str) -> TicketSnapshot {
        let customer = Customer::with_identifier(Identifier::email("a@example.com").unwrap());
        let conversation = Conversation::start(customer.id, Channel::Email, Utc::now());
        let ticket = Ticket::open(conversation.id, customer.id, Channel::Email, Utc::now());
        let canonical = CanonicalMessage {
            channel: Channel::Email,
            sender: "a@example.com".to_string(),
            body: body.to_string(),
            provider_message_id: "p1".to_string(),
            received_at: Utc::now(),
        };
        TicketSnapshot {
            latest_message: Message::inbound(conversation.id, &canonical),
            ticket,
            conversation,
            customer,
            prior_escalated: false,
        }
    }

    fn with_sentiment(mut data: StepData, score: f32) -> StepData {
        data.sentiment = Some(SentimentScore {
            score,
            label: SentimentLabel::Neutral,
        });
        data
    }

    #[test]
    fn test_high_risk_keyword_escalates_immediately() {
        let decision = gate().decide(&snapshot("my lawyer will hear about this"), &StepData::default());
        assert!(decision.escalate);
        assert_eq!(decision.urgency, Urgency::Immediate);
        assert!(decision.reason.starts_with("keyword_detected:"));
    }

    #[test]
    fn test_human_request_escalates() {
        let decision = gate().decide(
            &snapshot("please let me talk to a real person"),
            &with_sentiment(StepData::default(), 0.6),
        );
        assert!(decision.escalate);
        assert_eq!(decision.reason, "customer_requested_human");
        assert_eq!(decision.urgency, Urgency::High);
    }

    #[test]
    fn test_low_sentiment_escalates() {
        let decision = gate().decide(
            &snapshot("everything broke again"),
            &with_sentiment(StepData::default(), 0.1),
        );
        assert!(decision.escalate);
        assert_eq!(decision.reason, "hostile_sentiment");
        assert_eq!(decision.urgency, Urgency::Immediate);

        let decision = gate().decide(
            &snapshot("everything broke again"),
            &with_sentiment(StepData::default(), 0.25),
        );
        assert!(decision.escalate);
        assert_eq!(decision.reason, "negative_sentiment");
        assert_eq!(decision.urgency, Urgency::High);
    }

    #[test]
    fn test_neutral_with_reference_stays_automated() {
        let mut data = with_sentiment(StepData::default(), 0.55);
        data.references.push(Reference {
            title: "Password reset".to_string(),
            body: "...".to_string(),
            category: "account".to_string(),
            relevance: 0.8,
            requires_human: false,
        });

        let decision = gate().decide(&snapshot("how do I reset my password"), &data);
        assert!(!decision.escalate);
    }

    #[test]
    fn test_reference_requiring_human_escalates() {
        let mut data = with_sentiment(StepData::default(), 0.55);
        data.references.push(Reference {
            title: "Billing review".to_string(),
            body: "...".to_string(),
            category: "billing".to_string(),
            relevance: 0.8,
            requires_human: true,
        });

        let decision = gate().decide(&snapshot("question about my invoice"), &data);
        assert!(decision.escalate);
        assert!(decision.reason.starts_with("reference_requires_human:"));
    }

    #[test]
    fn test_complex_unanswerable_message_escalates() {
        let long_body = "word ".repeat(150);
        let decision = gate().decide(
            &snapshot(&long_body),
            &with_sentiment(StepData::default(), 0.55),
        );
        assert!(decision.escalate);
        assert_eq!(decision.reason, "no_reference_for_complex_message");
        assert_eq!(decision.urgency, Urgency::Normal);
    }

    #[test]
    fn test_short_unanswerable_message_stays_automated() {
        let decision = gate().decide(
            &snapshot("quick question about colors"),
            &with_sentiment(StepData::default(), 0.55),
        );
        assert!(!decision.escalate);
    }

    #[test]
    fn test_prior_escalation_escalates() {
        let mut snap = snapshot("one more thing");
        snap.prior_escalated = true;
        let decision = gate().decide(&snap, &with_sentiment(StepData::default(), 0.6));
        assert!(decision.escalate);
        assert_eq!(decision.reason, "prior_escalation_in_conversation");
    }

    #[test]
    fn test_word_match_respects_boundaries() {
        assert!(word_match("i want a human now", "human"));
        assert!(!word_match("the humanities department", "human"));
        assert!(word_match("agent please", "agent"));
        assert!(!word_match("check the user-agentid header", "agent"));
    }

    #[test]
    fn test_high_risk_terms_do_not_fire_inside_words() {
        // "sue" must not fire inside "issue"
        let decision = gate().decide(
            &snapshot("I have an issue with the dashboard"),
            &with_sentiment(StepData::default(), 0.55),
        );
        assert!(!decision.escalate);
    }

    #[test]
    fn test_missing_sentiment_defaults_neutral() {
        // No sentiment recorded at all: the neutral default keeps automation
        let decision = gate().decide(&snapshot("quick question"), &StepData::default());
        assert!(!decision.escalate);
    }
}
