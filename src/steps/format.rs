//! Channel formatting: the last step before a response is queued outbound.
//!
//! Email gets a greeting/signature wrapper with a ticket reference, web
//! form responses a footer, and SMS-like channels a hard character limit.
//! Truncation cuts at a word boundary and appends an explicit continuation
//! marker; a response is never silently cut mid-word.

use async_trait::async_trait;

use crate::config::ChannelSettings;
use crate::core::pipeline::{FailurePolicy, Step, StepData, StepError, TicketSnapshot};
use crate::domain::Channel;

/// Per-channel response formatter
pub struct ChannelFormatter {
    sms_max_chars: usize,
    continuation_marker: String,
}

impl ChannelFormatter {
    pub fn new(settings: &ChannelSettings) -> Self {
        Self {
            sms_max_chars: settings.sms_max_chars,
            continuation_marker: settings.continuation_marker.clone(),
        }
    }

    /// Apply channel constraints to a draft response
    pub fn format(&self, channel: Channel, body: &str, ticket_reference: &str) -> String {
        match channel {
            Channel::Email => format!(
                "Dear Customer,\n\nThank you for reaching out to support.\n\n{}\n\n\
                 Best regards,\nThe Support Team\n---\nTicket: {}",
                body, ticket_reference
            ),
            Channel::WebForm => {
                format!("{}\n\n---\nNeed more help? Reply or visit the support portal.", body)
            }
            Channel::Sms => truncate_with_marker(body, self.sms_max_chars, &self.continuation_marker),
        }
    }
}

/// Cut `text` to at most `max_chars` characters, at a word boundary, with
/// the marker appended when anything was dropped
fn truncate_with_marker(text: &str, max_chars: usize, marker: &str) -> String {
    let total: usize = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let marker_len = marker.chars().count();
    let budget = max_chars.saturating_sub(marker_len);

    let cut: String = text.chars().take(budget).collect();

    // Back off to the last space so no word is cut in half; a single
    // unbroken token longer than the budget is cut at the budget
    let trimmed = match cut.rfind(' ') {
        Some(idx) => &cut[..idx],
        None => cut.as_str(),
    };

    format!("{}{}", trimmed.trim_end(), marker)
}

#[async_trait]
impl Step for ChannelFormatter {
    fn name(&self) -> &'static str {
        "format"
    }

    fn on_failure(&self) -> FailurePolicy {
        FailurePolicy::Escalate
    }

    async fn apply(
        &self,
        snapshot: &TicketSnapshot,
        mut data: StepData,
    ) -> Result<StepData, StepError> {
        let draft = data.response.clone().ok_or(StepError::Unusable {
            step: "format",
            reason: "no draft response to format".to_string(),
        })?;

        // Short ticket reference, enough for a human reply to quote
        let reference = snapshot
            .ticket
            .id
            .to_string()
            .chars()
            .take(8)
            .collect::<String>()
            .to_uppercase();

        data.formatted_response = Some(self.format(
            snapshot.latest_message.channel,
            &draft,
            &reference,
        ));
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter() -> ChannelFormatter {
        ChannelFormatter::new(&ChannelSettings::default())
    }

    #[test]
    fn test_email_wrapper() {
        let out = formatter().format(Channel::Email, "Here is the answer.", "AB12CD34");
        assert!(out.starts_with("Dear Customer,"));
        assert!(out.contains("Here is the answer."));
        assert!(out.ends_with("Ticket: AB12CD34"));
    }

    #[test]
    fn test_webform_footer() {
        let out = formatter().format(Channel::WebForm, "Here is the answer.", "AB12CD34");
        assert!(out.starts_with("Here is the answer."));
        assert!(out.contains("Need more help?"));
        // No ticket reference on the web form
        assert!(!out.contains("AB12CD34"));
    }

    #[test]
    fn test_short_sms_untouched() {
        let out = formatter().format(Channel::Sms, "All good.", "AB12CD34");
        assert_eq!(out, "All good.");
    }

    #[test]
    fn test_long_sms_truncated_with_marker() {
        let settings = ChannelSettings {
            sms_max_chars: 300,
            continuation_marker: " [...]".to_string(),
        };
        let formatter = ChannelFormatter::new(&settings);

        let long = "word ".repeat(100); // 500 chars
        let out = formatter.format(Channel::Sms, &long, "AB12CD34");

        assert!(out.chars().count() <= 300);
        assert!(out.ends_with(" [...]"));

        // The cut lands on a word boundary: drop the marker and every
        // remaining token is intact
        let kept = out.strip_suffix(" [...]").unwrap();
        assert!(kept.split_whitespace().all(|w| w == "word"));
    }

    #[test]
    fn test_truncation_exactly_at_limit() {
        let settings = ChannelSettings {
            sms_max_chars: 20,
            continuation_marker: "…".to_string(),
        };
        let formatter = ChannelFormatter::new(&settings);

        let out = formatter.format(Channel::Sms, "exactly twenty chars", "T");
        assert_eq!(out, "exactly twenty chars");

        let out = formatter.format(Channel::Sms, "this one is longer than that", "T");
        assert!(out.chars().count() <= 20);
        assert!(out.ends_with('…'));
    }
}
