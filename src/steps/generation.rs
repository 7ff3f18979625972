//! Response generation from retrieved references.
//!
//! Template-backed stand-in for a model-backed generator: the best
//! reference supplies the answer body; with no reference, a short
//! self-serve acknowledgment is produced instead. The driver only invokes
//! this step when the escalation gate kept the ticket automated, and a
//! failure here always forces escalation, since no response can be fabricated.

use async_trait::async_trait;

use crate::core::pipeline::{FailurePolicy, Step, StepData, StepError, TicketSnapshot};

/// Fallback used when no reference matched a simple message
const FALLBACK_RESPONSE: &str = "Thanks for reaching out. I couldn't find an exact answer \
in our help library, so I've noted your question for the team. In the meantime, the \
documentation portal covers most account, billing, and setup topics.";

/// Template-backed generation step
#[derive(Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Step for TemplateGenerator {
    fn name(&self) -> &'static str {
        "generation"
    }

    fn on_failure(&self) -> FailurePolicy {
        FailurePolicy::Escalate
    }

    async fn apply(
        &self,
        snapshot: &TicketSnapshot,
        mut data: StepData,
    ) -> Result<StepData, StepError> {
        let body = match data.references.first() {
            Some(reference) => reference.body.clone(),
            None => FALLBACK_RESPONSE.to_string(),
        };

        if body.trim().is_empty() {
            return Err(StepError::Unusable {
                step: "generation",
                reason: format!(
                    "empty render for ticket {}",
                    snapshot.ticket.id
                ),
            });
        }

        data.response = Some(body);
        Ok(data)
    }
}
