//! Sentiment scoring for the latest inbound message.
//!
//! Lexicon-based stand-in for a model-backed scorer. Scores in [0, 1]
//! starting from neutral 0.5; hostile phrasing pulls hard toward 0.
//! Failure here is never fatal; the driver degrades to neutral.

use async_trait::async_trait;

use crate::core::pipeline::{
    FailurePolicy, SentimentLabel, SentimentScore, Step, StepData, StepError, TicketSnapshot,
};

/// Phrases that mark a message as hostile outright
const HOSTILE_TERMS: &[&str] = &[
    "furious",
    "outraged",
    "scam",
    "fraud",
    "disgusted",
    "worst company",
    "never again",
    "fed up",
];

const NEGATIVE_TERMS: &[&str] = &[
    "angry",
    "terrible",
    "awful",
    "horrible",
    "useless",
    "broken",
    "unacceptable",
    "disappointed",
    "frustrated",
    "annoyed",
    "not working",
    "waste",
    "refund",
    "complaint",
];

const POSITIVE_TERMS: &[&str] = &[
    "thanks",
    "thank you",
    "great",
    "love",
    "perfect",
    "awesome",
    "appreciate",
    "helpful",
    "wonderful",
];

/// Score a message body in [0, 1]
pub fn score_text(body: &str) -> SentimentScore {
    let lower = body.to_lowercase();

    let hostile = HOSTILE_TERMS.iter().filter(|t| lower.contains(*t)).count();
    let negative = NEGATIVE_TERMS.iter().filter(|t| lower.contains(*t)).count();
    let positive = POSITIVE_TERMS.iter().filter(|t| lower.contains(*t)).count();

    // Exclamation-heavy all-caps messages read as shouting
    let shouting = body.len() > 12
        && body.chars().filter(|c| c.is_alphabetic()).count() > 8
        && body
            .chars()
            .filter(|c| c.is_alphabetic())
            .all(|c| c.is_uppercase());

    let mut score: f32 = 0.5;
    score -= 0.35 * hostile as f32;
    score -= 0.15 * negative as f32;
    score += 0.15 * positive as f32;
    if shouting {
        score -= 0.2;
    }
    let score = score.clamp(0.0, 1.0);

    let label = if score < 0.2 {
        SentimentLabel::Hostile
    } else if score < 0.4 {
        SentimentLabel::Negative
    } else if score > 0.7 {
        SentimentLabel::Positive
    } else {
        SentimentLabel::Neutral
    };

    SentimentScore { score, label }
}

/// Lexicon-backed sentiment step
#[derive(Default)]
pub struct LexiconSentiment;

impl LexiconSentiment {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Step for LexiconSentiment {
    fn name(&self) -> &'static str {
        "sentiment"
    }

    fn on_failure(&self) -> FailurePolicy {
        FailurePolicy::Degrade
    }

    async fn apply(
        &self,
        snapshot: &TicketSnapshot,
        mut data: StepData,
    ) -> Result<StepData, StepError> {
        data.sentiment = Some(score_text(&snapshot.latest_message.body));
        Ok(data)
    }
}
