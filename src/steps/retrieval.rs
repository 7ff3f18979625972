//! Knowledge retrieval over a keyword-indexed answer library.
//!
//! Stand-in for a vector search: entries carry keyword lists and a canned
//! response body. Matching is word-boundary aware so "down" does not match
//! "download". An empty result set is a normal outcome, not an error.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::pipeline::{
    FailurePolicy, Reference, Step, StepData, StepError, TicketSnapshot,
};

/// One answer library entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub title: String,
    pub keywords: Vec<String>,
    pub response: String,
    pub category: String,

    /// Matching this entry routes the ticket to a human anyway
    #[serde(default)]
    pub escalate: bool,
}

/// The keyword-indexed answer library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub entries: Vec<KnowledgeEntry>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self {
            entries: builtin_entries(),
        }
    }
}

impl KnowledgeBase {
    /// Load additional entries from a YAML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Append entries from another library
    pub fn extend(&mut self, other: KnowledgeBase) {
        self.entries.extend(other.entries);
    }

    /// Rank entries against a message, best match first
    pub fn search(&self, body: &str) -> Vec<Reference> {
        let lower = body.to_lowercase();

        let mut matches: Vec<Reference> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let hits = entry
                    .keywords
                    .iter()
                    .filter(|kw| contains_term(&lower, &kw.to_lowercase()))
                    .count();
                if hits == 0 {
                    return None;
                }

                let relevance = (hits as f32 / entry.keywords.len() as f32).min(1.0);
                Some(Reference {
                    title: entry.title.clone(),
                    body: entry.response.clone(),
                    category: entry.category.clone(),
                    relevance,
                    requires_human: entry.escalate,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches
    }
}

/// Word-boundary substring match; short terms must stand alone
fn contains_term(haystack: &str, term: &str) -> bool {
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

/// Built-in answer library for the common intents
fn builtin_entries() -> Vec<KnowledgeEntry> {
    let entry = |title: &str, keywords: &[&str], response: &str, category: &str, escalate: bool| {
        KnowledgeEntry {
            title: title.to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            response: response.to_string(),
            category: category.to_string(),
            escalate,
        }
    };

    vec![
        entry(
            "Password reset",
            &["reset password", "reset my password", "forgot password", "locked out", "password reset", "cannot login", "can't login"],
            "To reset your password: open the login page, choose \"Forgot Password\", \
             enter your email, and follow the reset link we send you. The link expires \
             in 24 hours.",
            "account",
            false,
        ),
        entry(
            "Getting started",
            &["get started", "setup account", "create account", "sign up", "new account", "register"],
            "To get started: sign up with your work email, set up your workspace, \
             invite your team, and create your first project. The onboarding guide in \
             the dashboard walks through each step.",
            "onboarding",
            false,
        ),
        entry(
            "Plans and pricing",
            &["price", "cost", "pricing", "how much", "upgrade", "plan", "subscription"],
            "We offer three plans: Free (up to 5 members), Pro (up to 50 members, \
             advanced features), and Enterprise (unlimited, priority support). Every \
             paid plan starts with a 14-day free trial, no card required.",
            "sales",
            false,
        ),
        entry(
            "Billing review",
            &["refund", "money back", "cancel subscription", "billing issue", "chargeback", "overcharged"],
            "Billing concerns are reviewed by our billing team, who will look at your \
             account and follow up directly.",
            "billing",
            true,
        ),
        entry(
            "Service status",
            &["not working", "error", "outage", "down", "can't access", "cannot access", "broken"],
            "Sorry you're running into trouble. Current status for all systems is \
             published on our status page. Quick checks that fix most access issues: \
             clear the browser cache, try a private window, and confirm your network \
             connection.",
            "technical",
            false,
        ),
        entry(
            "API access",
            &["api key", "api token", "api access", "webhook", "rest api", "integration"],
            "Your API key lives under Settings \u{2192} API; generate a new key there and \
             store it securely, since it is shown only once. The developer portal has \
             full API documentation and webhook configuration guides.",
            "technical",
            false,
        ),
        entry(
            "Data export",
            &["export", "download data", "backup", "csv", "data export"],
            "To export your data: Settings \u{2192} Data & Privacy \u{2192} Export Data, then \
             pick CSV or JSON. Large exports can take a few minutes; you'll get a \
             download link when it's ready.",
            "account",
            false,
        ),
        entry(
            "Team invitations",
            &["invite", "add member", "add user", "team member", "collaborator"],
            "To invite teammates: Settings \u{2192} Team \u{2192} Invite Members, enter their \
             email addresses, and assign a role (Admin, Member, or Viewer). They'll \
             receive a signup link by email.",
            "account",
            false,
        ),
    ]
}

/// Retrieval step over the answer library
pub struct KnowledgeRetrieval {
    kb: KnowledgeBase,
}

impl KnowledgeRetrieval {
    pub fn new(kb: KnowledgeBase) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl Step for KnowledgeRetrieval {
    fn name(&self) -> &'static str {
        "retrieval"
    }

    fn on_failure(&self) -> FailurePolicy {
        FailurePolicy::Degrade
    }

    async fn apply(
        &self,
        snapshot: &TicketSnapshot,
        mut data: StepData,
    ) -> Result<StepData, StepError> {
        data.references = self.kb.search(&snapshot.latest_message.body);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_match_is_empty_not_error() {
        let kb = KnowledgeBase::default();
        assert!(kb.search("the quarterly fiscal projections").is_empty());
    }

    #[test]
    fn test_password_query_matches() {
        let kb = KnowledgeBase::default();
        let refs = kb.search("I forgot password and I'm locked out");
        assert!(!refs.is_empty());
        assert_eq!(refs[0].title, "Password reset");
        assert!(!refs[0].requires_human);
    }

    #[test]
    fn test_refund_entry_requires_human() {
        let kb = KnowledgeBase::default();
        let refs = kb.search("I want a refund for last month");
        assert!(!refs.is_empty());
        assert!(refs[0].requires_human);
        assert_eq!(refs[0].category, "billing");
    }

    #[test]
    fn test_word_boundary_matching() {
        // "down" must not match inside "download"
        assert!(!contains_term("please download the file", "down"));
        assert!(contains_term("the service is down", "down"));
        assert!(contains_term("is it down?", "down"));
    }

    #[test]
    fn test_best_match_first() {
        let kb = KnowledgeBase::default();
        let refs = kb.search("how much does the pro plan cost to upgrade");
        assert!(refs.len() >= 1);
        assert_eq!(refs[0].title, "Plans and pricing");
        if refs.len() > 1 {
            assert!(refs[0].relevance >= refs[1].relevance);
        }
    }

    #[test]
    fn test_yaml_library_parses() {
        let yaml = r#"
entries:
  - title: Shipping times
    keywords: ["shipping", "delivery"]
    response: "Standard shipping takes 3-5 business days."
    category: orders
"#;
        let kb: KnowledgeBase = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(kb.entries.len(), 1);
        assert!(!kb.entries[0].escalate);

        let refs = kb.search("when is my delivery arriving");
        assert_eq!(refs.len(), 1);
    }
}
