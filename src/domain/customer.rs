//! Customer records and channel identifiers.
//!
//! An identifier is always normalized at construction, so lookups never see
//! raw provider input. Customers are created on first contact and never
//! deleted; merged-away records keep a back-reference to the survivor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::message::Channel;

/// Kind of channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    Email,
    Phone,
}

/// Rejected identifier input
#[derive(Debug, Clone, Error)]
pub enum IdentifierError {
    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("invalid phone number: {0}")]
    InvalidPhone(String),
}

/// A normalized (type, value) channel identifier
///
/// Construction is the only way to obtain one, so every instance is already
/// normalized: emails trimmed and lower-cased, phones reduced to E.164.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    kind: IdentifierType,
    value: String,
}

impl Identifier {
    /// Normalize and validate an email address
    pub fn email(raw: &str) -> Result<Self, IdentifierError> {
        let value = raw.trim().to_ascii_lowercase();

        // local@domain.tld, no whitespace anywhere
        let valid = match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !value.contains(char::is_whitespace)
                    && !domain.contains('@')
            }
            None => false,
        };

        if !valid {
            return Err(IdentifierError::InvalidEmail(raw.to_string()));
        }

        Ok(Self {
            kind: IdentifierType::Email,
            value,
        })
    }

    /// Normalize and validate a phone number to canonical E.164
    pub fn phone(raw: &str) -> Result<Self, IdentifierError> {
        let stripped: String = raw
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
            .collect();

        let digits = stripped.strip_prefix('+').unwrap_or(&stripped);

        let valid = digits.len() >= 2
            && digits.len() <= 15
            && digits.chars().all(|c| c.is_ascii_digit())
            && !digits.starts_with('0');

        if !valid {
            return Err(IdentifierError::InvalidPhone(raw.to_string()));
        }

        Ok(Self {
            kind: IdentifierType::Phone,
            value: format!("+{}", digits),
        })
    }

    /// Parse the sender identifier carried by a channel
    pub fn from_channel(channel: Channel, raw: &str) -> Result<Self, IdentifierError> {
        match channel {
            Channel::Email | Channel::WebForm => Self::email(raw),
            Channel::Sms => Self::phone(raw),
        }
    }

    pub fn kind(&self) -> IdentifierType {
        self.kind
    }

    /// The normalized value
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// An identifier attached to a customer record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerIdentifier {
    /// The normalized identifier
    pub identifier: Identifier,

    /// Whether ownership was verified (token round-trip etc.)
    pub verified: bool,
}

/// A customer known to the support system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    /// Unique identifier
    pub id: Uuid,

    /// Display name, if ever supplied
    pub display_name: Option<String>,

    /// Identifiers pointing at this record
    pub identifiers: Vec<CustomerIdentifier>,

    /// Set when this record was merged into a surviving one
    pub merged_into: Option<Uuid>,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Create a new customer with a single unverified identifier
    pub fn with_identifier(identifier: Identifier) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: None,
            identifiers: vec![CustomerIdentifier {
                identifier,
                verified: false,
            }],
            merged_into: None,
            created_at: Utc::now(),
        }
    }

    /// Whether this record was merged away
    pub fn is_merged(&self) -> bool {
        self.merged_into.is_some()
    }
}
