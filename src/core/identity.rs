//! Cross-channel customer identity resolution.
//!
//! Maps normalized channel identifiers to stable customer records. Each
//! (type, value) pair points at exactly one customer; merges re-point
//! identifiers and leave a merged-into back-reference instead of deleting,
//! so history stays queryable.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{Customer, CustomerIdentifier, Identifier};

/// Identity resolution failures
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("unknown customer: {0}")]
    UnknownCustomer(Uuid),

    #[error("cannot merge a customer into itself")]
    SelfMerge,
}

/// Result of resolving an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// The surviving customer record the identifier maps to
    pub customer_id: Uuid,

    /// Whether this contact created the customer
    pub created: bool,
}

/// Result of attaching an extra identifier to a known customer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Identifier attached
    Linked,

    /// Identifier was already on this customer
    AlreadyLinked,

    /// Identifier belongs to another customer; caller decides whether to merge
    BelongsTo(Uuid),
}

/// In-memory identity directory with atomic resolution
///
/// All reads and writes go through one lock, so two concurrent first
/// contacts from the same identifier observe a single winner; the loser's
/// lookup simply finds the record the winner created.
pub struct IdentityResolver {
    inner: Mutex<Directory>,
}

#[derive(Default)]
struct Directory {
    customers: HashMap<Uuid, Customer>,
    identifiers: HashMap<Identifier, Uuid>,
}

impl Directory {
    /// Follow merged-into links to the surviving record
    fn canonical(&self, mut id: Uuid) -> Uuid {
        while let Some(next) = self.customers.get(&id).and_then(|c| c.merged_into) {
            id = next;
        }
        id
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Directory::default()),
        }
    }

    /// Resolve an identifier to a customer, creating one on first contact
    ///
    /// Resolution of the same identifier is atomic: lookup and create happen
    /// in one critical section, so a duplicate customer can never appear for
    /// a value that lost a creation race.
    pub fn resolve(&self, identifier: &Identifier) -> Resolution {
        let mut dir = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(&id) = dir.identifiers.get(identifier) {
            return Resolution {
                customer_id: dir.canonical(id),
                created: false,
            };
        }

        let customer = Customer::with_identifier(identifier.clone());
        let customer_id = customer.id;
        dir.identifiers.insert(identifier.clone(), customer_id);
        dir.customers.insert(customer_id, customer);

        info!(%customer_id, identifier = %identifier, "Created customer on first contact");

        Resolution {
            customer_id,
            created: true,
        }
    }

    /// Look up an identifier without creating a customer
    pub fn find(&self, identifier: &Identifier) -> Option<Uuid> {
        let dir = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        dir.identifiers.get(identifier).map(|&id| dir.canonical(id))
    }

    /// Fetch a customer record (merged-away records included)
    pub fn customer(&self, id: Uuid) -> Option<Customer> {
        let dir = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        dir.customers.get(&id).cloned()
    }

    /// Attach an additional identifier observed mid-conversation
    ///
    /// Returns `BelongsTo` when the identifier is already claimed by a
    /// different customer; the caller resolves that with `merge`.
    pub fn link(&self, customer_id: Uuid, identifier: Identifier) -> Result<LinkOutcome, IdentityError> {
        let mut dir = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let target = dir.canonical(customer_id);
        if !dir.customers.contains_key(&target) {
            return Err(IdentityError::UnknownCustomer(customer_id));
        }

        if let Some(&owner) = dir.identifiers.get(&identifier) {
            let owner = dir.canonical(owner);
            if owner == target {
                return Ok(LinkOutcome::AlreadyLinked);
            }
            return Ok(LinkOutcome::BelongsTo(owner));
        }

        dir.identifiers.insert(identifier.clone(), target);
        let customer = dir
            .customers
            .get_mut(&target)
            .ok_or(IdentityError::UnknownCustomer(target))?;
        customer.identifiers.push(CustomerIdentifier {
            identifier,
            verified: false,
        });

        Ok(LinkOutcome::Linked)
    }

    /// Merge `secondary` into `primary`
    ///
    /// All identifier rows of the secondary are re-pointed at the primary and
    /// the secondary is marked merged-away. Conversations and tickets are the
    /// store's rows; the caller reassigns those with the returned survivor.
    pub fn merge(&self, primary: Uuid, secondary: Uuid) -> Result<Uuid, IdentityError> {
        let mut dir = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let primary = dir.canonical(primary);
        let secondary = dir.canonical(secondary);

        if primary == secondary {
            return Err(IdentityError::SelfMerge);
        }
        if !dir.customers.contains_key(&primary) {
            return Err(IdentityError::UnknownCustomer(primary));
        }

        let moved = {
            let record = dir
                .customers
                .get_mut(&secondary)
                .ok_or(IdentityError::UnknownCustomer(secondary))?;
            record.merged_into = Some(primary);
            std::mem::take(&mut record.identifiers)
        };

        for row in &moved {
            dir.identifiers.insert(row.identifier.clone(), primary);
        }

        let survivor = dir
            .customers
            .get_mut(&primary)
            .ok_or(IdentityError::UnknownCustomer(primary))?;
        for row in moved {
            let exists = survivor
                .identifiers
                .iter()
                .any(|existing| existing.identifier == row.identifier);
            if !exists {
                survivor.identifiers.push(row);
            }
        }

        debug!(%primary, %secondary, "Merged customer records");

        Ok(primary)
    }

    /// Number of customer records, merged-away included
    pub fn customer_count(&self) -> usize {
        let dir = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        dir.customers.len()
    }
}
