//! Ingestion deduplication gate.
//!
//! Channel adapters (webhooks, pollers) redeliver after retries and
//! restarts; this gate makes delivery idempotent before anything reaches
//! the bus. Records are (channel, provider message id) pairs kept for a
//! bounded retention window. An unreachable backend fails closed: the
//! event is rejected and the adapter retries later.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::domain::Channel;

/// Outcome of admitting an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First sighting within the retention window
    Accepted,

    /// Already admitted; drop silently
    Duplicate,
}

/// Dedup backend failures
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("dedup store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage for dedup records
///
/// `insert` must be atomic per key: of two concurrent inserts for the same
/// key, exactly one observes `true`.
#[async_trait]
pub trait DedupBackend: Send + Sync {
    /// Record a key sighting. Returns `true` if the key was not already
    /// present with a sighting newer than `cutoff`.
    async fn insert(
        &self,
        key: &str,
        at: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, DedupError>;
}

/// The ingestion gate, composed over a backend
pub struct Deduplicator {
    backend: Box<dyn DedupBackend>,
    retention: Duration,
}

impl Deduplicator {
    pub fn new(backend: Box<dyn DedupBackend>, retention: Duration) -> Self {
        Self { backend, retention }
    }

    /// Admit or reject an inbound event by its provider message id
    pub async fn admit(
        &self,
        channel: Channel,
        provider_message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Admission, DedupError> {
        let key = record_key(channel, provider_message_id);
        let cutoff = now - self.retention;

        if self.backend.insert(&key, now, cutoff).await? {
            Ok(Admission::Accepted)
        } else {
            debug!(%channel, provider_message_id, "Duplicate inbound event rejected");
            Ok(Admission::Duplicate)
        }
    }
}

/// Composite record key, unique per channel/provider pair
///
/// Provider ids are hashed so arbitrarily long or odd ids stay bounded in
/// the journal. Format: "{channel}:{hash16}".
fn record_key(channel: Channel, provider_message_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider_message_id.as_bytes());
    let digest = hasher.finalize();
    format!("{}:{}", channel, hex::encode(&digest[..8]))
}

/// In-memory backend; sweeps expired entries opportunistically on insert
#[derive(Default)]
pub struct MemoryDedupBackend {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryDedupBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupBackend for MemoryDedupBackend {
    async fn insert(
        &self,
        key: &str,
        at: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, DedupError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        entries.retain(|_, seen_at| *seen_at > cutoff);

        match entries.get(key) {
            Some(_) => Ok(false),
            None => {
                entries.insert(key.to_string(), at);
                Ok(true)
            }
        }
    }
}

/// A line in the dedup journal
#[derive(Debug, Serialize, Deserialize)]
struct JournalRecord {
    key: String,
    at: DateTime<Utc>,
}

/// JSONL-backed backend: append-only journal with state rebuilt on open
///
/// Keeps admissions idempotent across restarts. The journal is never
/// rewritten; expiry applies to the replayed state only.
pub struct JournalDedupBackend {
    journal_path: PathBuf,
    entries: tokio::sync::Mutex<HashMap<String, DateTime<Utc>>>,
}

impl JournalDedupBackend {
    /// Open a journal, replaying existing records
    pub async fn open(journal_path: &Path) -> Result<Self, DedupError> {
        if let Some(parent) = journal_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut entries = HashMap::new();

        if journal_path.exists() {
            let file = File::open(journal_path).await?;
            let reader = BufReader::new(file);
            let mut lines = reader.lines();

            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let record: JournalRecord = serde_json::from_str(&line)?;
                entries.insert(record.key, record.at);
            }
        }

        Ok(Self {
            journal_path: journal_path.to_path_buf(),
            entries: tokio::sync::Mutex::new(entries),
        })
    }

    async fn append(&self, record: &JournalRecord) -> Result<(), DedupError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await?;

        let json = serde_json::to_string(record)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl DedupBackend for JournalDedupBackend {
    async fn insert(
        &self,
        key: &str,
        at: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, DedupError> {
        let mut entries = self.entries.lock().await;

        let fresh = match entries.get(key) {
            Some(seen_at) => *seen_at <= cutoff,
            None => true,
        };

        if !fresh {
            return Ok(false);
        }

        self.append(&JournalRecord {
            key: key.to_string(),
            at,
        })
        .await?;
        entries.insert(key.to_string(), at);

        Ok(true)
    }
}
