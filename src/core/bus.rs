//! In-process event bus: per-topic ordered logs with consumer-group offsets.
//!
//! Delivery is at-least-once: a group's committed offset only advances on
//! acknowledgement, so events consumed but never acked are delivered again
//! when the group resubscribes. Events with the same key are observed in
//! publish order because a topic is a single ordered log; there is no
//! ordering across topics, and a slow consumer on one topic cannot block
//! publishers or consumers of another.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::trace;

/// Bus failures
#[derive(Debug, Error)]
pub enum BusError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An event as stored on a topic log
#[derive(Debug, Clone)]
pub struct BusEvent {
    /// Position in the topic log
    pub offset: u64,

    /// Ordering key (conversation or customer id)
    pub key: String,

    /// JSON payload
    pub payload: serde_json::Value,

    /// Publish time
    pub published_at: DateTime<Utc>,
}

impl BusEvent {
    /// Deserialize the payload into a typed event
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

struct TopicState {
    log: Vec<BusEvent>,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    /// Everything below this offset is acknowledged
    committed: u64,

    /// Acknowledged offsets above the contiguous prefix
    acked: BTreeSet<u64>,
}

struct Topic {
    state: Mutex<TopicState>,
    notify: Notify,
}

impl Topic {
    fn new() -> Self {
        Self {
            state: Mutex::new(TopicState {
                log: Vec::new(),
                groups: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }
}

/// The bus: a registry of independent topic logs
#[derive(Default)]
pub struct EventBus {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            topics
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Topic::new())),
        )
    }

    /// Append an event to a topic log
    pub fn publish(&self, topic: &str, key: &str, payload: serde_json::Value) -> u64 {
        let topic_ref = self.topic(topic);
        let offset = {
            let mut state = topic_ref.state.lock().unwrap_or_else(|e| e.into_inner());
            let offset = state.log.len() as u64;
            state.log.push(BusEvent {
                offset,
                key: key.to_string(),
                payload,
                published_at: Utc::now(),
            });
            offset
        };

        trace!(topic, key, offset, "Published event");
        topic_ref.notify.notify_waiters();
        offset
    }

    /// Serialize and publish a typed event
    pub fn publish_event<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        event: &T,
    ) -> Result<u64, BusError> {
        let payload = serde_json::to_value(event)?;
        Ok(self.publish(topic, key, payload))
    }

    /// Subscribe a consumer group to a topic
    ///
    /// Consumption resumes from the group's committed offset, so events
    /// delivered to a previous subscription but never acknowledged are
    /// delivered again.
    pub fn subscribe(&self, topic: &str, group: &str) -> Subscription {
        let topic_ref = self.topic(topic);
        let cursor = {
            let mut state = topic_ref.state.lock().unwrap_or_else(|e| e.into_inner());
            state.groups.entry(group.to_string()).or_default().committed
        };

        Subscription {
            topic: topic_ref,
            group: group.to_string(),
            cursor,
        }
    }

    /// Current length of a topic log
    pub fn depth(&self, topic: &str) -> usize {
        let topic_ref = self.topic(topic);
        let state = topic_ref.state.lock().unwrap_or_else(|e| e.into_inner());
        state.log.len()
    }
}

/// One consumer group's position on one topic
pub struct Subscription {
    topic: Arc<Topic>,
    group: String,
    cursor: u64,
}

impl Subscription {
    /// Next unconsumed, unacknowledged event, or None if caught up
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        let state = self.topic.state.lock().unwrap_or_else(|e| e.into_inner());
        let group = state.groups.get(&self.group);

        let mut next = self.cursor;
        if let Some(group) = group {
            next = next.max(group.committed);
            while group.acked.contains(&next) {
                next += 1;
            }
        }

        if (next as usize) < state.log.len() {
            self.cursor = next + 1;
            Some(state.log[next as usize].clone())
        } else {
            self.cursor = next;
            None
        }
    }

    /// Wait for the next event
    pub async fn recv(&mut self) -> BusEvent {
        loop {
            // Register the waiter before checking state so a publish racing
            // with the check cannot be missed
            let topic = Arc::clone(&self.topic);
            let notified = topic.notify.notified();
            if let Some(event) = self.try_recv() {
                return event;
            }
            notified.await;
        }
    }

    /// Acknowledge an offset
    ///
    /// The committed offset advances only across contiguously acknowledged
    /// events; an out-of-order ack is held until the gap closes, so an
    /// unacked event is always redelivered on resubscribe.
    pub fn ack(&self, offset: u64) {
        let mut state = self.topic.state.lock().unwrap_or_else(|e| e.into_inner());
        let group = state.groups.entry(self.group.clone()).or_default();

        if offset < group.committed {
            return;
        }

        group.acked.insert(offset);
        while group.acked.remove(&group.committed) {
            group.committed += 1;
        }
    }
}
