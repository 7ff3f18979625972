//! Worker dispatch over the bus: concurrent across conversations, strictly
//! ordered within one.
//!
//! Events sharing a key form a serial batch processed by one task; batches
//! for different keys run concurrently under the worker cap. Offsets are
//! acknowledged only after their event was processed, so a crash mid-batch
//! leaves the unprocessed tail for redelivery.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::core::bus::{BusEvent, EventBus, Subscription};
use crate::core::processor::{BatchReport, ProcessReport, Processor};
use crate::domain::{DeadLetterEvent, InboundMessageEvent, TOPIC_DLQ};

/// Consumes inbound topics and drives the processor
pub struct Dispatcher {
    processor: Processor,
    bus: Arc<EventBus>,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(processor: Processor, bus: Arc<EventBus>, concurrency: usize) -> Self {
        Self {
            processor,
            bus,
            concurrency: concurrency.max(1),
        }
    }

    /// Process everything currently available on the subscription
    ///
    /// Loops until a sweep finds the topic drained, so events published
    /// while a sweep runs are picked up before returning.
    pub async fn run_until_idle(&self, sub: &mut Subscription) -> BatchReport {
        let mut report = BatchReport::default();

        loop {
            let batches = collect_batches(None, sub);
            if batches.is_empty() {
                return report;
            }
            self.dispatch(batches, sub, &mut report).await;
        }
    }

    /// Long-running consumer loop
    pub async fn run(&self, mut sub: Subscription) {
        loop {
            let first = sub.recv().await;
            let batches = collect_batches(Some(first), &mut sub);
            let mut report = BatchReport::default();
            self.dispatch(batches, &sub, &mut report).await;
            info!(
                processed = report.processed,
                resolved = report.resolved,
                escalated = report.escalated,
                "Dispatch sweep complete"
            );
        }
    }

    /// Run per-key batches concurrently; ack each offset after processing
    async fn dispatch(
        &self,
        batches: Vec<Vec<BusEvent>>,
        sub: &Subscription,
        report: &mut BatchReport,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(batches.len());

        for batch in batches {
            let processor = self.processor.clone();
            let bus = Arc::clone(&self.bus);
            let semaphore = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                let mut results: Vec<(u64, Option<ProcessReport>)> = Vec::with_capacity(batch.len());

                for event in batch {
                    match event.decode::<InboundMessageEvent>() {
                        Ok(inbound) => {
                            let ticket_report = processor.process_ticket(inbound.ticket_id).await;
                            results.push((event.offset, Some(ticket_report)));
                        }
                        Err(e) => {
                            // Undecodable events are parked, not retried forever
                            error!(offset = event.offset, error = %e, "Dropping undecodable event");
                            let dead = DeadLetterEvent {
                                source_topic: "inbound".to_string(),
                                error: e.to_string(),
                                payload: event.payload.clone(),
                            };
                            let _ = bus.publish_event(TOPIC_DLQ, &event.key, &dead);
                            results.push((event.offset, None));
                        }
                    }
                }

                results
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(results) => {
                    for (offset, ticket_report) in results {
                        if let Some(ticket_report) = ticket_report {
                            report.absorb(&ticket_report);
                        }
                        sub.ack(offset);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Dispatch task panicked");
                }
            }
        }
    }
}

/// Group available events into per-key serial batches, preserving log order
/// inside each batch
fn collect_batches(first: Option<BusEvent>, sub: &mut Subscription) -> Vec<Vec<BusEvent>> {
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, Vec<BusEvent>> = HashMap::new();

    let push = |event: BusEvent, order: &mut Vec<String>, by_key: &mut HashMap<String, Vec<BusEvent>>| {
        if !by_key.contains_key(&event.key) {
            order.push(event.key.clone());
        }
        by_key.entry(event.key.clone()).or_default().push(event);
    };

    if let Some(event) = first {
        push(event, &mut order, &mut by_key);
    }
    while let Some(event) = sub.try_recv() {
        push(event, &mut order, &mut by_key);
    }

    order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collect_batches_groups_by_key_in_order() {
        let bus = EventBus::new();
        bus.publish("t", "a", json!({ "seq": 0 }));
        bus.publish("t", "b", json!({ "seq": 0 }));
        bus.publish("t", "a", json!({ "seq": 1 }));
        bus.publish("t", "c", json!({ "seq": 0 }));

        let mut sub = bus.subscribe("t", "g");
        let batches = collect_batches(None, &mut sub);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2); // both "a" events, log order
        assert_eq!(batches[0][0].payload["seq"], 0);
        assert_eq!(batches[0][1].payload["seq"], 1);
        assert_eq!(batches[1][0].key, "b");
        assert_eq!(batches[2][0].key, "c");
    }
}
