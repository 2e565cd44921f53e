//! Outbox publisher: a standalone background worker that drains
//! unpublished events from the store's transactional outbox and republishes
//! them on an [`EventBus`], giving at-least-once delivery without coupling
//! the write path to the bus's availability.
//!
//! Grounded on the redesign note to replace hidden concurrency spawned deep
//! inside request handling with one explicit, named background task the
//! caller starts and stops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::Event;
use crate::store::EventStore;

/// A destination for published events: a pub/sub bus, webhook fanout, or (in
/// tests) an in-process loopback queue.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes one event. Errors are treated as transient by the
    /// publisher, which retries with backoff.
    async fn publish(&self, event: &Event) -> Result<()>;
}

/// An in-process bus that stores published events for inspection, used by
/// tests and the `aob-testing` harness.
#[derive(Default)]
pub struct LoopbackBus {
    sent: parking_lot::Mutex<Vec<Event>>,
}

impl LoopbackBus {
    /// Creates an empty loopback bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of events published so far, in publish order.
    #[must_use]
    pub fn sent(&self) -> Vec<Event> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl EventBus for LoopbackBus {
    async fn publish(&self, event: &Event) -> Result<()> {
        self.sent.lock().push(event.clone());
        Ok(())
    }
}

/// Tunables for [`OutboxPublisher`].
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// How often to poll the store for unpublished rows.
    pub poll_interval: Duration,
    /// Max rows drained per poll.
    pub batch_size: usize,
    /// Max publish attempts before an event is handed to the DLQ.
    pub max_attempts: u32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            batch_size: 64,
            max_attempts: 8,
        }
    }
}

/// Drains the event store's outbox onto an [`EventBus`] on a fixed interval,
/// and additionally whenever [`OutboxPublisher::kick`] is called (used by the
/// engine right after an append, so delivery latency isn't bound to the poll
/// interval).
pub struct OutboxPublisher<S, B, D> {
    store: Arc<S>,
    bus: Arc<B>,
    dlq: Arc<D>,
    config: OutboxConfig,
    kick: Arc<Notify>,
}

impl<S, B, D> OutboxPublisher<S, B, D>
where
    S: EventStore + 'static,
    B: EventBus + 'static,
    D: crate::dlq::DlqStore + 'static,
{
    /// Builds a new publisher over the given store, bus, and dead-letter
    /// sink.
    #[must_use]
    pub fn new(store: Arc<S>, bus: Arc<B>, dlq: Arc<D>, config: OutboxConfig) -> Self {
        Self {
            store,
            bus,
            dlq,
            config,
            kick: Arc::new(Notify::new()),
        }
    }

    /// A handle that, when notified, wakes the publisher loop immediately
    /// rather than waiting for the next poll tick.
    #[must_use]
    pub fn kicker(&self) -> Arc<Notify> {
        Arc::clone(&self.kick)
    }

    /// Drains at most one batch immediately. Exposed for tests that don't
    /// want to run the background loop.
    pub async fn drain_once(&self) -> Result<usize> {
        let pending = self.store.pending_outbox(self.config.batch_size).await?;
        let mut delivered = 0;
        for entry in pending {
            match self.load_event(&entry.event_id).await {
                Some(event) => match self.bus.publish(&event).await {
                    Ok(()) => {
                        self.store.mark_published(&entry.event_id).await?;
                        delivered += 1;
                    }
                    Err(err) => {
                        self.store
                            .mark_publish_failed(&entry.event_id, &err.to_string())
                            .await?;
                        if entry.attempts + 1 >= self.config.max_attempts {
                            warn!(event_id = %entry.event_id, "outbox entry exhausted retries, quarantining");
                            self.dlq
                                .quarantine(&entry.event_id, &err.to_string())
                                .await?;
                            // Quarantined entries leave the backlog: the DLQ now
                            // owns redelivery via `requeue`, so marking this
                            // published here prevents re-quarantining the same
                            // entry on every subsequent poll.
                            self.store.mark_published(&entry.event_id).await?;
                        }
                    }
                },
                None => {
                    warn!(event_id = %entry.event_id, "outbox entry references missing event");
                }
            }
        }
        Ok(delivered)
    }

    /// Clears `event_id` from the DLQ and resets its outbox row to
    /// unpublished, so the next `drain_once` attempts redelivery. Returns
    /// `false` if the event was not quarantined.
    pub async fn requeue(&self, event_id: &str) -> Result<bool> {
        if self.dlq.requeue(event_id).await? {
            self.store.requeue_outbox(event_id).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn load_event(&self, event_id: &str) -> Option<Event> {
        for run in self.store.list_runs().await.ok()?.iter() {
            if let Ok(events) = self.store.load_events(run).await {
                if let Some(found) = events.into_iter().find(|e| &e.id == event_id) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Spawns the background poll loop. The returned handle completes when
    /// `shutdown` is notified.
    pub fn spawn(self: Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(self.config.poll_interval) => {}
                    () = self.kick.notified() => {}
                    () = shutdown.notified() => {
                        debug!("outbox publisher shutting down");
                        break;
                    }
                }
                if let Err(err) = self.drain_once().await {
                    warn!(error = %err, "outbox drain failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::MemoryDlqStore;
    use crate::model::EventType;
    use crate::store::MemoryEventStore;
    use serde_json::json;

    #[tokio::test]
    async fn drains_pending_events_to_bus() {
        let store = Arc::new(MemoryEventStore::new());
        let bus = Arc::new(LoopbackBus::new());
        let dlq = Arc::new(MemoryDlqStore::new());
        store
            .append("r1", 1, EventType::WorkflowStarted, json!({}), "k1".into())
            .await
            .unwrap();

        let publisher = OutboxPublisher::new(store, Arc::clone(&bus), dlq, OutboxConfig::default());
        let delivered = publisher.drain_once().await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(bus.sent().len(), 1);
    }

    #[tokio::test]
    async fn drain_is_idempotent_once_published() {
        let store = Arc::new(MemoryEventStore::new());
        let bus = Arc::new(LoopbackBus::new());
        let dlq = Arc::new(MemoryDlqStore::new());
        store
            .append("r1", 1, EventType::WorkflowStarted, json!({}), "k1".into())
            .await
            .unwrap();
        let publisher = OutboxPublisher::new(store, bus, dlq, OutboxConfig::default());
        publisher.drain_once().await.unwrap();
        let second = publisher.drain_once().await.unwrap();
        assert_eq!(second, 0);
    }
}
