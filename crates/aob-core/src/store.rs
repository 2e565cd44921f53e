//! Event store: the append-only log plus transactional outbox and
//! snapshot/DLQ tables, abstracted behind the [`EventStore`] trait so the
//! engine is agnostic to the backing database.
//!
//! `aob-postgres-store` provides the durable implementation; the
//! [`MemoryEventStore`] here backs tests and the `aob-testing` harness.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::model::{CorrelationId, Event, EventType, Json, OutboxEntry, Snapshot};

/// Durable, append-only event log with a co-located transactional outbox and
/// snapshot table.
///
/// Implementations must uphold a dense per-run sequence and per-run
/// idempotency-key uniqueness: `append` is the only mutator of the event
/// table and must enforce both atomically with inserting the corresponding
/// outbox row.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends one event for `correlation_id`, assigning the next sequence
    /// number, and inserts an unpublished outbox row in the same
    /// transaction.
    ///
    /// Returns [`Error::AppendSequenceConflict`] if `expected_sequence`
    /// doesn't match the store's next sequence number for this run — the
    /// caller no longer holds an uncontested view of the run and must
    /// reconfirm its lease.
    ///
    /// If an event with the same `(correlation_id, idempotency_key)` was
    /// already appended, returns the existing event instead of appending a
    /// duplicate.
    async fn append(
        &self,
        correlation_id: &str,
        expected_sequence: u64,
        event_type: EventType,
        payload: Json,
        idempotency_key: String,
    ) -> Result<Event>;

    /// Loads all events for a run in ascending sequence order.
    async fn load_events(&self, correlation_id: &str) -> Result<Vec<Event>>;

    /// Loads events for a run starting strictly after `after_sequence`.
    async fn load_events_since(
        &self,
        correlation_id: &str,
        after_sequence: u64,
    ) -> Result<Vec<Event>>;

    /// The next sequence number that would be assigned to this run (1 if the
    /// run has no events yet).
    async fn next_sequence(&self, correlation_id: &str) -> Result<u64>;

    /// Persists a snapshot, superseding any prior snapshot for the run.
    async fn put_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Loads the most recent snapshot for a run, if any.
    async fn load_snapshot(&self, correlation_id: &str) -> Result<Option<Snapshot>>;

    /// Returns up to `limit` unpublished outbox rows, oldest first.
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Marks an outbox row published.
    async fn mark_published(&self, event_id: &str) -> Result<()>;

    /// Increments an outbox row's attempt counter and records the last
    /// error, for retry bookkeeping.
    async fn mark_publish_failed(&self, event_id: &str, error: &str) -> Result<()>;

    /// Resets a quarantined outbox row back to unpublished with a clean
    /// attempt counter, so the publisher's next poll selects it again.
    /// Called by [`crate::dlq::DlqStore::requeue`] callers once the DLQ
    /// entry itself has been cleared.
    async fn requeue_outbox(&self, event_id: &str) -> Result<()>;

    /// Lists known correlation ids, for admin/CLI tooling.
    async fn list_runs(&self) -> Result<Vec<CorrelationId>>;
}

#[derive(Default)]
struct RunLog {
    events: Vec<Event>,
    snapshot: Option<Snapshot>,
    idempotency_index: HashMap<String, usize>,
}

/// An in-memory [`EventStore`], used by unit tests, property tests, and the
/// `aob-testing` harness. Not durable across process restarts.
pub struct MemoryEventStore {
    runs: RwLock<HashMap<CorrelationId, RunLog>>,
    outbox: RwLock<HashMap<String, OutboxEntry>>,
    outbox_order: RwLock<Vec<String>>,
    event_seq: AtomicU64,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            outbox: RwLock::new(HashMap::new()),
            outbox_order: RwLock::new(Vec::new()),
            event_seq: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(
        &self,
        correlation_id: &str,
        expected_sequence: u64,
        event_type: EventType,
        payload: Json,
        idempotency_key: String,
    ) -> Result<Event> {
        let mut runs = self.runs.write();
        let run = runs.entry(correlation_id.to_string()).or_default();

        if let Some(&idx) = run.idempotency_index.get(&idempotency_key) {
            return Ok(run.events[idx].clone());
        }

        let next = run.events.len() as u64 + 1;
        if next != expected_sequence {
            return Err(Error::AppendSequenceConflict {
                correlation_id: correlation_id.to_string(),
                expected: next,
            });
        }

        let event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            correlation_id: correlation_id.to_string(),
            sequence_number: next,
            event_type,
            payload,
            idempotency_key: idempotency_key.clone(),
            created_at: Utc::now(),
        };

        run.idempotency_index.insert(idempotency_key, run.events.len());
        run.events.push(event.clone());
        drop(runs);

        self.event_seq.fetch_add(1, Ordering::Relaxed);
        let entry = OutboxEntry {
            event_id: event.id.clone(),
            published_at: None,
            attempts: 0,
            last_error: None,
        };
        self.outbox.write().insert(entry.event_id.clone(), entry);
        self.outbox_order.write().push(event.id.clone());

        Ok(event)
    }

    async fn load_events(&self, correlation_id: &str) -> Result<Vec<Event>> {
        Ok(self
            .runs
            .read()
            .get(correlation_id)
            .map(|r| r.events.clone())
            .unwrap_or_default())
    }

    async fn load_events_since(
        &self,
        correlation_id: &str,
        after_sequence: u64,
    ) -> Result<Vec<Event>> {
        Ok(self
            .runs
            .read()
            .get(correlation_id)
            .map(|r| {
                r.events
                    .iter()
                    .filter(|e| e.sequence_number > after_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn next_sequence(&self, correlation_id: &str) -> Result<u64> {
        Ok(self
            .runs
            .read()
            .get(correlation_id)
            .map(|r| r.events.len() as u64 + 1)
            .unwrap_or(1))
    }

    async fn put_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut runs = self.runs.write();
        let run = runs.entry(snapshot.correlation_id.clone()).or_default();
        run.snapshot = Some(snapshot);
        Ok(())
    }

    async fn load_snapshot(&self, correlation_id: &str) -> Result<Option<Snapshot>> {
        Ok(self
            .runs
            .read()
            .get(correlation_id)
            .and_then(|r| r.snapshot.clone()))
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let outbox = self.outbox.read();
        let order = self.outbox_order.read();
        Ok(order
            .iter()
            .filter_map(|id| outbox.get(id))
            .filter(|e| e.published_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, event_id: &str) -> Result<()> {
        if let Some(entry) = self.outbox.write().get_mut(event_id) {
            entry.published_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_publish_failed(&self, event_id: &str, error: &str) -> Result<()> {
        if let Some(entry) = self.outbox.write().get_mut(event_id) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn requeue_outbox(&self, event_id: &str) -> Result<()> {
        if let Some(entry) = self.outbox.write().get_mut(event_id) {
            entry.published_at = None;
            entry.attempts = 0;
            entry.last_error = None;
        }
        Ok(())
    }

    async fn list_runs(&self) -> Result<Vec<CorrelationId>> {
        Ok(self.runs.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn append_assigns_dense_sequence() {
        let store = MemoryEventStore::new();
        let e1 = store
            .append("r1", 1, EventType::WorkflowStarted, json!({}), "k1".into())
            .await
            .unwrap();
        assert_eq!(e1.sequence_number, 1);
        let e2 = store
            .append("r1", 2, EventType::NodeStarted, json!({}), "k2".into())
            .await
            .unwrap();
        assert_eq!(e2.sequence_number, 2);
    }

    #[tokio::test]
    async fn append_rejects_sequence_conflict() {
        let store = MemoryEventStore::new();
        store
            .append("r1", 1, EventType::WorkflowStarted, json!({}), "k1".into())
            .await
            .unwrap();
        let err = store
            .append("r1", 5, EventType::NodeStarted, json!({}), "k2".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AppendSequenceConflict { expected: 2, .. }));
    }

    #[tokio::test]
    async fn append_is_idempotent_on_key() {
        let store = MemoryEventStore::new();
        let e1 = store
            .append("r1", 1, EventType::WorkflowStarted, json!({}), "k1".into())
            .await
            .unwrap();
        let e2 = store
            .append("r1", 1, EventType::WorkflowStarted, json!({}), "k1".into())
            .await
            .unwrap();
        assert_eq!(e1.id, e2.id);
        assert_eq!(store.load_events("r1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_outbox_excludes_published() {
        let store = MemoryEventStore::new();
        let e1 = store
            .append("r1", 1, EventType::WorkflowStarted, json!({}), "k1".into())
            .await
            .unwrap();
        assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);
        store.mark_published(&e1.id).await.unwrap();
        assert_eq!(store.pending_outbox(10).await.unwrap().len(), 0);
    }
}
