//! Dead-letter queue: quarantine for events the outbox publisher could
//! not deliver after exhausting its retry budget, with list/requeue/purge
//! operations for operator tooling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One quarantined, permanently-undeliverable event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Id of the event that failed to publish.
    pub event_id: String,
    /// Last observed publish error.
    pub reason: String,
    /// When the entry was quarantined.
    pub quarantined_at: DateTime<Utc>,
}

/// Dead-letter storage for undeliverable events.
#[async_trait]
pub trait DlqStore: Send + Sync {
    /// Quarantines an event with the given failure reason.
    async fn quarantine(&self, event_id: &str, reason: &str) -> Result<()>;

    /// Lists all quarantined entries, oldest first.
    async fn list(&self) -> Result<Vec<DlqEntry>>;

    /// Removes an entry from quarantine so the outbox publisher will retry
    /// it on its next poll. Returns `true` if an entry was found and
    /// removed.
    async fn requeue(&self, event_id: &str) -> Result<bool>;

    /// Permanently discards an entry. Returns `true` if an entry was found
    /// and removed.
    async fn purge(&self, event_id: &str) -> Result<bool>;
}

/// An in-memory [`DlqStore`], used by tests and the `aob-testing` harness.
#[derive(Default)]
pub struct MemoryDlqStore {
    entries: Mutex<Vec<DlqEntry>>,
}

impl MemoryDlqStore {
    /// Creates an empty quarantine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DlqStore for MemoryDlqStore {
    async fn quarantine(&self, event_id: &str, reason: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.event_id == event_id) {
            return Ok(());
        }
        entries.push(DlqEntry {
            event_id: event_id.to_string(),
            reason: reason.to_string(),
            quarantined_at: Utc::now(),
        });
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DlqEntry>> {
        Ok(self.entries.lock().clone())
    }

    async fn requeue(&self, event_id: &str) -> Result<bool> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.event_id != event_id);
        Ok(entries.len() != before)
    }

    async fn purge(&self, event_id: &str) -> Result<bool> {
        self.requeue(event_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quarantine_then_list() {
        let dlq = MemoryDlqStore::new();
        dlq.quarantine("e1", "publish timeout").await.unwrap();
        let entries = dlq.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_id, "e1");
    }

    #[tokio::test]
    async fn quarantine_is_idempotent() {
        let dlq = MemoryDlqStore::new();
        dlq.quarantine("e1", "first").await.unwrap();
        dlq.quarantine("e1", "second").await.unwrap();
        assert_eq!(dlq.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn requeue_removes_entry() {
        let dlq = MemoryDlqStore::new();
        dlq.quarantine("e1", "timeout").await.unwrap();
        assert!(dlq.requeue("e1").await.unwrap());
        assert!(dlq.list().await.unwrap().is_empty());
        assert!(!dlq.requeue("e1").await.unwrap());
    }

    #[tokio::test]
    async fn purge_discards_entry() {
        let dlq = MemoryDlqStore::new();
        dlq.quarantine("e1", "timeout").await.unwrap();
        assert!(dlq.purge("e1").await.unwrap());
        assert!(dlq.list().await.unwrap().is_empty());
    }
}
