//! Decision/audit recording: an off-critical-path sink for
//! [`DecisionRecord`]s. Recording failures never fail a run — a deferred
//! record is queued locally and retried instead.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::model::DecisionRecord;

/// Durable audit sink for per-node decision records.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    /// Records one decision. Implementations should treat this as
    /// best-effort: the engine calls this off the critical path and does not
    /// propagate failures into run state.
    async fn record(&self, record: DecisionRecord) -> Result<()>;
}

/// Wraps a sink so that write failures are captured into an in-memory
/// deferred queue instead of being dropped or propagated, and exposes
/// [`RecoveringSink::flush_deferred`] to retry them later (e.g. from the
/// outbox publisher's poll loop).
pub struct RecoveringSink<T> {
    inner: T,
    deferred: Mutex<Vec<DecisionRecord>>,
}

impl<T: DecisionSink> RecoveringSink<T> {
    /// Wraps `inner`.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Number of records currently queued for retry.
    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Retries every deferred record once, keeping any that fail again.
    pub async fn flush_deferred(&self) -> Result<usize> {
        let pending = std::mem::take(&mut *self.deferred.lock());
        let mut flushed = 0;
        let mut still_pending = Vec::new();
        for record in pending {
            match self.inner.record(record.clone()).await {
                Ok(()) => flushed += 1,
                Err(_) => still_pending.push(record),
            }
        }
        *self.deferred.lock() = still_pending;
        Ok(flushed)
    }
}

#[async_trait]
impl<T: DecisionSink> DecisionSink for RecoveringSink<T> {
    async fn record(&self, record: DecisionRecord) -> Result<()> {
        if let Err(err) = self.inner.record(record.clone()).await {
            warn!(
                correlation_id = %record.correlation_id,
                node_id = %record.node_id,
                error = %err,
                "decision sink unavailable, deferring record"
            );
            self.deferred.lock().push(record);
        }
        Ok(())
    }
}

/// An in-memory [`DecisionSink`], used by tests and the `aob-testing`
/// harness.
#[derive(Default)]
pub struct MemoryDecisionSink {
    records: Mutex<Vec<DecisionRecord>>,
}

impl MemoryDecisionSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records recorded so far, in recording order.
    #[must_use]
    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl DecisionSink for MemoryDecisionSink {
    async fn record(&self, record: DecisionRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// A sink that always fails, used to exercise [`RecoveringSink`]'s deferred
/// path.
#[derive(Default)]
pub struct AlwaysFailSink;

#[async_trait]
impl DecisionSink for AlwaysFailSink {
    async fn record(&self, _record: DecisionRecord) -> Result<()> {
        Err(crate::error::Error::SinkUnavailable("simulated".to_string()))
    }
}
