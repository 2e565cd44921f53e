//! Columnar batching export for [`aob_core::DecisionRecord`]s.
//!
//! The core only requires a [`DecisionSink`]; this module is the concrete
//! backend the rest of the workspace runs in production — it buffers
//! records in memory and flushes them as newline-delimited JSON batches
//! (one JSON object per line, the textbook columnar-friendly shape for
//! downstream batch loaders such as Parquet writers or a warehouse COPY)
//! once a batch reaches `batch_size` records or `flush_interval` elapses.
//! Also emits the count and cost-meter totals as metrics through
//! [`crate::metrics::MetricsRecorder`] on every flush.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info};

use aob_core::{DecisionRecord, Error as CoreError, Result as CoreResult};
use aob_core::DecisionSink;

use crate::metrics::MetricsRecorder;

/// Sink for a flushed batch of records, e.g. a file writer or object-store
/// uploader. Kept narrow so tests can inject an in-memory collector.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Writes one newline-delimited-JSON batch. Each element is already
    /// serialized so the writer never needs to know the record shape.
    async fn write_batch(&self, lines: Vec<String>) -> anyhow::Result<()>;
}

/// A [`BatchWriter`] that appends batches to an in-memory buffer, for tests
/// and for local/dev runs that don't have an object store configured.
#[derive(Default)]
pub struct MemoryBatchWriter {
    batches: Mutex<Vec<Vec<String>>>,
}

impl MemoryBatchWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All batches written so far, in flush order.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl BatchWriter for MemoryBatchWriter {
    async fn write_batch(&self, lines: Vec<String>) -> anyhow::Result<()> {
        self.batches.lock().push(lines);
        Ok(())
    }
}

/// Decision sink that batches records and periodically flushes them through
/// a [`BatchWriter`]. Construction spawns the background flush loop; drop
/// the returned handle to stop it (in-flight flush still completes).
pub struct ColumnarDecisionSink<W> {
    tx: mpsc::UnboundedSender<DecisionRecord>,
    writer: Arc<W>,
}

impl<W: BatchWriter + 'static> ColumnarDecisionSink<W> {
    /// Builds the sink and spawns its background flush task on the current
    /// Tokio runtime.
    #[must_use]
    pub fn spawn(writer: Arc<W>, batch_size: usize, flush_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DecisionRecord>();
        let flush_writer = writer.clone();
        let recorder = MetricsRecorder::global();

        tokio::spawn(async move {
            let mut buf: Vec<DecisionRecord> = Vec::with_capacity(batch_size);
            let mut ticker = tokio::time::interval(flush_interval);
            loop {
                tokio::select! {
                    maybe_record = rx.recv() => {
                        match maybe_record {
                            Some(record) => {
                                buf.push(record);
                                if buf.len() >= batch_size {
                                    flush(&flush_writer, &recorder, &mut buf).await;
                                }
                            }
                            None => {
                                flush(&flush_writer, &recorder, &mut buf).await;
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if !buf.is_empty() {
                            flush(&flush_writer, &recorder, &mut buf).await;
                        }
                    }
                }
            }
        });

        Self { tx, writer }
    }

    /// The underlying writer, for tests that want to inspect flushed
    /// batches directly.
    #[must_use]
    pub fn writer(&self) -> &Arc<W> {
        &self.writer
    }
}

async fn flush<W: BatchWriter>(writer: &Arc<W>, recorder: &MetricsRecorder, buf: &mut Vec<DecisionRecord>) {
    if buf.is_empty() {
        return;
    }
    let batch = std::mem::take(buf);
    let count = batch.len();
    let total_cost: f64 = batch
        .iter()
        .flat_map(|r| r.cost_meters.values())
        .sum();
    let lines: Vec<String> = batch
        .iter()
        .filter_map(|r| serde_json::to_string(r).ok())
        .collect();

    match writer.write_batch(lines).await {
        Ok(()) => {
            recorder.record_outbox_publish("decision_batch_ok");
            info!(count, total_cost, "flushed decision record batch");
        }
        Err(err) => {
            recorder.record_outbox_publish("decision_batch_failed");
            error!(count, error = %err, "failed to flush decision record batch");
        }
    }
}

#[async_trait]
impl<W: BatchWriter + 'static> DecisionSink for ColumnarDecisionSink<W> {
    async fn record(&self, record: DecisionRecord) -> CoreResult<()> {
        self.tx
            .send(record)
            .map_err(|_| CoreError::SinkUnavailable("decision export channel closed".to_string()))
    }
}
