//! Local, single-file persistence backend for the CLI.
//!
//! The core engine is adapter-agnostic (`aob-postgres-store` / `aob-redis-lease`
//! back it in production); a CLI invocation is a short-lived process, so
//! rather than require a running Postgres/Redis for `aob compile`/`aob start`
//! to be useful out of the box, this backend keeps the same state shape the
//! in-memory adapters use (`aob_core::store::MemoryEventStore`,
//! `aob_core::dlq::MemoryDlqStore`) but round-trips it through a single JSON
//! file between invocations — the moral equivalent of a local `sqlite`
//! file for a database CLI.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use aob_core::model::{CorrelationId, Event, EventType, Json, OutboxEntry, Snapshot, WorkflowSpec};
use aob_core::{DlqEntry, DlqStore};
use aob_core::{Error as CoreError, EventStore, Result as CoreResult};

#[derive(Default, Serialize, Deserialize)]
struct RunLog {
    events: Vec<Event>,
    #[serde(default)]
    idempotency_index: HashMap<String, usize>,
    #[serde(default)]
    snapshot: Option<Snapshot>,
}

#[derive(Default, Serialize, Deserialize)]
struct FileState {
    /// Compiled graph id -> the spec it was compiled from. Recompiled (a
    /// pure, cheap operation) on every load rather than persisting `Graph`.
    #[serde(default)]
    specs: HashMap<String, WorkflowSpec>,
    /// Correlation id -> the graph id it was started from.
    #[serde(default)]
    run_graph: HashMap<CorrelationId, String>,
    #[serde(default)]
    runs: HashMap<CorrelationId, RunLog>,
    #[serde(default)]
    outbox: HashMap<String, OutboxEntry>,
    #[serde(default)]
    outbox_order: Vec<String>,
    #[serde(default)]
    dlq: Vec<DlqEntry>,
}

/// File-backed event store, outbox, and DLQ, all living in one JSON
/// document on disk.
pub struct FileBackend {
    path: PathBuf,
    state: RwLock<FileState>,
    touched: AtomicU64,
}

impl FileBackend {
    /// Loads state from `path` if it exists, else starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading state file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing state file {}", path.display()))?
        } else {
            FileState::default()
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
            touched: AtomicU64::new(0),
        })
    }

    /// Default state path: `$XDG_STATE_HOME/aob/state.json`, falling back to
    /// `~/.aob/state.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aob")
            .join("state.json")
    }

    /// Persists state back to disk if anything changed since the last save.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(&*self.state.read())?;
        std::fs::write(&self.path, serialized)
            .with_context(|| format!("writing state file {}", self.path.display()))?;
        Ok(())
    }

    /// Registers a compiled spec under `graph_id`, overwriting any prior
    /// registration (compilation is pure, so re-registering the same spec
    /// under its own id is a no-op in effect).
    pub fn put_spec(&self, graph_id: &str, spec: WorkflowSpec) {
        self.state.write().specs.insert(graph_id.to_string(), spec);
        self.touched.fetch_add(1, Ordering::Relaxed);
    }

    /// Looks up a previously compiled spec by graph id.
    #[must_use]
    pub fn get_spec(&self, graph_id: &str) -> Option<WorkflowSpec> {
        self.state.read().specs.get(graph_id).cloned()
    }

    /// Records which graph a correlation id was started from.
    pub fn bind_run(&self, correlation_id: &str, graph_id: &str) {
        self.state
            .write()
            .run_graph
            .insert(correlation_id.to_string(), graph_id.to_string());
        self.touched.fetch_add(1, Ordering::Relaxed);
    }

    /// The graph id a correlation id was started from, if known.
    #[must_use]
    pub fn graph_for_run(&self, correlation_id: &str) -> Option<String> {
        self.state.read().run_graph.get(correlation_id).cloned()
    }

    /// Every known correlation id, for listing commands.
    #[must_use]
    pub fn list_correlation_ids(&self) -> Vec<String> {
        self.state.read().run_graph.keys().cloned().collect()
    }
}

#[async_trait]
impl EventStore for FileBackend {
    async fn append(
        &self,
        correlation_id: &str,
        expected_sequence: u64,
        event_type: EventType,
        payload: Json,
        idempotency_key: String,
    ) -> CoreResult<Event> {
        let mut state = self.state.write();
        let run = state.runs.entry(correlation_id.to_string()).or_default();

        if let Some(&idx) = run.idempotency_index.get(&idempotency_key) {
            return Ok(run.events[idx].clone());
        }

        let next = run.events.len() as u64 + 1;
        if next != expected_sequence {
            return Err(CoreError::AppendSequenceConflict {
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

        let entry = OutboxEntry {
            event_id: event.id.clone(),
            published_at: None,
            attempts: 0,
            last_error: None,
        };
        state.outbox.insert(entry.event_id.clone(), entry);
        state.outbox_order.push(event.id.clone());

        self.touched.fetch_add(1, Ordering::Relaxed);
        Ok(event)
    }

    async fn load_events(&self, correlation_id: &str) -> CoreResult<Vec<Event>> {
        Ok(self
            .state
            .read()
            .runs
            .get(correlation_id)
            .map(|r| r.events.clone())
            .unwrap_or_default())
    }

    async fn load_events_since(&self, correlation_id: &str, after_sequence: u64) -> CoreResult<Vec<Event>> {
        Ok(self
            .state
            .read()
            .runs
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

    async fn next_sequence(&self, correlation_id: &str) -> CoreResult<u64> {
        Ok(self
            .state
            .read()
            .runs
            .get(correlation_id)
            .map(|r| r.events.len() as u64 + 1)
            .unwrap_or(1))
    }

    async fn put_snapshot(&self, snapshot: Snapshot) -> CoreResult<()> {
        let mut state = self.state.write();
        let run = state.runs.entry(snapshot.correlation_id.clone()).or_default();
        run.snapshot = Some(snapshot);
        self.touched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn load_snapshot(&self, correlation_id: &str) -> CoreResult<Option<Snapshot>> {
        Ok(self
            .state
            .read()
            .runs
            .get(correlation_id)
            .and_then(|r| r.snapshot.clone()))
    }

    async fn pending_outbox(&self, limit: usize) -> CoreResult<Vec<OutboxEntry>> {
        let state = self.state.read();
        Ok(state
            .outbox_order
            .iter()
            .filter_map(|id| state.outbox.get(id))
            .filter(|e| e.published_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, event_id: &str) -> CoreResult<()> {
        if let Some(entry) = self.state.write().outbox.get_mut(event_id) {
            entry.published_at = Some(Utc::now());
        }
        self.touched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn mark_publish_failed(&self, event_id: &str, error: &str) -> CoreResult<()> {
        if let Some(entry) = self.state.write().outbox.get_mut(event_id) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
        }
        self.touched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn requeue_outbox(&self, event_id: &str) -> CoreResult<()> {
        if let Some(entry) = self.state.write().outbox.get_mut(event_id) {
            entry.published_at = None;
            entry.attempts = 0;
            entry.last_error = None;
        }
        self.touched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn list_runs(&self) -> CoreResult<Vec<CorrelationId>> {
        Ok(self.state.read().runs.keys().cloned().collect())
    }
}

#[async_trait]
impl DlqStore for FileBackend {
    async fn quarantine(&self, event_id: &str, reason: &str) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.dlq.iter().any(|e| e.event_id == event_id) {
            return Ok(());
        }
        state.dlq.push(DlqEntry {
            event_id: event_id.to_string(),
            reason: reason.to_string(),
            quarantined_at: Utc::now(),
        });
        self.touched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn list(&self) -> CoreResult<Vec<DlqEntry>> {
        Ok(self.state.read().dlq.clone())
    }

    async fn requeue(&self, event_id: &str) -> CoreResult<bool> {
        let found = {
            let mut state = self.state.write();
            let before = state.dlq.len();
            state.dlq.retain(|e| e.event_id != event_id);
            state.dlq.len() != before
        };
        self.touched.fetch_add(1, Ordering::Relaxed);
        if found {
            EventStore::requeue_outbox(self, event_id).await?;
        }
        Ok(found)
    }

    async fn purge(&self, event_id: &str) -> CoreResult<bool> {
        self.requeue(event_id).await
    }
}

/// Loads a [`WorkflowSpec`] from a YAML or JSON file, by extension.
pub fn load_spec(path: &Path) -> Result<WorkflowSpec> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading spec file {}", path.display()))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&raw).context("parsing spec as JSON"),
        _ => serde_yml::from_str(&raw).context("parsing spec as YAML"),
    }
}

/// Derives a stable graph id for a spec. Compilation is pure, so the same
/// spec id always yields the same graph id; a client that edits a spec and
/// recompiles under the same `id` intentionally supersedes the prior
/// registration, matching how the in-memory store treats a fresh `compile`.
#[must_use]
pub fn graph_id_for(spec: &WorkflowSpec) -> String {
    let namespace = uuid::Uuid::NAMESPACE_OID;
    uuid::Uuid::new_v5(&namespace, format!("aob-graph:{}", spec.id).as_bytes()).to_string()
}
