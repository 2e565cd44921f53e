//! Core of the Agentic Orchestration Builder: a durable, event-sourced
//! engine that executes DAGs of `Task`/`Agent`/`Human`/`Terminal` nodes,
//! gated edge-by-edge by an externally-evaluated policy oracle.
//!
//! This crate defines the data model, graph compiler, and the trait seams
//! (`EventStore`, `EventBus`, `LeaseManager`, `PolicyOracle`, `DecisionSink`,
//! `DlqStore`, `NodeExecutor`) that concrete backends implement. It ships
//! in-memory implementations of every seam so the engine is fully testable
//! without any external service; `aob-postgres-store`, `aob-redis-lease`,
//! and `aob-s3-archive` provide the durable counterparts.

pub mod compiler;
pub mod config;
pub mod decision;
pub mod dlq;
pub mod engine;
pub mod error;
pub mod lease;
pub mod model;
pub mod oracle;
pub mod outbox;
pub mod projection;
pub mod snapshot;
pub mod store;

pub use compiler::{compile, CompileError, Graph};
pub use config::{EngineConfig, RetentionKind};
pub use decision::{DecisionSink, MemoryDecisionSink, RecoveringSink};
pub use dlq::{DlqEntry, DlqStore, MemoryDlqStore};
pub use engine::executor::{NodeExecutionError, NodeExecutor, NodeRegistry};
pub use engine::Engine;
pub use error::{Error, Result, Transience};
pub use lease::{Lease, LeaseManager, MemoryLeaseManager};
pub use model::{
    idempotency_key, CorrelationId, DecisionRecord, Edge, Event, EventType, Json, Node, NodeId,
    NodeKind, OutboxEntry, RetryPolicy, RunContext, Snapshot, WorkflowSpec, ON_FAILURE_TAG,
};
pub use oracle::{AllowAllOracle, DenyAllOracle, FailClosedOracle, PolicyOracle, RetryingOracle, Verdict};
pub use outbox::{EventBus, LoopbackBus, OutboxConfig, OutboxPublisher};
pub use projection::{Projection, ProjectionError};
pub use snapshot::{replay, RunState};
pub use store::{EventStore, MemoryEventStore};
