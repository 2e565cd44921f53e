//! Core data model: `WorkflowSpec`, `Node`, `Edge`, `RunContext`, `Event`,
//! `Snapshot`, `OutboxEntry`, `DecisionRecord`.
//!
//! These types are the wire format for everything the engine persists; all
//! are plain `serde`-derived values rather than behavior-carrying objects,
//! per the "dynamic attribute bags" redesign note — no eval of host code,
//! no owning pointers between nodes.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier of a node within a compiled graph. Unique within one spec.
pub type NodeId = String;

/// A durable correlation id identifying one run of a compiled graph.
pub type CorrelationId = String;

/// One step's worth of free-form JSON payload.
pub type Json = serde_json::Value;

/// The four closed node shapes a graph may contain.
///
/// New kinds require explicit additions to the compiler, reducer, and
/// scheduler dispatch table — this is a closed tagged-variant type, not an
/// inheritance hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Deterministic, pure over the run context.
    Task,
    /// Non-deterministic invocation of an external model/tool chain.
    Agent,
    /// Suspends the run until an external resume with a typed approval
    /// value arrives.
    Human,
    /// No outgoing edges; produces the final output.
    Terminal,
}

/// Retry policy for a single node.
///
/// Invariants enforced at compile time: `1 <= max_attempts <= 16` and
/// `base_delay <= max_delay`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first), 1..=16.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    /// Whether to jitter the computed delay by `uniform(0.5, 1.0)`.
    pub jitter: bool,
    /// Delay ceiling; backoff never exceeds this.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(0),
            jitter: false,
            max_delay: Duration::from_millis(0),
        }
    }
}

impl RetryPolicy {
    /// Computes the delay before the given attempt (1-indexed) should be
    /// retried, per `delay = min(max_delay, base_delay * 2^(attempt-1))`,
    /// optionally multiplied by a `uniform(0.5, 1.0)` jitter factor.
    ///
    /// `jitter_sample` is injected so callers (and tests) control the
    /// randomness source; the engine itself draws from `rand::thread_rng`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let factor = 2u64.checked_pow(exp).unwrap_or(u64::MAX);
        let raw = self.base_delay.saturating_mul(factor as u32);
        let capped = raw.min(self.max_delay);
        if self.jitter {
            let scale = 0.5 + 0.5 * jitter_sample.clamp(0.0, 1.0);
            capped.mul_f64(scale)
        } else {
            capped
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

/// A single vertex in a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique id within the spec.
    pub id: NodeId,
    /// Kind dispatch tag.
    pub kind: NodeKind,
    /// Display name, for audit records and tooling.
    pub name: String,
    /// Context-projection expression evaluated to produce this node's
    /// input, in the grammar documented in `crate::projection`.
    pub expr: String,
    /// Retry policy; ignored for `Human` and `Terminal` nodes.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Required and non-empty for `Human` nodes; absent otherwise.
    #[serde(default)]
    pub approval_key: Option<String>,
    /// Per-attempt timeout; defaults to 30s if unset.
    #[serde(default = "default_attempt_timeout", with = "duration_millis")]
    pub attempt_timeout: Duration,
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Tag reserved to mark a compensation edge. The core indexes edges with
/// this tag but never walks them automatically; a compensation-aware
/// executor decides when to traverse them.
pub const ON_FAILURE_TAG: &str = "on_failure";

/// An ordered pair `(from_id, to_id)` with a possibly-empty set of opaque
/// policy tags interpreted only by the external oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub from: NodeId,
    /// Destination node id.
    pub to: NodeId,
    /// Opaque policy tags passed to the oracle verbatim.
    #[serde(default)]
    pub policies: Vec<String>,
}

impl Edge {
    /// Whether this edge carries the reserved compensation tag.
    #[must_use]
    pub fn is_compensation(&self) -> bool {
        self.policies.iter().any(|p| p == ON_FAILURE_TAG)
    }
}

/// The declarative, uncompiled specification of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Spec identifier.
    pub id: String,
    /// Ordered set of nodes.
    pub nodes: Vec<Node>,
    /// Edges between nodes.
    pub edges: Vec<Edge>,
}

/// Mapping from string key to arbitrary JSON value carried through a run.
///
/// The `bag` sub-mapping is reserved for user-supplied input and approval
/// values; node outputs are stored under the node's own id. `RunContext`
/// exists only in memory during execution — durable state is the event
/// sequence plus the latest snapshot (see `crate::snapshot`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    /// User-supplied input and human approval values.
    #[serde(default)]
    pub bag: HashMap<String, Json>,
    /// Node outputs, keyed by node id.
    #[serde(default)]
    pub outputs: HashMap<NodeId, Json>,
}

impl RunContext {
    /// Creates a context seeded with the given initial bag.
    #[must_use]
    pub fn with_bag(bag: HashMap<String, Json>) -> Self {
        Self {
            bag,
            outputs: HashMap::new(),
        }
    }

    /// Records a node's output, overwriting any prior value for that node.
    pub fn set_output(&mut self, node_id: &str, value: Json) {
        self.outputs.insert(node_id.to_string(), value);
    }
}

/// The closed vocabulary of event types the engine may append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Run creation.
    WorkflowStarted,
    /// A node attempt began.
    NodeStarted,
    /// A node attempt completed successfully.
    NodeCompleted,
    /// A node attempt failed (transient or final).
    NodeFailed,
    /// An edge evaluation was denied by the policy oracle.
    PolicyDenied,
    /// A human checkpoint is awaiting external resume.
    HumanAwaited,
    /// A human checkpoint was approved.
    HumanApproved,
    /// A human checkpoint was rejected.
    HumanRejected,
    /// The run reached a successful terminal state.
    WorkflowCompleted,
    /// The run reached a failed terminal state.
    WorkflowFailed,
    /// A snapshot was captured.
    SnapshotCreated,
}

impl EventType {
    /// Terminal event types end the run; no further events may be appended
    /// for the same correlation id.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, EventType::WorkflowCompleted | EventType::WorkflowFailed)
    }
}

/// One durable fact appended to a run's event log.
///
/// `sequence_number` is monotonic per `correlation_id`, assigned by the
/// event store under the run's lease; events for one correlation id form a
/// dense sequence starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique event id.
    pub id: String,
    /// Run this event belongs to.
    pub correlation_id: CorrelationId,
    /// Dense, monotonic per-run sequence number, assigned at append.
    pub sequence_number: u64,
    /// Closed-vocabulary event type.
    pub event_type: EventType,
    /// Event-specific JSON payload.
    pub payload: Json,
    /// Deterministically derived from `(correlation_id, node_id,
    /// logical_step, attempt)`; at most one event with a given
    /// `(correlation_id, idempotency_key)` is ever materialized.
    pub idempotency_key: String,
    /// Wall-clock creation time, assigned by the store.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Derives an idempotency key deterministically from the logical coordinates
/// of an append.
#[must_use]
pub fn idempotency_key(
    correlation_id: &str,
    node_id: &str,
    logical_step: u64,
    attempt: u32,
) -> String {
    use uuid::Uuid;
    let namespace = Uuid::NAMESPACE_OID;
    let name = format!("{correlation_id}:{node_id}:{logical_step}:{attempt}");
    Uuid::new_v5(&namespace, name.as_bytes()).to_string()
}

/// Captured run state at a given sequence number, enabling fast restart
/// without replaying the whole log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Run this snapshot belongs to.
    pub correlation_id: CorrelationId,
    /// Sequence number this snapshot reflects (inclusive).
    pub up_to_sequence: u64,
    /// Full run context at that sequence.
    pub run_context: RunContext,
    /// Node ids eligible for execution.
    pub ready_set: Vec<NodeId>,
    /// Human nodes whose approval is still awaited.
    pub pending_humans: Vec<NodeId>,
    /// Node ids completed as of this snapshot, needed so a join node whose
    /// branches straddle the snapshot boundary still sees both inputs.
    #[serde(default)]
    pub completed: std::collections::HashSet<NodeId>,
    /// Node ids permanently failed as of this snapshot.
    #[serde(default)]
    pub failed: std::collections::HashSet<NodeId>,
    /// Attempts made so far per node, carried across snapshots so retry
    /// counters survive a restart.
    #[serde(default)]
    pub attempts: HashMap<NodeId, u32>,
    /// Capture time.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A row in the transactional outbox, living in the same store as events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// The event this entry publishes.
    pub event_id: String,
    /// Set once publication succeeds; `None` marks the backlog.
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Number of publish attempts made so far.
    pub attempts: u32,
    /// Most recent publish error, if any.
    pub last_error: Option<String>,
}

/// One audit row per node invocation, including blocked, retried, or failed
/// attempts. Not on the critical path of state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Run this decision belongs to.
    pub correlation_id: CorrelationId,
    /// Node invoked.
    pub node_id: NodeId,
    /// Node's display name at invocation time.
    pub node_name: String,
    /// Node kind at invocation time.
    pub node_kind: NodeKind,
    /// Whether every incoming edge was allowed.
    pub allowed: bool,
    /// Policy tags that were evaluated for this invocation.
    pub policies_applied: Vec<String>,
    /// Projected input the node behavior observed.
    pub input_snapshot: Json,
    /// Output the node behavior produced, if any.
    pub output_snapshot: Option<Json>,
    /// Count of external calls made while servicing this invocation.
    pub external_calls: u32,
    /// Opaque cost meters (tokens, dollars, etc.), left to the caller.
    pub cost_meters: HashMap<String, f64>,
    /// Wall-clock latency of the invocation.
    pub latency_ms: u64,
    /// Record creation time.
    pub created_at: chrono::DateTime<chrono::Utc>,
}
