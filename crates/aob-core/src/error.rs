//! Error kinds for the orchestration engine.
//!
//! One enum per failure surface, matching the policy table in the engine's
//! error handling design: transient failures retry locally, fail-closed
//! defaults absorb external unavailability, and anything else surfaces to
//! the caller as a terminal event on the run.

use thiserror::Error;

use crate::model::NodeId;

/// Top-level error type returned by engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Compilation of a declarative spec failed. Surfaced synchronously; no
    /// run is created.
    #[error("compile error: {0}")]
    Compile(#[from] crate::compiler::CompileError),

    /// The run's lease was lost mid-step. The caller must reload from
    /// snapshot+events and retry acquisition.
    #[error("lease lost for correlation {correlation_id}")]
    LeaseLost {
        /// Correlation id whose lease was lost.
        correlation_id: String,
    },

    /// Lease could not be (re-)acquired after exhausting backoff.
    #[error("run unavailable: could not acquire lease for {correlation_id}")]
    RunUnavailable {
        /// Correlation id that could not be leased.
        correlation_id: String,
    },

    /// A node-level transient failure, subject to the node's retry policy.
    /// Not normally surfaced past the engine; carried here so adapters and
    /// tests can distinguish it from a permanent failure.
    #[error("transient failure in node {node_id}: {reason}")]
    NodeTransientFailure {
        /// Node that failed.
        node_id: NodeId,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A node-level permanent failure (retries exhausted, or the node
    /// behavior reported a non-transient error).
    #[error("permanent failure in node {node_id}: {reason}")]
    NodePermanentFailure {
        /// Node that failed.
        node_id: NodeId,
        /// Human-readable failure reason.
        reason: String,
    },

    /// `append` would violate the dense-sequence invariant for this
    /// correlation id. Indicates a duplicate scheduler; the caller should
    /// reconfirm lease ownership and yield if it is no longer the holder.
    #[error("sequence conflict on correlation {correlation_id}: expected next seq {expected}")]
    AppendSequenceConflict {
        /// Correlation id whose append conflicted.
        correlation_id: String,
        /// The sequence number the store expected next.
        expected: u64,
    },

    /// The outbox publisher could not deliver an event after exhausting its
    /// retry budget; it has been moved to the DLQ.
    #[error("publish failure for event {event_id}: {reason}")]
    PublishFailure {
        /// Id of the event that failed to publish.
        event_id: String,
        /// Last observed error.
        reason: String,
    },

    /// A snapshot write failed. Logged and otherwise ignored: snapshots are
    /// an optimization, not a correctness requirement.
    #[error("snapshot write failed for correlation {correlation_id}: {reason}")]
    SnapshotWriteFailure {
        /// Correlation id whose snapshot failed to write.
        correlation_id: String,
        /// Underlying error.
        reason: String,
    },

    /// The decision sink was unavailable. A deferred-record marker is
    /// appended instead; the run is not affected.
    #[error("decision sink unavailable: {0}")]
    SinkUnavailable(String),

    /// The policy oracle could not be reached after exhausting retries.
    /// Treated as deny (fail-closed).
    #[error("policy oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Requested correlation id does not exist.
    #[error("unknown run: {0}")]
    UnknownRun(String),

    /// `resume` was called for a run that has no pending human checkpoint.
    #[error("run {0} is not awaiting approval")]
    NotPending(String),

    /// An adapter-level storage error (wraps a backend-specific error
    /// message; concrete adapters implement `From` into this variant).
    #[error("event store error: {0}")]
    EventStore(String),

    /// An adapter-level bus error.
    #[error("event bus error: {0}")]
    EventBus(String),

    /// An adapter-level lease backend error.
    #[error("lease backend error: {0}")]
    LeaseBackend(String),

    /// Run was cancelled via the per-run cancel signal.
    #[error("run {0} cancelled")]
    Cancelled(String),

    /// Global shutdown deadline elapsed while the run was mid-step.
    #[error("run {0} aborted by shutdown")]
    Shutdown(String),
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies whether an error is safe to retry automatically.
///
/// The scheduler consults this to decide between re-queueing a node with
/// backoff and propagating a permanent failure — see Design Notes on
/// replacing exceptions-as-control-flow with explicit result values.
pub trait Transience {
    /// Returns `true` if the failure is expected to be transient.
    fn is_transient(&self) -> bool;
}

impl Transience for Error {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::NodeTransientFailure { .. }
                | Error::OracleUnavailable(_)
                | Error::EventStore(_)
                | Error::EventBus(_)
                | Error::LeaseBackend(_)
        )
    }
}
