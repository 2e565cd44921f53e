//! Engine configuration: tunables for leasing, retries, snapshotting, outbox
//! delivery, and retention, assembled via a fluent `with_*` builder.

use std::collections::HashMap;
use std::time::Duration;

use crate::outbox::OutboxConfig;

/// Top-level engine configuration.
///
/// Constructed with [`EngineConfig::new`] and customized with the `with_*`
/// builder methods; every field has a sensible default so callers only
/// override what they need.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TTL granted to a session lease on acquisition.
    pub lease_ttl: Duration,
    /// How often a held lease is renewed, should be well under `lease_ttl`.
    pub lease_renew_interval: Duration,
    /// Max concurrent run-drivers the engine will schedule at once.
    pub max_concurrent_runs: usize,
    /// How often a run's state is snapshotted, in number of folded events.
    pub snapshot_every_n_events: u64,
    /// Outbox publisher tunables.
    pub outbox: OutboxConfig,
    /// Per-event-kind retention horizon; a kind absent from this map is
    /// retained indefinitely.
    pub retention: HashMap<RetentionKind, Duration>,
}

/// Coarse categories of durable data subject to independent retention
/// policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetentionKind {
    /// Raw appended events.
    Events,
    /// Captured snapshots.
    Snapshots,
    /// Decision/audit records.
    DecisionRecords,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(30),
            lease_renew_interval: Duration::from_secs(10),
            max_concurrent_runs: 64,
            snapshot_every_n_events: 50,
            outbox: OutboxConfig::default(),
            retention: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Creates a config with default tunables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the session lease TTL.
    #[must_use]
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Overrides how often a held lease is renewed.
    #[must_use]
    pub fn with_lease_renew_interval(mut self, interval: Duration) -> Self {
        self.lease_renew_interval = interval;
        self
    }

    /// Overrides the maximum number of concurrently scheduled runs.
    #[must_use]
    pub fn with_max_concurrent_runs(mut self, n: usize) -> Self {
        self.max_concurrent_runs = n;
        self
    }

    /// Overrides the snapshot cadence, in folded events.
    #[must_use]
    pub fn with_snapshot_every_n_events(mut self, n: u64) -> Self {
        self.snapshot_every_n_events = n;
        self
    }

    /// Overrides outbox publisher tunables.
    #[must_use]
    pub fn with_outbox(mut self, outbox: OutboxConfig) -> Self {
        self.outbox = outbox;
        self
    }

    /// Sets a finite retention horizon for a data kind; absent kinds are
    /// retained indefinitely.
    #[must_use]
    pub fn with_retention(mut self, kind: RetentionKind, ttl: Duration) -> Self {
        self.retention.insert(kind, ttl);
        self
    }

    /// The retention horizon configured for `kind`, if any.
    #[must_use]
    pub fn retention_for(&self, kind: RetentionKind) -> Option<Duration> {
        self.retention.get(&kind).copied()
    }
}
