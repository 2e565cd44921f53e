//! Session leasing: a short-TTL exclusive-writer lease per correlation
//! id, giving the single-writer guarantee the event store's sequence
//! invariant depends on without requiring a long-lived connection per run.
//!
//! `aob-redis-lease` implements this over `SET NX PX` plus a Lua CAS script
//! for renew/release; [`MemoryLeaseManager`] here is the in-process
//! equivalent used by tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// An exclusive, renewable, TTL-bounded claim on a correlation id.
///
/// Holding a valid lease is the engine's only basis for believing it is the
/// sole writer of a run's event sequence; callers must re-check
/// [`Lease::is_valid`] (or catch a failed `renew`) before every append and
/// treat loss as [`Error::LeaseLost`], forcing a reload from snapshot+events.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Run this lease claims.
    pub correlation_id: String,
    /// Opaque fencing token; backends use this to detect a stale holder
    /// attempting to renew after losing and re-winning the lease.
    pub token: String,
    /// Wall-clock deadline after which the lease is no longer valid unless
    /// renewed.
    pub expires_at: Instant,
}

impl Lease {
    /// Whether the lease is still valid as of now.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Exclusive-writer lease backend.
#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Attempts to acquire the lease for `correlation_id`. Fails with
    /// [`Error::RunUnavailable`] if another holder's lease has not expired.
    async fn acquire(&self, correlation_id: &str, ttl: Duration) -> Result<Lease>;

    /// Extends a held lease's TTL. Fails with [`Error::LeaseLost`] if the
    /// lease has expired or another holder has since acquired it.
    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease>;

    /// Releases a held lease early, allowing immediate reacquisition by
    /// another holder. Best-effort: callers should not depend on this
    /// succeeding for correctness, only as a latency optimization.
    async fn release(&self, lease: &Lease) -> Result<()>;
}

struct Holder {
    token: String,
    expires_at: Instant,
}

/// An in-process [`LeaseManager`], used by tests and the `aob-testing`
/// harness. Leases are not visible across processes.
#[derive(Default)]
pub struct MemoryLeaseManager {
    holders: Mutex<HashMap<String, Holder>>,
}

impl MemoryLeaseManager {
    /// Creates an empty lease table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseManager for MemoryLeaseManager {
    async fn acquire(&self, correlation_id: &str, ttl: Duration) -> Result<Lease> {
        let mut holders = self.holders.lock();
        let now = Instant::now();
        if let Some(existing) = holders.get(correlation_id) {
            if existing.expires_at > now {
                return Err(Error::RunUnavailable {
                    correlation_id: correlation_id.to_string(),
                });
            }
        }
        let token = uuid::Uuid::new_v4().to_string();
        let expires_at = now + ttl;
        holders.insert(
            correlation_id.to_string(),
            Holder {
                token: token.clone(),
                expires_at,
            },
        );
        Ok(Lease {
            correlation_id: correlation_id.to_string(),
            token,
            expires_at,
        })
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        let mut holders = self.holders.lock();
        match holders.get_mut(&lease.correlation_id) {
            Some(holder) if holder.token == lease.token && holder.expires_at > Instant::now() => {
                holder.expires_at = Instant::now() + ttl;
                Ok(Lease {
                    correlation_id: lease.correlation_id.clone(),
                    token: lease.token.clone(),
                    expires_at: holder.expires_at,
                })
            }
            _ => Err(Error::LeaseLost {
                correlation_id: lease.correlation_id.clone(),
            }),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut holders = self.holders.lock();
        if let Some(holder) = holders.get(&lease.correlation_id) {
            if holder.token == lease.token {
                holders.remove(&lease.correlation_id);
            }
        }
        Ok(())
    }
}
