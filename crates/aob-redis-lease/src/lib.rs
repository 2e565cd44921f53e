//! Redis-backed [`LeaseManager`] for the Agentic Orchestration Builder.
//!
//! Implements session leasing over Redis's `SET NX PX` for acquisition
//! and a small Lua script for renew/release, so extending or releasing a
//! lease is a compare-and-swap against the fencing token atomically on the
//! server rather than a racy read-then-write from the client.
//!
//! # Example
//!
//! ```rust,ignore
//! use aob_redis_lease::RedisLeaseManager;
//! use std::time::Duration;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = RedisLeaseManager::new("redis://localhost:6379").await?;
//!     let lease = manager.acquire("run-1", Duration::from_secs(30)).await?;
//!     Ok(())
//! }
//! ```

use std::time::{Duration, Instant};

use aob_core::{Error, Lease, LeaseManager, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use tracing::{debug, error, info, warn};

/// Errors that can occur talking to the backing Redis instance.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RedisLeaseError {
    /// Could not establish or re-establish the connection.
    #[error("Redis connection error: {0}")]
    Connection(String),

    /// A command or script invocation failed.
    #[error("Redis command error: {0}")]
    Command(String),
}

impl From<RedisError> for RedisLeaseError {
    fn from(err: RedisError) -> Self {
        RedisLeaseError::Command(err.to_string())
    }
}

impl From<RedisLeaseError> for Error {
    fn from(err: RedisLeaseError) -> Self {
        Error::LeaseBackend(err.to_string())
    }
}

/// Lua script backing [`RedisLeaseManager::renew`]: extends the key's TTL
/// only if the caller still holds the fencing token recorded at acquire
/// time, atomically on the server. Returns 1 on success, 0 if the caller's
/// token is stale (lost the lease to a later acquirer, or it already
/// expired).
const RENEW_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end
";

/// Lua script backing [`RedisLeaseManager::release`]: deletes the key only
/// if the caller still holds the fencing token, so a stale release can never
/// evict a later holder's lease.
const RELEASE_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
";

/// Redis-backed [`LeaseManager`].
///
/// Each correlation id's lease lives at a single string key
/// `{prefix}:lease:{correlation_id}`, whose value is the fencing token.
/// Acquisition is `SET key token NX PX ttl_ms`; renewal and release run the
/// CAS Lua scripts above so a lease holder that has lost and lost track of
/// its own staleness can never silently clobber a newer holder.
pub struct RedisLeaseManager {
    connection_manager: ConnectionManager,
    key_prefix: String,
    renew_script: Script,
    release_script: Script,
}

impl RedisLeaseManager {
    /// Connects to Redis, using the `aob` key prefix.
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_key_prefix(connection_string, "aob").await
    }

    /// Connects to Redis with a custom key prefix, allowing multiple engine
    /// deployments to share a Redis instance without colliding.
    pub async fn with_key_prefix(connection_string: &str, key_prefix: &str) -> Result<Self> {
        info!(connection_string, "connecting to Redis lease backend");
        let client = redis::Client::open(connection_string).map_err(|e| {
            error!(error = %e, "failed to create Redis client");
            RedisLeaseError::Connection(e.to_string())
        })?;
        let connection_manager = ConnectionManager::new(client).await.map_err(|e| {
            error!(error = %e, "failed to connect to Redis");
            RedisLeaseError::Connection(e.to_string())
        })?;
        debug!(key_prefix, "Redis lease backend connected");
        Ok(Self {
            connection_manager,
            key_prefix: key_prefix.to_string(),
            renew_script: Script::new(RENEW_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    fn lease_key(&self, correlation_id: &str) -> String {
        format!("{}:lease:{correlation_id}", self.key_prefix)
    }
}

#[async_trait]
impl LeaseManager for RedisLeaseManager {
    async fn acquire(&self, correlation_id: &str, ttl: Duration) -> Result<Lease> {
        let mut conn = self.connection_manager.clone();
        let key = self.lease_key(correlation_id);
        let token = uuid::Uuid::new_v4().to_string();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        let acquired: Option<String> = conn
            .set_options(
                &key,
                &token,
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::PX(ttl_ms)),
            )
            .await
            .map_err(RedisLeaseError::from)?;

        if acquired.is_none() {
            return Err(Error::RunUnavailable {
                correlation_id: correlation_id.to_string(),
            });
        }

        Ok(Lease {
            correlation_id: correlation_id.to_string(),
            token,
            expires_at: Instant::now() + ttl,
        })
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        let mut conn = self.connection_manager.clone();
        let key = self.lease_key(&lease.correlation_id);
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        let renewed: i64 = self
            .renew_script
            .key(&key)
            .arg(&lease.token)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisLeaseError::from)?;

        if renewed == 0 {
            warn!(correlation_id = %lease.correlation_id, "lease renewal failed: stale token");
            return Err(Error::LeaseLost {
                correlation_id: lease.correlation_id.clone(),
            });
        }

        Ok(Lease {
            correlation_id: lease.correlation_id.clone(),
            token: lease.token.clone(),
            expires_at: Instant::now() + ttl,
        })
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let key = self.lease_key(&lease.correlation_id);
        let _: i64 = self
            .release_script
            .key(&key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisLeaseError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_key_uses_prefix() {
        let key = format!("{}:lease:{}", "aob", "run-1");
        assert_eq!(key, "aob:lease:run-1");
    }

    #[test]
    fn redis_error_maps_to_lease_backend_error() {
        let err = RedisLeaseError::Connection("refused".to_string());
        let core_err: Error = err.into();
        assert!(matches!(core_err, Error::LeaseBackend(_)));
    }

    #[test]
    fn renew_script_source_is_cas_then_pexpire() {
        assert!(RENEW_SCRIPT.contains("pexpire"));
        assert!(RENEW_SCRIPT.contains("get"));
    }

    #[test]
    fn release_script_source_is_cas_then_del() {
        assert!(RELEASE_SCRIPT.contains("del"));
        assert!(RELEASE_SCRIPT.contains("get"));
    }

    // Integration tests exercising acquire/renew/release against a live
    // Redis server require the `testcontainers` dev-dependency; see
    // tests/redis_lease.rs.
}
