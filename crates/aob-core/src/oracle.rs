//! Policy oracle: an external, deny-by-exception decision service
//! consulted before traversing each edge. Unavailability is treated as a
//! deny — the engine never falls open.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{Json, RunContext};

/// The verdict returned by a policy oracle for one edge evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Whether traversal of the edge is permitted.
    pub allowed: bool,
    /// Human-readable reason, surfaced in `DecisionRecord`s and denial
    /// events.
    pub reason: Option<String>,
}

impl Verdict {
    /// An unconditional allow with no reason attached.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// A deny carrying the given reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// External policy decision service, consulted once per edge traversal.
///
/// Implementations should treat evaluation as a pure query: the oracle may
/// consult external state, but evaluating the same edge for the same run
/// twice must not have side effects visible to the run itself (caching,
/// rate-limiting, and auditing all happen outside this trait).
#[async_trait]
pub trait PolicyOracle: Send + Sync {
    /// Evaluates whether traversal from `from_node` to `to_node` is allowed
    /// for the given run, with the edge's opaque `policies` tags and the
    /// run's context available as decision inputs.
    async fn evaluate(
        &self,
        correlation_id: &str,
        from_node: &str,
        to_node: &str,
        policies: &[String],
        context: &RunContext,
    ) -> Result<Verdict>;
}

/// Wraps an oracle so that any error — timeout, connection failure,
/// malformed response — is translated into a deny rather than propagated as
/// an allow-by-default. This is the only way engine code should consult an
/// oracle in production; `O::evaluate`'s `Result` is otherwise easy to
/// mishandle as "allowed unless Err(explicit deny)".
pub struct FailClosedOracle<O> {
    inner: O,
}

impl<O: PolicyOracle> FailClosedOracle<O> {
    /// Wraps `inner`, an oracle whose transport or protocol errors should be
    /// treated as a deny rather than surfaced to the caller.
    pub fn new(inner: O) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<O: PolicyOracle> PolicyOracle for FailClosedOracle<O> {
    async fn evaluate(
        &self,
        correlation_id: &str,
        from_node: &str,
        to_node: &str,
        policies: &[String],
        context: &RunContext,
    ) -> Result<Verdict> {
        match self
            .inner
            .evaluate(correlation_id, from_node, to_node, policies, context)
            .await
        {
            Ok(verdict) => Ok(verdict),
            Err(err) => {
                warn!(
                    correlation_id,
                    from_node,
                    to_node,
                    error = %err,
                    "policy oracle unavailable, failing closed"
                );
                Ok(Verdict::deny(format!("oracle unavailable: {err}")))
            }
        }
    }
}

/// Wraps an oracle with exponential-backoff retry, then fails closed once the
/// retry budget is exhausted: a network error is retried with exponential
/// backoff up to a fixed attempt count, and exhaustion is treated as deny
/// with reason `oracle_unavailable`.
///
/// This is the wrapper production engines should reach for: a single
/// [`FailClosedOracle`] denies on the very first transport hiccup, which
/// would make routine network blips look like policy denials. `RetryingOracle`
/// absorbs up to `max_attempts` of those before giving up — satisfying I8
/// (fail-closed after R+1 consecutive oracle errors).
pub struct RetryingOracle<O> {
    inner: O,
    max_attempts: u32,
    base_delay: Duration,
}

impl<O: PolicyOracle> RetryingOracle<O> {
    /// Wraps `inner` with up to `max_attempts` retries (1 means "try once,
    /// no retry") separated by exponential backoff starting at `base_delay`.
    #[must_use]
    pub fn new(inner: O, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }
}

#[async_trait]
impl<O: PolicyOracle> PolicyOracle for RetryingOracle<O> {
    async fn evaluate(
        &self,
        correlation_id: &str,
        from_node: &str,
        to_node: &str,
        policies: &[String],
        context: &RunContext,
    ) -> Result<Verdict> {
        let mut last_err: Option<Error> = None;
        for attempt in 1..=self.max_attempts {
            match self
                .inner
                .evaluate(correlation_id, from_node, to_node, policies, context)
                .await
            {
                Ok(verdict) => return Ok(verdict),
                Err(err) => {
                    warn!(
                        correlation_id,
                        from_node,
                        to_node,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "policy oracle call failed"
                    );
                    last_err = Some(err);
                    if attempt < self.max_attempts {
                        let delay = self.base_delay.saturating_mul(1 << (attempt - 1).min(16));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        let reason = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "oracle unavailable".to_string());
        Ok(Verdict::deny(format!("oracle_unavailable: {reason}")))
    }
}

/// An oracle that allows every edge unconditionally. Used by tests and
/// `aob-testing`'s default harness configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllOracle;

#[async_trait]
impl PolicyOracle for AllowAllOracle {
    async fn evaluate(
        &self,
        _correlation_id: &str,
        _from_node: &str,
        _to_node: &str,
        _policies: &[String],
        _context: &RunContext,
    ) -> Result<Verdict> {
        Ok(Verdict::allow())
    }
}

/// An oracle that denies every edge unconditionally. Used to test
/// fail-closed behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllOracle;

#[async_trait]
impl PolicyOracle for DenyAllOracle {
    async fn evaluate(
        &self,
        _correlation_id: &str,
        _from_node: &str,
        _to_node: &str,
        _policies: &[String],
        _context: &RunContext,
    ) -> Result<Verdict> {
        Ok(Verdict::deny("denied by DenyAllOracle"))
    }
}

/// An oracle backed by a closure, for table-driven tests that need custom
/// per-edge logic without a full trait impl.
pub struct FnOracle<F>(pub F);

#[async_trait]
impl<F> PolicyOracle for FnOracle<F>
where
    F: Fn(&str, &str, &str, &[String], &RunContext) -> Verdict + Send + Sync,
{
    async fn evaluate(
        &self,
        correlation_id: &str,
        from_node: &str,
        to_node: &str,
        policies: &[String],
        context: &RunContext,
    ) -> Result<Verdict> {
        Ok((self.0)(correlation_id, from_node, to_node, policies, context))
    }
}

/// An oracle that always returns a transport-level error, used to exercise
/// [`FailClosedOracle`]'s fail-closed path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysErrorOracle;

#[async_trait]
impl PolicyOracle for AlwaysErrorOracle {
    async fn evaluate(
        &self,
        _correlation_id: &str,
        _from_node: &str,
        _to_node: &str,
        _policies: &[String],
        _context: &RunContext,
    ) -> Result<Verdict> {
        Err(Error::OracleUnavailable("simulated timeout".to_string()))
    }
}
