//! Prometheus-backed metrics registry and SLO definitions.
//!
//! The engine (`aob-core`) emits counters and histograms for node attempts,
//! policy decisions, outbox publish latency, and lease contention through
//! this registry rather than calling `prometheus` directly, so the wiring
//! stays in one place and `aob-cli status`/`metrics_server::serve_metrics`
//! can export it without depending on engine internals.

use std::sync::{Arc, OnceLock};

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::error::{Error, Result};

/// The kind of service-level objective a [`SloDefinition`] tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SloType {
    /// Latency percentile must stay under a threshold.
    Latency,
    /// Success ratio must stay above a threshold.
    Availability,
}

/// A named SLO target, used only for documentation/alerting config; the
/// registry does not itself evaluate these, it just carries them alongside
/// the metrics they're computed from.
#[derive(Debug, Clone)]
pub struct SloDefinition {
    /// Metric name this SLO reads from.
    pub name: &'static str,
    /// Kind of objective.
    pub kind: SloType,
    /// Target value (seconds for latency, ratio 0..1 for availability).
    pub target: f64,
}

/// The default SLOs this engine tracks out of the box.
#[must_use]
pub fn default_slo_definitions() -> Vec<SloDefinition> {
    vec![
        SloDefinition {
            name: "aob_node_step_duration_seconds",
            kind: SloType::Latency,
            target: 5.0,
        },
        SloDefinition {
            name: "aob_workflow_completed_total",
            kind: SloType::Availability,
            target: 0.99,
        },
    ]
}

/// Holds every Prometheus collector the engine registers, behind a single
/// shared registry so `/metrics` exports them all together.
pub struct MetricsRegistry {
    registry: Registry,
    /// `node.started` / `node.completed` / `node.failed` counts, labeled by
    /// node kind and outcome.
    pub node_events_total: IntCounterVec,
    /// Policy oracle verdicts, labeled by allow/deny and reason.
    pub policy_decisions_total: IntCounterVec,
    /// Outbox publish attempts, labeled by outcome (ok/retry/dlq).
    pub outbox_publish_total: IntCounterVec,
    /// Node step wall-clock duration.
    pub node_step_duration_seconds: HistogramVec,
    /// Currently held leases, labeled by correlation id prefix bucket.
    pub active_leases: IntGaugeVec,
    /// Depth of the outbox backlog at last scan.
    pub outbox_backlog: IntGaugeVec,
}

impl MetricsRegistry {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let node_events_total = IntCounterVec::new(
            Opts::new("aob_node_events_total", "Node lifecycle events by kind and type"),
            &["node_kind", "event_type"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let policy_decisions_total = IntCounterVec::new(
            Opts::new("aob_policy_decisions_total", "Policy oracle verdicts"),
            &["verdict", "reason"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let outbox_publish_total = IntCounterVec::new(
            Opts::new("aob_outbox_publish_total", "Outbox publish attempts by outcome"),
            &["outcome"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let node_step_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "aob_node_step_duration_seconds",
                "Wall-clock time spent executing one node step",
            ),
            &["node_kind"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let active_leases = IntGaugeVec::new(
            Opts::new("aob_active_leases", "Leases currently held"),
            &["pool"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let outbox_backlog = IntGaugeVec::new(
            Opts::new("aob_outbox_backlog", "Unpublished outbox rows at last scan"),
            &["pool"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        registry
            .register(Box::new(node_events_total.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(policy_decisions_total.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(outbox_publish_total.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(node_step_duration_seconds.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(active_leases.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(outbox_backlog.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;

        Ok(Self {
            registry,
            node_events_total,
            policy_decisions_total,
            outbox_publish_total,
            node_step_duration_seconds,
            active_leases,
            outbox_backlog,
        })
    }

    /// Returns the process-global registry, creating it on first access.
    #[must_use]
    pub fn global() -> Arc<MetricsRegistry> {
        static REGISTRY: OnceLock<Arc<MetricsRegistry>> = OnceLock::new();
        REGISTRY
            .get_or_init(|| {
                Arc::new(MetricsRegistry::new().expect("static metric descriptors never collide"))
            })
            .clone()
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .map_err(|e| Error::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| Error::Metrics(e.to_string()))
    }
}

/// Handle used by engine call sites to record metrics without holding onto
/// the concrete `MetricsRegistry` type.
#[derive(Clone)]
pub struct MetricsRecorder {
    registry: Arc<MetricsRegistry>,
}

impl MetricsRecorder {
    /// Wraps the process-global registry.
    #[must_use]
    pub fn global() -> Self {
        Self {
            registry: MetricsRegistry::global(),
        }
    }

    /// Records a node lifecycle event.
    pub fn record_node_event(&self, node_kind: &str, event_type: &str) {
        self.registry
            .node_events_total
            .with_label_values(&[node_kind, event_type])
            .inc();
    }

    /// Records a policy oracle verdict.
    pub fn record_policy_decision(&self, allowed: bool, reason: &str) {
        let verdict = if allowed { "allow" } else { "deny" };
        self.registry
            .policy_decisions_total
            .with_label_values(&[verdict, reason])
            .inc();
    }

    /// Records an outbox publish attempt outcome (`ok`, `retry`, or `dlq`).
    pub fn record_outbox_publish(&self, outcome: &str) {
        self.registry
            .outbox_publish_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Observes the duration of one node step.
    pub fn observe_node_step_duration(&self, node_kind: &str, seconds: f64) {
        self.registry
            .node_step_duration_seconds
            .with_label_values(&[node_kind])
            .observe(seconds);
    }

    /// Sets the current outbox backlog depth for a named pool.
    pub fn set_outbox_backlog(&self, pool: &str, depth: i64) {
        self.registry
            .outbox_backlog
            .with_label_values(&[pool])
            .set(depth);
    }
}

/// Returns the shared registry, initializing it if this is the first call.
#[must_use]
pub fn metrics_registry() -> Arc<MetricsRegistry> {
    MetricsRegistry::global()
}

/// Initializes the default process-global recorder. Idempotent.
pub fn init_default_recorder() -> Result<MetricsRecorder> {
    Ok(MetricsRecorder::global())
}

/// Registers the default metric descriptors (a no-op beyond the lazy
/// initialization `global()` already performs; kept as an explicit call
/// site for callers that want registration to happen eagerly at startup).
pub fn register_default_metrics() -> Result<()> {
    let _ = MetricsRegistry::global();
    Ok(())
}

/// Renders the global registry in Prometheus text format.
pub fn export_metrics() -> Result<String> {
    MetricsRegistry::global().export()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_exports_node_events() {
        let recorder = MetricsRecorder::global();
        recorder.record_node_event("task", "node_completed");
        recorder.record_policy_decision(false, "oracle_unavailable");
        recorder.record_outbox_publish("dlq");
        recorder.observe_node_step_duration("agent", 0.125);
        recorder.set_outbox_backlog("default", 3);

        let exported = export_metrics().expect("export succeeds");
        assert!(exported.contains("aob_node_events_total"));
        assert!(exported.contains("aob_policy_decisions_total"));
        assert!(exported.contains("aob_outbox_backlog"));
    }

    #[test]
    fn default_slos_cover_latency_and_availability() {
        let slos = default_slo_definitions();
        assert!(slos.iter().any(|s| s.kind == SloType::Latency));
        assert!(slos.iter().any(|s| s.kind == SloType::Availability));
    }
}
