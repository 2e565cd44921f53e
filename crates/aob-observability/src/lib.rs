//! AOB Observability
//!
//! Distributed tracing, metrics, and Decision Record export for the AOB
//! engine (`aob-core`), built on OpenTelemetry and Prometheus.
//!
//! This crate provides:
//! - Tracing/span configuration and OTLP initialization
//! - A Prometheus metrics registry for node/policy/outbox counters
//! - Cost tracking for `Agent` node external-call cost meters
//! - A columnar batching [`DecisionSink`](aob_core::DecisionSink) backend
//!   for the decision recorder
//!
//! # Example
//!
//! ```rust,no_run
//! use aob_observability::{TracingConfig, init_tracing};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TracingConfig::new()
//!         .with_service_name("aob-engine")
//!         .with_otlp_endpoint("http://localhost:4317")
//!         .with_sampling_rate(1.0);
//!
//!     init_tracing(config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cost;
pub mod decision_export;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod tracer;

#[cfg(feature = "metrics-server")]
pub mod metrics_server;

pub use config::{PropagatorType, SamplingStrategy, TracingConfig};
pub use cost::{
    AlertLevel, BudgetConfig, BudgetEnforcer, CostRecord, CostReport, CostTracker, ModelPrice,
    ModelPricing, Pricing, TokenUsage,
};
pub use decision_export::{BatchWriter, ColumnarDecisionSink, MemoryBatchWriter};
pub use error::{Error, Result};
pub use exporter::init_tracing;
pub use metrics::{
    default_slo_definitions, export_metrics, init_default_recorder, metrics_registry,
    register_default_metrics, MetricsRecorder, MetricsRegistry, SloDefinition, SloType,
};
pub use tracer::Traceable;
