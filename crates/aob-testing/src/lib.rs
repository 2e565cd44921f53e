// Allow unwrap in testing utilities - test code should panic on errors
#![allow(clippy::unwrap_used)]

//! In-memory test harness for the Agentic Orchestration Builder.
//!
//! This crate provides:
//!
//! - [`GraphTestHarness`]: bundles every in-memory adapter `aob-core` ships
//!   behind the same `Engine` entry points production code uses, so a
//!   compiled graph can be driven end to end without Postgres, Redis, or S3.
//! - [`MockNodeExecutor`]: a configurable `NodeExecutor` for exercising
//!   retry, failure, and fixed-response scenarios on `Task`/`Agent` nodes.

mod harness;
mod mock_executor;

pub use harness::GraphTestHarness;
pub use mock_executor::{MockHandler, MockNodeExecutor};

/// Convenience re-exports for integration tests.
pub mod prelude {
    pub use crate::{GraphTestHarness, MockNodeExecutor};
    pub use aob_core::{AllowAllOracle, DenyAllOracle, EngineConfig, RunState};
}
