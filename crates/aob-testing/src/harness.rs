//! `GraphTestHarness`: bundles every in-memory adapter `aob-core` ships
//! (store, lease manager, decision sink, DLQ) behind the same `Engine`
//! entry points production code uses, so integration tests drive a real
//! compiled graph without standing up Postgres, Redis, or S3.

use std::collections::HashMap;
use std::sync::Arc;

use aob_core::{
    compile, AllowAllOracle, CompileError, Engine, EngineConfig, Graph, Json, MemoryDecisionSink,
    MemoryDlqStore, MemoryEventStore, MemoryLeaseManager, NodeRegistry, PolicyOracle, RunState,
    WorkflowSpec,
};

/// A fully in-memory engine over a single compiled graph, for integration
/// tests. Generic over the oracle so tests can swap in a `FnOracle` or
/// `DenyAllOracle` to exercise policy-gated paths.
pub struct GraphTestHarness<O: PolicyOracle = AllowAllOracle> {
    graph: Graph,
    engine: Engine<MemoryEventStore, MemoryLeaseManager, O, MemoryDecisionSink, MemoryDlqStore>,
    registry: NodeRegistry,
}

impl GraphTestHarness<AllowAllOracle> {
    /// Compiles `spec` and builds a harness with an allow-everything oracle
    /// and default engine config.
    pub fn new(spec: &WorkflowSpec) -> Result<Self, CompileError> {
        Self::with_oracle_and_config(spec, AllowAllOracle, EngineConfig::default())
    }

    /// Like [`Self::new`], but with a custom engine config (e.g. a tighter
    /// snapshot cadence, to exercise the snapshot/replay path in a short
    /// test run).
    pub fn new_with_config(spec: &WorkflowSpec, config: EngineConfig) -> Result<Self, CompileError> {
        Self::with_oracle_and_config(spec, AllowAllOracle, config)
    }
}

impl<O: PolicyOracle> GraphTestHarness<O> {
    /// Compiles `spec` and builds a harness over the given oracle and
    /// default engine config.
    pub fn with_oracle(spec: &WorkflowSpec, oracle: O) -> Result<Self, CompileError> {
        Self::with_oracle_and_config(spec, oracle, EngineConfig::default())
    }

    /// Compiles `spec` and builds a harness over the given oracle and
    /// engine config.
    pub fn with_oracle_and_config(spec: &WorkflowSpec, oracle: O, config: EngineConfig) -> Result<Self, CompileError> {
        let graph = compile(spec)?;
        let engine = Engine::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemoryLeaseManager::new()),
            Arc::new(oracle),
            Arc::new(MemoryDecisionSink::new()),
            Arc::new(MemoryDlqStore::new()),
            config,
        );
        Ok(Self {
            graph,
            engine,
            registry: NodeRegistry::new(),
        })
    }

    /// Binds `executor` to `node_id`.
    #[must_use]
    pub fn with_executor(mut self, node_id: impl Into<String>, executor: Arc<dyn aob_core::NodeExecutor>) -> Self {
        self.registry = self.registry.clone().with_executor(node_id, executor);
        self
    }

    /// The compiled graph under test.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Starts a run and drives it until it blocks or terminates.
    pub async fn start_and_drive(&self, correlation_id: &str, bag: HashMap<String, Json>) -> aob_core::Result<RunState> {
        self.engine.start(correlation_id, bag).await?;
        self.engine.drive(&self.graph, correlation_id, &self.registry).await
    }

    /// Resumes a suspended `Human` checkpoint and drives the run forward.
    pub async fn resume_and_drive(
        &self,
        correlation_id: &str,
        node_id: &str,
        approved: bool,
        value: Json,
    ) -> aob_core::Result<RunState> {
        self.engine.resume(&self.graph, correlation_id, node_id, approved, value).await?;
        self.engine.drive(&self.graph, correlation_id, &self.registry).await
    }

    /// Loads current state without driving further.
    pub async fn load_state(&self, correlation_id: &str) -> aob_core::Result<RunState> {
        self.engine.load_state(&self.graph, correlation_id).await
    }

    /// The full durable event log for a run.
    pub async fn events(&self, correlation_id: &str) -> aob_core::Result<Vec<aob_core::Event>> {
        use aob_core::EventStore;
        self.engine.store().load_events(correlation_id).await
    }

    /// Asserts that replaying from scratch produces the same state as
    /// replaying from the latest snapshot. Panics with a descriptive
    /// message on mismatch.
    pub async fn assert_replay_matches_snapshot(&self, correlation_id: &str) {
        use aob_core::EventStore;
        let store = self.engine.store();

        let all_events = store.load_events(correlation_id).await.expect("load events");
        let from_scratch = aob_core::replay(&self.graph, RunState::initial(&self.graph, HashMap::new()), &all_events);

        let snapshot = store.load_snapshot(correlation_id).await.expect("load snapshot");
        let from_snapshot = match snapshot {
            Some(s) => {
                let since = s.up_to_sequence;
                let base = RunState::from_snapshot(&s);
                let tail = store.load_events_since(correlation_id, since).await.expect("load tail events");
                aob_core::replay(&self.graph, base, &tail)
            }
            None => from_scratch.clone(),
        };

        assert_eq!(
            from_scratch.run_context.outputs, from_snapshot.run_context.outputs,
            "replay-from-zero and replay-from-snapshot diverged on run_context.outputs for {correlation_id}"
        );
        assert_eq!(
            from_scratch.completed, from_snapshot.completed,
            "replay-from-zero and replay-from-snapshot diverged on completed set for {correlation_id}"
        );
        assert_eq!(
            from_scratch.terminal, from_snapshot.terminal,
            "replay-from-zero and replay-from-snapshot diverged on terminal state for {correlation_id}"
        );
    }
}
