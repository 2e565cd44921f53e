//! Execution engine: the `step()`/`drive()` state machine that turns a
//! compiled [`Graph`] plus a correlation id into a sequence of durable
//! events, gated by the policy oracle and bounded by session leasing.
//!
//! Human checkpoints suspend by simply stopping the drive loop and
//! appending a `human_awaited` event; [`Engine::resume`] is the only way
//! back in, an explicit caller-invoked entry point rather than a callback
//! registered mid-stack.

pub mod executor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

use crate::compiler::Graph;
use crate::config::EngineConfig;
use crate::decision::DecisionSink;
use crate::dlq::DlqStore;
use crate::error::{Error, Result};
use crate::lease::{Lease, LeaseManager};
use crate::model::{idempotency_key, DecisionRecord, Event, EventType, Json, NodeKind, WorkflowSpec};
use crate::oracle::PolicyOracle;
use crate::projection::Projection;
use crate::snapshot::{replay, RunState};
use crate::store::EventStore;

use executor::{NodeExecutionError, NodeRegistry};

const WORKFLOW_KEY_NODE: &str = "__workflow__";

/// Ties together the event store, lease manager, policy oracle, decision
/// sink, and dead-letter queue into the single entry point the engine
/// exposes for starting, driving, and resuming runs.
pub struct Engine<S, L, O, D, Q> {
    store: Arc<S>,
    lease_mgr: Arc<L>,
    oracle: Arc<O>,
    decision_sink: Arc<D>,
    dlq: Arc<Q>,
    config: EngineConfig,
    kicker: Option<Arc<Notify>>,
}

impl<S, L, O, D, Q> Engine<S, L, O, D, Q>
where
    S: EventStore,
    L: LeaseManager,
    O: PolicyOracle,
    D: DecisionSink,
    Q: DlqStore,
{
    /// Builds an engine over the given adapters.
    pub fn new(
        store: Arc<S>,
        lease_mgr: Arc<L>,
        oracle: Arc<O>,
        decision_sink: Arc<D>,
        dlq: Arc<Q>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            lease_mgr,
            oracle,
            decision_sink,
            dlq,
            config,
            kicker: None,
        }
    }

    /// Wires in the outbox publisher's kick handle so appends wake it
    /// immediately instead of waiting for the next poll tick.
    #[must_use]
    pub fn with_kicker(mut self, kicker: Arc<Notify>) -> Self {
        self.kicker = Some(kicker);
        self
    }

    /// Access to the dead-letter store, for CLI/admin tooling built on top
    /// of an `Engine`.
    #[must_use]
    pub fn dlq(&self) -> &Arc<Q> {
        &self.dlq
    }

    /// Access to the event store, for CLI/admin tooling.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Creates a run for `correlation_id` if one doesn't already exist.
    /// Idempotent: calling this twice for the same correlation id is a
    /// no-op on the second call.
    #[instrument(skip(self, bag))]
    pub async fn start(&self, correlation_id: &str, bag: HashMap<String, Json>) -> Result<()> {
        let next = self.store.next_sequence(correlation_id).await?;
        if next != 1 {
            return Ok(());
        }
        let key = idempotency_key(correlation_id, WORKFLOW_KEY_NODE, 0, 1);
        self.store
            .append(
                correlation_id,
                1,
                EventType::WorkflowStarted,
                json!({ "bag": bag }),
                key,
            )
            .await?;
        info!(correlation_id, "workflow started");
        Ok(())
    }

    /// Loads the current state for `correlation_id` by replaying from the
    /// latest snapshot (or from scratch) through the event log.
    pub async fn load_state(&self, graph: &Graph, correlation_id: &str) -> Result<RunState> {
        let snapshot = self.store.load_snapshot(correlation_id).await?;
        let base = match snapshot {
            Some(s) => RunState::from_snapshot(&s),
            None => {
                let events = self.store.load_events(correlation_id).await?;
                let bag = extract_initial_bag(&events);
                RunState::initial(graph, bag)
            }
        };
        let since = base.up_to_sequence;
        let events = self.store.load_events_since(correlation_id, since).await?;
        Ok(replay(graph, base, &events))
    }

    /// Drives a run forward until it blocks (on a human checkpoint), reaches
    /// a terminal event, or an unrecoverable error occurs. Acquires and
    /// releases the run's lease around the whole drive, renewing as needed.
    #[instrument(skip(self, graph, registry))]
    pub async fn drive(
        &self,
        graph: &Graph,
        correlation_id: &str,
        registry: &NodeRegistry,
    ) -> Result<RunState> {
        let mut lease = self.lease_mgr.acquire(correlation_id, self.config.lease_ttl).await?;
        let result = self.drive_inner(graph, correlation_id, registry, &mut lease).await;
        if let Err(release_err) = self.lease_mgr.release(&lease).await {
            warn!(correlation_id, error = %release_err, "failed to release lease");
        }
        result
    }

    async fn drive_inner(
        &self,
        graph: &Graph,
        correlation_id: &str,
        registry: &NodeRegistry,
        lease: &mut Lease,
    ) -> Result<RunState> {
        let mut state = self.load_state(graph, correlation_id).await?;
        let mut last_renew = Instant::now();

        loop {
            if state.terminal.is_some() {
                break;
            }

            if last_renew.elapsed() >= self.config.lease_renew_interval {
                *lease = self.lease_mgr.renew(lease, self.config.lease_ttl).await?;
                last_renew = Instant::now();
            }

            let Some(node_id) = state.ready_set.first().cloned() else {
                if state.pending_humans.is_empty() {
                    self.finalize(graph, correlation_id, &mut state).await?;
                }
                break;
            };

            self.execute_ready_node(graph, correlation_id, &node_id, &mut state, registry)
                .await?;
            self.maybe_snapshot(correlation_id, &state).await;
        }

        Ok(state)
    }

    /// Resumes a suspended `Human` checkpoint with an external decision, then
    /// returns the post-resume state. Callers should call [`Engine::drive`]
    /// again afterward to continue executing downstream nodes.
    #[instrument(skip(self, graph, value))]
    pub async fn resume(
        &self,
        graph: &Graph,
        correlation_id: &str,
        node_id: &str,
        approved: bool,
        value: Json,
    ) -> Result<RunState> {
        let lease = self.lease_mgr.acquire(correlation_id, self.config.lease_ttl).await?;
        let mut state = self.load_state(graph, correlation_id).await?;

        if !state.pending_humans.iter().any(|id| id == node_id) {
            let _ = self.lease_mgr.release(&lease).await;
            return Err(Error::NotPending(correlation_id.to_string()));
        }

        let (event_type, payload) = if approved {
            (
                EventType::HumanApproved,
                json!({ "node_id": node_id, "approval_value": value }),
            )
        } else {
            (
                EventType::HumanRejected,
                json!({ "node_id": node_id, "reason": value }),
            )
        };
        self.append(correlation_id, &mut state, graph, node_id, 1, event_type, payload)
            .await?;

        let _ = self.lease_mgr.release(&lease).await;
        Ok(state)
    }

    /// Forcibly fails a run that has not yet reached a terminal event.
    #[instrument(skip(self, graph))]
    pub async fn cancel(&self, graph: &Graph, correlation_id: &str, reason: &str) -> Result<RunState> {
        let lease = self.lease_mgr.acquire(correlation_id, self.config.lease_ttl).await?;
        let mut state = self.load_state(graph, correlation_id).await?;
        if state.terminal.is_none() {
            self.append(
                correlation_id,
                &mut state,
                graph,
                WORKFLOW_KEY_NODE,
                1,
                EventType::WorkflowFailed,
                json!({ "reason": reason, "cancelled": true }),
            )
            .await?;
        }
        let _ = self.lease_mgr.release(&lease).await;
        Ok(state)
    }

    async fn execute_ready_node(
        &self,
        graph: &Graph,
        correlation_id: &str,
        node_id: &str,
        state: &mut RunState,
        registry: &NodeRegistry,
    ) -> Result<()> {
        let node = graph
            .node(node_id)
            .cloned()
            .ok_or_else(|| Error::NodePermanentFailure {
                node_id: node_id.to_string(),
                reason: "node vanished from compiled graph".to_string(),
            })?;

        for edge in graph.incoming_edges(node_id) {
            let verdict = self
                .oracle
                .evaluate(correlation_id, &edge.from, &edge.to, &edge.policies, &state.run_context)
                .await?;
            if !verdict.allowed {
                self.record_decision(correlation_id, &node, false, edge.policies.clone(), Json::Null, None, 0)
                    .await;
                let payload = json!({
                    "node_id": node_id,
                    "from_node": edge.from,
                    "to_node": node_id,
                    "reason": verdict.reason,
                });
                self.append(correlation_id, state, graph, node_id, 1, EventType::PolicyDenied, payload)
                    .await?;
                self.append(
                    correlation_id,
                    state,
                    graph,
                    WORKFLOW_KEY_NODE,
                    1,
                    EventType::WorkflowFailed,
                    json!({ "reason": "policy_denied", "node_id": node_id }),
                )
                .await?;
                return Ok(());
            }
        }

        let projection = Projection::parse(&node.expr).map_err(|err| Error::NodePermanentFailure {
            node_id: node_id.to_string(),
            reason: err.to_string(),
        })?;
        let input = projection
            .evaluate(&state.run_context)
            .map_err(|err| Error::NodePermanentFailure {
                node_id: node_id.to_string(),
                reason: err.to_string(),
            })?;

        match node.kind {
            NodeKind::Human => {
                self.append(
                    correlation_id,
                    state,
                    graph,
                    node_id,
                    1,
                    EventType::HumanAwaited,
                    json!({ "node_id": node_id, "input": input }),
                )
                .await?;
            }
            NodeKind::Terminal => {
                self.append(
                    correlation_id,
                    state,
                    graph,
                    node_id,
                    1,
                    EventType::NodeCompleted,
                    json!({ "node_id": node_id, "output": input }),
                )
                .await?;
            }
            NodeKind::Task | NodeKind::Agent => {
                self.execute_task_or_agent(graph, correlation_id, &node, state, registry, input)
                    .await?;
            }
        }

        Ok(())
    }

    async fn execute_task_or_agent(
        &self,
        graph: &Graph,
        correlation_id: &str,
        node: &crate::model::Node,
        state: &mut RunState,
        registry: &NodeRegistry,
        input: Json,
    ) -> Result<()> {
        let attempt = state.attempts.get(&node.id).copied().unwrap_or(0) + 1;
        self.append(
            correlation_id,
            state,
            graph,
            &node.id,
            attempt,
            EventType::NodeStarted,
            json!({ "node_id": node.id, "attempt": attempt }),
        )
        .await?;

        let executor = registry.get(&node.id);
        let started = Instant::now();
        let outcome = match executor {
            Some(exec) => match tokio::time::timeout(node.attempt_timeout, exec.execute(node, input.clone())).await {
                Ok(result) => result,
                Err(_elapsed) => Err(NodeExecutionError::Transient(format!(
                    "attempt {attempt} exceeded timeout of {:?}",
                    node.attempt_timeout
                ))),
            },
            None => Err(NodeExecutionError::Permanent(format!(
                "no executor registered for node {}",
                node.id
            ))),
        };
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(output) => {
                self.record_decision(correlation_id, node, true, vec![], input, Some(output.clone()), latency_ms)
                    .await;
                self.append(
                    correlation_id,
                    state,
                    graph,
                    &node.id,
                    attempt,
                    EventType::NodeCompleted,
                    json!({ "node_id": node.id, "output": output }),
                )
                .await?;
            }
            Err(NodeExecutionError::Transient(reason)) => {
                self.record_decision(correlation_id, node, false, vec![], input, None, latency_ms)
                    .await;
                let permanent = attempt >= node.retry.max_attempts;
                self.append(
                    correlation_id,
                    state,
                    graph,
                    &node.id,
                    attempt,
                    EventType::NodeFailed,
                    json!({ "node_id": node.id, "permanent": permanent, "reason": reason }),
                )
                .await?;
                if !permanent {
                    let jitter_sample = rand::random::<f64>();
                    let delay = node.retry.backoff_delay(attempt, jitter_sample);
                    tokio::time::sleep(delay).await;
                }
            }
            Err(NodeExecutionError::Permanent(reason)) => {
                self.record_decision(correlation_id, node, false, vec![], input, None, latency_ms)
                    .await;
                self.append(
                    correlation_id,
                    state,
                    graph,
                    &node.id,
                    attempt,
                    EventType::NodeFailed,
                    json!({ "node_id": node.id, "permanent": true, "reason": reason }),
                )
                .await?;
            }
        }

        Ok(())
    }

    async fn finalize(&self, graph: &Graph, correlation_id: &str, state: &mut RunState) -> Result<()> {
        let terminal_reached = graph.node_ids().iter().any(|id| {
            graph
                .node(id)
                .is_some_and(|n| n.kind == NodeKind::Terminal)
                && state.completed.contains(id)
        });

        let (event_type, payload) = if terminal_reached && state.failed.is_empty() {
            (
                EventType::WorkflowCompleted,
                json!({ "outputs": state.run_context.outputs }),
            )
        } else {
            (
                EventType::WorkflowFailed,
                json!({ "failed_nodes": state.failed.iter().cloned().collect::<Vec<_>>() }),
            )
        };

        self.append(
            correlation_id,
            state,
            graph,
            WORKFLOW_KEY_NODE,
            1,
            event_type,
            payload,
        )
        .await?;
        Ok(())
    }

    async fn append(
        &self,
        correlation_id: &str,
        state: &mut RunState,
        graph: &Graph,
        node_id_for_key: &str,
        attempt: u32,
        event_type: EventType,
        payload: Json,
    ) -> Result<Event> {
        let seq = state.up_to_sequence + 1;
        let key = idempotency_key(correlation_id, node_id_for_key, seq, attempt);
        let event = self.store.append(correlation_id, seq, event_type, payload, key).await?;
        state.apply(graph, &event);
        if let Some(kicker) = &self.kicker {
            kicker.notify_one();
        }
        Ok(event)
    }

    async fn maybe_snapshot(&self, correlation_id: &str, state: &RunState) {
        if self.config.snapshot_every_n_events == 0 {
            return;
        }
        if state.up_to_sequence % self.config.snapshot_every_n_events != 0 {
            return;
        }
        if let Err(err) = self.store.put_snapshot(state.to_snapshot(correlation_id)).await {
            warn!(correlation_id, error = %err, "snapshot write failed");
        }
    }

    async fn record_decision(
        &self,
        correlation_id: &str,
        node: &crate::model::Node,
        allowed: bool,
        policies_applied: Vec<String>,
        input: Json,
        output: Option<Json>,
        latency_ms: u64,
    ) {
        let record = DecisionRecord {
            correlation_id: correlation_id.to_string(),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            node_kind: node.kind,
            allowed,
            policies_applied,
            input_snapshot: input,
            output_snapshot: output,
            external_calls: 0,
            cost_meters: HashMap::new(),
            latency_ms,
            created_at: chrono::Utc::now(),
        };
        let _ = self.decision_sink.record(record).await;
    }
}

fn extract_initial_bag(events: &[Event]) -> HashMap<String, Json> {
    events
        .iter()
        .find(|e| e.event_type == EventType::WorkflowStarted)
        .and_then(|e| e.payload.get("bag"))
        .and_then(|bag| serde_json::from_value(bag.clone()).ok())
        .unwrap_or_default()
}

/// Convenience bundle for compiling a spec and constructing its matching
/// [`NodeRegistry`] together; mostly useful to CLI/admin tooling.
pub fn compile_spec(spec: &WorkflowSpec) -> Result<Graph> {
    Ok(crate::compiler::compile(spec)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::MemoryDlqStore;
    use crate::decision::MemoryDecisionSink;
    use crate::lease::MemoryLeaseManager;
    use crate::model::{Edge, Node, RetryPolicy};
    use crate::oracle::{AllowAllOracle, DenyAllOracle, FailClosedOracle};
    use crate::store::MemoryEventStore;
    use executor::FnExecutor;
    use std::time::Duration;

    fn node(id: &str, kind: NodeKind, expr: &str) -> Node {
        Node {
            id: id.to_string(),
            kind,
            name: id.to_string(),
            expr: expr.to_string(),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                jitter: false,
                max_delay: Duration::from_millis(5),
            },
            approval_key: if kind == NodeKind::Human {
                Some("approve".to_string())
            } else {
                None
            },
            attempt_timeout: Duration::from_secs(30),
        }
    }

    fn linear_spec() -> WorkflowSpec {
        WorkflowSpec {
            id: "s1".to_string(),
            nodes: vec![
                node("a", NodeKind::Task, "bag.x"),
                node("z", NodeKind::Terminal, "a"),
            ],
            edges: vec![Edge {
                from: "a".into(),
                to: "z".into(),
                policies: vec![],
            }],
        }
    }

    type TestEngine = Engine<MemoryEventStore, MemoryLeaseManager, crate::oracle::AllowAllOracle, MemoryDecisionSink, MemoryDlqStore>;

    fn build_engine(oracle: crate::oracle::AllowAllOracle) -> TestEngine {
        Engine::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemoryLeaseManager::new()),
            Arc::new(oracle),
            Arc::new(MemoryDecisionSink::new()),
            Arc::new(MemoryDlqStore::new()),
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn drives_linear_workflow_to_completion() {
        let spec = linear_spec();
        let graph = compile_spec(&spec).unwrap();
        let engine = build_engine(AllowAllOracle);
        let mut bag = HashMap::new();
        bag.insert("x".to_string(), json!(42));
        engine.start("r1", bag).await.unwrap();

        let registry = NodeRegistry::new().with_executor(
            "a",
            Arc::new(FnExecutor(|_node, input| Ok(json!({ "doubled": input.get("x").and_then(|v| v.as_i64()).unwrap_or(0) * 2 })))),
        );

        let state = engine.drive(&graph, "r1", &registry).await.unwrap();
        assert_eq!(state.terminal, Some(EventType::WorkflowCompleted));
        assert_eq!(
            state.run_context.outputs.get("a").unwrap(),
            &json!({ "doubled": 84 })
        );
    }

    #[tokio::test]
    async fn policy_denial_fails_the_run() {
        // `a` must actually execute and complete so the denial is on the
        // *edge into* `z`, not a permanent failure of `a` itself — otherwise
        // the oracle is never consulted and the test passes for the wrong
        // reason.
        let spec = linear_spec();
        let graph = compile_spec(&spec).unwrap();
        let engine = Engine::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemoryLeaseManager::new()),
            Arc::new(FailClosedOracle::new(DenyAllOracle)),
            Arc::new(MemoryDecisionSink::new()),
            Arc::new(MemoryDlqStore::new()),
            EngineConfig::default(),
        );
        engine.start("r1", HashMap::new()).await.unwrap();
        let registry = NodeRegistry::new()
            .with_executor("a", Arc::new(FnExecutor(|_node, _input| Ok(json!({ "ok": true })))));
        let state = engine.drive(&graph, "r1", &registry).await.unwrap();

        assert!(state.completed.contains("a"), "node a should have run before the denied edge a->z");
        assert_eq!(state.terminal, Some(EventType::WorkflowFailed));
        assert!(!state.ready_set.contains(&"z".to_string()), "denied node must not remain ready forever");

        let events = engine.store().load_events("r1").await.unwrap();
        let failed = events
            .iter()
            .find(|e| e.event_type == EventType::WorkflowFailed)
            .expect("workflow_failed event");
        assert_eq!(failed.payload.get("reason").and_then(|v| v.as_str()), Some("policy_denied"));
        assert!(events.iter().any(|e| e.event_type == EventType::PolicyDenied));
    }

    #[tokio::test]
    async fn human_checkpoint_suspends_then_resumes() {
        let spec = WorkflowSpec {
            id: "s1".to_string(),
            nodes: vec![
                node("h", NodeKind::Human, "bag"),
                node("z", NodeKind::Terminal, "h"),
            ],
            edges: vec![Edge {
                from: "h".into(),
                to: "z".into(),
                policies: vec![],
            }],
        };
        let graph = compile_spec(&spec).unwrap();
        let engine = build_engine(AllowAllOracle);
        engine.start("r1", HashMap::new()).await.unwrap();

        let registry = NodeRegistry::new();
        let suspended = engine.drive(&graph, "r1", &registry).await.unwrap();
        assert_eq!(suspended.pending_humans, vec!["h".to_string()]);
        assert!(suspended.terminal.is_none());

        engine
            .resume(&graph, "r1", "h", true, json!({ "approved_by": "alice" }))
            .await
            .unwrap();
        let completed = engine.drive(&graph, "r1", &registry).await.unwrap();
        assert_eq!(completed.terminal, Some(EventType::WorkflowCompleted));
    }

    #[tokio::test]
    async fn transient_failure_exhausts_retries_then_fails_permanently() {
        let spec = linear_spec();
        let graph = compile_spec(&spec).unwrap();
        let engine = build_engine(AllowAllOracle);
        engine.start("r1", HashMap::new()).await.unwrap();
        let registry = NodeRegistry::new().with_executor("a", Arc::new(executor::AlwaysTransientExecutor));

        let state = engine.drive(&graph, "r1", &registry).await.unwrap();
        assert_eq!(state.terminal, Some(EventType::WorkflowFailed));
        assert!(state.failed.contains("a"));
        assert_eq!(*state.attempts.get("a").unwrap(), 3);
    }

    #[tokio::test]
    async fn attempt_timeout_is_treated_as_transient_failure() {
        let mut spec = linear_spec();
        spec.nodes[0].attempt_timeout = Duration::from_millis(5);
        spec.nodes[0].retry.max_attempts = 1;
        let graph = compile_spec(&spec).unwrap();
        let engine = build_engine(AllowAllOracle);
        engine.start("r1", HashMap::new()).await.unwrap();
        let registry = NodeRegistry::new().with_executor("a", Arc::new(executor::NeverRespondingExecutor));

        let state = engine.drive(&graph, "r1", &registry).await.unwrap();
        assert_eq!(state.terminal, Some(EventType::WorkflowFailed));
        assert!(state.failed.contains("a"));
    }

    #[tokio::test]
    async fn cancel_fails_an_in_flight_run() {
        let spec = WorkflowSpec {
            id: "s1".to_string(),
            nodes: vec![
                node("h", NodeKind::Human, "bag"),
                node("z", NodeKind::Terminal, "h"),
            ],
            edges: vec![Edge {
                from: "h".into(),
                to: "z".into(),
                policies: vec![],
            }],
        };
        let graph = compile_spec(&spec).unwrap();
        let engine = build_engine(AllowAllOracle);
        engine.start("r1", HashMap::new()).await.unwrap();
        let registry = NodeRegistry::new();
        engine.drive(&graph, "r1", &registry).await.unwrap();

        let state = engine.cancel(&graph, "r1", "operator abort").await.unwrap();
        assert_eq!(state.terminal, Some(EventType::WorkflowFailed));
    }
}
