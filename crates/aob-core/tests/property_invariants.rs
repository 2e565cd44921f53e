#![allow(clippy::unwrap_used)]
//! Property-based tests for the invariants the event store and replay
//! reducer must uphold for any sequence of operations, not just the
//! hand-picked scenarios in the other `tests/` files.
//!
//! - I1: dense, gapless per-run sequencing
//! - I2: idempotent append (same idempotency key never appends twice)
//! - I3: replay determinism (from-scratch replay matches from-snapshot replay)
//! - I4: terminality (no event is ever appended after a workflow-terminal event)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aob_core::engine::executor::FnExecutor;
use aob_core::snapshot::{replay, RunState};
use aob_core::{
    compile, idempotency_key, AllowAllOracle, Edge, Engine, EngineConfig, EventStore, EventType,
    MemoryDecisionSink, MemoryDlqStore, MemoryEventStore, MemoryLeaseManager, Node, NodeKind,
    NodeRegistry, RetryPolicy, WorkflowSpec,
};
use proptest::prelude::*;
use serde_json::json;

fn node(id: &str, kind: NodeKind) -> Node {
    Node {
        id: id.to_string(),
        kind,
        name: id.to_string(),
        expr: "bag".to_string(),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            jitter: false,
            max_delay: Duration::from_millis(5),
        },
        approval_key: None,
        attempt_timeout: Duration::from_secs(30),
    }
}

/// A linear chain `n0 -> n1 -> ... -> n(k-1) -> terminal` of `k` task nodes.
fn chain_spec(task_count: usize) -> WorkflowSpec {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    for i in 0..task_count {
        nodes.push(node(&format!("n{i}"), NodeKind::Task));
    }
    nodes.push(node("z", NodeKind::Terminal));
    for i in 0..task_count {
        let to = if i + 1 < task_count { format!("n{}", i + 1) } else { "z".to_string() };
        edges.push(Edge { from: format!("n{i}"), to, policies: vec![] });
    }
    WorkflowSpec { id: "chain".to_string(), nodes, edges }
}

fn chain_registry(task_count: usize) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    for i in 0..task_count {
        registry = registry.with_executor(
            format!("n{i}"),
            Arc::new(FnExecutor(|_n, _i| Ok(json!({ "ok": true })))),
        );
    }
    registry
}

fn arb_task_count() -> impl Strategy<Value = usize> {
    1usize..8
}

proptest! {
    /// I1: folding a driven run's full event log assigns sequence numbers
    /// 1..N with no gaps or repeats, for any chain length.
    #[test]
    fn prop_dense_sequencing_holds_for_any_chain_length(task_count in arb_task_count()) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let spec = chain_spec(task_count);
            let graph = compile(&spec).unwrap();
            let engine = Engine::new(
                Arc::new(MemoryEventStore::new()),
                Arc::new(MemoryLeaseManager::new()),
                Arc::new(AllowAllOracle),
                Arc::new(MemoryDecisionSink::new()),
                Arc::new(MemoryDlqStore::new()),
                EngineConfig::default(),
            );
            engine.start("r", HashMap::new()).await.unwrap();
            let registry = chain_registry(task_count);
            let state = engine.drive(&graph, "r", &registry).await.unwrap();
            prop_assert_eq!(state.terminal, Some(EventType::WorkflowCompleted));

            let events = engine.store().load_events("r").await.unwrap();
            prop_assert!(!events.is_empty());
            for (i, event) in events.iter().enumerate() {
                prop_assert_eq!(event.sequence_number, (i + 1) as u64);
            }
            Ok(())
        })?;
    }

    /// I2: appending the same `(correlation_id, idempotency_key)` twice
    /// never creates a second event, regardless of how many times it's
    /// retried — the store returns the original event both times.
    #[test]
    fn prop_append_with_same_idempotency_key_is_a_noop(replays in 1usize..5) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let store = MemoryEventStore::new();
            let key = idempotency_key("r", "n0", 0, 1);

            let first = store
                .append("r", 1, EventType::WorkflowStarted, json!({ "bag": {} }), key.clone())
                .await
                .unwrap();

            for _ in 0..replays {
                let repeat = store
                    .append("r", 1, EventType::WorkflowStarted, json!({ "bag": {} }), key.clone())
                    .await
                    .unwrap();
                prop_assert_eq!(repeat.id, first.id.clone());
                prop_assert_eq!(repeat.sequence_number, first.sequence_number);
            }

            let events = store.load_events("r").await.unwrap();
            prop_assert_eq!(events.len(), 1);
            Ok(())
        })?;
    }

    /// I3: replaying the entire event log from scratch produces the same
    /// logical state as replaying only the tail past the most recent
    /// snapshot, for chains of varying length and snapshot cadence.
    #[test]
    fn prop_replay_from_snapshot_matches_replay_from_scratch(
        task_count in arb_task_count(),
        snapshot_every in 1u64..4,
    ) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let spec = chain_spec(task_count);
            let graph = compile(&spec).unwrap();
            let store = Arc::new(MemoryEventStore::new());
            let config = EngineConfig::default().with_snapshot_every_n_events(snapshot_every);
            let engine = Engine::new(
                Arc::clone(&store),
                Arc::new(MemoryLeaseManager::new()),
                Arc::new(AllowAllOracle),
                Arc::new(MemoryDecisionSink::new()),
                Arc::new(MemoryDlqStore::new()),
                config,
            );
            engine.start("r", HashMap::new()).await.unwrap();
            let registry = chain_registry(task_count);
            let final_state = engine.drive(&graph, "r", &registry).await.unwrap();
            prop_assert_eq!(final_state.terminal, Some(EventType::WorkflowCompleted));

            let all_events = store.load_events("r").await.unwrap();
            let from_scratch = replay(&graph, RunState::initial(&graph, HashMap::new()), &all_events);

            let from_snapshot = match store.load_snapshot("r").await.unwrap() {
                Some(snapshot) => {
                    let tail = store.load_events_since("r", snapshot.up_to_sequence).await.unwrap();
                    replay(&graph, RunState::from_snapshot(&snapshot), &tail)
                }
                None => from_scratch.clone(),
            };

            prop_assert_eq!(from_scratch.up_to_sequence, from_snapshot.up_to_sequence);
            prop_assert_eq!(&from_scratch.completed, &from_snapshot.completed);
            prop_assert_eq!(&from_scratch.failed, &from_snapshot.failed);
            prop_assert_eq!(from_scratch.terminal, from_snapshot.terminal);
            prop_assert_eq!(&from_scratch.attempts, &from_snapshot.attempts);

            let mut ready_a = from_scratch.ready_set.clone();
            let mut ready_b = from_snapshot.ready_set.clone();
            ready_a.sort();
            ready_b.sort();
            prop_assert_eq!(ready_a, ready_b);
            Ok(())
        })?;
    }

    /// I4: once a workflow-terminal event (`workflow_completed` or
    /// `workflow_failed`) is the last event in the log, driving the same
    /// run again never appends anything past it.
    #[test]
    fn prop_nothing_is_appended_after_a_terminal_event(task_count in arb_task_count()) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let spec = chain_spec(task_count);
            let graph = compile(&spec).unwrap();
            let engine = Engine::new(
                Arc::new(MemoryEventStore::new()),
                Arc::new(MemoryLeaseManager::new()),
                Arc::new(AllowAllOracle),
                Arc::new(MemoryDecisionSink::new()),
                Arc::new(MemoryDlqStore::new()),
                EngineConfig::default(),
            );
            engine.start("r", HashMap::new()).await.unwrap();
            let registry = chain_registry(task_count);
            let state = engine.drive(&graph, "r", &registry).await.unwrap();
            prop_assert_eq!(state.terminal, Some(EventType::WorkflowCompleted));

            let events_at_terminal = engine.store().load_events("r").await.unwrap();
            let count_at_terminal = events_at_terminal.len();
            prop_assert_eq!(events_at_terminal.last().unwrap().event_type, EventType::WorkflowCompleted);

            // Driving an already-terminal run must be a pure no-op on the log.
            let replayed_state = engine.drive(&graph, "r", &registry).await.unwrap();
            prop_assert_eq!(replayed_state.terminal, Some(EventType::WorkflowCompleted));

            let events_after = engine.store().load_events("r").await.unwrap();
            prop_assert_eq!(events_after.len(), count_at_terminal);
            Ok(())
        })?;
    }
}
