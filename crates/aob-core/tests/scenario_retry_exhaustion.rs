//! S4 — retry exhaustion: task `A` with `retry{max_attempts=3, base_delay=10ms,
//! jitter=false}` whose behavior throws a transient error twice then
//! succeeds. Verifies the attempt-numbered `node_started`/`node_failed`
//! sequence and that the measured inter-retry delay roughly tracks the
//! exponential backoff schedule.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aob_core::engine::executor::{FnExecutor, NodeExecutionError};
use aob_core::{
    compile, AllowAllOracle, Edge, Engine, EngineConfig, EventStore, EventType, MemoryDecisionSink,
    MemoryDlqStore, MemoryEventStore, MemoryLeaseManager, Node, NodeKind, NodeRegistry, RetryPolicy,
    WorkflowSpec,
};
use serde_json::json;

fn node(id: &str, kind: NodeKind, expr: &str, retry: RetryPolicy) -> Node {
    Node {
        id: id.to_string(),
        kind,
        name: id.to_string(),
        expr: expr.to_string(),
        retry,
        approval_key: None,
        attempt_timeout: Duration::from_secs(30),
    }
}

#[tokio::test]
async fn transient_failures_retry_then_succeed_within_budget() {
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        jitter: false,
        max_delay: Duration::from_millis(1000),
    };
    let spec = WorkflowSpec {
        id: "s4".to_string(),
        nodes: vec![
            node("a", NodeKind::Task, "bag", retry),
            node("z", NodeKind::Terminal, "a", RetryPolicy::default()),
        ],
        edges: vec![Edge { from: "a".into(), to: "z".into(), policies: vec![] }],
    };
    let graph = compile(&spec).unwrap();
    let engine = Engine::new(
        Arc::new(MemoryEventStore::new()),
        Arc::new(MemoryLeaseManager::new()),
        Arc::new(AllowAllOracle),
        Arc::new(MemoryDecisionSink::new()),
        Arc::new(MemoryDlqStore::new()),
        EngineConfig::default(),
    );
    engine.start("r1", HashMap::new()).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let calls_for_exec = Arc::clone(&calls);
    let executor = FnExecutor(move |_node: &_, _input| {
        let attempt = calls_for_exec.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < 3 {
            Err(NodeExecutionError::Transient("simulated transient failure".to_string()))
        } else {
            Ok(json!({ "attempt": attempt }))
        }
    });
    let registry = NodeRegistry::new().with_executor("a", Arc::new(executor));

    let started = Instant::now();
    let state = engine.drive(&graph, "r1", &registry).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(state.terminal, Some(EventType::WorkflowCompleted));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*state.attempts.get("a").unwrap(), 3);

    // Two backoff sleeps of ~10ms and ~20ms (base_delay * 2^(attempt-1)),
    // no jitter: the whole run should take noticeably longer than zero
    // but nowhere near the exponential-without-cap blowup a backoff bug
    // would produce.
    assert!(elapsed >= Duration::from_millis(25), "expected both backoff sleeps to elapse, got {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "retry backoff took far longer than expected: {elapsed:?}");

    let events = engine.store().load_events("r1").await.unwrap();
    let event_types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        event_types,
        vec![
            EventType::WorkflowStarted,
            EventType::NodeStarted,
            EventType::NodeFailed,
            EventType::NodeStarted,
            EventType::NodeFailed,
            EventType::NodeStarted,
            EventType::NodeCompleted,
            EventType::NodeCompleted, // terminal z
            EventType::WorkflowCompleted,
        ]
    );

    let attempts: Vec<u64> = events
        .iter()
        .filter(|e| e.event_type == EventType::NodeStarted)
        .map(|e| e.payload.get("attempt").and_then(|v| v.as_u64()).unwrap())
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    let failures: Vec<bool> = events
        .iter()
        .filter(|e| e.event_type == EventType::NodeFailed)
        .map(|e| e.payload.get("permanent").and_then(|v| v.as_bool()).unwrap())
        .collect();
    assert_eq!(failures, vec![false, false]);
}

#[tokio::test]
async fn exhausting_all_attempts_fails_the_run_permanently() {
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        jitter: false,
        max_delay: Duration::from_millis(5),
    };
    let spec = WorkflowSpec {
        id: "s4b".to_string(),
        nodes: vec![
            node("a", NodeKind::Task, "bag", retry),
            node("z", NodeKind::Terminal, "a", RetryPolicy::default()),
        ],
        edges: vec![Edge { from: "a".into(), to: "z".into(), policies: vec![] }],
    };
    let graph = compile(&spec).unwrap();
    let engine = Engine::new(
        Arc::new(MemoryEventStore::new()),
        Arc::new(MemoryLeaseManager::new()),
        Arc::new(AllowAllOracle),
        Arc::new(MemoryDecisionSink::new()),
        Arc::new(MemoryDlqStore::new()),
        EngineConfig::default(),
    );
    engine.start("r1", HashMap::new()).await.unwrap();

    let registry = NodeRegistry::new().with_executor("a", Arc::new(aob_core::engine::executor::AlwaysTransientExecutor));
    let state = engine.drive(&graph, "r1", &registry).await.unwrap();

    assert_eq!(state.terminal, Some(EventType::WorkflowFailed));
    assert!(state.failed.contains("a"));
    assert_eq!(*state.attempts.get("a").unwrap(), 3);

    let events = engine.store().load_events("r1").await.unwrap();
    let last_failure = events
        .iter()
        .filter(|e| e.event_type == EventType::NodeFailed)
        .last()
        .unwrap();
    assert_eq!(last_failure.payload.get("permanent").and_then(|v| v.as_bool()), Some(true));
}
