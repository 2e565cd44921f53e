//! S2 — human checkpoint: `A:task -> H:human(approval_key="ok") -> Z:terminal`,
//! the edge `H -> Z` tagged `require_approval`. Covers both the approve and
//! reject branches the specification calls out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aob_core::engine::executor::FnExecutor;
use aob_core::{
    compile, AllowAllOracle, Edge, Engine, EngineConfig, EventStore, EventType, MemoryDecisionSink,
    MemoryDlqStore, MemoryEventStore, MemoryLeaseManager, Node, NodeKind, NodeRegistry, RetryPolicy,
    WorkflowSpec,
};
use serde_json::json;

fn node(id: &str, kind: NodeKind, expr: &str, approval_key: Option<&str>) -> Node {
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
        approval_key: approval_key.map(str::to_string),
        attempt_timeout: Duration::from_secs(30),
    }
}

fn spec() -> WorkflowSpec {
    WorkflowSpec {
        id: "s2".to_string(),
        nodes: vec![
            node("a", NodeKind::Task, "bag", None),
            node("h", NodeKind::Human, "a", Some("ok")),
            node("z", NodeKind::Terminal, "h", None),
        ],
        edges: vec![
            Edge { from: "a".into(), to: "h".into(), policies: vec![] },
            Edge {
                from: "h".into(),
                to: "z".into(),
                policies: vec!["require_approval".to_string()],
            },
        ],
    }
}

fn build_engine() -> Engine<MemoryEventStore, MemoryLeaseManager, AllowAllOracle, MemoryDecisionSink, MemoryDlqStore> {
    Engine::new(
        Arc::new(MemoryEventStore::new()),
        Arc::new(MemoryLeaseManager::new()),
        Arc::new(AllowAllOracle),
        Arc::new(MemoryDecisionSink::new()),
        Arc::new(MemoryDlqStore::new()),
        EngineConfig::default(),
    )
}

#[tokio::test]
async fn suspends_on_human_awaited_then_completes_on_approval() {
    let graph = compile(&spec()).unwrap();
    let engine = build_engine();
    engine.start("r1", HashMap::new()).await.unwrap();

    let registry = NodeRegistry::new().with_executor("a", Arc::new(FnExecutor(|_n, _i| Ok(json!({ "ran": true })))));

    let suspended = engine.drive(&graph, "r1", &registry).await.unwrap();
    assert_eq!(suspended.pending_humans, vec!["h".to_string()]);
    assert!(suspended.terminal.is_none());

    let events_before = engine.store().load_events("r1").await.unwrap();
    assert_eq!(
        events_before.iter().map(|e| e.event_type).collect::<Vec<_>>(),
        vec![
            EventType::WorkflowStarted,
            EventType::NodeStarted,
            EventType::NodeCompleted,
            EventType::HumanAwaited,
        ]
    );

    engine.resume(&graph, "r1", "h", true, json!({ "approved_by": "alice" })).await.unwrap();
    let completed = engine.drive(&graph, "r1", &registry).await.unwrap();
    assert_eq!(completed.terminal, Some(EventType::WorkflowCompleted));

    let events_after = engine.store().load_events("r1").await.unwrap();
    assert!(events_after.iter().any(|e| e.event_type == EventType::HumanApproved));
}

#[tokio::test]
async fn rejection_fails_the_run() {
    let graph = compile(&spec()).unwrap();
    let engine = build_engine();
    engine.start("r2", HashMap::new()).await.unwrap();

    let registry = NodeRegistry::new().with_executor("a", Arc::new(FnExecutor(|_n, _i| Ok(json!({ "ran": true })))));
    engine.drive(&graph, "r2", &registry).await.unwrap();

    engine.resume(&graph, "r2", "h", false, json!("not today")).await.unwrap();
    let state = engine.drive(&graph, "r2", &registry).await.unwrap();

    assert_eq!(state.terminal, Some(EventType::WorkflowFailed));
    let events = engine.store().load_events("r2").await.unwrap();
    assert!(events.iter().any(|e| e.event_type == EventType::HumanRejected));
    assert!(!events.iter().any(|e| e.event_type == EventType::HumanApproved));
}
