//! Reducer and replay: folds a run's event log into a [`Snapshot`],
//! deterministically and independent of wall-clock time — replaying the same
//! prefix of events always yields byte-identical `run_context`, `ready_set`,
//! and `pending_humans`.

use std::collections::HashSet;

use crate::compiler::Graph;
use crate::model::{Event, EventType, NodeId, RunContext, Snapshot};

/// Accumulates a run's state by folding events in sequence order. Kept
/// separate from [`crate::engine`] so replay logic can be tested and
/// property-checked without spinning up the scheduler.
#[derive(Debug, Clone)]
pub struct RunState {
    /// Running context (bag + node outputs) as of the last folded event.
    pub run_context: RunContext,
    /// Node ids whose predecessors are all complete and which have not yet
    /// been started.
    pub ready_set: Vec<NodeId>,
    /// Node ids currently completed (including terminal).
    pub completed: HashSet<NodeId>,
    /// Human nodes awaiting external resume.
    pub pending_humans: Vec<NodeId>,
    /// Node ids that failed permanently.
    pub failed: HashSet<NodeId>,
    /// Attempts made so far per node.
    pub attempts: std::collections::HashMap<NodeId, u32>,
    /// Highest sequence number folded so far.
    pub up_to_sequence: u64,
    /// Set once a `workflow_completed` or `workflow_failed` event is folded.
    pub terminal: Option<EventType>,
}

impl RunState {
    /// The initial state for a fresh run: only the graph's start node is
    /// ready.
    #[must_use]
    pub fn initial(graph: &Graph, bag: std::collections::HashMap<String, crate::model::Json>) -> Self {
        Self {
            run_context: RunContext::with_bag(bag),
            ready_set: vec![graph.start_node().to_string()],
            completed: HashSet::new(),
            pending_humans: Vec::new(),
            failed: HashSet::new(),
            attempts: std::collections::HashMap::new(),
            up_to_sequence: 0,
            terminal: None,
        }
    }

    /// Reconstructs state from a snapshot, with no further events folded
    /// yet.
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            run_context: snapshot.run_context.clone(),
            ready_set: snapshot.ready_set.clone(),
            completed: snapshot.completed.clone(),
            pending_humans: snapshot.pending_humans.clone(),
            failed: snapshot.failed.clone(),
            attempts: snapshot.attempts.clone(),
            up_to_sequence: snapshot.up_to_sequence,
            terminal: None,
        }
    }

    /// Folds one event into the state. Events must be applied in ascending
    /// `sequence_number` order; applying an event at or below
    /// `up_to_sequence` is a no-op, making replay of an overlapping event
    /// range safe.
    pub fn apply(&mut self, graph: &Graph, event: &Event) {
        if event.sequence_number <= self.up_to_sequence {
            return;
        }
        self.up_to_sequence = event.sequence_number;

        match event.event_type {
            EventType::WorkflowStarted => {}
            EventType::NodeStarted => {
                if let Some(node_id) = event.payload.get("node_id").and_then(|v| v.as_str()) {
                    self.ready_set.retain(|id| id != node_id);
                    *self.attempts.entry(node_id.to_string()).or_insert(0) += 1;
                }
            }
            EventType::NodeCompleted => {
                if let Some(node_id) = event
                    .payload
                    .get("node_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                {
                    if let Some(output) = event.payload.get("output") {
                        self.run_context.set_output(&node_id, output.clone());
                    }
                    self.completed.insert(node_id.clone());
                    self.advance_ready_set(graph, &node_id);
                }
            }
            EventType::NodeFailed => {
                if let Some(node_id) = event.payload.get("node_id").and_then(|v| v.as_str()) {
                    let permanent = event
                        .payload
                        .get("permanent")
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false);
                    if permanent {
                        self.failed.insert(node_id.to_string());
                    } else {
                        self.ready_set.push(node_id.to_string());
                    }
                }
            }
            EventType::PolicyDenied => {
                if let Some(node_id) = event.payload.get("to_node").and_then(|v| v.as_str()) {
                    self.ready_set.retain(|id| id != node_id);
                    self.failed.insert(node_id.to_string());
                }
            }
            EventType::HumanAwaited => {
                if let Some(node_id) = event.payload.get("node_id").and_then(|v| v.as_str()) {
                    self.ready_set.retain(|id| id != node_id);
                    if !self.pending_humans.iter().any(|id| id == node_id) {
                        self.pending_humans.push(node_id.to_string());
                    }
                }
            }
            EventType::HumanApproved => {
                if let Some(node_id) = event
                    .payload
                    .get("node_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                {
                    self.pending_humans.retain(|id| id != &node_id);
                    if let Some(value) = event.payload.get("approval_value") {
                        self.run_context.set_output(&node_id, value.clone());
                    }
                    self.completed.insert(node_id.clone());
                    self.advance_ready_set(graph, &node_id);
                }
            }
            EventType::HumanRejected => {
                if let Some(node_id) = event.payload.get("node_id").and_then(|v| v.as_str()) {
                    self.pending_humans.retain(|id| id != node_id);
                    self.failed.insert(node_id.to_string());
                }
            }
            EventType::WorkflowCompleted => {
                self.terminal = Some(EventType::WorkflowCompleted);
            }
            EventType::WorkflowFailed => {
                self.terminal = Some(EventType::WorkflowFailed);
            }
            EventType::SnapshotCreated => {}
        }
    }

    fn advance_ready_set(&mut self, graph: &Graph, just_completed: &str) {
        for successor in graph.successors(just_completed) {
            let already_known = self.ready_set.iter().any(|id| id == successor)
                || self.completed.contains(successor)
                || self.pending_humans.iter().any(|id| id == successor);
            if already_known {
                continue;
            }
            if graph.predecessors_satisfied(successor, &self.completed) {
                self.ready_set.push(successor.clone());
            }
        }
    }

    /// Materializes a durable [`Snapshot`] from the current state.
    #[must_use]
    pub fn to_snapshot(&self, correlation_id: &str) -> Snapshot {
        Snapshot {
            correlation_id: correlation_id.to_string(),
            up_to_sequence: self.up_to_sequence,
            run_context: self.run_context.clone(),
            ready_set: self.ready_set.clone(),
            pending_humans: self.pending_humans.clone(),
            completed: self.completed.clone(),
            failed: self.failed.clone(),
            attempts: self.attempts.clone(),
            created_at: chrono::Utc::now(),
        }
    }
}

/// Folds an ordered slice of events (as would be loaded from the store,
/// optionally preceded by a snapshot) into a [`RunState`]. Used by the
/// engine on lease acquisition and by replay-based tests/tools.
#[must_use]
pub fn replay(graph: &Graph, base: RunState, events: &[Event]) -> RunState {
    let mut state = base;
    for event in events {
        state.apply(graph, event);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::model::{Edge, Node, NodeKind, RetryPolicy, WorkflowSpec};
    use serde_json::json;
    use std::time::Duration;

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
                max_delay: Duration::from_millis(10),
            },
            approval_key: if kind == NodeKind::Human {
                Some("approve".to_string())
            } else {
                None
            },
            attempt_timeout: Duration::from_secs(30),
        }
    }

    fn diamond() -> Graph {
        let spec = WorkflowSpec {
            id: "s1".to_string(),
            nodes: vec![
                node("a", NodeKind::Task),
                node("b", NodeKind::Task),
                node("c", NodeKind::Task),
                node("d", NodeKind::Terminal),
            ],
            edges: vec![
                Edge {
                    from: "a".into(),
                    to: "b".into(),
                    policies: vec![],
                },
                Edge {
                    from: "a".into(),
                    to: "c".into(),
                    policies: vec![],
                },
                Edge {
                    from: "b".into(),
                    to: "d".into(),
                    policies: vec![],
                },
                Edge {
                    from: "c".into(),
                    to: "d".into(),
                    policies: vec![],
                },
            ],
        };
        compile(&spec).unwrap()
    }

    fn event(seq: u64, event_type: EventType, payload: serde_json::Value) -> Event {
        Event {
            id: format!("e{seq}"),
            correlation_id: "r1".to_string(),
            sequence_number: seq,
            event_type,
            payload,
            idempotency_key: format!("k{seq}"),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn initial_state_readies_start_node() {
        let graph = diamond();
        let state = RunState::initial(&graph, std::collections::HashMap::new());
        assert_eq!(state.ready_set, vec!["a".to_string()]);
    }

    #[test]
    fn join_node_waits_for_both_branches() {
        let graph = diamond();
        let mut state = RunState::initial(&graph, std::collections::HashMap::new());
        state.apply(&graph, &event(1, EventType::NodeStarted, json!({"node_id": "a"})));
        state.apply(
            &graph,
            &event(2, EventType::NodeCompleted, json!({"node_id": "a", "output": 1})),
        );
        assert!(state.ready_set.contains(&"b".to_string()));
        assert!(state.ready_set.contains(&"c".to_string()));

        state.apply(&graph, &event(3, EventType::NodeStarted, json!({"node_id": "b"})));
        state.apply(
            &graph,
            &event(4, EventType::NodeCompleted, json!({"node_id": "b", "output": 2})),
        );
        assert!(!state.ready_set.contains(&"d".to_string()));

        state.apply(&graph, &event(5, EventType::NodeStarted, json!({"node_id": "c"})));
        state.apply(
            &graph,
            &event(6, EventType::NodeCompleted, json!({"node_id": "c", "output": 3})),
        );
        assert!(state.ready_set.contains(&"d".to_string()));
    }

    #[test]
    fn replay_is_deterministic_and_idempotent_on_overlap() {
        let graph = diamond();
        let events = vec![
            event(1, EventType::NodeStarted, json!({"node_id": "a"})),
            event(2, EventType::NodeCompleted, json!({"node_id": "a", "output": 1})),
        ];
        let state_a = replay(&graph, RunState::initial(&graph, Default::default()), &events);
        let state_b = replay(&graph, RunState::initial(&graph, Default::default()), &events);
        assert_eq!(state_a.up_to_sequence, state_b.up_to_sequence);
        assert_eq!(state_a.ready_set, state_b.ready_set);

        // Replaying an overlapping prefix again must not double-apply.
        let state_c = replay(&graph, state_a.clone(), &events);
        assert_eq!(state_a.ready_set, state_c.ready_set);
        assert_eq!(state_a.completed, state_c.completed);
    }

    #[test]
    fn snapshot_then_resume_matches_full_replay() {
        let graph = diamond();
        let events = vec![
            event(1, EventType::NodeStarted, json!({"node_id": "a"})),
            event(2, EventType::NodeCompleted, json!({"node_id": "a", "output": 1})),
            event(3, EventType::NodeStarted, json!({"node_id": "b"})),
            event(4, EventType::NodeCompleted, json!({"node_id": "b", "output": 2})),
        ];
        let full = replay(&graph, RunState::initial(&graph, Default::default()), &events);

        let snapshot = replay(
            &graph,
            RunState::initial(&graph, Default::default()),
            &events[..2],
        )
        .to_snapshot("r1");
        let resumed = replay(&graph, RunState::from_snapshot(&snapshot), &events[2..]);

        assert_eq!(full.ready_set, resumed.ready_set);
        assert_eq!(full.completed, resumed.completed);
    }

    #[test]
    fn human_rejection_marks_failed_not_completed() {
        let mut spec_nodes = vec![node("h", NodeKind::Human)];
        spec_nodes.push(node("z", NodeKind::Terminal));
        let spec = WorkflowSpec {
            id: "s1".to_string(),
            nodes: spec_nodes,
            edges: vec![Edge {
                from: "h".into(),
                to: "z".into(),
                policies: vec![],
            }],
        };
        let graph = compile(&spec).unwrap();
        let mut state = RunState::initial(&graph, Default::default());
        state.apply(&graph, &event(1, EventType::HumanAwaited, json!({"node_id": "h"})));
        assert_eq!(state.pending_humans, vec!["h".to_string()]);
        state.apply(&graph, &event(2, EventType::HumanRejected, json!({"node_id": "h"})));
        assert!(state.pending_humans.is_empty());
        assert!(state.failed.contains("h"));
        assert!(!state.ready_set.contains(&"z".to_string()));
    }
}
