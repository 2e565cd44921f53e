//! Stdin/stdout resolution channel for `Human` checkpoints.
//!
//! A `Human` node suspends a run until an external caller supplies a typed
//! approval value; the core only defines that contract; something outside
//! the engine has to actually collect the value. This crate is one such
//! collector: a stdin-prompt/read-line loop wired onto the engine's
//! `pending_humans` set and `Engine::resume`, in place of a one-shot
//! agent tool call.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use aob_core::{DecisionSink, DlqStore, Engine, EventStore, Graph, LeaseManager, PolicyOracle, RunState};

/// Something that can ask one question tied to a `Human` node's
/// `approval_key` and return the raw typed answer.
///
/// Implemented here over stdin/stdout; tests and embedders supply a
/// scripted implementation instead of blocking on real terminal input.
#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    /// Prompts for an answer to the checkpoint named by `node_name` /
    /// `approval_key` and returns the raw line read.
    async fn ask(&self, node_name: &str, approval_key: &str) -> std::io::Result<String>;
}

/// Prompts the operator over stdin/stdout: write the prompt, flush, read
/// one line, trim the trailing newline.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioPrompt;

#[async_trait]
impl ApprovalPrompt for StdioPrompt {
    async fn ask(&self, node_name: &str, approval_key: &str) -> std::io::Result<String> {
        let mut stdout = tokio::io::stdout();
        let prompt = format!("[{node_name}] approve '{approval_key}'? (yes/no, or a JSON value): ");
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let mut reader = BufReader::new(tokio::io::stdin());
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        Ok(line.trim_end().to_string())
    }
}

/// Failure resolving one or more pending `Human` checkpoints.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The prompt implementation failed to read or write.
    #[error("i/o error collecting approval: {0}")]
    Io(#[from] std::io::Error),
    /// The engine rejected the resume call (e.g. the checkpoint was
    /// already resolved by a concurrent caller).
    #[error(transparent)]
    Engine(#[from] aob_core::Error),
}

/// Interprets one free-typed line as `(approved, approval_value)`, the pair
/// [`Engine::resume`] expects.
///
/// `yes`/`y`/`true` (case-insensitive) approve with value `true`;
/// `no`/`n`/`false`/empty reject with value `false`, via a lowercased
/// exact match against this fixed word list.
/// Anything else is parsed as JSON and carried as the approval value,
/// treated as an approval; text that fails to parse as JSON is carried
/// verbatim as a JSON string.
#[must_use]
pub fn parse_response(raw: &str) -> (bool, Value) {
    let trimmed = raw.trim();
    match trimmed.to_lowercase().as_str() {
        "yes" | "y" | "true" => (true, Value::Bool(true)),
        "no" | "n" | "false" | "" => (false, Value::Bool(false)),
        other => match serde_json::from_str::<Value>(other) {
            Ok(value) => (true, value),
            Err(_) => (true, Value::String(trimmed.to_string())),
        },
    }
}

/// Walks `state.pending_humans`, asks `prompt` for each one's approval, and
/// resumes the engine with the parsed response.
///
/// Returns the state after the last resume; per [`Engine::resume`]'s
/// contract, the caller must still call `engine.drive` afterward to push
/// any newly-ready successors — this function only resolves checkpoints,
/// it does not continue the step loop.
pub async fn resolve_pending<S, L, O, D, Q>(
    engine: &Engine<S, L, O, D, Q>,
    graph: &Graph,
    correlation_id: &str,
    state: RunState,
    prompt: &dyn ApprovalPrompt,
) -> Result<RunState, ChannelError>
where
    S: EventStore,
    L: LeaseManager,
    O: PolicyOracle,
    D: DecisionSink,
    Q: DlqStore,
{
    let mut state = state;
    for node_id in state.pending_humans.clone() {
        let Some(node) = graph.node(&node_id) else {
            continue;
        };
        let approval_key = node.approval_key.as_deref().unwrap_or(node_id.as_str());
        let raw = prompt.ask(&node.name, approval_key).await?;
        let (approved, value) = parse_response(&raw);
        state = engine.resume(graph, correlation_id, &node_id, approved, value).await?;
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use aob_core::{compile, AllowAllOracle, EngineConfig, MemoryDecisionSink, MemoryDlqStore, MemoryEventStore, MemoryLeaseManager, WorkflowSpec};
    use std::sync::Arc;

    /// A prompt that answers from a fixed, ordered script instead of
    /// blocking on real stdin.
    struct ScriptedPrompt {
        answers: Mutex<Vec<String>>,
    }

    impl ScriptedPrompt {
        fn new(answers: Vec<&str>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl ApprovalPrompt for ScriptedPrompt {
        async fn ask(&self, _node_name: &str, _approval_key: &str) -> std::io::Result<String> {
            Ok(self.answers.lock().expect("lock poisoned").pop().unwrap_or_default())
        }
    }

    #[test]
    fn parse_response_recognizes_yes_no_variants() {
        assert_eq!(parse_response("yes"), (true, Value::Bool(true)));
        assert_eq!(parse_response("Y"), (true, Value::Bool(true)));
        assert_eq!(parse_response("true"), (true, Value::Bool(true)));
        assert_eq!(parse_response("no"), (false, Value::Bool(false)));
        assert_eq!(parse_response("n"), (false, Value::Bool(false)));
        assert_eq!(parse_response(""), (false, Value::Bool(false)));
    }

    #[test]
    fn parse_response_carries_json_values_through() {
        assert_eq!(parse_response(r#"{"tier":"gold"}"#), (true, serde_json::json!({"tier": "gold"})));
        assert_eq!(parse_response("42"), (true, Value::from(42)));
    }

    #[test]
    fn parse_response_falls_back_to_raw_string() {
        assert_eq!(parse_response("looks good to me"), (true, Value::String("looks good to me".to_string())));
    }

    fn human_spec() -> WorkflowSpec {
        serde_yml::from_str(
            r#"
id: approval-flow
nodes:
  - id: a
    kind: task
    name: prepare
    expr: "bag"
  - id: h
    kind: human
    name: review
    expr: "bag"
    approval_key: sign_off
  - id: z
    kind: terminal
    name: done
    expr: "bag"
edges:
  - from: a
    to: h
  - from: h
    to: z
"#,
        )
        .expect("valid spec")
    }

    #[tokio::test]
    async fn resolve_pending_approves_and_unblocks_the_run() {
        let spec = human_spec();
        let graph = compile(&spec).expect("compiles");
        let engine = Engine::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemoryLeaseManager::new()),
            Arc::new(AllowAllOracle),
            Arc::new(MemoryDecisionSink::new()),
            Arc::new(MemoryDlqStore::new()),
            EngineConfig::default(),
        );

        engine.start("run-1", Default::default()).await.expect("start");
        let registry = aob_core::NodeRegistry::new();
        let state = engine.drive(&graph, "run-1", &registry).await.expect("drive to checkpoint");
        assert_eq!(state.pending_humans, vec!["h".to_string()]);

        let prompt = ScriptedPrompt::new(vec!["yes"]);
        let state = resolve_pending(&engine, &graph, "run-1", state, &prompt).await.expect("resolve");
        assert!(state.pending_humans.is_empty());

        let state = engine.drive(&graph, "run-1", &registry).await.expect("drive to completion");
        assert!(state.terminal.is_some());
    }

    #[tokio::test]
    async fn resolve_pending_rejection_leaves_run_failed() {
        let spec = human_spec();
        let graph = compile(&spec).expect("compiles");
        let engine = Engine::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemoryLeaseManager::new()),
            Arc::new(AllowAllOracle),
            Arc::new(MemoryDecisionSink::new()),
            Arc::new(MemoryDlqStore::new()),
            EngineConfig::default(),
        );

        engine.start("run-2", Default::default()).await.expect("start");
        let registry = aob_core::NodeRegistry::new();
        let state = engine.drive(&graph, "run-2", &registry).await.expect("drive to checkpoint");

        let prompt = ScriptedPrompt::new(vec!["no"]);
        let state = resolve_pending(&engine, &graph, "run-2", state, &prompt).await.expect("resolve");
        let state = engine.drive(&graph, "run-2", &registry).await.expect("drive to terminal");
        assert!(state.terminal.is_some());
    }
}
