//! Resolves several independent `Human` checkpoints across parallel
//! branches, one confirmation per risky action an upstream `Agent` node
//! proposed.
//!
//! Run with: cargo run -p aob-human-channel --example agent_confirmation

use std::sync::Arc;

use aob_core::{compile, AllowAllOracle, Engine, EngineConfig, MemoryDecisionSink, MemoryDlqStore, MemoryEventStore, MemoryLeaseManager, NodeRegistry, WorkflowSpec};
use aob_human_channel::{resolve_pending, StdioPrompt};

const SPEC: &str = r#"
id: multi-checkpoint
nodes:
  - id: plan
    kind: agent
    name: plan cleanup actions
    expr: "bag"
  - id: confirm_delete
    kind: human
    name: confirm file deletion
    expr: "bag"
    approval_key: delete_old_files
  - id: confirm_restart
    kind: human
    name: confirm service restart
    expr: "bag"
    approval_key: restart_database
  - id: done
    kind: terminal
    name: done
    expr: "bag"
edges:
  - from: plan
    to: confirm_delete
  - from: plan
    to: confirm_restart
  - from: confirm_delete
    to: done
  - from: confirm_restart
    to: done
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let spec: WorkflowSpec = serde_yml::from_str(SPEC)?;
    let graph = compile(&spec)?;
    let engine = Engine::new(
        Arc::new(MemoryEventStore::new()),
        Arc::new(MemoryLeaseManager::new()),
        Arc::new(AllowAllOracle),
        Arc::new(MemoryDecisionSink::new()),
        Arc::new(MemoryDlqStore::new()),
        EngineConfig::default(),
    );

    engine.start("cleanup-run", Default::default()).await?;
    let mut registry = NodeRegistry::new();
    registry = registry.with_executor(
        "plan".to_string(),
        Arc::new(aob_core::engine::executor::FnExecutor(|_node, input| {
            Ok(serde_json::json!({ "proposed": input }))
        })),
    );

    let mut state = engine.drive(&graph, "cleanup-run", &registry).await?;
    // Both checkpoints become ready once `plan` completes, and each is
    // resolved independently via its own `approval_key` before the join at
    // `done` can fire.
    while !state.pending_humans.is_empty() {
        state = resolve_pending(&engine, &graph, "cleanup-run", state, &StdioPrompt).await?;
        state = engine.drive(&graph, "cleanup-run", &registry).await?;
    }

    println!("run terminated with: {:?}", state.terminal);
    Ok(())
}
