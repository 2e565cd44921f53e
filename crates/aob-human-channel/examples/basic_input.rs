//! Resolves a single `Human` checkpoint by prompting over stdin.
//!
//! Run with: cargo run -p aob-human-channel --example basic_input

use std::sync::Arc;

use aob_core::{compile, AllowAllOracle, Engine, EngineConfig, MemoryDecisionSink, MemoryDlqStore, MemoryEventStore, MemoryLeaseManager, NodeRegistry, WorkflowSpec};
use aob_human_channel::{resolve_pending, StdioPrompt};

const SPEC: &str = r#"
id: basic-checkpoint
nodes:
  - id: prepare
    kind: task
    name: prepare
    expr: "bag"
  - id: review
    kind: human
    name: review
    expr: "bag"
    approval_key: sign_off
  - id: done
    kind: terminal
    name: done
    expr: "bag"
edges:
  - from: prepare
    to: review
  - from: review
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

    engine.start("example-run", Default::default()).await?;
    let registry = NodeRegistry::new();
    let state = engine.drive(&graph, "example-run", &registry).await?;

    println!("awaiting approval on: {:?}", state.pending_humans);
    let state = resolve_pending(&engine, &graph, "example-run", state, &StdioPrompt).await?;
    let state = engine.drive(&graph, "example-run", &registry).await?;

    println!("run terminated with: {:?}", state.terminal);
    Ok(())
}
