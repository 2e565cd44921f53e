use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use aob_core::EventStore;

use crate::backend::FileBackend;
use crate::output::{print_error, OutputFormat};

/// Reconstructs a run's state by replaying its event log from scratch,
/// bypassing any stored snapshot — a deterministic check that the snapshot
/// path and full replay path agree.
#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Correlation id of the run.
    correlation_id: String,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

pub async fn run(backend: Arc<FileBackend>, args: ReplayArgs) -> Result<()> {
    let Some(graph_id) = backend.graph_for_run(&args.correlation_id) else {
        print_error(&format!("unknown run '{}'", args.correlation_id));
        bail!("unknown run");
    };
    let spec = backend
        .get_spec(&graph_id)
        .context("run references a graph that is no longer registered")?;
    let graph = aob_core::compile(&spec).context("recompiling stored spec")?;

    let events = backend.load_events(&args.correlation_id).await?;
    let bag = events
        .iter()
        .find(|e| e.event_type == aob_core::EventType::WorkflowStarted)
        .and_then(|e| e.payload.get("bag"))
        .and_then(|bag| serde_json::from_value(bag.clone()).ok())
        .unwrap_or_default();
    let base = aob_core::RunState::initial(&graph, bag);
    let state = aob_core::replay(&graph, base, &events);

    match args.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&state.to_snapshot(&args.correlation_id))?
        ),
        OutputFormat::Table => {
            println!("replayed up_to_sequence: {}", state.up_to_sequence);
            println!("terminal:        {:?}", state.terminal);
            println!("ready_set:       {:?}", state.ready_set);
            println!("pending_humans:  {:?}", state.pending_humans);
            println!("completed:       {:?}", state.completed);
            println!("failed:          {:?}", state.failed);
            println!("outputs:         {}", serde_json::to_string_pretty(&state.run_context.outputs)?);
        }
    }
    Ok(())
}
