use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::backend::FileBackend;
use crate::output::{print_error, print_info, print_success};

use super::build_engine;

/// Starts a new run of a previously compiled graph.
#[derive(Debug, Args)]
pub struct StartArgs {
    /// Graph id returned by a prior `aob compile`.
    #[arg(long)]
    graph_id: String,
    /// Correlation id identifying this run. Generated if omitted.
    #[arg(long)]
    correlation_id: Option<String>,
    /// Initial bag contents, as a JSON object.
    #[arg(long, default_value = "{}")]
    bag: String,
    /// Drive the run immediately after starting it.
    #[arg(long, default_value_t = true)]
    drive: bool,
}

pub async fn run(backend: Arc<FileBackend>, args: StartArgs) -> Result<()> {
    let Some(spec) = backend.get_spec(&args.graph_id) else {
        print_error(&format!("unknown graph id '{}'; run `aob compile` first", args.graph_id));
        bail!("unknown graph id");
    };
    let graph = aob_core::compile(&spec).context("recompiling stored spec")?;

    let bag: HashMap<String, serde_json::Value> = serde_json::from_str(&args.bag).context("parsing --bag as a JSON object")?;
    let correlation_id = args.correlation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let engine = build_engine(backend.clone());
    engine.start(&correlation_id, bag).await?;
    backend.bind_run(&correlation_id, &args.graph_id);

    if args.drive {
        let registry = super::default_registry(&graph);
        let state = engine.drive(&graph, &correlation_id, &registry).await?;
        if let Some(terminal) = state.terminal {
            print_success(&format!("run {correlation_id} reached {terminal:?} at seq {}", state.up_to_sequence));
        } else if !state.pending_humans.is_empty() {
            print_info(&format!(
                "run {correlation_id} suspended awaiting human approval on: {}",
                state.pending_humans.join(", ")
            ));
        } else {
            print_info(&format!("run {correlation_id} stalled with no ready or pending work"));
        }
    } else {
        print_success(&format!("run {correlation_id} started"));
    }

    backend.save().context("persisting run state")?;
    println!("{correlation_id}");
    Ok(())
}
