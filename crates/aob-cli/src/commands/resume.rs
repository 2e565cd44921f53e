use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::backend::FileBackend;
use crate::output::{print_error, print_info, print_success};

use super::build_engine;

/// Resumes a suspended `Human` checkpoint with an external decision, then
/// continues driving the run.
#[derive(Debug, Args)]
pub struct ResumeArgs {
    /// Correlation id of the suspended run.
    correlation_id: String,
    /// Id of the `Human` node to resume.
    #[arg(long)]
    node: String,
    /// Whether the checkpoint is approved. Pass `--approved=false` to reject.
    #[arg(long, default_value_t = true)]
    approved: bool,
    /// Approval value (if approved) or rejection reason (if not), as JSON.
    #[arg(long, default_value = "null")]
    value: String,
}

pub async fn run(backend: Arc<FileBackend>, args: ResumeArgs) -> Result<()> {
    let Some(graph_id) = backend.graph_for_run(&args.correlation_id) else {
        print_error(&format!("unknown run '{}'", args.correlation_id));
        bail!("unknown run");
    };
    let Some(spec) = backend.get_spec(&graph_id) else {
        print_error(&format!("run '{}' references a graph that is no longer registered", args.correlation_id));
        bail!("unknown graph");
    };
    let graph = aob_core::compile(&spec).context("recompiling stored spec")?;
    let value: serde_json::Value = serde_json::from_str(&args.value).context("parsing --value as JSON")?;

    let engine = build_engine(backend.clone());
    engine
        .resume(&graph, &args.correlation_id, &args.node, args.approved, value)
        .await?;

    let registry = super::default_registry(&graph);
    let state = engine.drive(&graph, &args.correlation_id, &registry).await?;
    backend.save().context("persisting run state")?;

    if let Some(terminal) = state.terminal {
        print_success(&format!("run {} reached {terminal:?}", args.correlation_id));
    } else if !state.pending_humans.is_empty() {
        print_info(&format!(
            "run {} suspended awaiting human approval on: {}",
            args.correlation_id,
            state.pending_humans.join(", ")
        ));
    } else {
        print_info(&format!("run {} stalled with no ready or pending work", args.correlation_id));
    }
    Ok(())
}
