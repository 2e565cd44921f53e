use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::backend::FileBackend;
use crate::output::{print_error, print_success};

use super::build_engine;

/// Forcibly fails a run that has not yet reached a terminal event.
#[derive(Debug, Args)]
pub struct CancelArgs {
    /// Correlation id of the run to cancel.
    correlation_id: String,
    /// Reason recorded on the resulting `workflow_failed` event.
    #[arg(long, default_value = "cancelled by operator")]
    reason: String,
}

pub async fn run(backend: Arc<FileBackend>, args: CancelArgs) -> Result<()> {
    let Some(graph_id) = backend.graph_for_run(&args.correlation_id) else {
        print_error(&format!("unknown run '{}'", args.correlation_id));
        bail!("unknown run");
    };
    let spec = backend
        .get_spec(&graph_id)
        .context("run references a graph that is no longer registered")?;
    let graph = aob_core::compile(&spec).context("recompiling stored spec")?;

    let engine = build_engine(backend.clone());
    let state = engine.cancel(&graph, &args.correlation_id, &args.reason).await?;
    backend.save().context("persisting run state")?;

    print_success(&format!("run {} terminal: {:?}", args.correlation_id, state.terminal));
    Ok(())
}
