use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use crate::backend::{graph_id_for, load_spec, FileBackend};
use crate::output::{print_error, print_success};

/// Compiles a declarative workflow spec and registers it under a stable
/// graph id for later `start` invocations.
#[derive(Debug, Args)]
pub struct CompileArgs {
    /// Path to the workflow spec, as YAML or JSON.
    #[arg(long, short = 'f')]
    spec: PathBuf,
}

pub async fn run(backend: Arc<FileBackend>, args: CompileArgs) -> Result<()> {
    let spec = load_spec(&args.spec)?;
    match aob_core::compile(&spec) {
        Ok(graph) => {
            let graph_id = graph_id_for(&spec);
            backend.put_spec(&graph_id, spec);
            backend.save().context("persisting compiled spec")?;
            print_success(&format!(
                "compiled spec '{}' -> graph {graph_id} ({} nodes, {} edges)",
                graph.spec_id(),
                graph.node_ids().len(),
                graph.node_ids().iter().map(|id| graph.successors(id).len()).sum::<usize>(),
            ));
            println!("{graph_id}");
            Ok(())
        }
        Err(err) => {
            print_error(&format!("compile failed: {err}"));
            Err(err.into())
        }
    }
}
