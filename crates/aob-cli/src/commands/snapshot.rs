use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use aob_core::EventStore;

use crate::backend::FileBackend;
use crate::output::{print_error, print_success, OutputFormat};

/// Forces an out-of-cadence snapshot of a run's current state, or shows the
/// latest one.
///
/// The store keeps only the single most recent snapshot per run (it
/// supersedes, rather than accumulates, on write — see `EventStore::
/// put_snapshot`), so this doubles as `list-snapshots`: a run has at most
/// one snapshot id, its `up_to_sequence`.
#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Correlation id of the run.
    correlation_id: String,
    /// Capture a fresh snapshot instead of showing the existing one.
    #[arg(long)]
    force: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

pub async fn run(backend: Arc<FileBackend>, args: SnapshotArgs) -> Result<()> {
    if args.force {
        let Some(graph_id) = backend.graph_for_run(&args.correlation_id) else {
            print_error(&format!("unknown run '{}'", args.correlation_id));
            bail!("unknown run");
        };
        let spec = backend
            .get_spec(&graph_id)
            .context("run references a graph that is no longer registered")?;
        let graph = aob_core::compile(&spec).context("recompiling stored spec")?;
        let engine = super::build_engine(backend.clone());
        let state = engine.load_state(&graph, &args.correlation_id).await?;
        backend.put_snapshot(state.to_snapshot(&args.correlation_id)).await?;
        backend.save().context("persisting snapshot")?;
        print_success(&format!("captured snapshot at seq {}", state.up_to_sequence));
        return Ok(());
    }

    match backend.load_snapshot(&args.correlation_id).await? {
        Some(snapshot) => match args.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            OutputFormat::Table => {
                println!("snapshot up_to_sequence: {}", snapshot.up_to_sequence);
                println!("ready_set:       {:?}", snapshot.ready_set);
                println!("pending_humans:  {:?}", snapshot.pending_humans);
                println!("completed:       {:?}", snapshot.completed);
                println!("failed:          {:?}", snapshot.failed);
            }
        },
        None => print_error(&format!("no snapshot recorded for run '{}'", args.correlation_id)),
    }
    Ok(())
}
