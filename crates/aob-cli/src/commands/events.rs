use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use aob_core::EventStore;

use crate::backend::FileBackend;
use crate::output::{print_events_table, OutputFormat};

/// Lists the durable event log for a run.
#[derive(Debug, Args)]
pub struct EventsArgs {
    /// Correlation id of the run.
    correlation_id: String,
    /// Only show events strictly after this sequence number.
    #[arg(long, default_value_t = 0)]
    from_seq: u64,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

pub async fn run(backend: Arc<FileBackend>, args: EventsArgs) -> Result<()> {
    let events = backend.load_events_since(&args.correlation_id, args.from_seq).await?;
    match args.format {
        OutputFormat::Table => print_events_table(&events),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&events)?),
    }
    Ok(())
}
