use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;

use aob_core::DlqStore;

use crate::backend::FileBackend;
use crate::output::{create_table, print_error, print_success, OutputFormat};

/// Dead-letter queue operations: list, requeue, or purge events the outbox
/// publisher could not deliver after exhausting its retry budget.
#[derive(Debug, Subcommand)]
pub enum DlqCommand {
    /// Lists quarantined entries.
    List {
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Clears an entry from quarantine so the outbox publisher retries it.
    Requeue {
        /// Id of the quarantined event.
        event_id: String,
    },
    /// Permanently discards a quarantined entry.
    Purge {
        /// Id of the quarantined event.
        event_id: String,
    },
}

pub async fn run(backend: Arc<FileBackend>, command: DlqCommand) -> Result<()> {
    match command {
        DlqCommand::List { format } => {
            let entries = backend.list().await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Table => {
                    let mut table = create_table();
                    table.set_header(vec!["event_id", "reason", "quarantined_at"]);
                    for entry in &entries {
                        table.add_row(vec![
                            entry.event_id.clone(),
                            entry.reason.clone(),
                            crate::output::format_timestamp(entry.quarantined_at),
                        ]);
                    }
                    println!("{table}");
                }
            }
        }
        DlqCommand::Requeue { event_id } => {
            if backend.requeue(&event_id).await? {
                backend.save()?;
                print_success(&format!("requeued {event_id}"));
            } else {
                print_error(&format!("no quarantined entry for {event_id}"));
            }
        }
        DlqCommand::Purge { event_id } => {
            if backend.purge(&event_id).await? {
                backend.save()?;
                print_success(&format!("purged {event_id}"));
            } else {
                print_error(&format!("no quarantined entry for {event_id}"));
            }
        }
    }
    Ok(())
}
