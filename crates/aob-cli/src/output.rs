//! Terminal output helpers shared by every subcommand: colored
//! status lines and a table renderer for event/DLQ listings.

use aob_core::{Event, EventType};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table output with colors.
    #[default]
    Table,
    /// Machine-readable JSON output.
    Json,
}

/// Renders a timestamp the way the rest of the table output expects.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Colors an event type label consistently across commands.
pub fn format_event_type(event_type: EventType) -> String {
    use EventType::{
        HumanApproved, HumanAwaited, HumanRejected, NodeCompleted, NodeFailed, NodeStarted,
        PolicyDenied, SnapshotCreated, WorkflowCompleted, WorkflowFailed, WorkflowStarted,
    };
    match event_type {
        WorkflowStarted => "WORKFLOW_STARTED".bright_green().bold().to_string(),
        NodeStarted => "NODE_STARTED".bright_blue().to_string(),
        NodeCompleted => "NODE_COMPLETED".blue().to_string(),
        NodeFailed => "NODE_FAILED".bright_red().bold().to_string(),
        PolicyDenied => "POLICY_DENIED".bright_red().to_string(),
        HumanAwaited => "HUMAN_AWAITED".bright_yellow().bold().to_string(),
        HumanApproved => "HUMAN_APPROVED".green().to_string(),
        HumanRejected => "HUMAN_REJECTED".red().to_string(),
        WorkflowCompleted => "WORKFLOW_COMPLETED".bright_green().bold().to_string(),
        WorkflowFailed => "WORKFLOW_FAILED".bright_red().bold().to_string(),
        SnapshotCreated => "SNAPSHOT_CREATED".bright_magenta().to_string(),
    }
}

/// Creates a table with the project's standard preset.
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table
}

/// Prints a run's events as a table.
pub fn print_events_table(events: &[Event]) {
    let mut table = create_table();
    table.set_header(vec!["seq", "type", "idempotency_key", "created_at", "payload"]);
    for event in events {
        let payload = serde_json::to_string(&event.payload).unwrap_or_default();
        let payload = if payload.chars().count() > 80 {
            format!("{}…", payload.chars().take(80).collect::<String>())
        } else {
            payload
        };
        table.add_row(vec![
            event.sequence_number.to_string(),
            format_event_type(event.event_type),
            event.idempotency_key.chars().take(8).collect::<String>(),
            format_timestamp(event.created_at),
            payload,
        ]);
    }
    println!("{table}");
}

/// Prints an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "ERROR:".bright_red().bold(), msg);
}

/// Prints a success message to stdout.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".bright_green().bold(), msg);
}

/// Prints an informational message to stdout.
pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".bright_blue().bold(), msg);
}
