//! Archives a completed run's events and latest snapshot to S3, then
//! restores them back.
//!
//! Run with: cargo run -p aob-s3-archive --example s3_checkpointing

use std::collections::HashMap;
use std::collections::HashSet;

use aob_core::{Event, EventType, RunContext, Snapshot};
use aob_s3_archive::S3Archive;
use chrono::Utc;

fn sample_event(correlation_id: &str, sequence_number: u64) -> Event {
    Event {
        id: format!("evt-{sequence_number}"),
        correlation_id: correlation_id.to_string(),
        sequence_number,
        event_type: EventType::NodeCompleted,
        payload: serde_json::json!({ "node_id": "a" }),
        idempotency_key: format!("{correlation_id}:a:{sequence_number}:1"),
        created_at: Utc::now(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let archive = S3Archive::with_prefix("my-archive-bucket", "aob").await?;

    let correlation_id = "run-42";
    let events = vec![sample_event(correlation_id, 1), sample_event(correlation_id, 2)];
    archive.archive_events(correlation_id, &events).await?;

    let snapshot = Snapshot {
        correlation_id: correlation_id.to_string(),
        up_to_sequence: 2,
        run_context: RunContext::default(),
        ready_set: vec!["b".to_string()],
        pending_humans: vec![],
        completed: HashSet::from(["a".to_string()]),
        failed: HashSet::new(),
        attempts: HashMap::new(),
        created_at: Utc::now(),
    };
    archive.archive_snapshot(&snapshot).await?;

    let restored_events = archive.load_events(correlation_id, 1).await?;
    println!("restored {} archived events", restored_events.len());

    let restored_snapshot = archive.load_latest_snapshot(correlation_id).await?;
    println!("restored snapshot up to sequence: {:?}", restored_snapshot.map(|s| s.up_to_sequence));

    Ok(())
}
