//! Integration tests for `PostgresEventStore` against a long-lived
//! PostgreSQL instance (as opposed to `postgres_testcontainers.rs`, which
//! spins up disposable containers per test).
//!
//! ```bash
//! docker-compose -f docker-compose.postgres.yml up -d
//! cargo test --package aob-postgres-store --test integration_tests -- --ignored
//! docker-compose -f docker-compose.postgres.yml down
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use aob_core::{EventStore, EventType};
use aob_postgres_store::PostgresEventStore;

fn connection_string() -> String {
    std::env::var("POSTGRES_CONNECTION_STRING")
        .unwrap_or_else(|_| "host=localhost port=5432 user=postgres password=postgres dbname=aob".to_string())
}

#[tokio::test]
#[ignore = "requires running PostgreSQL (run with --ignored)"]
async fn append_and_load_round_trip() {
    let store = PostgresEventStore::new(&connection_string())
        .await
        .expect("failed to create PostgresEventStore");

    let correlation_id = "integration-round-trip";
    store
        .append(
            correlation_id,
            1,
            EventType::WorkflowStarted,
            serde_json::json!({"spec": "demo"}),
            format!("{correlation_id}:start:1"),
        )
        .await
        .expect("append");

    let events = store.load_events(correlation_id).await.expect("load events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::WorkflowStarted);
}

#[tokio::test]
#[ignore = "requires running PostgreSQL (run with --ignored)"]
async fn custom_table_prefix_isolates_two_stores_in_one_database() {
    let conn = connection_string();
    let store_a = PostgresEventStore::with_table_prefix(&conn, "aob_tenant_a")
        .await
        .expect("store a");
    let store_b = PostgresEventStore::with_table_prefix(&conn, "aob_tenant_b")
        .await
        .expect("store b");

    let correlation_id = "shared-correlation-id";
    store_a
        .append(correlation_id, 1, EventType::WorkflowStarted, serde_json::json!({}), format!("{correlation_id}:a:1"))
        .await
        .expect("append to store a");

    let events_b = store_b.load_events(correlation_id).await.expect("load from store b");
    assert!(events_b.is_empty(), "tenant b's table prefix must not see tenant a's events");

    let events_a = store_a.load_events(correlation_id).await.expect("load from store a");
    assert_eq!(events_a.len(), 1);
}

#[tokio::test]
#[ignore = "requires running PostgreSQL (run with --ignored)"]
async fn next_sequence_tracks_the_highest_appended_event() {
    let store = PostgresEventStore::new(&connection_string())
        .await
        .expect("failed to create PostgresEventStore");

    let correlation_id = "integration-next-sequence";
    assert_eq!(store.next_sequence(correlation_id).await.expect("next sequence on empty run"), 1);

    store
        .append(correlation_id, 1, EventType::WorkflowStarted, serde_json::json!({}), format!("{correlation_id}:1"))
        .await
        .expect("append 1");
    assert_eq!(store.next_sequence(correlation_id).await.expect("next sequence after one event"), 2);
}
