//! `PostgreSQL`-backed [`EventStore`] and [`DlqStore`] for the Agentic
//! Orchestration Builder.
//!
//! Stores the append-only event log, its co-located transactional outbox,
//! per-run snapshots, and the dead-letter quarantine table in `PostgreSQL`,
//! giving the event store and DLQ a durable home beyond process restarts.
//! The table layout mirrors the in-memory reference adapter in
//! `aob_core::store`: one row per
//! event keyed by `(correlation_id, sequence_number)`, a uniqueness
//! constraint on `(correlation_id, idempotency_key)` enforcing at-most-once
//! materialization of a given append, and outbox/snapshot/dlq tables joined
//! by `event_id`/`correlation_id`.

mod error;

pub use error::{PostgresStoreError, Result as StoreResult};

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use aob_core::{CorrelationId, DlqEntry, DlqStore, Error, Event, EventStore, EventType, Json, OutboxEntry, Result, Snapshot};

/// Validates a `PostgreSQL` identifier (table prefix) before interpolating it
/// into DDL/DML. The prefix is an operator-supplied construction-time
/// parameter, never end-user input, but this still guards against a
/// typo'd or malicious value producing broken or unsafe SQL.
fn validate_identifier(name: &str) -> std::result::Result<(), PostgresStoreError> {
    if name.is_empty() {
        return Err(PostgresStoreError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    }
    if name.len() > 63 {
        return Err(PostgresStoreError::InvalidIdentifier(format!(
            "identifier '{name}' exceeds maximum length of 63 characters"
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().expect("checked non-empty above");
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(PostgresStoreError::InvalidIdentifier(format!(
            "identifier '{name}' must start with a letter or underscore"
        )));
    }
    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(PostgresStoreError::InvalidIdentifier(format!(
                "identifier '{name}' contains invalid character '{c}'"
            )));
        }
    }
    Ok(())
}

/// `PostgreSQL`-backed [`EventStore`] and [`DlqStore`].
///
/// Schema (created in [`PostgresEventStore::new`] if absent), with
/// `table_prefix` defaulting to `aob`:
/// - `{prefix}_events(id, correlation_id, sequence_number, event_type,
///   payload, idempotency_key, created_at)`
/// - `{prefix}_outbox(event_id, correlation_id, created_at, published_at,
///   attempts, last_error)`
/// - `{prefix}_snapshots(correlation_id, up_to_sequence, body, created_at)`
/// - `{prefix}_dlq(event_id, reason, quarantined_at)`
pub struct PostgresEventStore {
    client: Client,
    prefix: String,
}

impl PostgresEventStore {
    /// Connects and ensures the schema exists under the `aob` table prefix.
    pub async fn new(connection_string: &str) -> std::result::Result<Self, PostgresStoreError> {
        Self::with_table_prefix(connection_string, "aob").await
    }

    /// Connects and ensures the schema exists under a custom table prefix.
    pub async fn with_table_prefix(
        connection_string: &str,
        table_prefix: &str,
    ) -> std::result::Result<Self, PostgresStoreError> {
        validate_identifier(table_prefix)?;

        info!(table_prefix, "connecting to PostgreSQL event store");
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "PostgreSQL connection task terminated");
            }
        });

        let store = Self {
            client,
            prefix: table_prefix.to_string(),
        };
        store.initialize_schema().await?;
        Ok(store)
    }

    fn events_table(&self) -> String {
        format!("{}_events", self.prefix)
    }

    fn outbox_table(&self) -> String {
        format!("{}_outbox", self.prefix)
    }

    fn snapshots_table(&self) -> String {
        format!("{}_snapshots", self.prefix)
    }

    fn dlq_table(&self) -> String {
        format!("{}_dlq", self.prefix)
    }

    async fn initialize_schema(&self) -> std::result::Result<(), PostgresStoreError> {
        let (events, outbox, snapshots, dlq) = (
            self.events_table(),
            self.outbox_table(),
            self.snapshots_table(),
            self.dlq_table(),
        );
        let ddl = format!(
            r"
            CREATE TABLE IF NOT EXISTS {events} (
                id TEXT PRIMARY KEY,
                correlation_id TEXT NOT NULL,
                sequence_number BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                payload JSONB NOT NULL,
                idempotency_key TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (correlation_id, sequence_number),
                UNIQUE (correlation_id, idempotency_key)
            );
            CREATE INDEX IF NOT EXISTS idx_{events}_correlation ON {events} (correlation_id);

            CREATE TABLE IF NOT EXISTS {outbox} (
                event_id TEXT PRIMARY KEY REFERENCES {events} (id),
                correlation_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                published_at TIMESTAMPTZ,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_{outbox}_pending ON {outbox} (created_at)
                WHERE published_at IS NULL;

            CREATE TABLE IF NOT EXISTS {snapshots} (
                correlation_id TEXT PRIMARY KEY,
                up_to_sequence BIGINT NOT NULL,
                body JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {dlq} (
                event_id TEXT PRIMARY KEY,
                reason TEXT NOT NULL,
                quarantined_at TIMESTAMPTZ NOT NULL
            );
            "
        );
        self.client.batch_execute(&ddl).await?;
        debug!(prefix = %self.prefix, "PostgreSQL event store schema ready");
        Ok(())
    }

    fn row_to_event(row: &tokio_postgres::Row) -> std::result::Result<Event, PostgresStoreError> {
        let event_type_str: String = row.get("event_type");
        let event_type: EventType =
            serde_json::from_value(serde_json::Value::String(event_type_str))?;
        let sequence_number: i64 = row.get("sequence_number");
        Ok(Event {
            id: row.get("id"),
            correlation_id: row.get("correlation_id"),
            sequence_number: u64::try_from(sequence_number).unwrap_or(0),
            event_type,
            payload: row.get::<_, serde_json::Value>("payload"),
            idempotency_key: row.get("idempotency_key"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(
        &self,
        correlation_id: &str,
        expected_sequence: u64,
        event_type: EventType,
        payload: Json,
        idempotency_key: String,
    ) -> Result<Event> {
        let events = self.events_table();
        let outbox = self.outbox_table();

        let select_existing = format!(
            "SELECT id, correlation_id, sequence_number, event_type, payload, idempotency_key, created_at
             FROM {events} WHERE correlation_id = $1 AND idempotency_key = $2"
        );
        let existing = self
            .client
            .query_opt(&select_existing, &[&correlation_id, &idempotency_key])
            .await
            .map_err(PostgresStoreError::from)?;
        if let Some(row) = existing {
            return Self::row_to_event(&row).map_err(Error::from);
        }

        let next_seq_sql = format!(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM {events} WHERE correlation_id = $1"
        );
        let next: i64 = self
            .client
            .query_one(&next_seq_sql, &[&correlation_id])
            .await
            .map_err(PostgresStoreError::from)?
            .get(0);
        let next = u64::try_from(next).unwrap_or(1);
        if next != expected_sequence {
            return Err(Error::AppendSequenceConflict {
                correlation_id: correlation_id.to_string(),
                expected: next,
            });
        }

        let event_type_json = serde_json::to_value(event_type).map_err(PostgresStoreError::from)?;
        let event_type_str = event_type_json
            .as_str()
            .expect("EventType serializes to a string")
            .to_string();
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now();

        let insert_event = format!(
            "INSERT INTO {events} (id, correlation_id, sequence_number, event_type, payload, idempotency_key, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        let insert_outbox = format!(
            "INSERT INTO {outbox} (event_id, correlation_id, created_at, attempts) VALUES ($1, $2, $3, 0)"
        );

        // `Client::transaction` takes `&mut self`, which a shared store can't
        // offer; the append path is always invoked by the single lease
        // holder for `correlation_id`, so there is no concurrent writer to
        // race against between these two statements.
        self.client
            .execute(
                &insert_event,
                &[
                    &id,
                    &correlation_id,
                    &(next as i64),
                    &event_type_str,
                    &payload,
                    &idempotency_key,
                    &created_at,
                ],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        self.client
            .execute(&insert_outbox, &[&id, &correlation_id, &created_at])
            .await
            .map_err(PostgresStoreError::from)?;

        Ok(Event {
            id,
            correlation_id: correlation_id.to_string(),
            sequence_number: next,
            event_type,
            payload,
            idempotency_key,
            created_at,
        })
    }

    async fn load_events(&self, correlation_id: &str) -> Result<Vec<Event>> {
        let sql = format!(
            "SELECT id, correlation_id, sequence_number, event_type, payload, idempotency_key, created_at
             FROM {} WHERE correlation_id = $1 ORDER BY sequence_number ASC",
            self.events_table()
        );
        let rows = self
            .client
            .query(&sql, &[&correlation_id])
            .await
            .map_err(PostgresStoreError::from)?;
        rows.iter().map(|row| Self::row_to_event(row).map_err(Error::from)).collect()
    }

    async fn load_events_since(&self, correlation_id: &str, after_sequence: u64) -> Result<Vec<Event>> {
        let sql = format!(
            "SELECT id, correlation_id, sequence_number, event_type, payload, idempotency_key, created_at
             FROM {} WHERE correlation_id = $1 AND sequence_number > $2 ORDER BY sequence_number ASC",
            self.events_table()
        );
        let rows = self
            .client
            .query(&sql, &[&correlation_id, &(after_sequence as i64)])
            .await
            .map_err(PostgresStoreError::from)?;
        rows.iter().map(|row| Self::row_to_event(row).map_err(Error::from)).collect()
    }

    async fn next_sequence(&self, correlation_id: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM {} WHERE correlation_id = $1",
            self.events_table()
        );
        let next: i64 = self
            .client
            .query_one(&sql, &[&correlation_id])
            .await
            .map_err(PostgresStoreError::from)?
            .get(0);
        Ok(u64::try_from(next).unwrap_or(1))
    }

    async fn put_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (correlation_id, up_to_sequence, body, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (correlation_id) DO UPDATE SET
                 up_to_sequence = EXCLUDED.up_to_sequence,
                 body = EXCLUDED.body,
                 created_at = EXCLUDED.created_at",
            self.snapshots_table()
        );
        let body = serde_json::to_value(&snapshot).map_err(PostgresStoreError::from)?;
        self.client
            .execute(
                &sql,
                &[
                    &snapshot.correlation_id,
                    &(snapshot.up_to_sequence as i64),
                    &body,
                    &snapshot.created_at,
                ],
            )
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn load_snapshot(&self, correlation_id: &str) -> Result<Option<Snapshot>> {
        let sql = format!("SELECT body FROM {} WHERE correlation_id = $1", self.snapshots_table());
        let row = self
            .client
            .query_opt(&sql, &[&correlation_id])
            .await
            .map_err(PostgresStoreError::from)?;
        match row {
            Some(row) => {
                let body: serde_json::Value = row.get(0);
                let snapshot: Snapshot = serde_json::from_value(body).map_err(PostgresStoreError::from)?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT event_id, published_at, attempts, last_error
             FROM {} WHERE published_at IS NULL ORDER BY created_at ASC LIMIT $1",
            self.outbox_table()
        );
        let rows = self
            .client
            .query(&sql, &[&(limit as i64)])
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(rows
            .iter()
            .map(|row| OutboxEntry {
                event_id: row.get("event_id"),
                published_at: row.get("published_at"),
                attempts: u32::try_from(row.get::<_, i32>("attempts")).unwrap_or(0),
                last_error: row.get("last_error"),
            })
            .collect())
    }

    async fn mark_published(&self, event_id: &str) -> Result<()> {
        let sql = format!("UPDATE {} SET published_at = now() WHERE event_id = $1", self.outbox_table());
        self.client.execute(&sql, &[&event_id]).await.map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn mark_publish_failed(&self, event_id: &str, error: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET attempts = attempts + 1, last_error = $2 WHERE event_id = $1",
            self.outbox_table()
        );
        self.client
            .execute(&sql, &[&event_id, &error])
            .await
            .map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn requeue_outbox(&self, event_id: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET published_at = NULL, attempts = 0, last_error = NULL WHERE event_id = $1",
            self.outbox_table()
        );
        self.client.execute(&sql, &[&event_id]).await.map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn list_runs(&self) -> Result<Vec<CorrelationId>> {
        let sql = format!("SELECT DISTINCT correlation_id FROM {}", self.events_table());
        let rows = self.client.query(&sql, &[]).await.map_err(PostgresStoreError::from)?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }
}

#[async_trait]
impl DlqStore for PostgresEventStore {
    async fn quarantine(&self, event_id: &str, reason: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (event_id, reason, quarantined_at) VALUES ($1, $2, now())
             ON CONFLICT (event_id) DO NOTHING",
            self.dlq_table()
        );
        self.client.execute(&sql, &[&event_id, &reason]).await.map_err(PostgresStoreError::from)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DlqEntry>> {
        let sql = format!(
            "SELECT event_id, reason, quarantined_at FROM {} ORDER BY quarantined_at ASC",
            self.dlq_table()
        );
        let rows = self.client.query(&sql, &[]).await.map_err(PostgresStoreError::from)?;
        Ok(rows
            .iter()
            .map(|row| DlqEntry {
                event_id: row.get("event_id"),
                reason: row.get("reason"),
                quarantined_at: row.get("quarantined_at"),
            })
            .collect())
    }

    async fn requeue(&self, event_id: &str) -> Result<bool> {
        let delete_sql = format!("DELETE FROM {} WHERE event_id = $1", self.dlq_table());
        let deleted = self.client.execute(&delete_sql, &[&event_id]).await.map_err(PostgresStoreError::from)?;
        if deleted > 0 {
            EventStore::requeue_outbox(self, event_id).await?;
        }
        Ok(deleted > 0)
    }

    async fn purge(&self, event_id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE event_id = $1", self.dlq_table());
        let deleted = self.client.execute(&sql, &[&event_id]).await.map_err(PostgresStoreError::from)?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_identifier_accepts_table_names() {
        assert!(validate_identifier("aob").is_ok());
        assert!(validate_identifier("aob_prod").is_ok());
        assert!(validate_identifier("_private").is_ok());
    }

    #[test]
    fn validate_identifier_rejects_sql_injection_attempts() {
        assert!(validate_identifier("aob; DROP TABLE events; --").is_err());
        assert!(validate_identifier("aob-prod").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn validate_identifier_rejects_leading_digit() {
        assert!(validate_identifier("1aob").is_err());
    }

    #[test]
    fn validate_identifier_rejects_overlong_names() {
        let name = "a".repeat(64);
        assert!(validate_identifier(&name).is_err());
    }

    #[test]
    fn table_names_are_prefixed() {
        let prefix = "aob_test";
        assert_eq!(format!("{prefix}_events"), "aob_test_events");
        assert_eq!(format!("{prefix}_outbox"), "aob_test_outbox");
        assert_eq!(format!("{prefix}_snapshots"), "aob_test_snapshots");
        assert_eq!(format!("{prefix}_dlq"), "aob_test_dlq");
    }

    // Integration tests exercising the live schema and queries require a
    // running PostgreSQL instance; see tests/postgres_store.rs, gated behind
    // the `testcontainers` dev-dependency.
}
