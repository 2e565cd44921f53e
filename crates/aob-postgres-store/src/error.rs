//! Error types for the `PostgreSQL` event store.

use thiserror::Error;

/// Errors that can occur talking to the backing `PostgreSQL` database.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PostgresStoreError {
    /// Connection or query failure.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// JSON (de)serialization failure for a payload/context column.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A supplied table name or other identifier is not a safe SQL
    /// identifier.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Result type for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, PostgresStoreError>;

/// Converts a store-local error into the engine's closed error type, mapping
/// connection-shaped failures onto `Error::EventStore` so callers outside
/// this crate never need to know it's backed by Postgres specifically.
impl From<PostgresStoreError> for aob_core::Error {
    fn from(err: PostgresStoreError) -> Self {
        aob_core::Error::EventStore(err.to_string())
    }
}
