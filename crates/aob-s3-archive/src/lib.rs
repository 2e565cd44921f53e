//! S3 cold-storage archival of events and snapshots for the Agentic
//! Orchestration Builder.
//!
//! A bucket/prefix client wrapper with optional compression, operating on
//! the core's per-run `Event` log and `Snapshot`s rather than whole-graph
//! checkpoints, plus a retention-driven lifecycle sweep matching
//! `EngineConfig::retention`. This is not one of the core's adapter seams
//! (`EventStore` already owns the hot path); `aob-s3-archive` is a
//! standalone cold-storage tier a deployment runs alongside
//! `aob-postgres-store` to move old runs out of the primary database and
//! enforce a retention horizon.

use std::time::Duration;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectIdentifier;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use aob_core::{CorrelationId, Event, Snapshot};

#[cfg(feature = "compression")]
use aob_compression::{Compression, CompressionType};

/// Errors that can occur archiving to, or restoring from, S3.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum S3ArchiveError {
    /// Failed to reach S3 or the request was rejected.
    #[error("S3 operation error: {0}")]
    Operation(String),
    /// Encoding an `Event`/`Snapshot` for storage failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Decoding a stored object back into an `Event`/`Snapshot` failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),
    /// A requested object does not exist under the archive's prefix.
    #[error("object not found: {0}")]
    NotFound(String),
    /// Compression/decompression of an archived object failed.
    #[cfg(feature = "compression")]
    #[error("compression error: {0}")]
    Compression(String),
}

/// S3-backed cold storage for a run's archived events and snapshots.
///
/// Layout under `{prefix}`:
/// - `events/{correlation_id}/{sequence_number:020}.bin` — one
///   bincode-encoded [`Event`] per object, zero-padded so a lexicographic
///   listing is also sequence order and a range restore can skip straight
///   to `from_seq` without reading earlier objects.
/// - `snapshots/{correlation_id}/{up_to_sequence:020}.bin` — one
///   bincode-encoded [`Snapshot`] per object; the lexicographically last
///   key under a run's snapshot prefix is always its latest snapshot.
pub struct S3Archive {
    client: Client,
    bucket: String,
    prefix: String,
    #[cfg(feature = "compression")]
    compression: Option<Box<dyn Compression>>,
}

impl S3Archive {
    /// Creates an archive over `bucket` using the default AWS
    /// configuration, keyed under the `aob` prefix.
    ///
    /// # Errors
    /// Returns [`S3ArchiveError::Operation`] if AWS configuration fails.
    pub async fn new(bucket: &str) -> Result<Self, S3ArchiveError> {
        Self::with_prefix(bucket, "aob").await
    }

    /// Creates an archive over `bucket` with a custom key prefix.
    pub async fn with_prefix(bucket: &str, prefix: &str) -> Result<Self, S3ArchiveError> {
        info!(bucket, prefix, "initializing S3 archive");
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);
        Ok(Self::with_client(client, bucket, prefix))
    }

    /// Creates an archive over a caller-supplied client, for tests against
    /// LocalStack or another S3-compatible endpoint.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            #[cfg(feature = "compression")]
            compression: None,
        }
    }

    /// Enables compression of archived event/snapshot bodies.
    #[cfg(feature = "compression")]
    #[must_use]
    pub fn with_compression(mut self, compression_type: CompressionType) -> Result<Self, S3ArchiveError> {
        self.compression = Some(compression_type.build().map_err(|e| S3ArchiveError::Compression(e.to_string()))?);
        Ok(self)
    }

    fn event_key(&self, correlation_id: &str, sequence_number: u64) -> String {
        format!("{}/events/{correlation_id}/{sequence_number:020}.bin", self.prefix)
    }

    fn event_prefix(&self, correlation_id: &str) -> String {
        format!("{}/events/{correlation_id}/", self.prefix)
    }

    fn snapshot_key(&self, correlation_id: &str, up_to_sequence: u64) -> String {
        format!("{}/snapshots/{correlation_id}/{up_to_sequence:020}.bin", self.prefix)
    }

    fn snapshot_prefix(&self, correlation_id: &str) -> String {
        format!("{}/snapshots/{correlation_id}/", self.prefix)
    }

    fn encode<T: serde::Serialize>(&self, value: &T) -> Result<Vec<u8>, S3ArchiveError> {
        let bytes = bincode::serialize(value).map_err(|e| S3ArchiveError::Serialization(e.to_string()))?;
        #[cfg(feature = "compression")]
        let bytes = match &self.compression {
            Some(c) => c.compress(&bytes).map_err(|e| S3ArchiveError::Compression(e.to_string()))?,
            None => bytes,
        };
        Ok(bytes)
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, bytes: Vec<u8>) -> Result<T, S3ArchiveError> {
        #[cfg(feature = "compression")]
        let bytes = match &self.compression {
            Some(c) => c.decompress_safe(&bytes).map_err(|e| S3ArchiveError::Compression(e.to_string()))?,
            None => bytes,
        };
        bincode::deserialize(&bytes).map_err(|e| S3ArchiveError::Deserialization(e.to_string()))
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), S3ArchiveError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| S3ArchiveError::Operation(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, S3ArchiveError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| S3ArchiveError::NotFound(format!("{key}: {e}")))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| S3ArchiveError::Operation(e.to_string()))?
            .to_vec();
        Ok(bytes)
    }

    /// Uploads each event as its own object, keyed by `sequence_number` so
    /// a later restore can resume from any point in the log.
    pub async fn archive_events(&self, correlation_id: &str, events: &[Event]) -> Result<(), S3ArchiveError> {
        for event in events {
            let key = self.event_key(correlation_id, event.sequence_number);
            let body = self.encode(event)?;
            self.put(&key, body).await?;
        }
        debug!(correlation_id, count = events.len(), "archived events to S3");
        Ok(())
    }

    /// Restores archived events for `correlation_id` with
    /// `sequence_number >= from_seq`, in ascending sequence order.
    pub async fn load_events(&self, correlation_id: &str, from_seq: u64) -> Result<Vec<Event>, S3ArchiveError> {
        let prefix = self.event_prefix(correlation_id);
        let keys = self.list_keys(&prefix).await?;
        let mut events = Vec::with_capacity(keys.len());
        for key in keys {
            let bytes = self.get(&key).await?;
            let event: Event = self.decode(bytes)?;
            if event.sequence_number >= from_seq {
                events.push(event);
            }
        }
        events.sort_by_key(|e| e.sequence_number);
        Ok(events)
    }

    /// Archives a snapshot, keyed by its `up_to_sequence`.
    pub async fn archive_snapshot(&self, snapshot: &Snapshot) -> Result<(), S3ArchiveError> {
        let key = self.snapshot_key(&snapshot.correlation_id, snapshot.up_to_sequence);
        let body = self.encode(snapshot)?;
        self.put(&key, body).await?;
        debug!(correlation_id = %snapshot.correlation_id, up_to_sequence = snapshot.up_to_sequence, "archived snapshot to S3");
        Ok(())
    }

    /// Restores the snapshot with the greatest `up_to_sequence` archived
    /// for `correlation_id`, or `None` if no snapshot has been archived.
    pub async fn load_latest_snapshot(&self, correlation_id: &str) -> Result<Option<Snapshot>, S3ArchiveError> {
        let prefix = self.snapshot_prefix(correlation_id);
        let mut keys = self.list_keys(&prefix).await?;
        keys.sort();
        let Some(latest) = keys.pop() else {
            return Ok(None);
        };
        let bytes = self.get(&latest).await?;
        Ok(Some(self.decode(bytes)?))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, S3ArchiveError> {
        let mut keys = Vec::new();
        let mut continuation_token = None;
        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }
            let output = request.send().await.map_err(|e| S3ArchiveError::Operation(e.to_string()))?;
            keys.extend(output.contents().iter().filter_map(|obj| obj.key().map(str::to_string)));
            continuation_token = output.next_continuation_token().map(str::to_string);
            if continuation_token.is_none() {
                break;
            }
        }
        Ok(keys)
    }

    /// Deletes archived events for `correlation_id` older than `retention`,
    /// applying the per-kind retention horizon the engine exposes as
    /// `EngineConfig::retention` rather than a hardcoded constant. Objects
    /// are listed with their upload timestamp (`last_modified`); any whose
    /// upload predates `now - retention` are permanently removed.
    ///
    /// Returns the number of objects deleted.
    pub async fn sweep_expired_events(&self, correlation_id: &str, retention: Duration, now: DateTime<Utc>) -> Result<usize, S3ArchiveError> {
        let cutoff = now - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        let prefix = self.event_prefix(correlation_id);
        let expired = self.expired_keys(&prefix, cutoff).await?;
        self.delete_keys(&expired).await?;
        if !expired.is_empty() {
            info!(correlation_id, count = expired.len(), "swept expired archived events");
        }
        Ok(expired.len())
    }

    async fn expired_keys(&self, prefix: &str, cutoff: DateTime<Utc>) -> Result<Vec<String>, S3ArchiveError> {
        let mut expired = Vec::new();
        let mut continuation_token = None;
        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }
            let output = request.send().await.map_err(|e| S3ArchiveError::Operation(e.to_string()))?;
            for obj in output.contents() {
                let Some(key) = obj.key() else { continue };
                let is_expired = obj
                    .last_modified()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), 0))
                    .is_some_and(|modified| modified < cutoff);
                if is_expired {
                    expired.push(key.to_string());
                }
            }
            continuation_token = output.next_continuation_token().map(str::to_string);
            if continuation_token.is_none() {
                break;
            }
        }
        Ok(expired)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), S3ArchiveError> {
        if keys.is_empty() {
            return Ok(());
        }
        // S3 batch-delete caps at 1000 keys per request.
        for chunk in keys.chunks(1000) {
            let objects: Vec<ObjectIdentifier> = chunk
                .iter()
                .filter_map(|key| ObjectIdentifier::builder().key(key).build().ok())
                .collect();
            let delete = aws_sdk_s3::types::Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| S3ArchiveError::Operation(e.to_string()))?;
            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| S3ArchiveError::Operation(e.to_string()))?;
        }
        Ok(())
    }

    /// Correlation ids that currently have at least one archived event
    /// object, for operator tooling (e.g. an audit sweep listing archived
    /// runs). Not used on the engine's hot path.
    pub async fn list_archived_runs(&self) -> Result<Vec<CorrelationId>, S3ArchiveError> {
        let events_prefix = format!("{}/events/", self.prefix);
        let keys = self.list_keys(&events_prefix).await?;
        let mut runs: Vec<CorrelationId> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(&events_prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(str::to_string)
            .collect();
        runs.sort();
        runs.dedup();
        Ok(runs)
    }
}
