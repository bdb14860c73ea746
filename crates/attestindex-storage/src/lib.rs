//! attestindex-storage — pluggable local stores for AttestIndex.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Every backend implements [`IndexStore`]: the four mirrored tables
//! (`properties`, `schemas`, `attestations`, `timestamps`) behind an atomic,
//! cursor-gated batch apply.

use async_trait::async_trait;

use attestindex_core::error::IndexerError;
use attestindex_core::types::{AttestationRecord, Mutation, SchemaRecord, TimestampRecord};

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStore;

/// Well-known `properties` keys.
pub mod keys {
    /// The next unprocessed block number (the cursor).
    pub const NEXT_BLOCK: &str = "nextBlock";
    /// Content hash of the last applied checkpoint batch.
    pub const LAST_CHECKPOINT: &str = "lastCheckpoint";
}

/// Outcome of one batch apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Mutations applied in this batch.
    pub applied: usize,
    /// Mutations skipped because their origin block was below the cursor.
    pub skipped: usize,
}

/// Row counts per mirrored table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub schemas: u64,
    pub attestations: u64,
    pub timestamps: u64,
}

/// The local store the indexing engine writes into and the browsing side
/// reads from.
///
/// # Apply semantics
///
/// [`IndexStore::apply`] runs in a single transaction: every mutation whose
/// `origin_block` is at or above the current cursor is applied, the cursor is
/// set to `new_cursor`, and (when given) the checkpoint hash is recorded —
/// all or nothing. A mutation below the cursor is a no-op, which makes
/// re-delivery of a batch safe.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Read a `properties` value by key.
    async fn get_property(&self, key: &str) -> Result<Option<String>, IndexerError>;

    /// Fetch a schema by uid.
    async fn get_schema(&self, uid: &str) -> Result<Option<SchemaRecord>, IndexerError>;

    /// List all schemas, ordered by registration time.
    async fn list_schemas(&self) -> Result<Vec<SchemaRecord>, IndexerError>;

    /// Fetch an attestation by uid.
    async fn get_attestation(&self, uid: &str) -> Result<Option<AttestationRecord>, IndexerError>;

    /// List attestations against one schema, ordered by attestation time.
    async fn attestations_for_schema(
        &self,
        schema_uid: &str,
    ) -> Result<Vec<AttestationRecord>, IndexerError>;

    /// Fetch a timestamp record by uid.
    async fn get_timestamp(&self, uid: &str) -> Result<Option<TimestampRecord>, IndexerError>;

    /// Row counts for the mirrored tables.
    async fn counts(&self) -> Result<TableCounts, IndexerError>;

    /// Atomically apply a mutation batch, advance the cursor to `new_cursor`,
    /// and (optionally) record the checkpoint hash the batch came from.
    async fn apply(
        &self,
        mutations: &[Mutation],
        new_cursor: u64,
        checkpoint_hash: Option<&str>,
    ) -> Result<ApplyReport, IndexerError>;

    /// The current cursor, or `None` if nothing was ever applied.
    async fn cursor(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self
            .get_property(keys::NEXT_BLOCK)
            .await?
            .and_then(|v| v.parse().ok()))
    }
}
