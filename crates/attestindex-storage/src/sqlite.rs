//! SQLite store backend for AttestIndex.
//!
//! Persists the four mirrored tables to a single SQLite file. Uses `sqlx`
//! with WAL mode for concurrent read performance, and runs every batch
//! apply inside one transaction so the mutations, the cursor advance, and
//! the checkpoint hash land together or not at all.
//!
//! # Usage
//! ```rust,no_run
//! use attestindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./attest.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use attestindex_core::error::IndexerError;
use attestindex_core::types::{
    AttestationRecord, Mutation, MutationOp, SchemaRecord, TimestampRecord,
};

use crate::{keys, ApplyReport, IndexStore, TableCounts};

/// SQLite-backed index store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./attest.db"`) or a full
    /// SQLite URL (`"sqlite:./attest.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        // WAL mode — better concurrent read throughput
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS properties (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schemas (
                uid               TEXT    PRIMARY KEY,
                definition        TEXT    NOT NULL,
                creator           TEXT    NOT NULL,
                resolver          TEXT    NOT NULL,
                registered_at     INTEGER NOT NULL,
                registration_tx   TEXT    NOT NULL,
                revocable         INTEGER NOT NULL,
                name              TEXT    NOT NULL,
                attestation_count INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS attestations (
                uid             TEXT    PRIMARY KEY,
                schema_uid      TEXT    NOT NULL,
                payload         TEXT    NOT NULL,
                attester        TEXT    NOT NULL,
                recipient       TEXT    NOT NULL,
                ref_uid         TEXT    NOT NULL,
                revocation_time INTEGER NOT NULL,
                expiration_time INTEGER NOT NULL,
                attested_at     INTEGER NOT NULL,
                tx_hash         TEXT    NOT NULL,
                revoked         INTEGER NOT NULL,
                observed_at     INTEGER NOT NULL,
                revocable       INTEGER NOT NULL,
                decoded_json    TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS timestamps (
                uid       TEXT    PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                submitter TEXT    NOT NULL,
                tx_hash   TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_attestations_schema ON attestations (schema_uid);",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(())
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn schema_from_row(row: &SqliteRow) -> SchemaRecord {
    SchemaRecord {
        uid: row.get("uid"),
        definition: row.get("definition"),
        creator: row.get("creator"),
        resolver: row.get("resolver"),
        registered_at: row.get("registered_at"),
        registration_tx: row.get("registration_tx"),
        revocable: row.get("revocable"),
        name: row.get("name"),
        attestation_count: row.get::<i64, _>("attestation_count") as u64,
    }
}

fn attestation_from_row(row: &SqliteRow) -> AttestationRecord {
    AttestationRecord {
        uid: row.get("uid"),
        schema_uid: row.get("schema_uid"),
        payload: row.get("payload"),
        attester: row.get("attester"),
        recipient: row.get("recipient"),
        ref_uid: row.get("ref_uid"),
        revocation_time: row.get::<i64, _>("revocation_time") as u64,
        expiration_time: row.get::<i64, _>("expiration_time") as u64,
        attested_at: row.get("attested_at"),
        tx_hash: row.get("tx_hash"),
        revoked: row.get("revoked"),
        observed_at: row.get("observed_at"),
        revocable: row.get("revocable"),
        decoded_json: row.get("decoded_json"),
    }
}

fn timestamp_from_row(row: &SqliteRow) -> TimestampRecord {
    TimestampRecord {
        uid: row.get("uid"),
        timestamp: row.get::<i64, _>("timestamp") as u64,
        submitter: row.get("submitter"),
        tx_hash: row.get("tx_hash"),
    }
}

// ─── IndexStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl IndexStore for SqliteStore {
    async fn get_property(&self, key: &str) -> Result<Option<String>, IndexerError> {
        let row = sqlx::query("SELECT value FROM properties WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn get_schema(&self, uid: &str) -> Result<Option<SchemaRecord>, IndexerError> {
        let row = sqlx::query("SELECT * FROM schemas WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(row.as_ref().map(schema_from_row))
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaRecord>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM schemas ORDER BY registered_at, uid")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(rows.iter().map(schema_from_row).collect())
    }

    async fn get_attestation(&self, uid: &str) -> Result<Option<AttestationRecord>, IndexerError> {
        let row = sqlx::query("SELECT * FROM attestations WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(row.as_ref().map(attestation_from_row))
    }

    async fn attestations_for_schema(
        &self,
        schema_uid: &str,
    ) -> Result<Vec<AttestationRecord>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM attestations WHERE schema_uid = ? ORDER BY attested_at, uid",
        )
        .bind(schema_uid)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(rows.iter().map(attestation_from_row).collect())
    }

    async fn get_timestamp(&self, uid: &str) -> Result<Option<TimestampRecord>, IndexerError> {
        let row = sqlx::query("SELECT * FROM timestamps WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(row.as_ref().map(timestamp_from_row))
    }

    async fn counts(&self) -> Result<TableCounts, IndexerError> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM schemas)      AS schemas,
                (SELECT COUNT(*) FROM attestations) AS attestations,
                (SELECT COUNT(*) FROM timestamps)   AS timestamps",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(TableCounts {
            schemas: row.get::<i64, _>("schemas") as u64,
            attestations: row.get::<i64, _>("attestations") as u64,
            timestamps: row.get::<i64, _>("timestamps") as u64,
        })
    }

    async fn apply(
        &self,
        mutations: &[Mutation],
        new_cursor: u64,
        checkpoint_hash: Option<&str>,
    ) -> Result<ApplyReport, IndexerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        // Cursor is read inside the transaction so the gate and the advance
        // see the same state.
        let cursor: u64 = sqlx::query("SELECT value FROM properties WHERE key = ?")
            .bind(keys::NEXT_BLOCK)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?
            .and_then(|r| r.get::<String, _>("value").parse().ok())
            .unwrap_or(0);

        let mut report = ApplyReport::default();
        for mutation in mutations {
            if mutation.origin_block < cursor {
                report.skipped += 1;
                continue;
            }

            match &mutation.op {
                MutationOp::PutSchema(record) => {
                    sqlx::query(
                        "INSERT OR REPLACE INTO schemas
                         (uid, definition, creator, resolver, registered_at,
                          registration_tx, revocable, name, attestation_count)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&record.uid)
                    .bind(&record.definition)
                    .bind(&record.creator)
                    .bind(&record.resolver)
                    .bind(record.registered_at)
                    .bind(&record.registration_tx)
                    .bind(record.revocable)
                    .bind(&record.name)
                    .bind(record.attestation_count as i64)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| IndexerError::Storage(e.to_string()))?;
                }
                MutationOp::PutAttestation(record) => {
                    sqlx::query(
                        "INSERT OR REPLACE INTO attestations
                         (uid, schema_uid, payload, attester, recipient, ref_uid,
                          revocation_time, expiration_time, attested_at, tx_hash,
                          revoked, observed_at, revocable, decoded_json)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&record.uid)
                    .bind(&record.schema_uid)
                    .bind(&record.payload)
                    .bind(&record.attester)
                    .bind(&record.recipient)
                    .bind(&record.ref_uid)
                    .bind(record.revocation_time as i64)
                    .bind(record.expiration_time as i64)
                    .bind(record.attested_at)
                    .bind(&record.tx_hash)
                    .bind(record.revoked)
                    .bind(record.observed_at)
                    .bind(record.revocable)
                    .bind(&record.decoded_json)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| IndexerError::Storage(e.to_string()))?;
                }
                MutationOp::PutTimestamp(record) => {
                    sqlx::query(
                        "INSERT OR REPLACE INTO timestamps
                         (uid, timestamp, submitter, tx_hash)
                         VALUES (?, ?, ?, ?)",
                    )
                    .bind(&record.uid)
                    .bind(record.timestamp as i64)
                    .bind(&record.submitter)
                    .bind(&record.tx_hash)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| IndexerError::Storage(e.to_string()))?;
                }
                MutationOp::PatchSchema { uid, patch } => {
                    let result = sqlx::query(
                        "UPDATE schemas SET
                            name              = COALESCE(?, name),
                            attestation_count = COALESCE(?, attestation_count)
                         WHERE uid = ?",
                    )
                    .bind(&patch.name)
                    .bind(patch.attestation_count.map(|c| c as i64))
                    .bind(uid)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| IndexerError::Storage(e.to_string()))?;

                    if result.rows_affected() == 0 {
                        warn!(uid, "schema patch target missing");
                    }
                }
                MutationOp::PatchAttestation { uid, patch } => {
                    let result = sqlx::query(
                        "UPDATE attestations SET
                            revoked         = COALESCE(?, revoked),
                            revocation_time = COALESCE(?, revocation_time)
                         WHERE uid = ?",
                    )
                    .bind(patch.revoked)
                    .bind(patch.revocation_time.map(|t| t as i64))
                    .bind(uid)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| IndexerError::Storage(e.to_string()))?;

                    if result.rows_affected() == 0 {
                        warn!(uid, "attestation patch target missing");
                    }
                }
            }
            report.applied += 1;
        }

        sqlx::query("INSERT OR REPLACE INTO properties (key, value) VALUES (?, ?)")
            .bind(keys::NEXT_BLOCK)
            .bind(new_cursor.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        if let Some(hash) = checkpoint_hash {
            sqlx::query("INSERT OR REPLACE INTO properties (key, value) VALUES (?, ?)")
                .bind(keys::LAST_CHECKPOINT)
                .bind(hash)
                .execute(&mut *tx)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        debug!(
            applied = report.applied,
            skipped = report.skipped,
            cursor = new_cursor,
            "batch applied"
        );
        Ok(report)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use attestindex_core::types::{AttestationPatch, SchemaPatch};

    fn schema(uid: &str, block_time: i64) -> SchemaRecord {
        SchemaRecord {
            uid: uid.into(),
            definition: "uint256 value".into(),
            creator: "0x1111".into(),
            resolver: "0x0000".into(),
            registered_at: block_time,
            registration_tx: "0xdead".into(),
            revocable: true,
            name: String::new(),
            attestation_count: 0,
        }
    }

    fn attestation(uid: &str, schema_uid: &str, time: i64) -> AttestationRecord {
        AttestationRecord {
            uid: uid.into(),
            schema_uid: schema_uid.into(),
            payload: "0x".into(),
            attester: "0x2222".into(),
            recipient: "0x3333".into(),
            ref_uid: "0x0".into(),
            revocation_time: 0,
            expiration_time: 0,
            attested_at: time,
            tx_hash: "0xbeef".into(),
            revoked: false,
            observed_at: time,
            revocable: true,
            decoded_json: String::new(),
        }
    }

    #[tokio::test]
    async fn schema_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();

        let mut record = schema("0xaa", 100);
        record.name = "Review".into();
        record.attestation_count = 7;
        store
            .apply(&[Mutation::put_schema(1, record.clone())], 2, None)
            .await
            .unwrap();

        let loaded = store.get_schema("0xaa").await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn attestation_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();

        let mut record = attestation("0xat", "0xaa", 50);
        record.decoded_json = r#"[{"name":"value","type":"uint256","value":"42"}]"#.into();
        record.expiration_time = u32::MAX as u64;
        store
            .apply(&[Mutation::put_attestation(1, record.clone())], 2, None)
            .await
            .unwrap();

        let loaded = store.get_attestation("0xat").await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn timestamp_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();

        let record = TimestampRecord {
            uid: "0xts".into(),
            timestamp: 1_700_000_000,
            submitter: "0x4444".into(),
            tx_hash: "0xcafe".into(),
        };
        store
            .apply(&[Mutation::put_timestamp(1, record.clone())], 2, None)
            .await
            .unwrap();

        let loaded = store.get_timestamp("0xts").await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn missing_rows_return_none() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.get_schema("0xnope").await.unwrap().is_none());
        assert!(store.get_attestation("0xnope").await.unwrap().is_none());
        assert!(store.get_timestamp("0xnope").await.unwrap().is_none());
        assert!(store.get_property("nope").await.unwrap().is_none());
        assert!(store.cursor().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_advances_cursor() {
        let store = SqliteStore::in_memory().await.unwrap();

        let report = store
            .apply(&[Mutation::put_schema(5, schema("0xaa", 100))], 10, None)
            .await
            .unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(store.cursor().await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn reapplying_below_cursor_is_a_no_op() {
        let store = SqliteStore::in_memory().await.unwrap();

        let batch = vec![
            Mutation::put_schema(5, schema("0xaa", 100)),
            Mutation::patch_schema(
                6,
                "0xaa",
                SchemaPatch {
                    name: None,
                    attestation_count: Some(1),
                },
            ),
        ];
        store.apply(&batch, 10, None).await.unwrap();

        let renamed = vec![Mutation::patch_schema(
            12,
            "0xaa",
            SchemaPatch {
                name: Some("Kept".into()),
                attestation_count: None,
            },
        )];
        store.apply(&renamed, 13, None).await.unwrap();

        let report = store.apply(&batch, 13, None).await.unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped, 2);

        let record = store.get_schema("0xaa").await.unwrap().unwrap();
        assert_eq!(record.name, "Kept");
        assert_eq!(record.attestation_count, 1);
    }

    #[tokio::test]
    async fn patch_applies_only_set_fields() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .apply(&[Mutation::put_attestation(1, attestation("0xat", "0xaa", 50))], 2, None)
            .await
            .unwrap();

        store
            .apply(
                &[Mutation::patch_attestation(
                    3,
                    "0xat",
                    AttestationPatch {
                        revoked: Some(true),
                        revocation_time: Some(99),
                    },
                )],
                4,
                None,
            )
            .await
            .unwrap();

        let record = store.get_attestation("0xat").await.unwrap().unwrap();
        assert!(record.revoked);
        assert_eq!(record.revocation_time, 99);
        // Untouched fields survive the patch.
        assert_eq!(record.attester, "0x2222");
        assert_eq!(record.attested_at, 50);
    }

    #[tokio::test]
    async fn patch_missing_row_is_ignored() {
        let store = SqliteStore::in_memory().await.unwrap();
        let report = store
            .apply(
                &[Mutation::patch_schema(
                    1,
                    "0xmissing",
                    SchemaPatch {
                        name: Some("Ghost".into()),
                        attestation_count: None,
                    },
                )],
                2,
                None,
            )
            .await
            .unwrap();
        assert_eq!(report.applied, 1);
        assert!(store.get_schema("0xmissing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkpoint_hash_is_recorded_with_the_batch() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .apply(&[Mutation::put_schema(1, schema("0xaa", 100))], 5, Some("abc123"))
            .await
            .unwrap();
        assert_eq!(
            store.get_property(keys::LAST_CHECKPOINT).await.unwrap(),
            Some("abc123".into())
        );
    }

    #[tokio::test]
    async fn queries_filter_and_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        let batch = vec![
            Mutation::put_schema(1, schema("0xaa", 100)),
            Mutation::put_schema(1, schema("0xbb", 50)),
            Mutation::put_attestation(2, attestation("0xa2", "0xaa", 20)),
            Mutation::put_attestation(2, attestation("0xa1", "0xaa", 10)),
            Mutation::put_attestation(2, attestation("0xa3", "0xbb", 30)),
        ];
        store.apply(&batch, 3, None).await.unwrap();

        let schemas = store.list_schemas().await.unwrap();
        assert_eq!(schemas[0].uid, "0xbb");

        let for_aa = store.attestations_for_schema("0xaa").await.unwrap();
        assert_eq!(for_aa.len(), 2);
        assert_eq!(for_aa[0].uid, "0xa1");

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.schemas, 2);
        assert_eq!(counts.attestations, 3);
        assert_eq!(counts.timestamps, 0);
    }

    #[tokio::test]
    async fn put_is_an_upsert() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .apply(&[Mutation::put_schema(1, schema("0xaa", 100))], 2, None)
            .await
            .unwrap();

        let mut updated = schema("0xaa", 100);
        updated.name = "Second".into();
        store
            .apply(&[Mutation::put_schema(3, updated)], 4, None)
            .await
            .unwrap();

        let loaded = store.get_schema("0xaa").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Second");
        assert_eq!(store.counts().await.unwrap().schemas, 1);
    }
}
