//! In-memory store backend.
//!
//! Keeps the four mirrored tables in RAM behind a single mutex, which is what
//! makes the batch apply atomic. Useful for tests and short-lived indexers
//! that don't need persistence.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

use attestindex_core::error::IndexerError;
use attestindex_core::types::{
    AttestationRecord, Mutation, MutationOp, SchemaRecord, TimestampRecord,
};

use crate::{keys, ApplyReport, IndexStore, TableCounts};

/// In-memory index store. All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    properties: HashMap<String, String>,
    schemas: HashMap<String, SchemaRecord>,
    attestations: HashMap<String, AttestationRecord>,
    timestamps: HashMap<String, TimestampRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn cursor(&self) -> u64 {
        self.properties
            .get(keys::NEXT_BLOCK)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn apply_op(&mut self, op: &MutationOp) {
        match op {
            MutationOp::PutSchema(record) => {
                self.schemas.insert(record.uid.clone(), record.clone());
            }
            MutationOp::PutAttestation(record) => {
                self.attestations.insert(record.uid.clone(), record.clone());
            }
            MutationOp::PutTimestamp(record) => {
                self.timestamps.insert(record.uid.clone(), record.clone());
            }
            MutationOp::PatchSchema { uid, patch } => match self.schemas.get_mut(uid) {
                Some(record) => {
                    if let Some(name) = &patch.name {
                        record.name = name.clone();
                    }
                    if let Some(count) = patch.attestation_count {
                        record.attestation_count = count;
                    }
                }
                None => warn!(uid, "schema patch target missing"),
            },
            MutationOp::PatchAttestation { uid, patch } => {
                match self.attestations.get_mut(uid) {
                    Some(record) => {
                        if let Some(revoked) = patch.revoked {
                            record.revoked = revoked;
                        }
                        if let Some(time) = patch.revocation_time {
                            record.revocation_time = time;
                        }
                    }
                    None => warn!(uid, "attestation patch target missing"),
                }
            }
        }
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn get_property(&self, key: &str) -> Result<Option<String>, IndexerError> {
        Ok(self.inner.lock().unwrap().properties.get(key).cloned())
    }

    async fn get_schema(&self, uid: &str) -> Result<Option<SchemaRecord>, IndexerError> {
        Ok(self.inner.lock().unwrap().schemas.get(uid).cloned())
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaRecord>, IndexerError> {
        let mut schemas: Vec<_> = self.inner.lock().unwrap().schemas.values().cloned().collect();
        schemas.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.uid.cmp(&b.uid))
        });
        Ok(schemas)
    }

    async fn get_attestation(&self, uid: &str) -> Result<Option<AttestationRecord>, IndexerError> {
        Ok(self.inner.lock().unwrap().attestations.get(uid).cloned())
    }

    async fn attestations_for_schema(
        &self,
        schema_uid: &str,
    ) -> Result<Vec<AttestationRecord>, IndexerError> {
        let mut records: Vec<_> = self
            .inner
            .lock()
            .unwrap()
            .attestations
            .values()
            .filter(|a| a.schema_uid == schema_uid)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.attested_at
                .cmp(&b.attested_at)
                .then_with(|| a.uid.cmp(&b.uid))
        });
        Ok(records)
    }

    async fn get_timestamp(&self, uid: &str) -> Result<Option<TimestampRecord>, IndexerError> {
        Ok(self.inner.lock().unwrap().timestamps.get(uid).cloned())
    }

    async fn counts(&self) -> Result<TableCounts, IndexerError> {
        let inner = self.inner.lock().unwrap();
        Ok(TableCounts {
            schemas: inner.schemas.len() as u64,
            attestations: inner.attestations.len() as u64,
            timestamps: inner.timestamps.len() as u64,
        })
    }

    async fn apply(
        &self,
        mutations: &[Mutation],
        new_cursor: u64,
        checkpoint_hash: Option<&str>,
    ) -> Result<ApplyReport, IndexerError> {
        let mut inner = self.inner.lock().unwrap();
        let cursor = inner.cursor();

        let mut report = ApplyReport::default();
        for mutation in mutations {
            if mutation.origin_block < cursor {
                report.skipped += 1;
                continue;
            }
            inner.apply_op(&mutation.op);
            report.applied += 1;
        }

        inner
            .properties
            .insert(keys::NEXT_BLOCK.into(), new_cursor.to_string());
        if let Some(hash) = checkpoint_hash {
            inner
                .properties
                .insert(keys::LAST_CHECKPOINT.into(), hash.to_string());
        }
        Ok(report)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

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
    async fn apply_advances_cursor() {
        let store = InMemoryStore::new();
        assert!(store.cursor().await.unwrap().is_none());

        let batch = vec![Mutation::put_schema(5, schema("0xaa", 100))];
        let report = store.apply(&batch, 10, None).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(store.cursor().await.unwrap(), Some(10));
        assert!(store.get_schema("0xaa").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reapplying_below_cursor_is_a_no_op() {
        let store = InMemoryStore::new();

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

        // Mutate state out-of-band so a replay would be visible.
        let renamed = vec![Mutation::patch_schema(
            12,
            "0xaa",
            SchemaPatch {
                name: Some("Kept".into()),
                attestation_count: None,
            },
        )];
        store.apply(&renamed, 13, None).await.unwrap();

        // Replay of the original batch: every origin block < 13, so nothing changes.
        let report = store.apply(&batch, 13, None).await.unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped, 2);

        let record = store.get_schema("0xaa").await.unwrap().unwrap();
        assert_eq!(record.name, "Kept");
        assert_eq!(record.attestation_count, 1);
    }

    #[tokio::test]
    async fn patch_missing_row_is_ignored() {
        let store = InMemoryStore::new();
        let batch = vec![Mutation::patch_attestation(
            1,
            "0xmissing",
            AttestationPatch {
                revoked: Some(true),
                revocation_time: Some(123),
            },
        )];
        let report = store.apply(&batch, 2, None).await.unwrap();
        assert_eq!(report.applied, 1);
        assert!(store.get_attestation("0xmissing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revocation_patch_updates_attestation() {
        let store = InMemoryStore::new();
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
    }

    #[tokio::test]
    async fn checkpoint_hash_is_recorded_with_the_batch() {
        let store = InMemoryStore::new();
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
        let store = InMemoryStore::new();
        let batch = vec![
            Mutation::put_schema(1, schema("0xaa", 100)),
            Mutation::put_schema(1, schema("0xbb", 50)),
            Mutation::put_attestation(2, attestation("0xa2", "0xaa", 20)),
            Mutation::put_attestation(2, attestation("0xa1", "0xaa", 10)),
            Mutation::put_attestation(2, attestation("0xa3", "0xbb", 30)),
        ];
        store.apply(&batch, 3, None).await.unwrap();

        let schemas = store.list_schemas().await.unwrap();
        assert_eq!(schemas[0].uid, "0xbb"); // earliest registration first

        let for_aa = store.attestations_for_schema("0xaa").await.unwrap();
        assert_eq!(for_aa.len(), 2);
        assert_eq!(for_aa[0].uid, "0xa1");

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.schemas, 2);
        assert_eq!(counts.attestations, 3);
        assert_eq!(counts.timestamps, 0);
    }
}
