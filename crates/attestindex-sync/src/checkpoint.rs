//! Checkpoint publish and resume.
//!
//! A checkpoint is a contiguous batch of mutations, serialized as a JSON
//! array and named by the SHA-256 of those bytes: `{hash}.json`, with a
//! gzipped twin `{hash}.json.gz`. An ordered `index.json` manifest lists
//! `{min, max, hash}` per batch. A fresh instance replays the manifest
//! through the same cursor-gated [`IndexStore::apply`] the live loop uses,
//! then picks up indexing at `last.max + 1` instead of genesis.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use attestindex_core::error::IndexerError;
use attestindex_core::types::Mutation;
use attestindex_storage::{keys, IndexStore};

/// File name of the manifest.
pub const INDEX_FILE: &str = "index.json";

/// One manifest entry: a published batch and the block span it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// First block covered by the batch.
    pub min: u64,
    /// Last block covered by the batch (inclusive).
    pub max: u64,
    /// Hex SHA-256 of the batch's serialized bytes; also its file name.
    pub hash: String,
}

fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>, IndexerError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| IndexerError::Checkpoint(format!("gzip failed: {e}")))
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, IndexerError> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| IndexerError::Checkpoint(format!("gunzip failed: {e}")))?;
    Ok(out)
}

/// Parse plain batch bytes, verifying them against the expected content hash.
fn decode_batch(expected_hash: &str, bytes: &[u8]) -> Result<Vec<Mutation>, IndexerError> {
    let actual = content_hash(bytes);
    if actual != expected_hash {
        return Err(IndexerError::Checkpoint(format!(
            "batch {expected_hash} content mismatch (got {actual})"
        )));
    }
    serde_json::from_slice(bytes)
        .map_err(|e| IndexerError::Checkpoint(format!("batch {expected_hash} unparsable: {e}")))
}

// ─── Publishing ───────────────────────────────────────────────────────────────

/// Writes content-addressed checkpoint batches into a directory suitable for
/// serving from any static host.
pub struct CheckpointWriter {
    dir: PathBuf,
    entries: Vec<CheckpointEntry>,
}

impl CheckpointWriter {
    /// Open (or create) a checkpoint directory, loading any existing
    /// manifest so publishing continues where it left off.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, IndexerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| IndexerError::Checkpoint(format!("cannot create {dir:?}: {e}")))?;

        let index_path = dir.join(INDEX_FILE);
        let entries = if index_path.exists() {
            let raw = std::fs::read(&index_path)
                .map_err(|e| IndexerError::Checkpoint(format!("cannot read manifest: {e}")))?;
            serde_json::from_slice(&raw)
                .map_err(|e| IndexerError::Checkpoint(format!("manifest unparsable: {e}")))?
        } else {
            Vec::new()
        };

        Ok(Self { dir, entries })
    }

    /// Entries published so far, oldest first.
    pub fn entries(&self) -> &[CheckpointEntry] {
        &self.entries
    }

    /// The directory batches are written into.
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// First block not yet covered by a published batch.
    pub fn next_block(&self) -> Option<u64> {
        self.entries.last().map(|e| e.max + 1)
    }

    /// Publish one batch covering `[min, max]`: write `{hash}.json` and
    /// `{hash}.json.gz`, then rewrite the manifest.
    pub fn write_batch(
        &mut self,
        mutations: &[Mutation],
        min: u64,
        max: u64,
    ) -> Result<CheckpointEntry, IndexerError> {
        let bytes = serde_json::to_vec(mutations)
            .map_err(|e| IndexerError::Checkpoint(format!("batch serialization failed: {e}")))?;
        let hash = content_hash(&bytes);

        self.write_file(&format!("{hash}.json"), &bytes)?;
        self.write_file(&format!("{hash}.json.gz"), &gzip(&bytes)?)?;

        let entry = CheckpointEntry { min, max, hash };
        self.entries.push(entry.clone());

        let manifest = serde_json::to_vec(&self.entries)
            .map_err(|e| IndexerError::Checkpoint(format!("manifest serialization failed: {e}")))?;
        self.write_file(INDEX_FILE, &manifest)?;

        tracing::info!(
            min,
            max,
            hash = %entry.hash,
            mutations = mutations.len(),
            "checkpoint published"
        );
        Ok(entry)
    }

    fn write_file(&self, name: &str, bytes: &[u8]) -> Result<(), IndexerError> {
        std::fs::write(self.dir.join(name), bytes)
            .map_err(|e| IndexerError::Checkpoint(format!("cannot write {name}: {e}")))
    }
}

// ─── Fetching ─────────────────────────────────────────────────────────────────

/// Read side of the checkpoint protocol.
#[async_trait]
pub trait CheckpointSource: Send + Sync {
    /// The ordered manifest.
    async fn fetch_index(&self) -> Result<Vec<CheckpointEntry>, IndexerError>;

    /// One batch by content hash, verified against that hash.
    async fn fetch_batch(&self, hash: &str) -> Result<Vec<Mutation>, IndexerError>;
}

/// Fetches published checkpoints from a static HTTP host.
///
/// Prefers the gzipped batch variant; any failure there (missing file,
/// transport error, bad gzip stream) falls back to the plain file.
pub struct HttpCheckpointSource {
    base: String,
    http: reqwest::Client,
}

impl HttpCheckpointSource {
    pub fn new(base_url: &str) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IndexerError::Checkpoint(format!("http client: {e}")))?;
        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn fetch_file(&self, name: &str) -> Result<Vec<u8>, IndexerError> {
        let url = format!("{}/{name}", self.base);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| IndexerError::Checkpoint(format!("GET {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(IndexerError::Checkpoint(format!(
                "GET {url}: status {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| IndexerError::Checkpoint(format!("GET {url}: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl CheckpointSource for HttpCheckpointSource {
    async fn fetch_index(&self) -> Result<Vec<CheckpointEntry>, IndexerError> {
        let raw = self.fetch_file(INDEX_FILE).await?;
        serde_json::from_slice(&raw)
            .map_err(|e| IndexerError::Checkpoint(format!("manifest unparsable: {e}")))
    }

    async fn fetch_batch(&self, hash: &str) -> Result<Vec<Mutation>, IndexerError> {
        let plain = match self.fetch_file(&format!("{hash}.json.gz")).await {
            Ok(gz) => match gunzip(&gz) {
                Ok(plain) => plain,
                Err(e) => {
                    tracing::debug!(hash, %e, "gzip batch unusable, trying plain");
                    self.fetch_file(&format!("{hash}.json")).await?
                }
            },
            Err(e) => {
                tracing::debug!(hash, %e, "gzip batch unavailable, trying plain");
                self.fetch_file(&format!("{hash}.json")).await?
            }
        };
        decode_batch(hash, &plain)
    }
}

/// Fetches checkpoints from a local directory (the [`CheckpointWriter`]
/// layout). Used by tests and by the publisher to re-seed its scratch store.
pub struct DirCheckpointSource {
    dir: PathBuf,
}

impl DirCheckpointSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>, IndexerError> {
        std::fs::read(self.dir.join(name))
            .map_err(|e| IndexerError::Checkpoint(format!("cannot read {name}: {e}")))
    }
}

#[async_trait]
impl CheckpointSource for DirCheckpointSource {
    async fn fetch_index(&self) -> Result<Vec<CheckpointEntry>, IndexerError> {
        // A directory with no manifest simply has nothing published yet.
        if !self.dir.join(INDEX_FILE).exists() {
            return Ok(Vec::new());
        }
        let raw = self.read_file(INDEX_FILE)?;
        serde_json::from_slice(&raw)
            .map_err(|e| IndexerError::Checkpoint(format!("manifest unparsable: {e}")))
    }

    async fn fetch_batch(&self, hash: &str) -> Result<Vec<Mutation>, IndexerError> {
        let plain = match self.read_file(&format!("{hash}.json.gz")).and_then(|gz| gunzip(&gz)) {
            Ok(plain) => plain,
            Err(e) => {
                tracing::debug!(hash, %e, "gzip batch unusable, trying plain");
                self.read_file(&format!("{hash}.json"))?
            }
        };
        decode_batch(hash, &plain)
    }
}

// ─── Resume ───────────────────────────────────────────────────────────────────

/// Outcome of a checkpoint resume pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeReport {
    /// Batches fetched and applied.
    pub batches: usize,
    /// Mutations applied across those batches.
    pub applied: usize,
    /// Mutations skipped by the cursor gate.
    pub skipped: usize,
    /// Cursor after the pass.
    pub cursor: u64,
}

/// Replay published checkpoints into `store`.
///
/// Applies every manifest entry that reaches at or past the current cursor,
/// except the one whose hash is already recorded as applied. Each batch goes
/// through the store's cursor-gated apply, so interrupting and restarting a
/// resume is safe.
pub async fn resume(
    store: &dyn IndexStore,
    source: &dyn CheckpointSource,
) -> Result<ResumeReport, IndexerError> {
    let mut cursor = store.cursor().await?.unwrap_or(0);
    let last_applied = store.get_property(keys::LAST_CHECKPOINT).await?;

    let index = source.fetch_index().await?;
    let mut report = ResumeReport {
        cursor,
        ..ResumeReport::default()
    };

    for entry in index {
        if entry.max < cursor || last_applied.as_deref() == Some(entry.hash.as_str()) {
            tracing::debug!(min = entry.min, max = entry.max, hash = %entry.hash, "checkpoint already covered");
            continue;
        }
        let batch = source.fetch_batch(&entry.hash).await?;
        let applied = store.apply(&batch, entry.max + 1, Some(&entry.hash)).await?;
        cursor = entry.max + 1;

        report.batches += 1;
        report.applied += applied.applied;
        report.skipped += applied.skipped;
        report.cursor = cursor;

        tracing::info!(
            min = entry.min,
            max = entry.max,
            hash = %entry.hash,
            applied = applied.applied,
            skipped = applied.skipped,
            "checkpoint applied"
        );
    }

    Ok(report)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use attestindex_core::types::{AttestationRecord, SchemaRecord};
    use attestindex_storage::InMemoryStore;

    fn schema(uid: &str) -> SchemaRecord {
        SchemaRecord {
            uid: uid.into(),
            definition: "uint256 value".into(),
            creator: "0x1111".into(),
            resolver: "0x0000".into(),
            registered_at: 1_700_000_000,
            registration_tx: "0xdead".into(),
            revocable: true,
            name: String::new(),
            attestation_count: 0,
        }
    }

    fn attestation(uid: &str, schema_uid: &str) -> AttestationRecord {
        AttestationRecord {
            uid: uid.into(),
            schema_uid: schema_uid.into(),
            payload: "0x".into(),
            attester: "0x2222".into(),
            recipient: "0x3333".into(),
            ref_uid: "0x0000".into(),
            revocation_time: 0,
            expiration_time: 0,
            attested_at: 1_700_000_100,
            tx_hash: "0xbeef".into(),
            revoked: false,
            observed_at: 1_700_000_200,
            revocable: true,
            decoded_json: String::new(),
        }
    }

    fn publish_two_batches(dir: &Path) -> (CheckpointEntry, CheckpointEntry) {
        let mut writer = CheckpointWriter::open(dir).unwrap();
        let first = writer
            .write_batch(&[Mutation::put_schema(5, schema("0xs1"))], 0, 99)
            .unwrap();
        let second = writer
            .write_batch(
                &[Mutation::put_attestation(150, attestation("0xa1", "0xs1"))],
                100,
                199,
            )
            .unwrap();
        (first, second)
    }

    #[test]
    fn published_files_are_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _) = publish_two_batches(dir.path());

        let plain = std::fs::read(dir.path().join(format!("{}.json", first.hash))).unwrap();
        assert_eq!(content_hash(&plain), first.hash);

        let batch: Vec<Mutation> = serde_json::from_slice(&plain).unwrap();
        assert_eq!(batch, vec![Mutation::put_schema(5, schema("0xs1"))]);
    }

    #[test]
    fn gzip_twin_matches_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _) = publish_two_batches(dir.path());

        let plain = std::fs::read(dir.path().join(format!("{}.json", first.hash))).unwrap();
        let gz = std::fs::read(dir.path().join(format!("{}.json.gz", first.hash))).unwrap();
        assert_eq!(gunzip(&gz).unwrap(), plain);
    }

    #[test]
    fn manifest_lists_batches_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (first, second) = publish_two_batches(dir.path());

        let raw = std::fs::read(dir.path().join(INDEX_FILE)).unwrap();
        let index: Vec<CheckpointEntry> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(index, vec![first, second]);
        assert_eq!(index[0].min, 0);
        assert_eq!(index[1].max, 199);
    }

    #[test]
    fn reopened_writer_continues_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        publish_two_batches(dir.path());

        let writer = CheckpointWriter::open(dir.path()).unwrap();
        assert_eq!(writer.entries().len(), 2);
        assert_eq!(writer.next_block(), Some(200));
    }

    #[tokio::test]
    async fn resume_replays_batches_and_advances_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let (_, second) = publish_two_batches(dir.path());

        let store = InMemoryStore::new();
        let source = DirCheckpointSource::new(dir.path());
        let report = resume(&store, &source).await.unwrap();

        assert_eq!(report.batches, 2);
        assert_eq!(report.applied, 2);
        assert_eq!(report.cursor, 200);
        assert_eq!(store.cursor().await.unwrap(), Some(200));
        assert!(store.get_schema("0xs1").await.unwrap().is_some());
        assert!(store.get_attestation("0xa1").await.unwrap().is_some());
        assert_eq!(
            store.get_property(keys::LAST_CHECKPOINT).await.unwrap(),
            Some(second.hash)
        );
    }

    #[tokio::test]
    async fn resume_is_a_no_op_once_caught_up() {
        let dir = tempfile::tempdir().unwrap();
        publish_two_batches(dir.path());

        let store = InMemoryStore::new();
        let source = DirCheckpointSource::new(dir.path());
        resume(&store, &source).await.unwrap();

        let again = resume(&store, &source).await.unwrap();
        assert_eq!(again.batches, 0);
        assert_eq!(again.cursor, 200);
    }

    #[tokio::test]
    async fn resume_skips_the_recorded_last_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (_, second) = publish_two_batches(dir.path());

        // A store whose cursor lags the batch it already consumed.
        let store = InMemoryStore::new();
        store.apply(&[], 150, Some(&second.hash)).await.unwrap();

        let source = DirCheckpointSource::new(dir.path());
        let report = resume(&store, &source).await.unwrap();
        assert_eq!(report.batches, 0);
        assert_eq!(store.cursor().await.unwrap(), Some(150));
    }

    #[tokio::test]
    async fn resume_from_empty_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::new();
        let source = DirCheckpointSource::new(dir.path());
        let report = resume(&store, &source).await.unwrap();
        assert_eq!(report.batches, 0);
        assert_eq!(report.cursor, 0);
    }

    #[tokio::test]
    async fn tampered_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _) = publish_two_batches(dir.path());

        std::fs::write(dir.path().join(format!("{}.json", first.hash)), b"[]").unwrap();
        std::fs::remove_file(dir.path().join(format!("{}.json.gz", first.hash))).unwrap();

        let source = DirCheckpointSource::new(dir.path());
        let err = source.fetch_batch(&first.hash).await.unwrap_err();
        assert!(matches!(err, IndexerError::Checkpoint(_)));
    }

    #[tokio::test]
    async fn missing_gzip_falls_back_to_plain() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _) = publish_two_batches(dir.path());

        std::fs::remove_file(dir.path().join(format!("{}.json.gz", first.hash))).unwrap();

        let source = DirCheckpointSource::new(dir.path());
        let batch = source.fetch_batch(&first.hash).await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
