//! The chain access trait the compiler is written against.
//!
//! Log fetches return *classified* events rather than raw topic/data blobs:
//! the transport layer (see [`crate::http`]) owns the ABI layout of each
//! event, and the compiler only sees domain values. Record reads return
//! `Ok(None)` when the node cannot serve the record *yet* (lagging provider),
//! which the compiler turns into bounded retries.

use async_trait::async_trait;

use attestindex_core::error::IndexerError;

/// A `Registered` event from the schema registry contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLog {
    /// Uid of the registered schema.
    pub uid: String,
    pub block_number: u64,
    pub tx_hash: String,
}

/// One classified event from the attestation contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationLog {
    pub event: AttestationLogEvent,
    pub block_number: u64,
    pub tx_hash: String,
}

/// The attestation contract's event vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationLogEvent {
    /// A new attestation was created.
    Attested { uid: String, schema_uid: String },
    /// An existing attestation was revoked.
    Revoked { uid: String, schema_uid: String },
    /// A data hash was timestamped on chain.
    Timestamped { data: String, timestamp: u64 },
    /// An offchain attestation was revoked by its data hash. Recognized so
    /// the fetch filter stays exhaustive, but never indexed.
    RevokedOffchain {
        revoker: String,
        data: String,
        timestamp: u64,
    },
}

impl AttestationLogEvent {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Attested { .. } => "attested",
            Self::Revoked { .. } => "revoked",
            Self::Timestamped { .. } => "timestamped",
            Self::RevokedOffchain { .. } => "revoked-offchain",
        }
    }
}

/// The authoritative schema record as stored by the registry contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnchainSchema {
    pub uid: String,
    /// Raw definition string (e.g. `"uint256 value, address owner"`).
    pub definition: String,
    pub resolver: String,
    pub revocable: bool,
}

/// The authoritative attestation record as stored by the attestation contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnchainAttestation {
    pub uid: String,
    pub schema_uid: String,
    pub attester: String,
    pub recipient: String,
    pub ref_uid: String,
    /// ABI-encoded payload (`0x…` hex).
    pub data: String,
    /// Unix timestamp of attestation; `0` on chains that don't record it.
    pub time: u64,
    pub expiration_time: u64,
    pub revocation_time: u64,
    pub revocable: bool,
}

/// A transaction summary, used to recover the sender of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSummary {
    pub hash: String,
    pub from: String,
    pub block_number: u64,
}

/// Everything the compiler needs from a chain.
///
/// `get_schema`/`get_attestation`/`get_transaction` return `Ok(None)` when
/// the record is not visible on the queried node yet; transport failures are
/// `Err`.
#[async_trait]
pub trait AttestationRpc: Send + Sync {
    /// Current head block number.
    async fn head_block(&self) -> Result<u64, IndexerError>;

    /// Unix timestamp of a block, or `None` if the node doesn't know it.
    async fn block_timestamp(&self, number: u64) -> Result<Option<i64>, IndexerError>;

    /// Transaction lookup by hash.
    async fn get_transaction(&self, hash: &str) -> Result<Option<TxSummary>, IndexerError>;

    /// `Registered` events in `[from, to]` (inclusive).
    async fn registry_logs(&self, from: u64, to: u64) -> Result<Vec<RegistryLog>, IndexerError>;

    /// Attestation contract events in `[from, to]` (inclusive).
    async fn attestation_logs(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<AttestationLog>, IndexerError>;

    /// Authoritative schema read from the registry contract.
    async fn get_schema(&self, uid: &str) -> Result<Option<OnchainSchema>, IndexerError>;

    /// Authoritative attestation read from the attestation contract.
    async fn get_attestation(&self, uid: &str)
        -> Result<Option<OnchainAttestation>, IndexerError>;
}
