//! Record and mutation types for the indexing pipeline.

use serde::{Deserialize, Serialize};

// ─── SchemaRecord ─────────────────────────────────────────────────────────────

/// A locally mirrored schema registration.
///
/// Created once per `Registered` event. `name` and `attestation_count` are the
/// only fields mutated afterwards (via [`SchemaPatch`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    /// Schema uid (`0x…`, 32 bytes). Immutable and unique.
    pub uid: String,
    /// The raw schema definition string (e.g. `"uint256 value, address owner"`).
    pub definition: String,
    /// Address that sent the registration transaction.
    pub creator: String,
    /// Resolver contract address (`0x0…0` when unset).
    pub resolver: String,
    /// Unix timestamp of the registration block (seconds).
    pub registered_at: i64,
    /// Transaction hash of the registration.
    pub registration_tx: String,
    /// Whether attestations against this schema can be revoked.
    pub revocable: bool,
    /// Human-readable name, assigned later through a naming attestation.
    pub name: String,
    /// Number of attestations accepted against this schema so far.
    pub attestation_count: u64,
}

// ─── AttestationRecord ────────────────────────────────────────────────────────

/// A locally mirrored attestation.
///
/// Created once per `Attested` event; `revoked`/`revocation_time` are mutated
/// later by a `Revoked` event (via [`AttestationPatch`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRecord {
    /// Attestation uid (`0x…`, 32 bytes).
    pub uid: String,
    /// Uid of the schema this attestation conforms to.
    pub schema_uid: String,
    /// Raw ABI-encoded payload (`0x…` hex).
    pub payload: String,
    /// Address that created the attestation.
    pub attester: String,
    /// Address the attestation is about.
    pub recipient: String,
    /// Uid of a referenced attestation (`0x0…0` when unset).
    pub ref_uid: String,
    /// Unix timestamp of revocation; `0` = not revoked.
    pub revocation_time: u64,
    /// Unix timestamp of expiration; `0` = never expires.
    pub expiration_time: u64,
    /// Unix timestamp the attestation was made on chain.
    pub attested_at: i64,
    /// Transaction hash of the attestation.
    pub tx_hash: String,
    /// Whether the attestation is currently revoked.
    pub revoked: bool,
    /// Unix timestamp when this record was compiled locally.
    pub observed_at: i64,
    /// Whether the attestation can be revoked.
    pub revocable: bool,
    /// Payload decoded against the schema's field list, as JSON.
    /// Empty when decoding failed (non-fatal).
    pub decoded_json: String,
}

// ─── TimestampRecord ──────────────────────────────────────────────────────────

/// A locally mirrored timestamp proof. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRecord {
    /// The timestamped data hash (`0x…`, 32 bytes).
    pub uid: String,
    /// Unix timestamp recorded on chain.
    pub timestamp: u64,
    /// Address that submitted the timestamp transaction.
    pub submitter: String,
    /// Transaction hash.
    pub tx_hash: String,
}

// ─── Patches ──────────────────────────────────────────────────────────────────

/// Partial update to a [`SchemaRecord`]. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_count: Option<u64>,
}

/// Partial update to an [`AttestationRecord`]. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_time: Option<u64>,
}

// ─── Mutation ─────────────────────────────────────────────────────────────────

/// A single store operation compiled from an on-chain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationOp {
    PutSchema(SchemaRecord),
    PutAttestation(AttestationRecord),
    PutTimestamp(TimestampRecord),
    PatchSchema { uid: String, patch: SchemaPatch },
    PatchAttestation { uid: String, patch: AttestationPatch },
}

impl MutationOp {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PutSchema(_) => "put-schema",
            Self::PutAttestation(_) => "put-attestation",
            Self::PutTimestamp(_) => "put-timestamp",
            Self::PatchSchema { .. } => "patch-schema",
            Self::PatchAttestation { .. } => "patch-attestation",
        }
    }
}

/// A [`MutationOp`] tagged with the block of its originating event.
///
/// The origin block is what makes at-least-once delivery safe: the store skips
/// any mutation whose `origin_block` is below the current cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Block number of the event this mutation was compiled from.
    pub origin_block: u64,
    /// The store operation to perform.
    #[serde(flatten)]
    pub op: MutationOp,
}

impl Mutation {
    pub fn put_schema(origin_block: u64, record: SchemaRecord) -> Self {
        Self {
            origin_block,
            op: MutationOp::PutSchema(record),
        }
    }

    pub fn put_attestation(origin_block: u64, record: AttestationRecord) -> Self {
        Self {
            origin_block,
            op: MutationOp::PutAttestation(record),
        }
    }

    pub fn put_timestamp(origin_block: u64, record: TimestampRecord) -> Self {
        Self {
            origin_block,
            op: MutationOp::PutTimestamp(record),
        }
    }

    pub fn patch_schema(origin_block: u64, uid: impl Into<String>, patch: SchemaPatch) -> Self {
        Self {
            origin_block,
            op: MutationOp::PatchSchema {
                uid: uid.into(),
                patch,
            },
        }
    }

    pub fn patch_attestation(
        origin_block: u64,
        uid: impl Into<String>,
        patch: AttestationPatch,
    ) -> Self {
        Self {
            origin_block,
            op: MutationOp::PatchAttestation {
                uid: uid.into(),
                patch,
            },
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
