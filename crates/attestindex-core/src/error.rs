//! Error types for the attestindex pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Schema parse error in {definition:?}: {reason}")]
    SchemaParse { definition: String, reason: String },

    #[error("Payload decode error: {0}")]
    Decode(String),

    #[error("{kind} {uid} not visible on chain after {attempts} attempts")]
    RecordUnavailable {
        kind: &'static str,
        uid: String,
        attempts: u32,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },
}

impl IndexerError {
    /// Returns `true` if retrying the same block range may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::RecordUnavailable { .. })
    }
}
