//! attestindex-evm — chain access and the event-to-mutation compiler.
//!
//! Modules:
//! - [`rpc`] — the [`AttestationRpc`] trait: everything the compiler needs
//!   from a chain (head block, classified logs, authoritative record reads)
//! - [`http`] — JSON-RPC implementation of [`AttestationRpc`] over `reqwest`
//! - [`codec`] — ABI payload encode/decode against a parsed schema definition
//! - [`compiler`] — turns a window of on-chain events into an ordered
//!   mutation batch

pub mod codec;
pub mod compiler;
pub mod http;
pub mod rpc;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use codec::{decode_payload, encode_payload, DecodedField};
pub use compiler::{CompileOutcome, MutationCompiler, NAME_SCHEMA_UID};
pub use http::HttpRpc;
pub use rpc::{
    AttestationLog, AttestationLogEvent, AttestationRpc, OnchainAttestation, OnchainSchema,
    RegistryLog, TxSummary,
};
