//! attestindex-core — foundation for the incremental attestation indexing engine.
//!
//! # Architecture
//!
//! ```text
//! IndexDriver → MutationCompiler
//!                   ├── BlockRangeScanner  (bisection retry over getLogs)
//!                   ├── schema codec       (field grammar, payload layout)
//!                   └── schema cache       (same-batch referential consistency)
//!               IndexStore               (cursor-gated atomic apply)
//!               CheckpointWriter/Client  (content-addressed publish/resume)
//! ```

pub mod config;
pub mod error;
pub mod scanner;
pub mod schema;
pub mod types;

pub use config::{ChainConfig, RetryPolicy};
pub use error::IndexerError;
pub use scanner::BlockRangeScanner;
pub use schema::{FieldType, SchemaField};
pub use types::{
    AttestationPatch, AttestationRecord, Mutation, MutationOp, SchemaPatch, SchemaRecord,
    TimestampRecord,
};
