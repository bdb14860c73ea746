//! attestindex-sync — keeps a local store in step with the chain.
//!
//! Three moving parts:
//! - [`driver`] — the per-chain compile→apply loop with cooperative stop.
//! - [`checkpoint`] — content-addressed batch publish, plus resume: a fresh
//!   instance replays published batches before touching the chain.
//! - [`publisher`] — a standalone mode that compiles the chain into
//!   checkpoint files for a static host instead of a live store.

pub mod checkpoint;
pub mod driver;
pub mod publisher;

pub use checkpoint::{
    resume, CheckpointEntry, CheckpointSource, CheckpointWriter, DirCheckpointSource,
    HttpCheckpointSource, ResumeReport,
};
pub use driver::{starting_block, IndexDriver};
pub use publisher::CheckpointPublisher;
