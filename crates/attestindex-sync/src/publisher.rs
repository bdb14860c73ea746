//! Standalone checkpoint publisher.
//!
//! Runs the compiler against a throwaway in-memory store and flushes the
//! compiled mutations into content-addressed checkpoint files every `span`
//! blocks. The output directory can be served by any static host; consumers
//! bootstrap from it with [`crate::checkpoint::resume`] instead of replaying
//! the chain through RPC calls.

use std::sync::atomic::{AtomicBool, Ordering};

use attestindex_core::error::IndexerError;
use attestindex_core::types::Mutation;
use attestindex_evm::{AttestationRpc, MutationCompiler};
use attestindex_storage::{IndexStore, InMemoryStore};

use crate::checkpoint::{resume, CheckpointWriter, DirCheckpointSource};
use crate::driver::{pause, starting_block};

/// Compiles the chain into checkpoint batches instead of a live store.
pub struct CheckpointPublisher<R> {
    compiler: MutationCompiler<R>,
    writer: CheckpointWriter,
    /// Blocks per published batch.
    span: u64,
}

impl<R: AttestationRpc> CheckpointPublisher<R> {
    pub fn new(compiler: MutationCompiler<R>, writer: CheckpointWriter, span: u64) -> Self {
        Self {
            compiler,
            writer,
            span,
        }
    }

    /// Publish until `stop` is set, flushing any buffered tail on the way
    /// out.
    pub async fn run(&mut self, stop: &AtomicBool) -> Result<(), IndexerError> {
        // The scratch store only serves cross-window schema lookups.
        // Replaying the already-published batches re-seeds it after a
        // restart, keeping attestations against old schemas resolvable.
        let scratch = InMemoryStore::new();
        let replayed = resume(&scratch, &DirCheckpointSource::new(self.writer.dir())).await?;
        if replayed.batches > 0 {
            tracing::info!(
                batches = replayed.batches,
                cursor = replayed.cursor,
                "scratch store re-seeded from published checkpoints"
            );
        }

        let mut from = match self.writer.next_block() {
            Some(block) => block,
            None => starting_block(self.compiler.rpc(), self.compiler.config(), &scratch).await?,
        };
        let mut batch_min = from;
        let mut pending: Vec<Mutation> = Vec::new();

        tracing::info!(
            chain = %self.compiler.config().chain,
            from,
            span = self.span,
            "publisher starting"
        );

        while !stop.load(Ordering::Relaxed) {
            let outcome = match self.compiler.compile(&scratch, from).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(
                        chain = %self.compiler.config().chain,
                        from,
                        error = %e,
                        "publish cycle failed, retrying window"
                    );
                    pause(self.compiler.config().cycle_delay(), stop).await;
                    continue;
                }
            };
            scratch
                .apply(&outcome.mutations, outcome.next_block, None)
                .await?;
            pending.extend(outcome.mutations);
            from = outcome.next_block;

            // Event-free spans fold into the next batch; zero-mutation files
            // are never published.
            if from >= batch_min + self.span && !pending.is_empty() {
                self.writer.write_batch(&pending, batch_min, from - 1)?;
                pending.clear();
                batch_min = from;
            }

            if !outcome.has_more {
                pause(self.compiler.config().cycle_delay(), stop).await;
            }
        }

        if !pending.is_empty() {
            self.writer.write_batch(&pending, batch_min, from - 1)?;
        }
        tracing::info!(chain = %self.compiler.config().chain, "publisher stopped");
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
