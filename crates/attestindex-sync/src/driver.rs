//! The per-chain index loop.
//!
//! One chain, one driver, one sequential loop: compile a window, apply the
//! batch, pace, repeat. The stop signal is polled at the top of each cycle
//! and inside the pacing delay, never mid-apply. A failed cycle leaves no
//! partial state (apply is transactional), so recovery is retrying the same
//! window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use attestindex_core::config::ChainConfig;
use attestindex_core::error::IndexerError;
use attestindex_evm::{AttestationRpc, CompileOutcome, MutationCompiler};
use attestindex_storage::IndexStore;

/// First block to index: the stored cursor when one exists, else the block
/// of the configured deployment transaction, else genesis.
pub async fn starting_block<R: AttestationRpc>(
    rpc: &R,
    config: &ChainConfig,
    store: &dyn IndexStore,
) -> Result<u64, IndexerError> {
    if let Some(cursor) = store.cursor().await? {
        return Ok(cursor);
    }
    match &config.deployment_tx {
        Some(hash) => {
            let tx = rpc.get_transaction(hash).await?.ok_or_else(|| {
                IndexerError::Rpc(format!("deployment transaction {hash} not found"))
            })?;
            Ok(tx.block_number)
        }
        None => Ok(0),
    }
}

/// Sleep for `total`, waking early when `stop` is set.
pub(crate) async fn pause(total: Duration, stop: &AtomicBool) {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while !stop.load(Ordering::Relaxed) && !remaining.is_zero() {
        let step = remaining.min(slice);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
}

/// Runs the compile→apply loop for one chain.
pub struct IndexDriver<R> {
    compiler: MutationCompiler<R>,
}

impl<R: AttestationRpc> IndexDriver<R> {
    pub fn new(compiler: MutationCompiler<R>) -> Self {
        Self { compiler }
    }

    pub fn compiler(&self) -> &MutationCompiler<R> {
        &self.compiler
    }

    fn config(&self) -> &ChainConfig {
        self.compiler.config()
    }

    /// Compile one window at `from` and apply its mutations.
    async fn step(
        &self,
        store: &dyn IndexStore,
        from: u64,
    ) -> Result<CompileOutcome, IndexerError> {
        let outcome = self.compiler.compile(store, from).await?;
        if outcome.next_block > from || !outcome.mutations.is_empty() {
            let report = store
                .apply(&outcome.mutations, outcome.next_block, None)
                .await?;
            tracing::info!(
                chain = %self.config().chain,
                from,
                next = outcome.next_block,
                applied = report.applied,
                skipped = report.skipped,
                "window applied"
            );
        }
        Ok(outcome)
    }

    /// Compile and apply windows until the chain head is reached.
    ///
    /// Returns the cursor after the last window. Errors are not retried;
    /// callers wanting the resilient loop use [`IndexDriver::run`].
    pub async fn catch_up(&self, store: &dyn IndexStore) -> Result<u64, IndexerError> {
        let mut from = starting_block(self.compiler.rpc(), self.config(), store).await?;
        loop {
            let outcome = self.step(store, from).await?;
            from = outcome.next_block;
            if !outcome.has_more {
                return Ok(from);
            }
        }
    }

    /// Run the loop until `stop` is set.
    ///
    /// Transient failures are logged and the window retried after the pacing
    /// delay; the cursor only moves on success.
    pub async fn run(&self, store: &dyn IndexStore, stop: &AtomicBool) -> Result<(), IndexerError> {
        let mut from = starting_block(self.compiler.rpc(), self.config(), store).await?;
        tracing::info!(chain = %self.config().chain, from, "index loop starting");

        while !stop.load(Ordering::Relaxed) {
            match self.step(store, from).await {
                Ok(outcome) => {
                    from = outcome.next_block;
                    // Behind the head: keep going at full speed. At the
                    // head: pace before polling again.
                    if !outcome.has_more {
                        pause(self.config().cycle_delay(), stop).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        chain = %self.config().chain,
                        from,
                        error = %e,
                        "cycle failed, retrying window"
                    );
                    pause(self.config().cycle_delay(), stop).await;
                }
            }
        }

        tracing::info!(chain = %self.config().chain, "index loop stopped");
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use attestindex_core::config::RetryPolicy;
    use attestindex_evm::mock::MockRpc;
    use attestindex_evm::{AttestationLogEvent, OnchainAttestation, OnchainSchema};
    use attestindex_storage::InMemoryStore;

    fn test_config() -> ChainConfig {
        ChainConfig {
            chain: "testchain".into(),
            batch_size: 50,
            // Small but nonzero: the loop yields at the head instead of
            // monopolizing the test runtime.
            cycle_delay_ms: 5,
            fetch_retry: RetryPolicy::new(5, 0),
            read_retry: RetryPolicy::new(3, 0),
            ..ChainConfig::default()
        }
    }

    fn seed_schema(rpc: &MockRpc, block: u64, uid: &str, creator: &str) {
        let tx = format!("{uid}-tx");
        rpc.add_registry_log(block, uid, &tx);
        rpc.add_transaction(&tx, creator, block);
        rpc.add_schema(OnchainSchema {
            uid: uid.into(),
            definition: "uint256 value".into(),
            resolver: "0x0".into(),
            revocable: true,
        });
    }

    fn seed_attestation(rpc: &MockRpc, block: u64, uid: &str, schema_uid: &str) {
        let tx = format!("{uid}-tx");
        rpc.add_attestation_log(
            block,
            &tx,
            AttestationLogEvent::Attested {
                uid: uid.into(),
                schema_uid: schema_uid.into(),
            },
        );
        rpc.add_attestation(OnchainAttestation {
            uid: uid.into(),
            schema_uid: schema_uid.into(),
            attester: "0x2222".into(),
            recipient: "0x3333".into(),
            ref_uid: "0x0".into(),
            data: "0x".into(),
            time: 1_700_000_500,
            expiration_time: 0,
            revocation_time: 0,
            revocable: true,
        });
    }

    #[tokio::test]
    async fn starting_block_prefers_the_cursor() {
        let store = InMemoryStore::new();
        store.apply(&[], 42, None).await.unwrap();
        let rpc = MockRpc::new(100);
        let block = starting_block(&rpc, &test_config(), &store).await.unwrap();
        assert_eq!(block, 42);
    }

    #[tokio::test]
    async fn starting_block_uses_the_deployment_transaction() {
        let store = InMemoryStore::new();
        let rpc = MockRpc::new(100);
        rpc.add_transaction("0xdep", "0xdeployer", 1234);
        let config = ChainConfig {
            deployment_tx: Some("0xdep".into()),
            ..test_config()
        };
        let block = starting_block(&rpc, &config, &store).await.unwrap();
        assert_eq!(block, 1234);
    }

    #[tokio::test]
    async fn starting_block_defaults_to_genesis() {
        let store = InMemoryStore::new();
        let rpc = MockRpc::new(100);
        let block = starting_block(&rpc, &test_config(), &store).await.unwrap();
        assert_eq!(block, 0);
    }

    #[tokio::test]
    async fn missing_deployment_transaction_is_an_error() {
        let store = InMemoryStore::new();
        let rpc = MockRpc::new(100);
        let config = ChainConfig {
            deployment_tx: Some("0xgone".into()),
            ..test_config()
        };
        let err = starting_block(&rpc, &config, &store).await.unwrap_err();
        assert!(matches!(err, IndexerError::Rpc(_)));
    }

    #[tokio::test]
    async fn catch_up_indexes_the_whole_chain() {
        let rpc = MockRpc::new(120);
        seed_schema(&rpc, 5, "0xs1", "0xcreator");
        seed_attestation(&rpc, 75, "0xa1", "0xs1");

        let driver = IndexDriver::new(MutationCompiler::new(rpc, test_config()));
        let store = InMemoryStore::new();
        let cursor = driver.catch_up(&store).await.unwrap();

        assert_eq!(cursor, 121);
        assert_eq!(store.cursor().await.unwrap(), Some(121));
        assert!(store.get_schema("0xs1").await.unwrap().is_some());
        assert!(store.get_attestation("0xa1").await.unwrap().is_some());
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.schemas, 1);
        assert_eq!(counts.attestations, 1);
    }

    #[tokio::test]
    async fn catch_up_resumes_where_it_stopped() {
        let rpc = MockRpc::new(60);
        seed_schema(&rpc, 5, "0xs1", "0xcreator");

        let driver = IndexDriver::new(MutationCompiler::new(rpc, test_config()));
        let store = InMemoryStore::new();
        assert_eq!(driver.catch_up(&store).await.unwrap(), 61);

        // New blocks arrive; a second pass picks up only the tail.
        driver.compiler().rpc().set_head(130);
        seed_attestation(driver.compiler().rpc(), 100, "0xa1", "0xs1");
        assert_eq!(driver.catch_up(&store).await.unwrap(), 131);
        assert!(store.get_attestation("0xa1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn run_stops_on_signal() {
        let rpc = MockRpc::new(120);
        seed_schema(&rpc, 5, "0xs1", "0xcreator");

        let driver = IndexDriver::new(MutationCompiler::new(rpc, test_config()));
        let store = Arc::new(InMemoryStore::new());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn({
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            async move { driver.run(store.as_ref(), &stop).await }
        });

        for _ in 0..500 {
            if store.get_schema("0xs1").await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stop.store(true, Ordering::Relaxed);
        handle.await.unwrap().unwrap();

        assert!(store.get_schema("0xs1").await.unwrap().is_some());
        assert_eq!(store.cursor().await.unwrap(), Some(121));
    }

    #[tokio::test]
    async fn run_retries_a_failed_window() {
        let rpc = MockRpc::new(60);
        seed_schema(&rpc, 5, "0xs1", "0xcreator");
        // Four empty reads against three attempts per cycle: the first cycle
        // exhausts its retries, the second succeeds.
        rpc.delay_visibility("0xs1", 4);

        let driver = IndexDriver::new(MutationCompiler::new(rpc, test_config()));
        let store = Arc::new(InMemoryStore::new());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn({
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            async move { driver.run(store.as_ref(), &stop).await }
        });

        for _ in 0..500 {
            if store.get_schema("0xs1").await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stop.store(true, Ordering::Relaxed);
        handle.await.unwrap().unwrap();

        assert!(store.get_schema("0xs1").await.unwrap().is_some());
    }
}
