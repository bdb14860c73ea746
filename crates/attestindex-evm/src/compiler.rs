//! The event-to-mutation compiler.
//!
//! One [`MutationCompiler::compile`] call covers a single block window: it
//! fetches the window's registry and attestation events (bisecting on fetch
//! failure), re-reads each touched record from the chain's authoritative
//! getters, and emits an ordered [`Mutation`] batch for the store to apply.
//! The compiler itself never writes — it only reads the store to resolve
//! schemas that were indexed in earlier windows.
//!
//! Re-reads tolerate lagging providers: a record that a log says exists but
//! a getter can't serve yet is retried on the configured `read_retry` policy
//! before the error escalates.

use std::collections::HashMap;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, warn};

use attestindex_core::config::{ChainConfig, RetryPolicy};
use attestindex_core::error::IndexerError;
use attestindex_core::scanner::BlockRangeScanner;
use attestindex_core::schema;
use attestindex_core::types::{
    AttestationPatch, AttestationRecord, Mutation, SchemaPatch, SchemaRecord, TimestampRecord,
};
use attestindex_storage::IndexStore;

use crate::codec;
use crate::rpc::{AttestationLogEvent, AttestationRpc, OnchainAttestation, RegistryLog};

/// Uid of the well-known schema whose attestations assign names to other
/// schemas.
pub const NAME_SCHEMA_UID: &str =
    "0x44d562ac1d7cd77e232978687fea027ace48f719cf1d58c7888e509663bb87fc";

/// Payload layout of naming attestations.
const NAME_PAYLOAD_LAYOUT: &str = "bytes32 schemaId, string name";

/// Result of compiling one block window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutcome {
    /// Whether more blocks were already available past this window.
    pub has_more: bool,
    /// First block the next window should start at.
    pub next_block: u64,
    /// Ordered mutations for the store to apply.
    pub mutations: Vec<Mutation>,
}

/// Compiles on-chain events into store mutations.
pub struct MutationCompiler<R> {
    rpc: R,
    config: ChainConfig,
}

impl<R: AttestationRpc> MutationCompiler<R> {
    pub fn new(rpc: R, config: ChainConfig) -> Self {
        Self { rpc, config }
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Compile the window starting at `from_block`.
    ///
    /// The window ends at `from_block + batch_size - 1` or the chain head,
    /// whichever is lower. A `from_block` past the head compiles to an empty
    /// batch without touching the chain further.
    pub async fn compile(
        &self,
        store: &dyn IndexStore,
        from_block: u64,
    ) -> Result<CompileOutcome, IndexerError> {
        let head = self.rpc.head_block().await?;
        if from_block > head {
            return Ok(CompileOutcome {
                has_more: false,
                next_block: from_block,
                mutations: Vec::new(),
            });
        }

        let to_block = (from_block + self.config.batch_size - 1).min(head);
        let has_more = to_block < head;

        let mut registry = fetch_ranged(
            self.config.fetch_retry,
            from_block,
            to_block,
            "registry logs",
            |lo, hi| self.rpc.registry_logs(lo, hi),
        )
        .await?;
        let mut attestation = fetch_ranged(
            self.config.fetch_retry,
            from_block,
            to_block,
            "attestation logs",
            |lo, hi| self.rpc.attestation_logs(lo, hi),
        )
        .await?;

        // Bisection emits windows in order, but make block order explicit.
        registry.sort_by_key(|l| l.block_number);
        attestation.sort_by_key(|l| l.block_number);

        // Schemas registered in this window, visible to later events in the
        // same batch before anything reaches the store.
        let mut cache: HashMap<String, SchemaRecord> = HashMap::new();
        let mut mutations = Vec::new();

        for log in &registry {
            self.compile_registration(log, &mut cache, &mut mutations)
                .await?;
        }

        for log in &attestation {
            match &log.event {
                AttestationLogEvent::Attested { uid, schema_uid } => {
                    self.compile_attested(
                        store,
                        uid,
                        schema_uid,
                        log.block_number,
                        &log.tx_hash,
                        &mut cache,
                        &mut mutations,
                    )
                    .await?;
                }
                AttestationLogEvent::Revoked { uid, .. } => {
                    self.compile_revoked(uid, log.block_number, &mut mutations)
                        .await?;
                }
                AttestationLogEvent::Timestamped { data, timestamp } => {
                    self.compile_timestamped(
                        data,
                        *timestamp,
                        log.block_number,
                        &log.tx_hash,
                        &mut mutations,
                    )
                    .await?;
                }
                AttestationLogEvent::RevokedOffchain { revoker, data, .. } => {
                    debug!(revoker, data, "offchain revocation observed, not indexed");
                }
            }
        }

        info!(
            from = from_block,
            to = to_block,
            mutations = mutations.len(),
            "window compiled"
        );
        Ok(CompileOutcome {
            has_more,
            next_block: to_block + 1,
            mutations,
        })
    }

    async fn compile_registration(
        &self,
        log: &RegistryLog,
        cache: &mut HashMap<String, SchemaRecord>,
        mutations: &mut Vec<Mutation>,
    ) -> Result<(), IndexerError> {
        let onchain = self
            .retry_until_present("schema", &log.uid, || self.rpc.get_schema(&log.uid))
            .await?;
        let tx = self
            .retry_until_present("transaction", &log.tx_hash, || {
                self.rpc.get_transaction(&log.tx_hash)
            })
            .await?;
        let block_key = log.block_number.to_string();
        let registered_at = self
            .retry_until_present("block", &block_key, || {
                self.rpc.block_timestamp(log.block_number)
            })
            .await?;

        let record = SchemaRecord {
            uid: onchain.uid,
            definition: onchain.definition,
            creator: tx.from,
            resolver: onchain.resolver,
            registered_at,
            registration_tx: log.tx_hash.clone(),
            revocable: onchain.revocable,
            name: String::new(),
            attestation_count: 0,
        };
        debug!(uid = %record.uid, block = log.block_number, "schema registered");
        cache.insert(record.uid.clone(), record.clone());
        mutations.push(Mutation::put_schema(log.block_number, record));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn compile_attested(
        &self,
        store: &dyn IndexStore,
        uid: &str,
        schema_uid: &str,
        block_number: u64,
        tx_hash: &str,
        cache: &mut HashMap<String, SchemaRecord>,
        mutations: &mut Vec<Mutation>,
    ) -> Result<(), IndexerError> {
        let Some(mut schema_rec) = lookup_schema(store, cache, schema_uid).await? else {
            warn!(uid, schema_uid, "attestation against unknown schema, skipping");
            return Ok(());
        };

        let onchain = self
            .retry_until_present("attestation", uid, || self.rpc.get_attestation(uid))
            .await?;

        let attested_at = if onchain.time != 0 {
            onchain.time as i64
        } else {
            let block_key = block_number.to_string();
            self.retry_until_present("block", &block_key, || {
                self.rpc.block_timestamp(block_number)
            })
            .await?
        };

        let observed_at = Utc::now().timestamp();
        let revoked =
            onchain.revocation_time != 0 && onchain.revocation_time <= observed_at as u64;

        // Decode failure is non-fatal: the raw payload is kept either way.
        let decoded_json = match decode_against(&schema_rec.definition, &onchain.data) {
            Ok(json) => json,
            Err(e) => {
                warn!(uid, error = %e, "payload decode failed, storing raw payload only");
                String::new()
            }
        };

        let record = AttestationRecord {
            uid: onchain.uid.clone(),
            schema_uid: schema_uid.to_string(),
            payload: onchain.data.clone(),
            attester: onchain.attester.clone(),
            recipient: onchain.recipient.clone(),
            ref_uid: onchain.ref_uid.clone(),
            revocation_time: onchain.revocation_time,
            expiration_time: onchain.expiration_time,
            attested_at,
            tx_hash: tx_hash.to_string(),
            revoked,
            observed_at,
            revocable: onchain.revocable,
            decoded_json,
        };
        debug!(uid, schema_uid, block = block_number, "attestation compiled");
        mutations.push(Mutation::put_attestation(block_number, record));

        schema_rec.attestation_count += 1;
        mutations.push(Mutation::patch_schema(
            block_number,
            schema_uid,
            SchemaPatch {
                name: None,
                attestation_count: Some(schema_rec.attestation_count),
            },
        ));
        cache.insert(schema_uid.to_string(), schema_rec);

        if schema_uid == NAME_SCHEMA_UID {
            self.apply_schema_name(store, &onchain, block_number, cache, mutations)
                .await?;
        }
        Ok(())
    }

    /// Naming attestations rename their target schema, but only when the
    /// attester is the schema's creator.
    async fn apply_schema_name(
        &self,
        store: &dyn IndexStore,
        attestation: &OnchainAttestation,
        block_number: u64,
        cache: &mut HashMap<String, SchemaRecord>,
        mutations: &mut Vec<Mutation>,
    ) -> Result<(), IndexerError> {
        let layout = schema::parse(NAME_PAYLOAD_LAYOUT)?;
        let decoded = match codec::decode_payload(&layout, &attestation.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(uid = %attestation.uid, error = %e, "malformed naming payload, ignoring");
                return Ok(());
            }
        };
        let [schema_id, name] = decoded.as_slice() else {
            return Ok(());
        };
        let (Some(target_uid), Some(name)) = (schema_id.value.as_str(), name.value.as_str())
        else {
            return Ok(());
        };

        let Some(mut target) = lookup_schema(store, cache, target_uid).await? else {
            warn!(target_uid, "naming attestation for unknown schema, ignoring");
            return Ok(());
        };
        if !target.creator.eq_ignore_ascii_case(&attestation.attester) {
            debug!(
                target_uid,
                attester = %attestation.attester,
                "naming attester is not the schema creator, ignoring"
            );
            return Ok(());
        }

        info!(target_uid, name, "schema named");
        mutations.push(Mutation::patch_schema(
            block_number,
            target_uid,
            SchemaPatch {
                name: Some(name.to_string()),
                attestation_count: None,
            },
        ));
        target.name = name.to_string();
        cache.insert(target_uid.to_string(), target);
        Ok(())
    }

    async fn compile_revoked(
        &self,
        uid: &str,
        block_number: u64,
        mutations: &mut Vec<Mutation>,
    ) -> Result<(), IndexerError> {
        // The revocation counts as visible only once the getter reflects it.
        let onchain = self
            .retry_until_present("revocation", uid, || {
                self.rpc
                    .get_attestation(uid)
                    .map(|result| result.map(|opt| opt.filter(|a| a.revocation_time != 0)))
                    .boxed()
            })
            .await?;

        debug!(uid, revocation_time = onchain.revocation_time, "attestation revoked");
        mutations.push(Mutation::patch_attestation(
            block_number,
            uid,
            AttestationPatch {
                revoked: Some(true),
                revocation_time: Some(onchain.revocation_time),
            },
        ));
        Ok(())
    }

    async fn compile_timestamped(
        &self,
        data: &str,
        timestamp: u64,
        block_number: u64,
        tx_hash: &str,
        mutations: &mut Vec<Mutation>,
    ) -> Result<(), IndexerError> {
        let tx = self
            .retry_until_present("transaction", tx_hash, || self.rpc.get_transaction(tx_hash))
            .await?;

        debug!(data, timestamp, "timestamp compiled");
        mutations.push(Mutation::put_timestamp(
            block_number,
            TimestampRecord {
                uid: data.to_string(),
                timestamp,
                submitter: tx.from,
                tx_hash: tx_hash.to_string(),
            },
        ));
        Ok(())
    }

    /// Re-read an authoritative record until the node serves it, bounded by
    /// the `read_retry` policy.
    async fn retry_until_present<'a, T>(
        &self,
        kind: &'static str,
        uid: &str,
        fetch: impl Fn() -> BoxFuture<'a, Result<Option<T>, IndexerError>>,
    ) -> Result<T, IndexerError> {
        let policy = self.config.read_retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if let Some(value) = fetch().await? {
                return Ok(value);
            }
            if attempt >= policy.max_attempts {
                return Err(IndexerError::RecordUnavailable {
                    kind,
                    uid: uid.to_string(),
                    attempts: attempt,
                });
            }
            debug!(kind, uid, attempt, "record not visible yet, retrying");
            tokio::time::sleep(policy.interval()).await;
        }
    }
}

async fn lookup_schema(
    store: &dyn IndexStore,
    cache: &HashMap<String, SchemaRecord>,
    uid: &str,
) -> Result<Option<SchemaRecord>, IndexerError> {
    if let Some(record) = cache.get(uid) {
        return Ok(Some(record.clone()));
    }
    store.get_schema(uid).await
}

fn decode_against(definition: &str, payload: &str) -> Result<String, IndexerError> {
    let fields = schema::parse(definition)?;
    let decoded = codec::decode_payload(&fields, payload)?;
    serde_json::to_string(&decoded).map_err(|e| IndexerError::Decode(e.to_string()))
}

/// Fetch logs over `[from, to]`, bisecting failed windows and retrying
/// width-1 windows on the given policy before the error escalates.
async fn fetch_ranged<'a, T>(
    policy: RetryPolicy,
    from: u64,
    to: u64,
    what: &'static str,
    fetch: impl Fn(u64, u64) -> BoxFuture<'a, Result<Vec<T>, IndexerError>>,
) -> Result<Vec<T>, IndexerError> {
    let mut scanner = BlockRangeScanner::new(from, to);
    let mut collected = Vec::new();
    let mut success = true;
    let mut attempts = 0u32;
    while let Some((lo, hi)) = scanner.next(success) {
        match fetch(lo, hi).await {
            Ok(mut items) => {
                collected.append(&mut items);
                success = true;
                attempts = 0;
            }
            Err(e) if lo == hi => {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    return Err(e);
                }
                warn!(what, block = lo, attempt = attempts, error = %e, "single-block fetch failed, retrying");
                tokio::time::sleep(policy.interval()).await;
                success = false;
            }
            Err(e) => {
                debug!(what, from = lo, to = hi, error = %e, "window fetch failed, halving");
                success = false;
            }
        }
    }
    Ok(collected)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
