//! In-process mock chain for tests.
//!
//! Backs the [`AttestationRpc`] trait with hash maps and a few failure
//! knobs: a maximum log-fetch window (to exercise bisection) and per-uid
//! visibility delays (to exercise read retries against lagging providers).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use attestindex_core::error::IndexerError;

use crate::rpc::{
    AttestationLog, AttestationLogEvent, AttestationRpc, OnchainAttestation, OnchainSchema,
    RegistryLog, TxSummary,
};

#[derive(Default)]
struct MockState {
    head: u64,
    timestamps: HashMap<u64, i64>,
    transactions: HashMap<String, TxSummary>,
    registry_logs: Vec<RegistryLog>,
    attestation_logs: Vec<AttestationLog>,
    schemas: HashMap<String, OnchainSchema>,
    attestations: HashMap<String, OnchainAttestation>,
    /// Log fetches wider than this fail, like a provider's response cap.
    max_window: Option<u64>,
    /// Remaining reads that must return `None` before a uid becomes visible.
    visibility_delay: HashMap<String, u32>,
    /// Every successfully served log-fetch window, in order.
    served_windows: Vec<(u64, u64)>,
}

/// Scriptable [`AttestationRpc`] implementation.
#[derive(Default)]
pub struct MockRpc {
    state: Mutex<MockState>,
}

impl MockRpc {
    pub fn new(head: u64) -> Self {
        let rpc = Self::default();
        rpc.state.lock().unwrap().head = head;
        rpc
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Fail any log fetch spanning more than `blocks` blocks.
    pub fn set_max_window(&self, blocks: u64) {
        self.state.lock().unwrap().max_window = Some(blocks);
    }

    pub fn add_block(&self, number: u64, timestamp: i64) {
        self.state.lock().unwrap().timestamps.insert(number, timestamp);
    }

    pub fn add_transaction(&self, hash: &str, from: &str, block_number: u64) {
        self.state.lock().unwrap().transactions.insert(
            hash.to_string(),
            TxSummary {
                hash: hash.to_string(),
                from: from.to_string(),
                block_number,
            },
        );
    }

    pub fn add_registry_log(&self, block_number: u64, uid: &str, tx_hash: &str) {
        self.state.lock().unwrap().registry_logs.push(RegistryLog {
            uid: uid.to_string(),
            block_number,
            tx_hash: tx_hash.to_string(),
        });
    }

    pub fn add_attestation_log(&self, block_number: u64, tx_hash: &str, event: AttestationLogEvent) {
        self.state.lock().unwrap().attestation_logs.push(AttestationLog {
            event,
            block_number,
            tx_hash: tx_hash.to_string(),
        });
    }

    pub fn add_schema(&self, schema: OnchainSchema) {
        self.state
            .lock()
            .unwrap()
            .schemas
            .insert(schema.uid.clone(), schema);
    }

    pub fn add_attestation(&self, attestation: OnchainAttestation) {
        self.state
            .lock()
            .unwrap()
            .attestations
            .insert(attestation.uid.clone(), attestation);
    }

    /// Make the next `reads` lookups of `uid` return `None`.
    pub fn delay_visibility(&self, uid: &str, reads: u32) {
        self.state
            .lock()
            .unwrap()
            .visibility_delay
            .insert(uid.to_string(), reads);
    }

    /// Windows served successfully by the log endpoints, in order.
    pub fn served_windows(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().served_windows.clone()
    }

    fn check_window(state: &mut MockState, from: u64, to: u64) -> Result<(), IndexerError> {
        if let Some(cap) = state.max_window {
            if to - from + 1 > cap {
                return Err(IndexerError::Rpc(format!(
                    "query returned more than {cap} results"
                )));
            }
        }
        state.served_windows.push((from, to));
        Ok(())
    }

    fn visible(state: &mut MockState, uid: &str) -> bool {
        match state.visibility_delay.get_mut(uid) {
            Some(0) | None => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
        }
    }
}

#[async_trait]
impl AttestationRpc for MockRpc {
    async fn head_block(&self) -> Result<u64, IndexerError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<i64>, IndexerError> {
        let state = self.state.lock().unwrap();
        // Blocks without an explicit timestamp get a deterministic one.
        Ok(Some(
            *state
                .timestamps
                .get(&number)
                .unwrap_or(&(1_700_000_000 + number as i64 * 12)),
        ))
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<TxSummary>, IndexerError> {
        let mut state = self.state.lock().unwrap();
        if !Self::visible(&mut state, hash) {
            return Ok(None);
        }
        Ok(state.transactions.get(hash).cloned())
    }

    async fn registry_logs(&self, from: u64, to: u64) -> Result<Vec<RegistryLog>, IndexerError> {
        let mut state = self.state.lock().unwrap();
        Self::check_window(&mut state, from, to)?;
        Ok(state
            .registry_logs
            .iter()
            .filter(|l| (from..=to).contains(&l.block_number))
            .cloned()
            .collect())
    }

    async fn attestation_logs(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<AttestationLog>, IndexerError> {
        let mut state = self.state.lock().unwrap();
        Self::check_window(&mut state, from, to)?;
        Ok(state
            .attestation_logs
            .iter()
            .filter(|l| (from..=to).contains(&l.block_number))
            .cloned()
            .collect())
    }

    async fn get_schema(&self, uid: &str) -> Result<Option<OnchainSchema>, IndexerError> {
        let mut state = self.state.lock().unwrap();
        if !Self::visible(&mut state, uid) {
            return Ok(None);
        }
        Ok(state.schemas.get(uid).cloned())
    }

    async fn get_attestation(
        &self,
        uid: &str,
    ) -> Result<Option<OnchainAttestation>, IndexerError> {
        let mut state = self.state.lock().unwrap();
        if !Self::visible(&mut state, uid) {
            return Ok(None);
        }
        Ok(state.attestations.get(uid).cloned())
    }
}
