//! Per-chain indexer configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Bounded retry with a fixed interval between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts before the error escalates.
    pub max_attempts: u32,
    /// Fixed pause between attempts (milliseconds).
    pub interval_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval_ms: u64) -> Self {
        Self {
            max_attempts,
            interval_ms,
        }
    }

    /// Default policy for width-1 log-fetch retries.
    pub fn fetch_default() -> Self {
        Self::new(10, 15_000)
    }

    /// Default policy for authoritative record re-reads.
    pub fn read_default() -> Self {
        Self::new(10, 5_000)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Configuration for one chain's index loop.
///
/// Distinct chains are fully independent: each gets its own config, cursor,
/// and store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain slug (e.g. `"ethereum"`, `"base"`).
    pub chain: String,
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,
    /// Schema registry contract address.
    pub registry_address: String,
    /// Attestation log contract address.
    pub attestation_address: String,
    /// Transaction that deployed the registry; its block is the starting
    /// point when no cursor exists. `None` = start from genesis.
    #[serde(default)]
    pub deployment_tx: Option<String>,
    /// Blocks per compile window.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Pause between compile+apply cycles (milliseconds), to respect
    /// provider rate limits.
    #[serde(default = "default_cycle_delay_ms")]
    pub cycle_delay_ms: u64,
    /// Retry policy for width-1 log-fetch windows.
    #[serde(default = "RetryPolicy::fetch_default")]
    pub fetch_retry: RetryPolicy,
    /// Retry policy for record re-reads that are not yet visible.
    #[serde(default = "RetryPolicy::read_default")]
    pub read_retry: RetryPolicy,
    /// Base URL serving published checkpoints (`index.json` + batch files).
    #[serde(default)]
    pub checkpoint_url: Option<String>,
}

fn default_batch_size() -> u64 {
    2000
}

fn default_cycle_delay_ms() -> u64 {
    1000
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain: "ethereum".into(),
            rpc_url: String::new(),
            registry_address: String::new(),
            attestation_address: String::new(),
            deployment_tx: None,
            batch_size: default_batch_size(),
            cycle_delay_ms: default_cycle_delay_ms(),
            fetch_retry: RetryPolicy::fetch_default(),
            read_retry: RetryPolicy::read_default(),
            checkpoint_url: None,
        }
    }
}

impl ChainConfig {
    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }

    /// Load a list of chain configs from a JSON file.
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<ChainConfig>, IndexerError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| IndexerError::Config(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| IndexerError::Config(e.to_string()))
    }

    /// Load a single chain's config by slug from a JSON file.
    pub fn load(path: impl AsRef<Path>, chain: &str) -> Result<ChainConfig, IndexerError> {
        Self::load_all(path)?
            .into_iter()
            .find(|c| c.chain == chain)
            .ok_or_else(|| IndexerError::Config(format!("no config for chain '{chain}'")))
    }
}
