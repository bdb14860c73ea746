//! JSON-RPC implementation of [`AttestationRpc`] backed by `reqwest`.
//!
//! Owns the ABI surface of the two contracts: event topic hashes for log
//! classification and function selectors plus return layouts for the
//! authoritative `getSchema`/`getAttestation` reads. Everything past this
//! module works with classified, typed values.

use std::time::Duration;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{keccak256, Address};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use attestindex_core::config::ChainConfig;
use attestindex_core::error::IndexerError;

use crate::rpc::{
    AttestationLog, AttestationLogEvent, AttestationRpc, OnchainAttestation, OnchainSchema,
    RegistryLog, TxSummary,
};

const REGISTERED_SIG: &str = "Registered(bytes32,address)";
const ATTESTED_SIG: &str = "Attested(address,address,bytes32,bytes32)";
const REVOKED_SIG: &str = "Revoked(address,address,bytes32,bytes32)";
const TIMESTAMPED_SIG: &str = "Timestamped(bytes32,uint64)";
const REVOKED_OFFCHAIN_SIG: &str = "RevokedOffchain(address,bytes32,uint64)";

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
struct RawLog {
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "transactionHash")]
    tx_hash: String,
    #[serde(default)]
    removed: Option<bool>,
}

impl RawLog {
    fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// `eth_getTransactionByHash` response fields we care about.
#[derive(Debug, Clone, Deserialize)]
struct RawTransaction {
    hash: String,
    from: String,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
}

struct EventTopics {
    registered: String,
    attested: String,
    revoked: String,
    timestamped: String,
    revoked_offchain: String,
}

fn topic_of(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

fn selector_of(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// JSON-RPC chain client for one configured chain.
pub struct HttpRpc {
    url: String,
    http: reqwest::Client,
    registry_address: String,
    attestation_address: String,
    topics: EventTopics,
    get_schema_selector: [u8; 4],
    get_attestation_selector: [u8; 4],
}

impl HttpRpc {
    pub fn new(config: &ChainConfig) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IndexerError::Rpc(e.to_string()))?;

        Ok(Self {
            url: config.rpc_url.clone(),
            http,
            registry_address: config.registry_address.clone(),
            attestation_address: config.attestation_address.clone(),
            topics: EventTopics {
                registered: topic_of(REGISTERED_SIG),
                attested: topic_of(ATTESTED_SIG),
                revoked: topic_of(REVOKED_SIG),
                timestamped: topic_of(TIMESTAMPED_SIG),
                revoked_offchain: topic_of(REVOKED_OFFCHAIN_SIG),
            },
            get_schema_selector: selector_of("getSchema(bytes32)"),
            get_attestation_selector: selector_of("getAttestation(bytes32)"),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, IndexerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexerError::Rpc(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Rpc(format!("HTTP {status}: {body}")));
        }

        let mut reply: Value = resp
            .json()
            .await
            .map_err(|e| IndexerError::Rpc(e.to_string()))?;
        if let Some(err) = reply.get("error") {
            if !err.is_null() {
                return Err(IndexerError::Rpc(format!("{method}: {err}")));
            }
        }
        Ok(reply["result"].take())
    }

    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        address: &str,
        topic0: Vec<&str>,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let params = json!([{
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
            "address": address,
            "topics": [topic0],
        }]);
        let result = self.call("eth_getLogs", params).await?;
        serde_json::from_value(result)
            .map_err(|e| IndexerError::Rpc(format!("malformed eth_getLogs response: {e}")))
    }

    async fn eth_call(&self, to: &str, calldata: Vec<u8>) -> Result<Vec<u8>, IndexerError> {
        let params = json!([
            { "to": to, "data": format!("0x{}", hex::encode(calldata)) },
            "latest",
        ]);
        let result = self.call("eth_call", params).await?;
        let data = result
            .as_str()
            .ok_or_else(|| IndexerError::Rpc("non-string eth_call result".into()))?;
        hex::decode(data.strip_prefix("0x").unwrap_or(data))
            .map_err(|e| IndexerError::Rpc(format!("bad eth_call return hex: {e}")))
    }

    fn classify(&self, log: &RawLog) -> Result<Option<AttestationLogEvent>, IndexerError> {
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let event = if *topic0 == self.topics.attested {
            AttestationLogEvent::Attested {
                uid: data_word(&log.data, 0)?,
                schema_uid: indexed_topic(log, 3)?,
            }
        } else if *topic0 == self.topics.revoked {
            AttestationLogEvent::Revoked {
                uid: data_word(&log.data, 0)?,
                schema_uid: indexed_topic(log, 3)?,
            }
        } else if *topic0 == self.topics.timestamped {
            AttestationLogEvent::Timestamped {
                data: indexed_topic(log, 1)?,
                timestamp: topic_to_u64(&indexed_topic(log, 2)?)?,
            }
        } else if *topic0 == self.topics.revoked_offchain {
            AttestationLogEvent::RevokedOffchain {
                revoker: topic_to_address(&indexed_topic(log, 1)?)?,
                data: indexed_topic(log, 2)?,
                timestamp: topic_to_u64(&indexed_topic(log, 3)?)?,
            }
        } else {
            debug!(topic0, "unrecognized attestation contract event");
            return Ok(None);
        };
        Ok(Some(event))
    }
}

#[async_trait]
impl AttestationRpc for HttpRpc {
    async fn head_block(&self) -> Result<u64, IndexerError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(
            result
                .as_str()
                .ok_or_else(|| IndexerError::Rpc("non-string block number".into()))?,
        )
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<i64>, IndexerError> {
        let result = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("0x{number:x}"), false]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let ts = result["timestamp"]
            .as_str()
            .ok_or_else(|| IndexerError::Rpc("block without timestamp".into()))?;
        Ok(Some(parse_hex_u64(ts)? as i64))
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<TxSummary>, IndexerError> {
        let result = self.call("eth_getTransactionByHash", json!([hash])).await?;
        if result.is_null() {
            return Ok(None);
        }
        let raw: RawTransaction = serde_json::from_value(result)
            .map_err(|e| IndexerError::Rpc(format!("malformed transaction response: {e}")))?;
        // A pending transaction has no block yet; treat it as not visible.
        let Some(block_hex) = raw.block_number else {
            return Ok(None);
        };
        Ok(Some(TxSummary {
            hash: raw.hash,
            from: raw.from,
            block_number: parse_hex_u64(&block_hex)?,
        }))
    }

    async fn registry_logs(&self, from: u64, to: u64) -> Result<Vec<RegistryLog>, IndexerError> {
        let logs = self
            .get_logs(from, to, &self.registry_address, vec![&self.topics.registered])
            .await?;
        let mut out = Vec::with_capacity(logs.len());
        for log in logs {
            if log.is_removed() {
                continue;
            }
            out.push(RegistryLog {
                uid: indexed_topic(&log, 1)?,
                block_number: parse_hex_u64(&log.block_number)?,
                tx_hash: log.tx_hash,
            });
        }
        Ok(out)
    }

    async fn attestation_logs(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<AttestationLog>, IndexerError> {
        let logs = self
            .get_logs(
                from,
                to,
                &self.attestation_address,
                vec![
                    &self.topics.attested,
                    &self.topics.revoked,
                    &self.topics.timestamped,
                    &self.topics.revoked_offchain,
                ],
            )
            .await?;
        let mut out = Vec::with_capacity(logs.len());
        for log in logs {
            if log.is_removed() {
                continue;
            }
            let Some(event) = self.classify(&log)? else {
                continue;
            };
            out.push(AttestationLog {
                event,
                block_number: parse_hex_u64(&log.block_number)?,
                tx_hash: log.tx_hash,
            });
        }
        Ok(out)
    }

    async fn get_schema(&self, uid: &str) -> Result<Option<OnchainSchema>, IndexerError> {
        let mut calldata = self.get_schema_selector.to_vec();
        calldata.extend_from_slice(&uid_word(uid)?);
        let ret = self.eth_call(&self.registry_address, calldata).await?;

        // struct { bytes32 uid; address resolver; bool revocable; string schema; }
        let layout = DynSolType::Tuple(vec![DynSolType::Tuple(vec![
            DynSolType::FixedBytes(32),
            DynSolType::Address,
            DynSolType::Bool,
            DynSolType::String,
        ])]);
        let decoded = layout
            .abi_decode_params(&ret)
            .map_err(|e| IndexerError::Decode(format!("getSchema return: {e}")))?;
        let fields = unwrap_struct(decoded)?;

        let uid_ret = as_b256_hex(&fields[0])?;
        if is_zero_uid(&uid_ret) {
            return Ok(None);
        }
        Ok(Some(OnchainSchema {
            uid: uid_ret,
            resolver: as_address(&fields[1])?,
            revocable: as_bool(&fields[2])?,
            definition: as_string(&fields[3])?,
        }))
    }

    async fn get_attestation(
        &self,
        uid: &str,
    ) -> Result<Option<OnchainAttestation>, IndexerError> {
        let mut calldata = self.get_attestation_selector.to_vec();
        calldata.extend_from_slice(&uid_word(uid)?);
        let ret = self.eth_call(&self.attestation_address, calldata).await?;

        // struct { bytes32 uid; bytes32 schema; uint64 time; uint64 expirationTime;
        //          uint64 revocationTime; bytes32 refUID; address recipient;
        //          address attester; bool revocable; bytes data; }
        let layout = DynSolType::Tuple(vec![DynSolType::Tuple(vec![
            DynSolType::FixedBytes(32),
            DynSolType::FixedBytes(32),
            DynSolType::Uint(64),
            DynSolType::Uint(64),
            DynSolType::Uint(64),
            DynSolType::FixedBytes(32),
            DynSolType::Address,
            DynSolType::Address,
            DynSolType::Bool,
            DynSolType::Bytes,
        ])]);
        let decoded = layout
            .abi_decode_params(&ret)
            .map_err(|e| IndexerError::Decode(format!("getAttestation return: {e}")))?;
        let fields = unwrap_struct(decoded)?;

        let uid_ret = as_b256_hex(&fields[0])?;
        if is_zero_uid(&uid_ret) {
            return Ok(None);
        }
        Ok(Some(OnchainAttestation {
            uid: uid_ret,
            schema_uid: as_b256_hex(&fields[1])?,
            time: as_u64(&fields[2])?,
            expiration_time: as_u64(&fields[3])?,
            revocation_time: as_u64(&fields[4])?,
            ref_uid: as_b256_hex(&fields[5])?,
            recipient: as_address(&fields[6])?,
            attester: as_address(&fields[7])?,
            revocable: as_bool(&fields[8])?,
            data: as_bytes_hex(&fields[9])?,
        }))
    }
}

// ─── Wire helpers ────────────────────────────────────────────────────────────

fn parse_hex_u64(s: &str) -> Result<u64, IndexerError> {
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16)
        .map_err(|e| IndexerError::Rpc(format!("bad hex quantity {s:?}: {e}")))
}

fn uid_word(uid: &str) -> Result<[u8; 32], IndexerError> {
    let raw = hex::decode(uid.strip_prefix("0x").unwrap_or(uid))
        .map_err(|e| IndexerError::Rpc(format!("bad uid {uid:?}: {e}")))?;
    if raw.len() != 32 {
        return Err(IndexerError::Rpc(format!("uid {uid:?} is not 32 bytes")));
    }
    let mut word = [0u8; 32];
    word.copy_from_slice(&raw);
    Ok(word)
}

fn indexed_topic(log: &RawLog, index: usize) -> Result<String, IndexerError> {
    log.topics
        .get(index)
        .cloned()
        .ok_or_else(|| IndexerError::Rpc(format!("log missing topic {index}")))
}

/// Extract the `index`-th 32-byte word of the log data as `0x…` hex.
fn data_word(data: &str, index: usize) -> Result<String, IndexerError> {
    let body = data.strip_prefix("0x").unwrap_or(data);
    let start = index * 64;
    let end = start + 64;
    if body.len() < end {
        return Err(IndexerError::Rpc(format!(
            "log data too short for word {index}"
        )));
    }
    Ok(format!("0x{}", &body[start..end]))
}

fn topic_to_address(topic: &str) -> Result<String, IndexerError> {
    let word = uid_word(topic)?;
    Ok(Address::from_slice(&word[12..]).to_checksum(None))
}

fn topic_to_u64(topic: &str) -> Result<u64, IndexerError> {
    let word = uid_word(topic)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(IndexerError::Rpc(format!("topic {topic:?} exceeds u64")));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(buf))
}

// ─── Return-value helpers ────────────────────────────────────────────────────

fn unwrap_struct(decoded: DynSolValue) -> Result<Vec<DynSolValue>, IndexerError> {
    let DynSolValue::Tuple(mut outer) = decoded else {
        return Err(IndexerError::Decode("expected tuple return".into()));
    };
    match outer.pop() {
        Some(DynSolValue::Tuple(fields)) if outer.is_empty() => Ok(fields),
        _ => Err(IndexerError::Decode("expected single struct return".into())),
    }
}

fn as_b256_hex(value: &DynSolValue) -> Result<String, IndexerError> {
    match value {
        DynSolValue::FixedBytes(word, 32) => Ok(format!("0x{}", hex::encode(word))),
        _ => Err(IndexerError::Decode("expected bytes32".into())),
    }
}

fn as_address(value: &DynSolValue) -> Result<String, IndexerError> {
    match value {
        DynSolValue::Address(a) => Ok(a.to_checksum(None)),
        _ => Err(IndexerError::Decode("expected address".into())),
    }
}

fn as_bool(value: &DynSolValue) -> Result<bool, IndexerError> {
    match value {
        DynSolValue::Bool(b) => Ok(*b),
        _ => Err(IndexerError::Decode("expected bool".into())),
    }
}

fn as_string(value: &DynSolValue) -> Result<String, IndexerError> {
    match value {
        DynSolValue::String(s) => Ok(s.clone()),
        _ => Err(IndexerError::Decode("expected string".into())),
    }
}

fn as_u64(value: &DynSolValue) -> Result<u64, IndexerError> {
    match value {
        DynSolValue::Uint(v, _) => v
            .try_into()
            .map_err(|_| IndexerError::Decode("uint exceeds u64".into())),
        _ => Err(IndexerError::Decode("expected uint".into())),
    }
}

fn as_bytes_hex(value: &DynSolValue) -> Result<String, IndexerError> {
    match value {
        DynSolValue::Bytes(b) => Ok(format!("0x{}", hex::encode(b))),
        _ => Err(IndexerError::Decode("expected bytes".into())),
    }
}

fn is_zero_uid(uid: &str) -> bool {
    uid.strip_prefix("0x")
        .map(|body| body.bytes().all(|b| b == b'0'))
        .unwrap_or(false)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
