//! ERC-20 `Transfer(address indexed from, address indexed to, uint256 value)`
//! log decoding.

use std::str::FromStr;

use alloy_primitives::{Address, B256, U256};
use chainsync_core::{BlockRef, TransferLog};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// `keccak256("Transfer(address,address,uint256)")`.
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Returns `true` if the topics have the ERC-20 `Transfer` shape:
    /// the `Transfer` topic0 plus exactly two indexed addresses.
    pub fn is_erc20_transfer(&self) -> bool {
        self.topics.len() == 3 && self.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC)
    }
}

/// Decode a `Transfer` log. Fails if the log is not a standard ERC-20
/// transfer (ERC-721 uses the same signature with a third indexed topic).
pub fn decode_transfer(log: &RawLog) -> Result<TransferLog, TransportError> {
    let [topic0, from, to] = log.topics.as_slice() else {
        return Err(TransportError::Malformed(format!(
            "expected 3 topics, got {}",
            log.topics.len()
        )));
    };
    if !topic0.eq_ignore_ascii_case(TRANSFER_TOPIC) {
        return Err(TransportError::Malformed(format!(
            "not a Transfer log: {topic0}"
        )));
    }

    let block_number = parse_hex_u64(&log.block_number)?;
    let log_index = u32::try_from(parse_hex_u64(&log.log_index)?)
        .map_err(|_| TransportError::Malformed(format!("log index {}", log.log_index)))?;

    Ok(TransferLog {
        from_address: topic_address(from)?,
        to_address: topic_address(to)?,
        amount: parse_amount(&log.data)?,
        tx_hash: log.tx_hash.clone(),
        block_number,
        log_index,
    })
}

/// EIP-55 address held in the low 20 bytes of an indexed topic.
fn topic_address(topic: &str) -> Result<String, TransportError> {
    let word = B256::from_str(topic)
        .map_err(|e| TransportError::Malformed(format!("topic {topic}: {e}")))?;
    Ok(Address::from_word(word).to_checksum(None))
}

/// Full-width decimal rendering of the `uint256` data word.
fn parse_amount(data: &str) -> Result<String, TransportError> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    if digits.is_empty() {
        return Err(TransportError::Malformed("empty transfer data".into()));
    }
    U256::from_str_radix(digits, 16)
        .map(|v| v.to_string())
        .map_err(|e| TransportError::Malformed(format!("transfer amount {data}: {e}")))
}

/// Parse a hex quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, TransportError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| TransportError::Malformed(format!("quantity {s:?}: {e}")))
}

/// Convert an `eth_getBlockByNumber` result object to a [`BlockRef`].
pub fn block_from_json(v: &Value) -> Result<BlockRef, TransportError> {
    let field = |name: &str| {
        v[name]
            .as_str()
            .ok_or_else(|| TransportError::Malformed(format!("block is missing `{name}`")))
    };
    Ok(BlockRef {
        number: parse_hex_u64(field("number")?)?,
        hash: field("hash")?.to_string(),
        timestamp: parse_hex_u64(field("timestamp")?)? as i64,
    })
}
