//! [`EvmChainSource`]: the production [`ChainSource`] over JSON-RPC.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde_json::{json, Value};

use chainsync_core::{BlockRef, ChainSource, SyncError, TransferLog};

use crate::erc20::{block_from_json, decode_transfer, parse_hex_u64, RawLog, TRANSFER_TOPIC};
use crate::error::TransportError;
use crate::request::JsonRpcRequest;
use crate::transport::{HttpTransport, RpcTransport};

/// Reads tip height, blocks and `Transfer` logs of one token contract.
pub struct EvmChainSource<T = HttpTransport> {
    transport: T,
    token: Address,
    next_id: AtomicU64,
}

impl EvmChainSource<HttpTransport> {
    /// Connect to an HTTP endpoint.
    pub fn http(url: &str, token: Address, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self::new(HttpTransport::new(url, timeout)?, token))
    }
}

impl<T: RpcTransport> EvmChainSource<T> {
    pub fn new(transport: T, token: Address) -> Self {
        Self {
            transport,
            token,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn token(&self) -> Address {
        self.token
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.transport
            .send(JsonRpcRequest::new(id, method, params))
            .await?
            .into_result()
            .map_err(TransportError::Rpc)
    }
}

fn hex_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

#[async_trait]
impl<T: RpcTransport> ChainSource for EvmChainSource<T> {
    async fn tip_height(&self) -> Result<u64, SyncError> {
        let v = self.call("eth_blockNumber", vec![]).await?;
        let s = v
            .as_str()
            .ok_or_else(|| TransportError::Malformed(format!("eth_blockNumber returned {v}")))?;
        Ok(parse_hex_u64(s)?)
    }

    async fn block(&self, number: u64) -> Result<Option<BlockRef>, SyncError> {
        let v = self
            .call(
                "eth_getBlockByNumber",
                vec![json!(hex_quantity(number)), json!(false)],
            )
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(block_from_json(&v)?))
    }

    async fn transfer_logs(&self, from: u64, to: u64) -> Result<Vec<TransferLog>, SyncError> {
        let filter = json!({
            "address": self.token.to_checksum(None),
            "topics": [TRANSFER_TOPIC],
            "fromBlock": hex_quantity(from),
            "toBlock": hex_quantity(to),
        });
        let v = self.call("eth_getLogs", vec![filter]).await?;
        let raw: Vec<RawLog> = serde_json::from_value(v).map_err(TransportError::from)?;

        let mut logs = Vec::with_capacity(raw.len());
        for log in raw.iter().filter(|l| !l.is_removed()) {
            if !log.is_erc20_transfer() {
                tracing::warn!(
                    tx = %log.tx_hash,
                    log_index = %log.log_index,
                    topics = log.topics.len(),
                    "Skipping log that is not an ERC-20 Transfer"
                );
                continue;
            }
            // A real Transfer that fails to decode aborts the batch, so the
            // checkpoint never moves past it.
            logs.push(decode_transfer(log)?);
        }
        tracing::debug!(from, to, raw = raw.len(), decoded = logs.len(), "fetched logs");
        Ok(logs)
    }
}
