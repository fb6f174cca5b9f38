//! The chain source seam: everything the engine needs from a node.

use async_trait::async_trait;

use crate::error::SyncError;
use crate::types::{BlockRef, TransferLog};

/// Point-in-time queries against the chain. Every call may fail and is
/// expected to be wrapped by the [`RetryPolicy`](crate::retry::RetryPolicy).
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Current chain tip height.
    async fn tip_height(&self) -> Result<u64, SyncError>;

    /// Block `number`, or `None` if the node does not know it.
    async fn block(&self, number: u64) -> Result<Option<BlockRef>, SyncError>;

    /// All transfer logs in `[from, to]` (inclusive). Idempotent range query.
    async fn transfer_logs(&self, from: u64, to: u64) -> Result<Vec<TransferLog>, SyncError>;
}
