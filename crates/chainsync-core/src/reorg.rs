//! Reorg resolution: find a safe height to resume from and roll back to it.
//!
//! The ancestor search walks down from the stale checkpoint height. For the
//! first height that still exists on chain, the block `confirmation_depth`
//! below it is taken as the common ancestor. It does not compare stored
//! hashes against the chain, so the true fork point may be higher.
//!
//! Rollback order is fixed: transfers above the ancestor are deleted first,
//! then the checkpoint moves. A crash between the two leaves the checkpoint
//! at or above the deleted range, never past undeleted stale rows.

use std::sync::Arc;

use crate::error::SyncError;
use crate::retry::RetryPolicy;
use crate::source::ChainSource;
use crate::store::TransferStore;

/// Result of a reorg resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorgOutcome {
    /// Store and checkpoint were rolled back to `ancestor`.
    RolledBack {
        ancestor: u64,
        ancestor_hash: String,
        removed: u64,
    },
    /// No ancestor could be found; ingestion restarts near the tip and
    /// stored rows are left untouched.
    AncestorNotFound { restart_from: u64 },
}

impl ReorgOutcome {
    /// The height the next batch starts after.
    pub fn resume_height(&self) -> u64 {
        match self {
            Self::RolledBack { ancestor, .. } => *ancestor,
            Self::AncestorNotFound { restart_from } => *restart_from,
        }
    }
}

/// Resolves a detected reorg against the chain and the store.
pub struct ReorgResolver {
    source: Arc<dyn ChainSource>,
    store: Arc<dyn TransferStore>,
    retry: RetryPolicy,
    confirmation_depth: u64,
    initial_depth: u64,
}

impl ReorgResolver {
    pub fn new(
        source: Arc<dyn ChainSource>,
        store: Arc<dyn TransferStore>,
        retry: RetryPolicy,
        confirmation_depth: u64,
        initial_depth: u64,
    ) -> Self {
        Self {
            source,
            store,
            retry,
            confirmation_depth,
            initial_depth,
        }
    }

    /// Resolve a reorg detected at `stale_height`.
    pub async fn resolve(&self, stale_height: u64) -> Result<ReorgOutcome, SyncError> {
        let mut current = stale_height;
        while current > 0 {
            let head = self
                .retry
                .run("reorg.block", || self.source.block(current))
                .await?;

            if head.is_some() {
                if let Some(ancestor_height) = current.checked_sub(self.confirmation_depth) {
                    let ancestor = self
                        .retry
                        .run("reorg.ancestor", || self.source.block(ancestor_height))
                        .await?;

                    if let Some(ancestor) = ancestor {
                        let removed = self.store.delete_transfers_above(ancestor.number).await?;
                        self.store
                            .upsert_checkpoint(ancestor.number, &ancestor.hash)
                            .await?;
                        tracing::warn!(
                            ancestor = ancestor.number,
                            hash = %ancestor.hash,
                            removed,
                            "Rolled back to common ancestor"
                        );
                        return Ok(ReorgOutcome::RolledBack {
                            ancestor: ancestor.number,
                            ancestor_hash: ancestor.hash,
                            removed,
                        });
                    }
                }
            }

            current -= 1;
        }

        let tip = self
            .retry
            .run("reorg.tip", || self.source.tip_height())
            .await?;
        let restart_from = tip.saturating_sub(self.initial_depth);
        tracing::error!(
            stale_height,
            restart_from,
            "Could not find a common ancestor; restarting near the tip. Stored transfers above the \
             true ancestor may be orphaned, manual intervention may be required"
        );
        Ok(ReorgOutcome::AncestorNotFound { restart_from })
    }
}
