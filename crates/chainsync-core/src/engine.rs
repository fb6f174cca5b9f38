//! The sync engine: one bounded, atomic ingestion step per cycle.
//!
//! # Cycle
//! 1. Load the checkpoint. Without one, start `initial_depth` behind the tip.
//! 2. With one, verify its hash is still canonical; otherwise resolve the reorg.
//! 3. Ingest at most `batch_size` blocks up to `tip - confirmation_depth`.
//! 4. Commit the transfers and the new checkpoint in a single atomic write.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::reorg::ReorgResolver;
use crate::retry::RetryPolicy;
use crate::scheduler::Cycle;
use crate::source::ChainSource;
use crate::store::{StoreWrite, TransferStore};
use crate::types::{TransferLog, TransferRecord};

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No finalized block above `last_processed`; nothing was written.
    Idle { last_processed: u64 },
    /// Blocks `[from, to]` were committed along with `transfers` records.
    Committed { from: u64, to: u64, transfers: usize },
}

/// Drives ingestion from a [`ChainSource`] into a [`TransferStore`].
pub struct SyncEngine {
    source: Arc<dyn ChainSource>,
    store: Arc<dyn TransferStore>,
    retry: RetryPolicy,
    resolver: ReorgResolver,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn ChainSource>,
        store: Arc<dyn TransferStore>,
        config: SyncConfig,
    ) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        Self::with_retry(source, store, config, retry)
    }

    /// Build with an explicit retry policy (e.g. one with a custom sleeper).
    pub fn with_retry(
        source: Arc<dyn ChainSource>,
        store: Arc<dyn TransferStore>,
        config: SyncConfig,
        retry: RetryPolicy,
    ) -> Self {
        let resolver = ReorgResolver::new(
            source.clone(),
            store.clone(),
            retry.clone(),
            config.confirmation_depth,
            config.initial_depth,
        );
        Self {
            source,
            store,
            retry,
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one cycle and report what happened. Errors abort the cycle
    /// without committing anything.
    pub async fn sync_once(&self) -> Result<CycleOutcome, SyncError> {
        let start = self.resume_height().await?;

        let tip = self
            .retry
            .run("tip_height", || self.source.tip_height())
            .await?;
        let finalized = tip.saturating_sub(self.config.confirmation_depth);

        if finalized <= start {
            tracing::info!(
                last_processed = start,
                finalized,
                "No new finalized blocks to process"
            );
            return Ok(CycleOutcome::Idle {
                last_processed: start,
            });
        }

        let from = start + 1;
        let to = finalized.min(from + self.config.batch_size - 1);
        tracing::info!(from, to, tip, "Processing block range");

        let logs = self
            .retry
            .run("transfer_logs", || self.source.transfer_logs(from, to))
            .await?;

        let to_block = self
            .retry
            .run("block", || self.source.block(to))
            .await?
            .ok_or(SyncError::MissingBlock { number: to })?;

        let transfers = logs.len();
        let mut writes = Vec::with_capacity(2);
        if !logs.is_empty() {
            let timestamps = self.block_timestamps(&logs).await?;
            let records: Vec<_> = logs
                .into_iter()
                .map(|log| {
                    let ts = timestamps
                        .get(&log.block_number)
                        .copied()
                        .unwrap_or_default();
                    TransferRecord::from_log(log, ts)
                })
                .collect();
            writes.push(StoreWrite::InsertTransfers(records));
        }
        writes.push(StoreWrite::UpsertCheckpoint {
            block_number: to,
            block_hash: to_block.hash.clone(),
        });

        self.store.run_atomic(writes).await?;

        if transfers == 0 {
            tracing::info!(to, hash = %to_block.hash, "No events found, but updated checkpoint to #{to}");
        } else {
            tracing::info!(from, to, transfers, hash = %to_block.hash, "Committed transfers and checkpoint");
        }

        Ok(CycleOutcome::Committed {
            from,
            to,
            transfers,
        })
    }

    /// The height the next batch starts after.
    async fn resume_height(&self) -> Result<u64, SyncError> {
        let Some(checkpoint) = self.store.checkpoint().await? else {
            tracing::info!("No existing checkpoint found, computing a dynamic start block");
            let tip = self
                .retry
                .run("tip_height", || self.source.tip_height())
                .await?;
            let start = tip.saturating_sub(self.config.initial_depth);
            tracing::info!(start, tip, "Starting to index from approximately block #{start}");
            return Ok(start);
        };

        let onchain = self
            .retry
            .run("block", || self.source.block(checkpoint.block_number))
            .await?;

        match onchain {
            Some(block) if block.hash == checkpoint.block_hash => Ok(checkpoint.block_number),
            other => {
                tracing::warn!(
                    block = checkpoint.block_number,
                    expected = %checkpoint.block_hash,
                    actual = ?other.map(|b| b.hash),
                    "Reorg detected: checkpoint block is no longer on the main chain"
                );
                let outcome = self.resolver.resolve(checkpoint.block_number).await?;
                Ok(outcome.resume_height())
            }
        }
    }

    /// Timestamps of every block referenced by `logs`, fetched concurrently
    /// and retried as one unit. Blocks the node does not return are omitted.
    async fn block_timestamps(
        &self,
        logs: &[TransferLog],
    ) -> Result<HashMap<u64, DateTime<Utc>>, SyncError> {
        let numbers: BTreeSet<u64> = logs.iter().map(|l| l.block_number).collect();

        let blocks = self
            .retry
            .run("block_timestamps", || {
                futures::future::try_join_all(numbers.iter().map(|&n| self.source.block(n)))
            })
            .await?;

        let mut timestamps = HashMap::with_capacity(numbers.len());
        for (number, block) in numbers.iter().zip(blocks) {
            match block {
                Some(b) => {
                    timestamps.insert(*number, b.datetime());
                }
                None => tracing::warn!(
                    block = number,
                    "Block timestamp unavailable, defaulting to the Unix epoch"
                ),
            }
        }
        Ok(timestamps)
    }
}

#[async_trait]
impl Cycle for SyncEngine {
    fn name(&self) -> &str {
        "sync"
    }

    async fn run_cycle(&self) {
        if let Err(e) = self.sync_once().await {
            tracing::error!(error = %e, "Error during processing cycle");
        }
    }
}
