//! Retention pruning: drop transfers older than a fixed age.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SyncError;
use crate::scheduler::Cycle;
use crate::store::TransferStore;

/// Deletes transfers whose block timestamp is older than `retention`.
pub struct RetentionPruner {
    store: Arc<dyn TransferStore>,
    retention: Duration,
}

impl RetentionPruner {
    /// Default retention: 24 hours.
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(store: Arc<dyn TransferStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    /// Prune relative to `now`; returns the number of removed transfers.
    pub async fn prune_at(&self, now: DateTime<Utc>) -> Result<u64, SyncError> {
        let retention = chrono::Duration::from_std(self.retention)
            .map_err(|e| SyncError::Config(format!("retention out of range: {e}")))?;
        let cutoff = now - retention;
        let removed = self.store.delete_transfers_before(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, %cutoff, "Pruned old transfer records");
        } else {
            tracing::info!(%cutoff, "No old transfers to prune");
        }
        Ok(removed)
    }

    pub async fn prune_once(&self) -> Result<u64, SyncError> {
        self.prune_at(Utc::now()).await
    }
}

#[async_trait]
impl Cycle for RetentionPruner {
    fn name(&self) -> &str {
        "prune"
    }

    async fn run_cycle(&self) {
        if let Err(e) = self.prune_once().await {
            tracing::error!(error = %e, "Error during scheduled pruning job");
        }
    }
}
