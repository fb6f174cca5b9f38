//! Persistent store seam: the checkpoint singleton plus the transfer table.
//!
//! Only the sync engine and the reorg resolver write through this trait
//! (and the retention pruner, which only deletes by age).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::SyncError;
use crate::types::{Checkpoint, TransferFilter, TransferPage, TransferRecord};

/// A single write in an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    /// Bulk insert; duplicates of `(tx_hash, log_index)` are skipped.
    InsertTransfers(Vec<TransferRecord>),
    /// Create or update the checkpoint singleton.
    UpsertCheckpoint { block_number: u64, block_hash: String },
    /// Delete every transfer with `block_number > height`.
    DeleteTransfersAbove(u64),
}

/// Storage backend for checkpoint and transfers.
///
/// Implementations: [`MemoryStore`] here, `SqliteStore` and `PostgresStore`
/// in `chainsync-storage`.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Load the checkpoint singleton, if one has been written.
    async fn checkpoint(&self) -> Result<Option<Checkpoint>, SyncError>;

    /// Create or update the checkpoint singleton.
    async fn upsert_checkpoint(&self, block_number: u64, block_hash: &str)
        -> Result<(), SyncError>;

    /// Bulk insert, skipping records whose natural key already exists.
    /// Returns the number of rows actually inserted.
    async fn insert_transfers(&self, records: &[TransferRecord]) -> Result<u64, SyncError>;

    /// Delete every transfer above `block_number`; returns the removed count.
    async fn delete_transfers_above(&self, block_number: u64) -> Result<u64, SyncError>;

    /// Apply `writes` in order as one all-or-nothing unit.
    async fn run_atomic(&self, writes: Vec<StoreWrite>) -> Result<(), SyncError>;

    /// Delete every transfer whose block timestamp is before `cutoff`.
    async fn delete_transfers_before(&self, cutoff: DateTime<Utc>) -> Result<u64, SyncError>;

    /// One page of transfers matching `filter`, newest block first.
    /// Fails with [`SyncError::InvalidFilter`] if the filter does not validate.
    async fn list_transfers(&self, filter: &TransferFilter) -> Result<TransferPage, SyncError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct MemoryState {
    checkpoint: Option<Checkpoint>,
    transfers: Vec<TransferRecord>,
}

impl MemoryState {
    fn apply(&mut self, write: StoreWrite) -> u64 {
        match write {
            StoreWrite::InsertTransfers(records) => {
                let mut inserted = 0;
                for record in records {
                    let exists = self.transfers.iter().any(|t| t.key() == record.key());
                    if !exists {
                        self.transfers.push(record);
                        inserted += 1;
                    }
                }
                inserted
            }
            StoreWrite::UpsertCheckpoint {
                block_number,
                block_hash,
            } => {
                self.checkpoint = Some(Checkpoint::new(block_number, block_hash));
                1
            }
            StoreWrite::DeleteTransfersAbove(height) => {
                let before = self.transfers.len();
                self.transfers.retain(|t| t.block_number <= height);
                (before - self.transfers.len()) as u64
            }
        }
    }
}

/// In-memory store for tests and ephemeral runs. All data is lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the checkpoint without counting it as a write.
    pub fn with_checkpoint(block_number: u64, block_hash: impl Into<String>) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            state.checkpoint = Some(Checkpoint::new(block_number, block_hash));
        }
        store
    }

    /// Seed transfers without counting it as a write.
    pub fn seed_transfers(&self, records: Vec<TransferRecord>) {
        if let Ok(mut state) = self.state.lock() {
            state.transfers.extend(records);
        }
    }

    /// Snapshot of all stored transfers (insertion order).
    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.state
            .lock()
            .map(|s| s.transfers.clone())
            .unwrap_or_default()
    }

    /// Number of mutating calls made through [`TransferStore`].
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, SyncError> {
        self.state
            .lock()
            .map_err(|e| SyncError::Storage(format!("memory store poisoned: {e}")))
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransferStore for MemoryStore {
    async fn checkpoint(&self) -> Result<Option<Checkpoint>, SyncError> {
        Ok(self.lock()?.checkpoint.clone())
    }

    async fn upsert_checkpoint(
        &self,
        block_number: u64,
        block_hash: &str,
    ) -> Result<(), SyncError> {
        self.record_write();
        self.lock()?.apply(StoreWrite::UpsertCheckpoint {
            block_number,
            block_hash: block_hash.to_string(),
        });
        Ok(())
    }

    async fn insert_transfers(&self, records: &[TransferRecord]) -> Result<u64, SyncError> {
        self.record_write();
        Ok(self
            .lock()?
            .apply(StoreWrite::InsertTransfers(records.to_vec())))
    }

    async fn delete_transfers_above(&self, block_number: u64) -> Result<u64, SyncError> {
        self.record_write();
        Ok(self
            .lock()?
            .apply(StoreWrite::DeleteTransfersAbove(block_number)))
    }

    async fn run_atomic(&self, writes: Vec<StoreWrite>) -> Result<(), SyncError> {
        self.record_write();
        let mut state = self.lock()?;
        // Staged on a copy; the swap is the commit.
        let mut next = state.clone();
        for write in writes {
            next.apply(write);
        }
        *state = next;
        Ok(())
    }

    async fn delete_transfers_before(&self, cutoff: DateTime<Utc>) -> Result<u64, SyncError> {
        self.record_write();
        let mut state = self.lock()?;
        let before = state.transfers.len();
        state.transfers.retain(|t| t.block_timestamp >= cutoff);
        Ok((before - state.transfers.len()) as u64)
    }

    async fn list_transfers(&self, filter: &TransferFilter) -> Result<TransferPage, SyncError> {
        filter.validate()?;
        let state = self.lock()?;
        let mut matching: Vec<_> = state
            .transfers
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.block_number
                .cmp(&a.block_number)
                .then(b.log_index.cmp(&a.log_index))
        });
        let (page, limit) = filter.normalized();
        let total = matching.len() as u64;
        let data = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(limit as usize)
            .collect();
        Ok(TransferPage {
            data,
            total,
            page,
            limit,
        })
    }
}
