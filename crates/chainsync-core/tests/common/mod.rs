//! Scripted chain source and helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chainsync_core::{
    BlockRef, ChainSource, RetryConfig, RetryPolicy, Sleeper, SyncConfig, SyncError, TransferLog,
};
use tokio::sync::Notify;

pub fn hash_of(number: u64) -> String {
    format!("0xhash{number}")
}

pub fn block_time(number: u64) -> i64 {
    1_672_531_200 + (number as i64) * 12
}

/// A chain where every block exists with a predictable hash unless told otherwise.
#[derive(Default)]
pub struct MockChain {
    tip: AtomicU64,
    overrides: Mutex<HashMap<u64, String>>,
    missing: Mutex<HashSet<u64>>,
    logs: Mutex<Vec<TransferLog>>,
    tip_failures: Mutex<VecDeque<SyncError>>,
    block_failures: Mutex<HashMap<u64, VecDeque<SyncError>>>,
    tip_gate: Mutex<Option<Arc<Notify>>>,

    pub tip_calls: AtomicUsize,
    pub block_calls: Mutex<Vec<u64>>,
    pub log_ranges: Mutex<Vec<(u64, u64)>>,
}

impl MockChain {
    pub fn new(tip: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.tip.store(tip, Ordering::SeqCst);
        Arc::new(chain)
    }

    pub fn set_hash(&self, number: u64, hash: &str) {
        self.overrides.lock().unwrap().insert(number, hash.to_string());
    }

    pub fn remove_block(&self, number: u64) {
        self.missing.lock().unwrap().insert(number);
    }

    pub fn push_log(&self, log: TransferLog) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn fail_tip(&self, err: SyncError) {
        self.tip_failures.lock().unwrap().push_back(err);
    }

    /// Fail the next fetch of block `number` with `err`.
    pub fn fail_block(&self, number: u64, err: SyncError) {
        self.block_failures
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push_back(err);
    }

    pub fn block_fetches(&self, number: u64) -> usize {
        self.block_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|&&n| n == number)
            .count()
    }

    /// Make `tip_height` wait on the returned notify.
    pub fn gate_tip(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.tip_gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    pub fn log_ranges(&self) -> Vec<(u64, u64)> {
        self.log_ranges.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.tip_calls.load(Ordering::SeqCst)
            + self.block_calls.lock().unwrap().len()
            + self.log_ranges.lock().unwrap().len()
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn tip_height(&self) -> Result<u64, SyncError> {
        self.tip_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.tip_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = self.tip_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn block(&self, number: u64) -> Result<Option<BlockRef>, SyncError> {
        self.block_calls.lock().unwrap().push(number);
        let failure = self
            .block_failures
            .lock()
            .unwrap()
            .get_mut(&number)
            .and_then(VecDeque::pop_front);
        if let Some(err) = failure {
            return Err(err);
        }
        if self.missing.lock().unwrap().contains(&number) {
            return Ok(None);
        }
        let hash = self
            .overrides
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_else(|| hash_of(number));
        Ok(Some(BlockRef {
            number,
            hash,
            timestamp: block_time(number),
        }))
    }

    async fn transfer_logs(&self, from: u64, to: u64) -> Result<Vec<TransferLog>, SyncError> {
        self.log_ranges.lock().unwrap().push((from, to));
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| (from..=to).contains(&l.block_number))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingSleeper(pub Mutex<Vec<Duration>>);

impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

pub fn instant_retry(config: &SyncConfig) -> (RetryPolicy, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let retry = RetryPolicy::with_sleeper(
        RetryConfig {
            max_attempts: config.retry.max_attempts,
            base_delay: config.retry.base_delay,
        },
        sleeper.clone(),
    );
    (retry, sleeper)
}

pub fn transfer(tx: &str, log_index: u32, block: u64, amount: &str) -> TransferLog {
    TransferLog {
        from_address: "0xfrom".into(),
        to_address: "0xto".into(),
        amount: amount.into(),
        tx_hash: tx.into(),
        block_number: block,
        log_index,
    }
}
