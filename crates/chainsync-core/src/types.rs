//! Shared types for the sync pipeline.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

// ─── BlockRef ─────────────────────────────────────────────────────────────────

/// The parts of a block the engine cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl BlockRef {
    /// The block timestamp as a UTC datetime (epoch if out of range).
    pub fn datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.timestamp, 0)
            .single()
            .unwrap_or_default()
    }
}

// ─── TransferLog ─────────────────────────────────────────────────────────────

/// A token transfer log as reported by the chain source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLog {
    pub from_address: String,
    pub to_address: String,
    /// Transferred amount in base units, as an exact decimal string.
    pub amount: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
}

// ─── TransferRecord ──────────────────────────────────────────────────────────

/// A persisted transfer. `(tx_hash, log_index)` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub from_address: String,
    pub to_address: String,
    /// Exact decimal string; never a float or a 64-bit integer.
    pub amount: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
    pub block_timestamp: DateTime<Utc>,
}

impl TransferRecord {
    /// Build a record from a log and its block timestamp.
    pub fn from_log(log: TransferLog, block_timestamp: DateTime<Utc>) -> Self {
        Self {
            from_address: log.from_address,
            to_address: log.to_address,
            amount: log.amount,
            tx_hash: log.tx_hash,
            block_number: log.block_number,
            log_index: log.log_index,
            block_timestamp,
        }
    }

    /// The natural key of this record.
    pub fn key(&self) -> (&str, u32) {
        (&self.tx_hash, self.log_index)
    }
}

// ─── Checkpoint ──────────────────────────────────────────────────────────────

/// The singleton progress marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identity key of the singleton row (always [`Checkpoint::SINGLETON_ID`]).
    pub id: String,
    /// Highest block whose events are committed.
    pub block_number: u64,
    /// Canonical hash of `block_number` at commit time.
    pub block_hash: String,
    /// Unix timestamp of the last update.
    pub updated_at: i64,
}

impl Checkpoint {
    pub const SINGLETON_ID: &'static str = "singleton";

    pub fn new(block_number: u64, block_hash: impl Into<String>) -> Self {
        Self {
            id: Self::SINGLETON_ID.to_string(),
            block_number,
            block_hash: block_hash.into(),
            updated_at: Utc::now().timestamp(),
        }
    }
}

// ─── Read side ───────────────────────────────────────────────────────────────

/// Filter and pagination for listing stored transfers.
///
/// Every set field narrows the result; address comparisons ignore case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFilter {
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    /// Matches transfers where this address is the sender or the recipient.
    pub address: Option<String>,
    /// Minimum amount in base units (decimal digits), inclusive.
    pub min_amount: Option<String>,
    /// Earliest block timestamp, inclusive.
    pub start: Option<DateTime<Utc>>,
    /// Latest block timestamp, inclusive.
    pub end: Option<DateTime<Utc>>,
    /// 1-based page number.
    pub page: u32,
    /// Page size in `1..=100`.
    pub limit: u32,
}

impl Default for TransferFilter {
    fn default() -> Self {
        Self {
            from_address: None,
            to_address: None,
            address: None,
            min_amount: None,
            start: None,
            end: None,
            page: 1,
            limit: 20,
        }
    }
}

impl TransferFilter {
    pub const MAX_LIMIT: u32 = 100;

    /// Transfers sent or received by `address`, newest first.
    pub fn history(address: impl Into<String>, page: u32, limit: u32) -> Self {
        Self {
            address: Some(address.into()),
            page,
            limit,
            ..Self::default()
        }
    }

    /// Reject pages below 1, limits outside `1..=100`, a non-decimal
    /// minimum amount and an inverted time range.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.page == 0 {
            return Err(SyncError::InvalidFilter("page must be at least 1".into()));
        }
        if !(1..=Self::MAX_LIMIT).contains(&self.limit) {
            return Err(SyncError::InvalidFilter(format!(
                "limit must be between 1 and {}, got {}",
                Self::MAX_LIMIT,
                self.limit
            )));
        }
        if let Some(min) = &self.min_amount {
            let digits = min.trim_start_matches('0');
            if min.is_empty() || !min.bytes().all(|b| b.is_ascii_digit()) || digits.len() > 78 {
                return Err(SyncError::InvalidFilter(format!(
                    "min amount must be an unsigned decimal integer, got {min:?}"
                )));
            }
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(SyncError::InvalidFilter(format!(
                    "start {start} is after end {end}"
                )));
            }
        }
        Ok(())
    }

    /// Page and limit clamped into their valid ranges.
    pub fn normalized(&self) -> (u32, u32) {
        (self.page.max(1), self.limit.clamp(1, Self::MAX_LIMIT))
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        let (page, limit) = self.normalized();
        u64::from(page - 1) * u64::from(limit)
    }

    /// The minimum amount without leading zeros (`"0"` for zero).
    pub fn min_amount_digits(&self) -> Option<&str> {
        self.min_amount.as_deref().map(|min| {
            let digits = min.trim_start_matches('0');
            if digits.is_empty() {
                "0"
            } else {
                digits
            }
        })
    }

    /// Returns `true` if `record` passes every filter.
    pub fn matches(&self, record: &TransferRecord) -> bool {
        let same = |filter: &Option<String>, value: &str| {
            filter.as_ref().map_or(true, |a| a.eq_ignore_ascii_case(value))
        };
        let either = self.address.as_ref().map_or(true, |a| {
            a.eq_ignore_ascii_case(&record.from_address) || a.eq_ignore_ascii_case(&record.to_address)
        });
        let amount_ok = self
            .min_amount_digits()
            .map_or(true, |min| decimal_at_least(&record.amount, min));
        let start_ok = self.start.map_or(true, |s| record.block_timestamp >= s);
        let end_ok = self.end.map_or(true, |e| record.block_timestamp <= e);

        same(&self.from_address, &record.from_address)
            && same(&self.to_address, &record.to_address)
            && either
            && amount_ok
            && start_ok
            && end_ok
    }
}

/// Compares two canonical decimal strings (no leading zeros) numerically.
fn decimal_at_least(amount: &str, min: &str) -> bool {
    let amount = amount.trim_start_matches('0');
    let min = min.trim_start_matches('0');
    amount.len() > min.len() || (amount.len() == min.len() && amount >= min)
}

/// One page of transfers, newest block first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferPage {
    pub data: Vec<TransferRecord>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl TransferPage {
    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.limit))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
