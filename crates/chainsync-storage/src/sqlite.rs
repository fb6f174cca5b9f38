//! SQLite transfer store.
//!
//! Persists the checkpoint singleton and transfer records to a single SQLite
//! file. Amounts are stored as decimal text so 256-bit values survive intact;
//! block timestamps are stored as Unix seconds.
//!
//! # Usage
//! ```rust,no_run
//! use chainsync_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./chainsync.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use chainsync_core::{
    Checkpoint, StoreWrite, SyncError, TransferFilter, TransferPage, TransferRecord, TransferStore,
};

fn storage(e: sqlx::Error) -> SyncError {
    SyncError::Storage(e.to_string())
}

/// SQLite-backed [`TransferStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainsync.db"`) or a full
    /// SQLite URL (`"sqlite:./chainsync.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, SyncError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database. All data is lost when the store is dropped.
    ///
    /// Every SQLite connection to `:memory:` gets its own database, so the
    /// pool is pinned to one long-lived connection.
    pub async fn in_memory() -> Result<Self, SyncError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), SyncError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id           TEXT    PRIMARY KEY,
                block_number INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transfers (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                from_address    TEXT    NOT NULL COLLATE NOCASE,
                to_address      TEXT    NOT NULL COLLATE NOCASE,
                amount          TEXT    NOT NULL,
                tx_hash         TEXT    NOT NULL,
                block_number    INTEGER NOT NULL,
                log_index       INTEGER NOT NULL,
                block_timestamp INTEGER NOT NULL,
                UNIQUE (tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_transfers_block ON transfers (block_number);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_time ON transfers (block_timestamp);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers (from_address);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers (to_address);",
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        }
        Ok(())
    }

    async fn apply(&self, write: &StoreWrite) -> Result<u64, SyncError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        apply_write(&mut *conn, write).await
    }
}

// ─── Writes ──────────────────────────────────────────────────────────────────

async fn apply_write(conn: &mut SqliteConnection, write: &StoreWrite) -> Result<u64, SyncError> {
    match write {
        StoreWrite::InsertTransfers(records) => {
            let mut inserted = 0;
            for r in records {
                inserted += sqlx::query(
                    "INSERT INTO transfers
                     (from_address, to_address, amount, tx_hash, block_number, log_index, block_timestamp)
                     VALUES (?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (tx_hash, log_index) DO NOTHING",
                )
                .bind(&r.from_address)
                .bind(&r.to_address)
                .bind(&r.amount)
                .bind(&r.tx_hash)
                .bind(r.block_number as i64)
                .bind(i64::from(r.log_index))
                .bind(r.block_timestamp.timestamp())
                .execute(&mut *conn)
                .await
                .map_err(storage)?
                .rows_affected();
            }
            debug!(inserted, offered = records.len(), "transfers stored");
            Ok(inserted)
        }
        StoreWrite::UpsertCheckpoint {
            block_number,
            block_hash,
        } => {
            sqlx::query(
                "INSERT INTO checkpoints (id, block_number, block_hash, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (id) DO UPDATE SET
                     block_number = excluded.block_number,
                     block_hash   = excluded.block_hash,
                     updated_at   = excluded.updated_at",
            )
            .bind(Checkpoint::SINGLETON_ID)
            .bind(*block_number as i64)
            .bind(block_hash)
            .bind(Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(storage)?;
            debug!(block = block_number, "checkpoint saved");
            Ok(1)
        }
        StoreWrite::DeleteTransfersAbove(height) => {
            let removed = sqlx::query("DELETE FROM transfers WHERE block_number > ?")
                .bind(*height as i64)
                .execute(&mut *conn)
                .await
                .map_err(storage)?
                .rows_affected();
            debug!(height, removed, "transfers rolled back");
            Ok(removed)
        }
    }
}

// ─── Reads ───────────────────────────────────────────────────────────────────

/// Amounts are canonical decimal text, so a longer string is a larger
/// number and equal lengths compare lexicographically.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TransferFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(from) = &filter.from_address {
        qb.push(" AND from_address = ").push_bind(from.clone());
    }
    if let Some(to) = &filter.to_address {
        qb.push(" AND to_address = ").push_bind(to.clone());
    }
    if let Some(address) = &filter.address {
        qb.push(" AND (from_address = ")
            .push_bind(address.clone())
            .push(" OR to_address = ")
            .push_bind(address.clone())
            .push(")");
    }
    if let Some(min) = filter.min_amount_digits() {
        let len = min.len() as i64;
        qb.push(" AND (length(amount) > ")
            .push_bind(len)
            .push(" OR (length(amount) = ")
            .push_bind(len)
            .push(" AND amount >= ")
            .push_bind(min.to_string())
            .push("))");
    }
    if let Some(start) = filter.start {
        qb.push(" AND block_timestamp >= ").push_bind(start.timestamp());
    }
    if let Some(end) = filter.end {
        qb.push(" AND block_timestamp <= ").push_bind(end.timestamp());
    }
}

fn record_from_row(row: &SqliteRow) -> TransferRecord {
    let ts: i64 = row.get("block_timestamp");
    TransferRecord {
        from_address: row.get("from_address"),
        to_address: row.get("to_address"),
        amount: row.get("amount"),
        tx_hash: row.get("tx_hash"),
        block_number: row.get::<i64, _>("block_number") as u64,
        log_index: row.get::<i64, _>("log_index") as u32,
        block_timestamp: Utc.timestamp_opt(ts, 0).single().unwrap_or_default(),
    }
}

// ─── TransferStore impl ──────────────────────────────────────────────────────

#[async_trait]
impl TransferStore for SqliteStore {
    async fn checkpoint(&self) -> Result<Option<Checkpoint>, SyncError> {
        let row = sqlx::query(
            "SELECT id, block_number, block_hash, updated_at FROM checkpoints WHERE id = ?",
        )
        .bind(Checkpoint::SINGLETON_ID)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.map(|r| Checkpoint {
            id: r.get("id"),
            block_number: r.get::<i64, _>("block_number") as u64,
            block_hash: r.get("block_hash"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn upsert_checkpoint(&self, block_number: u64, block_hash: &str) -> Result<(), SyncError> {
        self.apply(&StoreWrite::UpsertCheckpoint {
            block_number,
            block_hash: block_hash.to_string(),
        })
        .await
        .map(drop)
    }

    async fn insert_transfers(&self, records: &[TransferRecord]) -> Result<u64, SyncError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let inserted = apply_write(&mut *tx, &StoreWrite::InsertTransfers(records.to_vec())).await?;
        tx.commit().await.map_err(storage)?;
        Ok(inserted)
    }

    async fn delete_transfers_above(&self, block_number: u64) -> Result<u64, SyncError> {
        self.apply(&StoreWrite::DeleteTransfersAbove(block_number))
            .await
    }

    async fn run_atomic(&self, writes: Vec<StoreWrite>) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        for write in &writes {
            // Dropping `tx` on error rolls the whole batch back.
            apply_write(&mut *tx, write).await?;
        }
        tx.commit().await.map_err(storage)
    }

    async fn delete_transfers_before(&self, cutoff: DateTime<Utc>) -> Result<u64, SyncError> {
        let removed = sqlx::query("DELETE FROM transfers WHERE block_timestamp < ?")
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await
            .map_err(storage)?
            .rows_affected();
        Ok(removed)
    }

    async fn list_transfers(&self, filter: &TransferFilter) -> Result<TransferPage, SyncError> {
        filter.validate()?;
        let (page, limit) = filter.normalized();

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS cnt FROM transfers");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?
            .get("cnt");

        let mut select = QueryBuilder::<Sqlite>::new(
            "SELECT from_address, to_address, amount, tx_hash, block_number, log_index, block_timestamp
             FROM transfers",
        );
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY block_number DESC, log_index DESC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(filter.offset() as i64);
        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        Ok(TransferPage {
            data: rows.iter().map(record_from_row).collect(),
            total: total as u64,
            page,
            limit,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
