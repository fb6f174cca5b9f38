//! PostgreSQL transfer store.
//!
//! # Feature Flag
//! Requires the `postgres` feature:
//! ```toml
//! chainsync-storage = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! # Schema
//! Created automatically on first connect:
//! - `checkpoints`: the singleton sync position (`id = 'singleton'`)
//! - `transfers`: one row per `Transfer` log, unique on `(tx_hash, log_index)`.
//!   `amount` is `NUMERIC(78,0)`, wide enough for any `uint256`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use chainsync_core::{
    Checkpoint, StoreWrite, SyncError, TransferFilter, TransferPage, TransferRecord, TransferStore,
};

fn storage(e: sqlx::Error) -> SyncError {
    SyncError::Storage(e.to_string())
}

// ─── Connection options ──────────────────────────────────────────────────────

/// Pool options for [`PostgresStore`].
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

// ─── PostgresStore ───────────────────────────────────────────────────────────

/// PostgreSQL-backed [`TransferStore`]. Cheap to clone.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with default pool options and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, SyncError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, SyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| SyncError::Storage(format!("postgres connect: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("PostgresStore connected and schema initialized");
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), SyncError> {
        for ddl in [
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id           TEXT   PRIMARY KEY,
                block_number BIGINT NOT NULL,
                block_hash   TEXT   NOT NULL,
                updated_at   BIGINT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS transfers (
                id              BIGSERIAL     PRIMARY KEY,
                from_address    TEXT          NOT NULL,
                to_address      TEXT          NOT NULL,
                amount          NUMERIC(78,0) NOT NULL,
                tx_hash         TEXT          NOT NULL,
                block_number    BIGINT        NOT NULL,
                log_index       BIGINT        NOT NULL,
                block_timestamp TIMESTAMPTZ   NOT NULL,
                UNIQUE (tx_hash, log_index)
            )",
            "CREATE INDEX IF NOT EXISTS idx_transfers_block ON transfers (block_number)",
            "CREATE INDEX IF NOT EXISTS idx_transfers_time ON transfers (block_timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers (lower(from_address))",
            "CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers (lower(to_address))",
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| SyncError::Storage(format!("init schema: {e}")))?;
        }
        Ok(())
    }

    async fn apply(&self, write: &StoreWrite) -> Result<u64, SyncError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        apply_write(&mut *conn, write).await
    }
}

// ─── Writes ──────────────────────────────────────────────────────────────────

async fn apply_write(conn: &mut PgConnection, write: &StoreWrite) -> Result<u64, SyncError> {
    match write {
        StoreWrite::InsertTransfers(records) => {
            let mut inserted = 0;
            for r in records {
                inserted += sqlx::query(
                    "INSERT INTO transfers
                     (from_address, to_address, amount, tx_hash, block_number, log_index, block_timestamp)
                     VALUES ($1, $2, $3::numeric, $4, $5, $6, $7)
                     ON CONFLICT (tx_hash, log_index) DO NOTHING",
                )
                .bind(&r.from_address)
                .bind(&r.to_address)
                .bind(&r.amount)
                .bind(&r.tx_hash)
                .bind(r.block_number as i64)
                .bind(i64::from(r.log_index))
                .bind(r.block_timestamp)
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
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (id) DO UPDATE SET
                     block_number = EXCLUDED.block_number,
                     block_hash   = EXCLUDED.block_hash,
                     updated_at   = EXCLUDED.updated_at",
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
            let removed = sqlx::query("DELETE FROM transfers WHERE block_number > $1")
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

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &TransferFilter) {
    qb.push(" WHERE TRUE");
    if let Some(from) = &filter.from_address {
        qb.push(" AND lower(from_address) = lower(")
            .push_bind(from.clone())
            .push(")");
    }
    if let Some(to) = &filter.to_address {
        qb.push(" AND lower(to_address) = lower(")
            .push_bind(to.clone())
            .push(")");
    }
    if let Some(address) = &filter.address {
        qb.push(" AND (lower(from_address) = lower(")
            .push_bind(address.clone())
            .push(") OR lower(to_address) = lower(")
            .push_bind(address.clone())
            .push("))");
    }
    if let Some(min) = filter.min_amount_digits() {
        qb.push(" AND amount >= ")
            .push_bind(min.to_string())
            .push("::numeric");
    }
    if let Some(start) = filter.start {
        qb.push(" AND block_timestamp >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        qb.push(" AND block_timestamp <= ").push_bind(end);
    }
}

fn record_from_row(row: &PgRow) -> TransferRecord {
    TransferRecord {
        from_address: row.get("from_address"),
        to_address: row.get("to_address"),
        amount: row.get("amount"),
        tx_hash: row.get("tx_hash"),
        block_number: row.get::<i64, _>("block_number") as u64,
        log_index: row.get::<i64, _>("log_index") as u32,
        block_timestamp: row.get("block_timestamp"),
    }
}

// ─── TransferStore impl ──────────────────────────────────────────────────────

#[async_trait]
impl TransferStore for PostgresStore {
    async fn checkpoint(&self) -> Result<Option<Checkpoint>, SyncError> {
        let row = sqlx::query(
            "SELECT id, block_number, block_hash, updated_at FROM checkpoints WHERE id = $1",
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
        tx.commit()
            .await
            .map_err(|e| SyncError::Storage(format!("commit batch: {e}")))?;
        Ok(inserted)
    }

    async fn delete_transfers_above(&self, block_number: u64) -> Result<u64, SyncError> {
        self.apply(&StoreWrite::DeleteTransfersAbove(block_number))
            .await
    }

    async fn run_atomic(&self, writes: Vec<StoreWrite>) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        for write in &writes {
            apply_write(&mut *tx, write).await?;
        }
        tx.commit()
            .await
            .map_err(|e| SyncError::Storage(format!("commit batch: {e}")))
    }

    async fn delete_transfers_before(&self, cutoff: DateTime<Utc>) -> Result<u64, SyncError> {
        let removed = sqlx::query("DELETE FROM transfers WHERE block_timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(storage)?
            .rows_affected();
        Ok(removed)
    }

    async fn list_transfers(&self, filter: &TransferFilter) -> Result<TransferPage, SyncError> {
        filter.validate()?;
        let (page, limit) = filter.normalized();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS cnt FROM transfers");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?
            .get("cnt");

        let mut select = QueryBuilder::<Postgres>::new(
            "SELECT from_address, to_address, amount::text AS amount, tx_hash,
                    block_number, log_index, block_timestamp
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // These tests require a running PostgreSQL instance.
    // Set DATABASE_URL to enable, e.g.
    // DATABASE_URL=postgresql://localhost/chainsync_test cargo test --features postgres -- --ignored

    async fn fresh_store() -> PostgresStore {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        let store = PostgresStore::connect(&url).await.unwrap();
        sqlx::query("TRUNCATE transfers, checkpoints")
            .execute(store.pool())
            .await
            .unwrap();
        store
    }

    fn rec(tx: &str, block: u64, amount: &str) -> TransferRecord {
        TransferRecord {
            from_address: "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045".into(),
            to_address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".into(),
            amount: amount.into(),
            tx_hash: tx.into(),
            block_number: block,
            log_index: 0,
            block_timestamp: Utc.timestamp_opt(1_700_000_000 + block as i64, 0).unwrap(),
        }
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn test_postgres_atomic_commit_and_rollback() {
        let store = fresh_store().await;
        let wide =
            "115792089237316195423570985008687907853269984665640564039457584007913129639935";

        store
            .run_atomic(vec![
                StoreWrite::InsertTransfers(vec![rec("0x1", 10, "1"), rec("0x2", 11, wide)]),
                StoreWrite::UpsertCheckpoint {
                    block_number: 11,
                    block_hash: "0xh11".into(),
                },
            ])
            .await
            .unwrap();

        let cp = store.checkpoint().await.unwrap().unwrap();
        assert_eq!(cp.block_number, 11);
        assert_eq!(store.insert_transfers(&[rec("0x2", 11, wide)]).await.unwrap(), 0);

        let page = store.list_transfers(&TransferFilter::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.data[0].amount, wide);

        assert_eq!(store.delete_transfers_above(10).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn test_postgres_filter_and_prune() {
        let store = fresh_store().await;
        store
            .insert_transfers(&[rec("0x1", 1, "5"), rec("0x2", 2, "6"), rec("0x3", 3, "7")])
            .await
            .unwrap();

        let page = store
            .list_transfers(&TransferFilter {
                from_address: Some("0xd8da6bf26964af9d7eed9e03e53415d37aa96045".into()),
                limit: 2,
                ..TransferFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages(), 2);
        assert_eq!(page.data[0].block_number, 3);

        let cutoff = Utc.timestamp_opt(1_700_000_002, 0).unwrap();
        assert_eq!(store.delete_transfers_before(cutoff).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn test_postgres_amount_time_and_history_filters() {
        let store = fresh_store().await;
        let mut small = rec("0x1", 1, "999999");
        small.to_address = "0x00000000000000000000000000000000000000bb".into();
        store
            .insert_transfers(&[small, rec("0x2", 2, "1000000"), rec("0x3", 3, "20000000")])
            .await
            .unwrap();

        let rich = store
            .list_transfers(&TransferFilter {
                min_amount: Some("1000000".into()),
                ..TransferFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(rich.total, 2);

        let window = store
            .list_transfers(&TransferFilter {
                start: Some(Utc.timestamp_opt(1_700_000_002, 0).unwrap()),
                end: Some(Utc.timestamp_opt(1_700_000_002, 0).unwrap()),
                ..TransferFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(window.data[0].tx_hash, "0x2");
        assert_eq!(window.total, 1);

        let history = store
            .list_transfers(&TransferFilter::history(
                "0x00000000000000000000000000000000000000BB",
                1,
                20,
            ))
            .await
            .unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.data[0].tx_hash, "0x1");
    }
}
