//! chainsync-storage: relational transfer stores for ChainSync.
//!
//! Backends:
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//! - `postgres`: PostgreSQL via `sqlx` (feature `postgres`)
//!
//! Both implement [`chainsync_core::TransferStore`]. The in-memory store
//! lives in `chainsync-core` next to the trait.

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
