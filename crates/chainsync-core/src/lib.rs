//! chainsync-core: the reorg-tolerant synchronization engine for ChainSync.
//!
//! # Architecture
//!
//! ```text
//! CycleScheduler (single-flight, fixed interval)
//!      └── SyncEngine::run_cycle
//!              ├── ReorgResolver   (checkpoint hash no longer canonical)
//!              ├── RetryPolicy     (classified retry + exponential backoff)
//!              │      └── ChainSource   (tip, blocks, transfer logs)
//!              └── TransferStore   (checkpoint + transfers, atomic commit)
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod prune;
pub mod reorg;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod types;

pub use config::{SyncConfig, SyncConfigBuilder};
pub use engine::{CycleOutcome, SyncEngine};
pub use error::{RpcErrorKind, SyncError};
pub use prune::RetentionPruner;
pub use reorg::ReorgResolver;
pub use retry::{RetryConfig, RetryPolicy, Sleeper, TokioSleeper};
pub use scheduler::{Cycle, CycleScheduler};
pub use source::ChainSource;
pub use store::{MemoryStore, StoreWrite, TransferStore};
pub use types::{BlockRef, Checkpoint, TransferFilter, TransferLog, TransferPage, TransferRecord};
