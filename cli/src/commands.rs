use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{bail, Context, Result};
use serde_json::json;
use tokio::sync::watch;

use chainsync_core::{
    CycleScheduler, RetentionPruner, SyncConfig, SyncEngine, TransferFilter, TransferPage,
    TransferStore,
};
use chainsync_rpc::EvmChainSource;
use chainsync_storage::SqliteStore;

use crate::args::{HistoryArgs, PruneArgs, RunArgs, TransfersArgs, DEFAULT_TOKEN};

/// Pick a backend from the URL scheme.
async fn open_store(database_url: &str) -> Result<Arc<dyn TransferStore>> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        #[cfg(feature = "postgres")]
        {
            let store = chainsync_storage::PostgresStore::connect(database_url)
                .await
                .context("connecting to PostgreSQL")?;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "postgres"))]
        bail!("PostgreSQL support is not compiled in; rebuild with `--features postgres`");
    }

    let store = SqliteStore::open(database_url)
        .await
        .with_context(|| format!("opening SQLite store at {database_url}"))?;
    Ok(Arc::new(store))
}

fn sync_config(args: &RunArgs) -> Result<SyncConfig> {
    SyncConfig::builder()
        .confirmation_depth(args.confirmation_depth)
        .initial_depth(args.initial_depth)
        .batch_size(args.batch_size)
        .poll_interval(Duration::from_secs(args.poll_interval_secs))
        .max_attempts(args.rpc_max_attempts)
        .base_delay(Duration::from_millis(args.rpc_base_delay_ms))
        .build()
        .context("invalid sync configuration")
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(3600))
}

// ─── run ─────────────────────────────────────────────────────────────────────

pub async fn run(database_url: &str, args: RunArgs) -> Result<()> {
    if args.rpc_url.trim().is_empty() {
        bail!("RPC_URL must not be empty");
    }
    let config = sync_config(&args)?;
    let token: Address = args
        .token_address
        .parse()
        .with_context(|| format!("invalid token address {}", args.token_address))?;

    let source = EvmChainSource::http(
        &args.rpc_url,
        token,
        Duration::from_secs(args.rpc_timeout_secs),
    )
    .context("building RPC client")?;
    let store = open_store(database_url).await?;

    tracing::info!(
        rpc = %args.rpc_url,
        token = %token,
        confirmation_depth = config.confirmation_depth,
        batch_size = config.batch_size,
        poll_interval_secs = config.poll_interval.as_secs(),
        "Starting transfer sync"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let engine = Arc::new(SyncEngine::new(
        Arc::new(source),
        store.clone(),
        config.clone(),
    ));
    let sync = CycleScheduler::new(engine, config.poll_interval);

    let pruning = args.retention_hours.map(|h| {
        let pruner = Arc::new(RetentionPruner::new(store.clone(), hours(h)));
        CycleScheduler::new(pruner, Duration::from_secs(args.prune_interval_secs.max(1)))
            .exclusive_with(&sync)
    });

    let signal = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested, finishing current cycle"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for ctrl-c"),
        }
        let _ = stop_tx.send(true);
    };

    let prune_loop = async {
        if let Some(scheduler) = &pruning {
            scheduler.run(stopped(stop_rx.clone())).await;
        }
    };

    tokio::join!(signal, sync.run(stopped(stop_rx.clone())), prune_loop);
    Ok(())
}

// ─── read side ───────────────────────────────────────────────────────────────

pub async fn status(database_url: &str) -> Result<()> {
    let store = open_store(database_url).await?;
    match store.checkpoint().await? {
        Some(cp) => {
            println!("Last processed block: #{}", cp.block_number);
            println!("  hash:       {}", cp.block_hash);
            println!("  updated at: {} (unix)", cp.updated_at);
        }
        None => println!("No checkpoint yet; the next run bootstraps near the chain tip."),
    }
    Ok(())
}

fn checksum(address: Option<Address>) -> Option<String> {
    address.map(|a| a.to_checksum(None))
}

fn print_page(page: &TransferPage) -> Result<()> {
    let out = json!({
        "data": page.data,
        "meta": {
            "total": page.total,
            "page": page.page,
            "limit": page.limit,
            "total_pages": page.total_pages(),
        }
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

pub async fn transfers(database_url: &str, args: TransfersArgs) -> Result<()> {
    let filter = TransferFilter {
        from_address: checksum(args.from_address),
        to_address: checksum(args.to_address),
        min_amount: args.min_amount.map(|m| m.to_string()),
        start: args.start,
        end: args.end,
        page: args.paging.page,
        limit: args.paging.limit,
        ..TransferFilter::default()
    };
    filter.validate()?;
    let store = open_store(database_url).await?;
    let page = store.list_transfers(&filter).await?;
    print_page(&page)
}

pub async fn history(database_url: &str, args: HistoryArgs) -> Result<()> {
    let filter = TransferFilter::history(
        args.address.to_checksum(None),
        args.paging.page,
        args.paging.limit,
    );
    let store = open_store(database_url).await?;
    let page = store.list_transfers(&filter).await?;
    print_page(&page)
}

pub async fn prune(database_url: &str, args: PruneArgs) -> Result<()> {
    let store = open_store(database_url).await?;
    let pruner = RetentionPruner::new(store, hours(args.retention_hours));
    let removed = pruner.prune_once().await?;
    println!("Removed {removed} transfer(s) older than {}h", args.retention_hours);
    Ok(())
}

pub fn info() {
    let cfg = SyncConfig::default();
    println!("ChainSync v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default token: {DEFAULT_TOKEN} (USDC)");
    println!("  Confirmation depth: {} blocks", cfg.confirmation_depth);
    println!("  Initial depth: {} blocks", cfg.initial_depth);
    println!("  Batch size: {} blocks/cycle", cfg.batch_size);
    println!("  Poll interval: {}s", cfg.poll_interval.as_secs());
    println!(
        "  RPC retries: {} attempts, {}ms base delay",
        cfg.retry.max_attempts,
        cfg.retry.base_delay.as_millis()
    );
    println!(
        "  Retention: {}h when enabled",
        RetentionPruner::DEFAULT_RETENTION.as_secs() / 3600
    );
    println!("  Storage backends: SQLite (default), PostgreSQL (feature: postgres)");
}
