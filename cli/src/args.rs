use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

/// Default token: the USDC proxy on Ethereum mainnet.
pub const DEFAULT_TOKEN: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";

#[derive(Parser, Debug)]
#[command(name = "chainsync", version)]
#[command(about = "Reorg-tolerant ERC-20 transfer sync", long_about = None)]
pub struct Cli {
    /// Store connection string (`sqlite:...` or `postgres://...`)
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:chainsync.db?mode=rwc",
        global = true
    )]
    pub database_url: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sync finalized transfers until interrupted
    Run(RunArgs),
    /// Print the stored checkpoint
    Status,
    /// List stored transfers, newest first
    Transfers(TransfersArgs),
    /// List transfers sent or received by one address, newest first
    History(HistoryArgs),
    /// Delete transfers older than the retention window once
    Prune(PruneArgs),
    /// Print the effective defaults
    Info,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON-RPC endpoint of the chain node
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: String,

    /// ERC-20 contract to follow
    #[arg(long, env = "TOKEN_ADDRESS", default_value = DEFAULT_TOKEN)]
    pub token_address: String,

    /// Blocks behind the tip before a block is processed
    #[arg(long, env = "CONFIRMATION_DEPTH", default_value_t = 10)]
    pub confirmation_depth: u64,

    /// Blocks behind the tip to start from on first run
    #[arg(long, env = "INITIAL_DEPTH", default_value_t = 50)]
    pub initial_depth: u64,

    /// Maximum blocks per cycle
    #[arg(long, env = "BATCH_SIZE", default_value_t = 5)]
    pub batch_size: u64,

    /// Seconds between cycles
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 20)]
    pub poll_interval_secs: u64,

    /// Total tries per RPC call
    #[arg(long, env = "RPC_MAX_ATTEMPTS", default_value_t = 5)]
    pub rpc_max_attempts: u32,

    /// Backoff base in milliseconds (doubles per retry)
    #[arg(long, env = "RPC_BASE_DELAY_MS", default_value_t = 1000)]
    pub rpc_base_delay_ms: u64,

    /// Per-request timeout in seconds
    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value_t = 30)]
    pub rpc_timeout_secs: u64,

    /// Enable hourly pruning of transfers older than this many hours
    #[arg(long, env = "RETENTION_HOURS")]
    pub retention_hours: Option<u64>,

    /// Seconds between pruning runs
    #[arg(long, env = "PRUNE_INTERVAL_SECS", default_value_t = 3600)]
    pub prune_interval_secs: u64,
}

#[derive(Args, Debug)]
pub struct PageArgs {
    /// 1-based page number
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub page: u32,

    /// Page size (1..=100)
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub limit: u32,
}

#[derive(Args, Debug)]
pub struct TransfersArgs {
    #[arg(long)]
    pub from_address: Option<Address>,

    #[arg(long)]
    pub to_address: Option<Address>,

    /// Only transfers of at least this many base units
    #[arg(long, value_parser = parse_amount)]
    pub min_amount: Option<U256>,

    /// Earliest block time, RFC 3339 (e.g. 2023-10-26T00:00:00Z)
    #[arg(long)]
    pub start: Option<DateTime<Utc>>,

    /// Latest block time, RFC 3339
    #[arg(long)]
    pub end: Option<DateTime<Utc>>,

    #[command(flatten)]
    pub paging: PageArgs,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Sender or recipient to look up
    pub address: Address,

    #[command(flatten)]
    pub paging: PageArgs,
}

fn parse_amount(s: &str) -> Result<U256, String> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("expected a decimal integer, got {s:?}"));
    }
    U256::from_str_radix(s, 10).map_err(|e| e.to_string())
}

#[derive(Args, Debug)]
pub struct PruneArgs {
    #[arg(long, env = "RETENTION_HOURS", default_value_t = 24)]
    pub retention_hours: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["chainsync", "run", "--rpc-url", "http://node:8545"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.rpc_url, "http://node:8545");
        assert_eq!(args.batch_size, 5);
        assert_eq!(args.rpc_max_attempts, 5);
        assert_eq!(args.prune_interval_secs, 3600);
    }

    #[test]
    fn transfers_flags() {
        let cli = Cli::try_parse_from([
            "chainsync",
            "transfers",
            "--to-address",
            "0xd8da6bf26964af9d7eed9e03e53415d37aa96045",
            "--min-amount",
            "1000000",
            "--start",
            "2023-10-26T00:00:00Z",
            "--page",
            "3",
            "--limit",
            "50",
        ])
        .unwrap();
        let Command::Transfers(args) = cli.command else {
            panic!("expected transfers");
        };
        assert_eq!(
            args.to_address.unwrap().to_checksum(None),
            "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
        );
        assert_eq!(args.min_amount, Some(U256::from(1_000_000u64)));
        assert_eq!(args.start.unwrap().timestamp(), 1_698_278_400);
        assert!(args.end.is_none());
        assert_eq!((args.paging.page, args.paging.limit), (3, 50));
    }

    #[test]
    fn bad_query_flags_are_rejected() {
        for argv in [
            &["chainsync", "transfers", "--limit", "0"][..],
            &["chainsync", "transfers", "--limit", "101"],
            &["chainsync", "transfers", "--page", "0"],
            &["chainsync", "transfers", "--from-address", "0xabc"],
            &["chainsync", "transfers", "--min-amount", "1.5"],
            &["chainsync", "transfers", "--min-amount", "-1"],
            &["chainsync", "transfers", "--end", "yesterday"],
            &["chainsync", "history", "not-an-address"],
        ] {
            assert!(Cli::try_parse_from(argv).is_err(), "{argv:?}");
        }
    }

    #[test]
    fn history_takes_address_and_paging() {
        let cli = Cli::try_parse_from([
            "chainsync",
            "history",
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            "--limit",
            "100",
        ])
        .unwrap();
        let Command::History(args) = cli.command else {
            panic!("expected history");
        };
        assert_eq!(args.address.to_checksum(None), DEFAULT_TOKEN);
        assert_eq!((args.paging.page, args.paging.limit), (1, 100));
    }
}
