//! chainsync CLI: run the transfer sync and inspect stored state.
//!
//! Usage:
//! ```bash
//! RPC_URL=https://eth.example/rpc chainsync run
//! chainsync status
//! chainsync transfers --from-address 0x... --min-amount 1000000 --page 2
//! chainsync history 0x...
//! chainsync prune --retention-hours 24
//! chainsync info
//! ```

mod args;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Run(args) => commands::run(&cli.database_url, args).await,
        Command::Status => commands::status(&cli.database_url).await,
        Command::Transfers(args) => commands::transfers(&cli.database_url, args).await,
        Command::History(args) => commands::history(&cli.database_url, args).await,
        Command::Prune(args) => commands::prune(&cli.database_url, args).await,
        Command::Info => {
            commands::info();
            Ok(())
        }
    }
}

/// Logs go to stderr so command output on stdout stays clean.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
