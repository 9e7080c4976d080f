//! # CLI Interface
//!
//! Command-line arguments for `chainreg-node`, built with `clap` derive.
//! Every flag that matters in a deployment can also be set through a
//! `CHAINREG_*` environment variable.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use chainreg_protocol::config::Network;

/// chainreg registry indexer.
///
/// Follows a chain daemon over JSON-RPC, indexes the key/value registry
/// embedded in its transactions and serves lookups over JSON-RPC.
#[derive(Parser, Debug)]
#[command(
    name = "chainreg-node",
    about = "chainreg registry indexer",
    version,
    propagate_version = true
)]
pub struct ChainregCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the indexer: background sync plus the query API.
    Run(RunArgs),
    /// Run one sync pass and a validity check, print a summary and exit.
    Check(CheckArgs),
    /// Print version information and exit.
    Version,
}

/// Connection and chain settings shared by `run` and `check`.
#[derive(Args, Debug, Clone)]
pub struct DaemonArgs {
    /// JSON-RPC endpoint of the chain daemon.
    #[arg(long, env = "CHAINREG_DAEMON_URL", default_value = "http://127.0.0.1:8332")]
    pub daemon_url: String,

    /// RPC user for the daemon.
    #[arg(long, env = "CHAINREG_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC password for the daemon.
    #[arg(long, env = "CHAINREG_RPC_PASSWORD", hide_env_values = true)]
    pub rpc_password: Option<String>,

    /// Network the daemon is running: mainnet, testnet or regtest.
    #[arg(long, env = "CHAINREG_NETWORK", default_value = "mainnet")]
    pub network: Network,

    /// Directory for index snapshots. Without it the index lives in memory
    /// only and is rebuilt on every start.
    #[arg(long, short = 'd', env = "CHAINREG_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log output format: pretty or json.
    #[arg(long, env = "CHAINREG_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub daemon: DaemonArgs,

    /// Port for the JSON-RPC and REST API.
    #[arg(long, env = "CHAINREG_API_PORT", default_value_t = 9741)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "CHAINREG_METRICS_PORT", default_value_t = 9742)]
    pub metrics_port: u16,

    /// Override the sync cadence, in milliseconds. Defaults to half the
    /// network's block time.
    #[arg(long, env = "CHAINREG_SYNC_INTERVAL_MS")]
    pub sync_interval_ms: Option<u64>,
}

/// Arguments for the `check` subcommand.
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub daemon: DaemonArgs,
}
