//! # CLI Interface
//!
//! Command-line arguments for `tribune-node` (clap derive). Every `run`
//! flag has a `TRIBUNE_*` environment fallback.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tribune_protocol::config::{
    DEFAULT_API_PORT, DEFAULT_CUSTODY_ADDRESS, DEFAULT_METRICS_PORT, DEFAULT_MIN_STAKE,
};
use tribune_protocol::{Address, Amount};

use crate::logging::{LogFormat, DEFAULT_FILTER};

/// Tribune claim node.
///
/// Hosts one claim handler over an in-memory token ledger, serves it over
/// REST and WebSocket, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "tribune-node",
    about = "Tribune stake-backed claim node",
    version,
    propagate_version = true
)]
pub struct TribuneNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Print the contents of a data directory and exit.
    Inspect(InspectArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Port for the REST and WebSocket API.
    #[arg(long, env = "TRIBUNE_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "TRIBUNE_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Ledger store directory. Loaded at startup if it holds a ledger,
    /// written on every successful call. Without it the node keeps state in
    /// memory only.
    #[arg(long, short = 'd', env = "TRIBUNE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Token owner and administrator-registry owner for a fresh ledger.
    #[arg(long, env = "TRIBUNE_OWNER")]
    pub owner: Address,

    /// Administrator to register on a fresh ledger. Repeatable.
    ///
    /// Ignored when a stored ledger is loaded; the stored set wins.
    #[arg(long = "admin", env = "TRIBUNE_ADMINS", value_delimiter = ',')]
    pub admins: Vec<Address>,

    /// Custody address stakes are held at.
    #[arg(long, env = "TRIBUNE_CUSTODY", default_value_t = DEFAULT_CUSTODY_ADDRESS)]
    pub custody: Address,

    /// Initial minimum stake, in the token's smallest unit.
    #[arg(long, env = "TRIBUNE_MIN_STAKE", default_value_t = DEFAULT_MIN_STAKE)]
    pub min_stake: Amount,

    /// Log output format.
    #[arg(long, env = "TRIBUNE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, env = "TRIBUNE_LOG_LEVEL", default_value = DEFAULT_FILTER)]
    pub log_level: String,
}

/// Arguments for the `inspect` subcommand.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Ledger store directory to read.
    #[arg(long, short = 'd', env = "TRIBUNE_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Print this claim in full instead of the summary.
    #[arg(long)]
    pub claim: Option<u64>,
}
