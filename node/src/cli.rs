//! # CLI Interface
//!
//! Defines the command-line argument structure for `loyalty-node` using
//! `clap` derive. Every subcommand that touches the database takes the
//! same [`StoreArgs`]; one-shot commands print their result as JSON on
//! stdout.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;

use loyalty_engine::MovementKind;
use loyalty_redemption::RedemptionStatus;

/// Loyalty points ledger node.
///
/// Scores card transactions, keeps per-card point balances, runs the
/// redemption workflow, and audits balances against the movement log.
#[derive(Parser, Debug)]
#[command(
    name = "loyalty-node",
    about = "Loyalty points ledger node",
    version,
    propagate_version = true
)]
pub struct LoyaltyNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the loyalty node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory, write default settings and seed rewards
    /// from the catalog.
    Init(InitArgs),
    /// Serve `/metrics` and audit balances periodically until stopped.
    Run(RunArgs),
    /// Score a transaction, and credit it when a card and reference are given.
    Score(ScoreArgs),
    /// Show a card's balance.
    Balance(KeyArgs),
    /// List a card's movements with running balances.
    Statement(StatementArgs),
    /// Apply a manual adjustment (positive or negative).
    Adjust(AdjustArgs),
    /// Reverse the points accrued for a transaction.
    Reverse(ReverseArgs),
    /// Compare every stored balance with its movement sum.
    Reconcile(StoreArgs),
    /// Redemption workflow.
    Redeem(RedeemArgs),
    /// List rewards.
    Rewards(RewardsArgs),
    /// Print version information and exit.
    Version,
}

/// Where the node keeps its state.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Path to the settings file (TOML).
    ///
    /// When omitted, the node looks for `config.toml` in the data directory.
    #[arg(long, short = 'c', env = "LOYALTY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding the database and settings.
    #[arg(long, short = 'd', env = "LOYALTY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

/// A (user, card) balance key.
#[derive(Args, Debug, Clone)]
pub struct CardArgs {
    #[arg(long)]
    pub user: u64,
    #[arg(long)]
    pub card: u64,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Catalog file with rules, campaigns and rewards. Recorded in the
    /// written settings.
    #[arg(long, env = "LOYALTY_CATALOG")]
    pub catalog: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "LOYALTY_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Seconds between reconciliation audits.
    #[arg(long, env = "LOYALTY_RECONCILE_INTERVAL")]
    pub reconcile_interval: Option<u64>,

    /// Log format: `pretty` or `json`.
    #[arg(long, env = "LOYALTY_LOG_FORMAT")]
    pub log_format: Option<String>,
}

#[derive(Args, Debug)]
pub struct ScoreArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Transaction value in currency units, e.g. `149.90`.
    #[arg(long)]
    pub value: Decimal,

    #[arg(long)]
    pub mcc: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long)]
    pub partner: Option<u64>,

    /// Cardholder segment for campaign targeting.
    #[arg(long)]
    pub segment: Option<String>,

    /// Scoring instant (RFC 3339). Defaults to now.
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,

    /// Credit the result to this user (requires `--card` and `--transaction`).
    #[arg(long, requires = "card", requires = "transaction")]
    pub user: Option<u64>,

    #[arg(long, requires = "user")]
    pub card: Option<u64>,

    /// Originating transaction id; an accrual is recorded at most once per id.
    #[arg(long, requires = "user")]
    pub transaction: Option<u64>,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub key: CardArgs,
}

#[derive(Args, Debug)]
pub struct StatementArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub key: CardArgs,

    /// Earliest movement time (RFC 3339), inclusive.
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,

    /// Latest movement time (RFC 3339), inclusive.
    #[arg(long)]
    pub to: Option<DateTime<Utc>>,

    /// Only movements of this kind (ACCRUAL, REDEMPTION, ...).
    #[arg(long)]
    pub kind: Option<MovementKind>,

    #[arg(long, default_value_t = 1)]
    pub page: usize,

    #[arg(long, default_value_t = loyalty_engine::config::DEFAULT_STATEMENT_PAGE_SIZE)]
    pub page_size: usize,
}

#[derive(Args, Debug)]
pub struct AdjustArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub key: CardArgs,

    /// Signed points; negative values debit.
    #[arg(long, allow_hyphen_values = true)]
    pub points: i64,

    #[arg(long)]
    pub note: String,
}

#[derive(Args, Debug)]
pub struct ReverseArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub key: CardArgs,

    #[arg(long)]
    pub transaction: u64,

    #[arg(long, default_value = "transaction reversed")]
    pub note: String,
}

#[derive(Args, Debug)]
pub struct RedeemArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub action: RedeemCommand,
}

#[derive(Subcommand, Debug)]
pub enum RedeemCommand {
    /// Exchange points for a reward.
    Request {
        #[command(flatten)]
        key: CardArgs,
        #[arg(long)]
        reward: u64,
        #[arg(long, default_value_t = 1)]
        quantity: u64,
    },
    Approve {
        id: u64,
        #[arg(long)]
        note: Option<String>,
    },
    Complete {
        id: u64,
        #[arg(long)]
        tracking_code: Option<String>,
        /// Partner that fulfilled the redemption.
        #[arg(long)]
        processor: Option<String>,
    },
    /// Deny and refund. A reason is required.
    Deny {
        id: u64,
        #[arg(long)]
        reason: String,
    },
    /// Cancel and refund.
    Cancel { id: u64 },
    /// Show one request, or list them by user or status.
    Show {
        #[arg(conflicts_with_all = ["user", "status"])]
        id: Option<u64>,
        #[arg(long)]
        user: Option<u64>,
        #[arg(long)]
        status: Option<RedemptionStatus>,
    },
}

#[derive(Args, Debug)]
pub struct RewardsArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Include inactive, expired and out-of-stock rewards.
    #[arg(long)]
    pub all: bool,
}
