// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Loyalty Node
//!
//! Entry point for the `loyalty-node` binary. Parses CLI arguments, loads
//! settings, initializes logging and metrics, and opens the sled database
//! that holds the ledger, the reward catalog and the redemption requests.
//!
//! - `init`      - create the data directory, settings and seed rewards
//! - `run`       - serve `/metrics` and audit balances on an interval
//! - `score`     - score (and optionally credit) a transaction
//! - `balance`, `statement`, `adjust`, `reverse`, `reconcile`
//! - `redeem`    - request / approve / complete / deny / cancel / show
//! - `rewards`   - list the reward catalog
//! - `version`   - print build version information

mod cli;
mod logging;
mod metrics;
mod settings;

use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tokio::signal;

use loyalty_engine::ledger::StatementQuery;
use loyalty_engine::storage::LoyaltyDb;
use loyalty_engine::{BalanceKey, Balance, Classify, Ledger, OpContext, ScoringInput, TransactionScorer};
use loyalty_redemption::{
    CatalogError, Fulfillment, RedemptionMachine, RedemptionStatus, RewardCatalog, SledRedemptionStore,
    SledRewardCatalog,
};

use cli::{CardArgs, Commands, LoyaltyNodeCli, RedeemCommand, StoreArgs};
use logging::LogFormat;
use metrics::{LedgerMetrics, MetricsSink, SharedMetrics};
use settings::{NodeSettings, SETTINGS_FILE};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = LoyaltyNodeCli::parse();

    match cli.command {
        Commands::Init(args) => init_node(args),
        Commands::Run(args) => run_node(args).await,
        Commands::Score(args) => score(args),
        Commands::Balance(args) => balance(&args.store, &args.key),
        Commands::Statement(args) => statement(args),
        Commands::Adjust(args) => adjust(args),
        Commands::Reverse(args) => reverse(args),
        Commands::Reconcile(store) => reconcile(&store),
        Commands::Redeem(args) => redeem(&args.store, args.action),
        Commands::Rewards(args) => rewards(&args.store, args.all),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Everything a command needs, opened over one database.
struct Services {
    db: LoyaltyDb,
    ledger: Ledger,
    redemptions: RedemptionMachine,
    scorer: TransactionScorer,
    metrics: SharedMetrics,
}

impl Services {
    fn open(settings: &NodeSettings) -> Result<Self> {
        let db_path = settings.db_path();
        std::fs::create_dir_all(&db_path)
            .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
        let db = LoyaltyDb::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        tracing::debug!(path = %db_path.display(), "database opened");

        let metrics = Arc::new(LedgerMetrics::new().context("failed to register metrics")?);
        let sink = Arc::new(MetricsSink::new(Arc::clone(&metrics)));

        let ledger = Ledger::new(Arc::new(db.clone())).with_events(sink.clone());
        let redemptions = RedemptionMachine::new(
            ledger.clone(),
            SledRewardCatalog::shared(&db).context("failed to open reward catalog")?,
            SledRedemptionStore::shared(&db).context("failed to open redemption store")?,
        )
        .with_events(sink);

        let catalog = settings.load_catalog()?;
        let scorer = TransactionScorer::from_rule_set(catalog.rule_set());

        Ok(Self {
            db,
            ledger,
            redemptions,
            scorer,
            metrics,
        })
    }

    fn close(self) -> Result<()> {
        self.db.flush().context("failed to flush database")
    }
}

/// Resolves settings for a one-shot command and starts logging.
fn prepare(store: &StoreArgs) -> Result<NodeSettings> {
    let settings = NodeSettings::resolve(store.config.as_deref(), store.data_dir.as_deref())?;
    logging::init_logging(&settings.log_level, settings.log_format)?;
    Ok(settings)
}

/// Runs `command` against freshly opened services and flushes afterwards.
fn with_services<T>(store: &StoreArgs, command: impl FnOnce(&Services) -> Result<T>) -> Result<T> {
    let settings = prepare(store)?;
    let services = Services::open(&settings)?;
    let result = command(&services);
    services.close()?;
    result
}

/// Wraps an engine error, labelling business refusals.
fn refused<E>(e: E) -> anyhow::Error
where
    E: Classify + std::error::Error + Send + Sync + 'static,
{
    let label = if e.is_refusal() {
        format!("refused ({})", e.kind())
    } else {
        "system failure".to_string()
    };
    anyhow::Error::new(e).context(label)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn key_of(args: &CardArgs) -> BalanceKey {
    BalanceKey::new(args.user, args.card)
}

fn show<T: Display>(label: &str, value: T) {
    println!("  {label:<15}: {value}");
}

// ---------------------------------------------------------------------------
// init / run
// ---------------------------------------------------------------------------

/// Creates the data directory, writes settings if none exist, and seeds
/// rewards from the catalog. Existing rewards are left alone.
fn init_node(args: cli::InitArgs) -> Result<()> {
    let mut settings = prepare(&args.store)?;
    if let Some(catalog) = args.catalog {
        settings.catalog = Some(catalog);
    }

    let data_dir = settings.data_dir.clone();
    tracing::info!(data_dir = %data_dir.display(), "initializing node");
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let settings_path = data_dir.join(SETTINGS_FILE);
    if settings_path.exists() {
        tracing::info!(path = %settings_path.display(), "keeping existing settings");
    } else {
        std::fs::write(&settings_path, settings.to_toml()?)
            .with_context(|| format!("failed to write settings to {}", settings_path.display()))?;
    }

    let catalog = settings.load_catalog()?;
    let services = Services::open(&settings)?;
    let mut seeded = 0usize;
    for reward in catalog.rewards {
        let id = reward.id;
        match services.redemptions.catalog().insert(reward) {
            Ok(_) => seeded += 1,
            Err(CatalogError::Duplicate(_)) => tracing::info!(reward = id, "reward already present"),
            Err(e) => return Err(refused(e)),
        }
    }
    services.close()?;

    println!("Node initialized successfully.");
    show("Data directory", data_dir.display());
    show("Settings", settings_path.display());
    show("Rules", catalog.conversion_rules.len());
    show("Campaigns", catalog.campaigns.len());
    show("Rewards seeded", seeded);
    Ok(())
}

/// Serves `/metrics` and runs the reconciliation audit on an interval
/// until SIGINT or SIGTERM.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let mut settings = NodeSettings::resolve(args.store.config.as_deref(), args.store.data_dir.as_deref())?;
    if let Some(port) = args.metrics_port {
        settings.metrics_port = port;
    }
    if let Some(secs) = args.reconcile_interval {
        settings.reconcile_interval_secs = secs;
    }
    if let Some(format) = args.log_format.as_deref() {
        settings.log_format = LogFormat::from_str_lossy(format);
    }
    logging::init_logging(&settings.log_level, settings.log_format)?;

    tracing::info!(
        data_dir = %settings.data_dir.display(),
        metrics_port = settings.metrics_port,
        reconcile_interval_secs = settings.reconcile_interval().as_secs(),
        "starting loyalty-node"
    );

    let services = Services::open(&settings)?;

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&services.metrics));
    let metrics_addr = format!("0.0.0.0:{}", settings.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Reconciliation loop ---
    let ledger = services.ledger.clone();
    let metrics_ref = Arc::clone(&services.metrics);
    let period = settings.reconcile_interval();
    let audit_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            audit(&ledger, &metrics_ref).await;
        }
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    audit_loop.abort();
    services.close()?;
    tracing::info!("loyalty-node stopped");
    Ok(())
}

/// One reconciliation pass. sled is blocking, so the scan runs on the
/// blocking pool.
async fn audit(ledger: &Ledger, metrics: &LedgerMetrics) {
    let ledger = ledger.clone();
    let started = Instant::now();
    match tokio::task::spawn_blocking(move || ledger.reconcile()).await {
        Ok(Ok(report)) => {
            metrics.observe_reconcile(&report, started.elapsed().as_secs_f64());
            if report.is_consistent() {
                tracing::info!(
                    keys = report.keys_checked,
                    movements = report.movements_scanned,
                    "reconciliation clean"
                );
            } else {
                tracing::warn!(
                    keys = report.keys_checked,
                    inconsistent = report.discrepancies.len(),
                    "balances disagree with the movement log"
                );
            }
        }
        Ok(Err(e)) => tracing::error!(error = %e, "reconciliation failed"),
        Err(e) => tracing::error!(error = %e, "reconciliation task panicked"),
    }
}

// ---------------------------------------------------------------------------
// Ledger commands
// ---------------------------------------------------------------------------

fn score(args: cli::ScoreArgs) -> Result<()> {
    with_services(&args.store, |s| {
        let as_of = args.at.unwrap_or_else(Utc::now);
        let key = args.user.zip(args.card).map(|(user, card)| BalanceKey::new(user, card));
        let month_to_date = match key {
            Some(key) => s.ledger.accrued_in_month(key, as_of).map_err(refused)?,
            None => 0,
        };
        let input = ScoringInput {
            mcc: args.mcc.clone(),
            category: args.category.clone(),
            partner_id: args.partner,
            segment: args.segment.clone(),
            month_to_date,
            ..ScoringInput::new(args.value, as_of)
        };
        let (outcome, calculation) = s.scorer.explain(&input);

        let accrual = match (key, args.transaction) {
            (Some(key), Some(tx)) => Some(
                s.ledger
                    .accrue(&OpContext::at(as_of), key, tx, &outcome)
                    .map_err(refused)?,
            ),
            _ => None,
        };
        print_json(&json!({
            "score": outcome,
            "calculation": calculation,
            "accrual": accrual,
        }))
    })
}

fn balance(store: &StoreArgs, card: &CardArgs) -> Result<()> {
    with_services(store, |s| {
        let key = key_of(card);
        let balance = s
            .ledger
            .balance(key)
            .map_err(refused)?
            .unwrap_or_else(|| Balance::empty(key, Utc::now()));
        print_json(&json!({
            "balance": balance,
            "tier": balance.tier(),
        }))
    })
}

fn statement(args: cli::StatementArgs) -> Result<()> {
    with_services(&args.store, |s| {
        let mut query = StatementQuery::default()
            .between(args.from, args.to)
            .page(args.page, args.page_size);
        if let Some(kind) = args.kind {
            query = query.kind(kind);
        }
        let statement = s.ledger.statement(key_of(&args.key), &query).map_err(refused)?;
        print_json(&statement)
    })
}

fn adjust(args: cli::AdjustArgs) -> Result<()> {
    with_services(&args.store, |s| {
        let movement = s
            .ledger
            .adjust(&OpContext::new(), key_of(&args.key), args.points, &args.note)
            .map_err(refused)?;
        print_json(&movement)
    })
}

fn reverse(args: cli::ReverseArgs) -> Result<()> {
    with_services(&args.store, |s| {
        let movement = s
            .ledger
            .reverse_transaction(&OpContext::new(), key_of(&args.key), args.transaction, &args.note)
            .map_err(refused)?;
        print_json(&movement)
    })
}

/// Prints the audit report. Exits with an error when any balance drifted
/// so scripts can alert on it.
fn reconcile(store: &StoreArgs) -> Result<()> {
    let report = with_services(store, |s| s.ledger.reconcile().map_err(refused))?;
    print_json(&report)?;
    if !report.is_consistent() {
        bail!("{} inconsistent balance(s)", report.discrepancies.len());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Redemption commands
// ---------------------------------------------------------------------------

fn redeem(store: &StoreArgs, action: RedeemCommand) -> Result<()> {
    with_services(store, |s| {
        let machine = &s.redemptions;
        let ctx = OpContext::new();
        match action {
            RedeemCommand::Request { key, reward, quantity } => {
                print_json(&machine.request(&ctx, key_of(&key), reward, quantity).map_err(refused)?)
            }
            RedeemCommand::Approve { id, note } => {
                print_json(&machine.approve(&ctx, id, note.as_deref()).map_err(refused)?)
            }
            RedeemCommand::Complete {
                id,
                tracking_code,
                processor,
            } => {
                let fulfillment = Fulfillment {
                    tracking_code,
                    processor,
                };
                print_json(&machine.complete_with(&ctx, id, fulfillment).map_err(refused)?)
            }
            RedeemCommand::Deny { id, reason } => {
                print_json(&machine.deny(&ctx, id, &reason).map_err(refused)?)
            }
            RedeemCommand::Cancel { id } => print_json(&machine.cancel(&ctx, id).map_err(refused)?),
            RedeemCommand::Show { id, user, status } => match (id, user) {
                (Some(id), _) => print_json(&machine.get(id).map_err(refused)?),
                (None, Some(user)) => {
                    let mut found = machine.list_by_user(user).map_err(refused)?;
                    if let Some(status) = status {
                        found.retain(|r| r.status == status);
                    }
                    print_json(&found)
                }
                (None, None) => {
                    let status = status.unwrap_or(RedemptionStatus::Pending);
                    print_json(&machine.list_by_status(status).map_err(refused)?)
                }
            },
        }
    })
}

fn rewards(store: &StoreArgs, all: bool) -> Result<()> {
    with_services(store, |s| {
        let catalog = s.redemptions.catalog();
        let rewards = if all {
            catalog.list()
        } else {
            catalog.available(Utc::now())
        }
        .map_err(refused)?;
        let rows: Vec<_> = rewards
            .iter()
            .map(|r| json!({ "reward": r, "stock_level": r.stock_level() }))
            .collect();
        print_json(&rows)
    })
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

/// Prints version information to stdout.
fn print_version() {
    println!("loyalty-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed, that branch never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
