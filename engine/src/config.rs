//! # Policy Constants
//!
//! Every policy number used by the engine lives here. If a threshold shows
//! up as a literal somewhere else, move it here.

use std::time::Duration;

use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Points Calculation
// ---------------------------------------------------------------------------

/// Conversion multiplier applied when no conversion rule matches a
/// transaction: one point per currency unit.
pub const DEFAULT_MULTIPLIER: Decimal = Decimal::ONE;

/// Campaign extra multiplier applied when no campaign matches.
pub const DEFAULT_EXTRA_MULTIPLIER: Decimal = Decimal::ZERO;

/// Decimal places kept on rule and campaign multipliers. Anything finer is
/// rounded away when a catalog is loaded.
pub const MULTIPLIER_SCALE: u32 = 4;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Maximum length of a movement note, in characters.
pub const MAX_NOTE_LENGTH: usize = 500;

/// Default page size for statements.
pub const DEFAULT_STATEMENT_PAGE_SIZE: usize = 20;

/// Hard ceiling on statement page size.
pub const MAX_STATEMENT_PAGE_SIZE: usize = 500;

/// Horizons (in days) of the expiring-soon buckets kept on a balance.
pub const EXPIRY_BUCKET_DAYS: [u32; 3] = [30, 60, 90];

/// Balances strictly below this are `Low`.
pub const BALANCE_TIER_LOW_CEILING: i64 = 1_000;

/// Balances strictly below this (and at least the low ceiling) are `Medium`.
pub const BALANCE_TIER_MEDIUM_CEILING: i64 = 10_000;

// ---------------------------------------------------------------------------
// Campaigns & Rewards
// ---------------------------------------------------------------------------

/// A campaign is `EndingSoon` when its last valid day is at most this many
/// days away.
pub const CAMPAIGN_ENDING_SOON_DAYS: i64 = 7;

/// Reward stock strictly below this is reported as low.
pub const STOCK_LOW_CEILING: u64 = 10;

/// Reward stock strictly below this (and at least the low ceiling) is medium.
pub const STOCK_MEDIUM_CEILING: u64 = 50;

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// How often the node audits balances against the movement log.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(300);

/// Default Prometheus metrics port for the operator node.
pub const DEFAULT_METRICS_PORT: u16 = 9742;
