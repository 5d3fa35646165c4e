//! Materialized per-(user, card) balances.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{BALANCE_TIER_LOW_CEILING, BALANCE_TIER_MEDIUM_CEILING};

/// Identifies one balance: a user's points on one card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub user_id: u64,
    pub card_id: u64,
}

impl BalanceKey {
    pub fn new(user_id: u64, card_id: u64) -> Self {
        Self { user_id, card_id }
    }
}

impl fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.card_id)
    }
}

/// Points due to expire within each horizon. Cumulative: the 60-day figure
/// includes the 30-day one.
///
/// The ledger only stores these; computing them belongs to the expiry job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiringPoints {
    pub within_30_days: i64,
    pub within_60_days: i64,
    pub within_90_days: i64,
}

impl ExpiringPoints {
    pub fn is_empty(&self) -> bool {
        self.within_30_days == 0 && self.within_60_days == 0 && self.within_90_days == 0
    }
}

/// Coarse balance bands used in reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceTier {
    Empty,
    Low,
    Medium,
    High,
}

impl BalanceTier {
    pub fn for_total(total: i64) -> Self {
        if total <= 0 {
            BalanceTier::Empty
        } else if total < BALANCE_TIER_LOW_CEILING {
            BalanceTier::Low
        } else if total < BALANCE_TIER_MEDIUM_CEILING {
            BalanceTier::Medium
        } else {
            BalanceTier::High
        }
    }
}

impl fmt::Display for BalanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceTier::Empty => write!(f, "empty"),
            BalanceTier::Low => write!(f, "low"),
            BalanceTier::Medium => write!(f, "medium"),
            BalanceTier::High => write!(f, "high"),
        }
    }
}

/// The current total for a key. Must always equal the sum of the key's
/// movements, and never goes below zero through a debit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub key: BalanceKey,
    pub total: i64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub expiring: ExpiringPoints,
}

impl Balance {
    pub fn empty(key: BalanceKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            total: 0,
            last_updated: at,
            expiring: ExpiringPoints::default(),
        }
    }

    pub fn tier(&self) -> BalanceTier {
        BalanceTier::for_total(self.total)
    }

    pub fn covers(&self, points: i64) -> bool {
        self.total >= points
    }
}
