//! # Reward Catalog
//!
//! Redeemable items and their stock. Stock is the second scarce resource a
//! redemption consumes (points being the first), so every stock change is
//! a conditional update: read, check, write as one unit per reward.
//!
//! Two catalogs implement [`RewardCatalog`]:
//!
//! - [`MemoryRewardCatalog`]: `DashMap` rows; the row guard is the lock.
//! - [`SledRewardCatalog`]: a `rewards` tree in the shared [`LoyaltyDb`],
//!   updated through sled transactions.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sled::transaction::{abort, ConflictableTransactionError, TransactionError};
use sled::Tree;
use thiserror::Error;
use tracing::debug;

use loyalty_engine::config::{STOCK_LOW_CEILING, STOCK_MEDIUM_CEILING};
use loyalty_engine::storage::db::{decode, encode};
use loyalty_engine::storage::{LoyaltyDb, StoreError};
use loyalty_engine::{Classify, ErrorKind};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("reward {0} not found")]
    NotFound(u64),

    #[error("reward {0} already exists")]
    Duplicate(u64),

    #[error("invalid reward {id}: {reason}")]
    Invalid { id: u64, reason: String },

    #[error("reward {0} is inactive")]
    Inactive(u64),

    #[error("quantity must be positive")]
    ZeroQuantity,

    /// Reservation or stock adjustment would take stock below zero.
    #[error("insufficient stock for reward {reward_id}: available {available}, requested {requested}")]
    InsufficientStock {
        reward_id: u64,
        available: u64,
        requested: u64,
    },

    #[error("stock overflow for reward {0}")]
    StockOverflow(u64),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<sled::Error> for CatalogError {
    fn from(e: sled::Error) -> Self {
        CatalogError::Store(StoreError::Sled(e))
    }
}

impl Classify for CatalogError {
    fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::NotFound(_) => ErrorKind::NotFound,
            CatalogError::Duplicate(_) => ErrorKind::StateConflict,
            CatalogError::Invalid { .. }
            | CatalogError::Inactive(_)
            | CatalogError::ZeroQuantity => ErrorKind::Validation,
            CatalogError::InsufficientStock { .. } => ErrorKind::InsufficientResource,
            CatalogError::StockOverflow(_) => ErrorKind::System,
            CatalogError::Store(e) => e.kind(),
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What the cardholder gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    PhysicalProduct,
    DigitalProduct,
    Discount,
    Cashback,
    Miles,
    Experience,
}

impl fmt::Display for RewardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardKind::PhysicalProduct => write!(f, "Physical product"),
            RewardKind::DigitalProduct => write!(f, "Digital product"),
            RewardKind::Discount => write!(f, "Discount"),
            RewardKind::Cashback => write!(f, "Cashback"),
            RewardKind::Miles => write!(f, "Miles"),
            RewardKind::Experience => write!(f, "Experience"),
        }
    }
}

/// Coarse stock band for catalog listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    Inactive,
    OutOfStock,
    Low,
    Medium,
    High,
}

impl fmt::Display for StockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockLevel::Inactive => write!(f, "inactive"),
            StockLevel::OutOfStock => write!(f, "out_of_stock"),
            StockLevel::Low => write!(f, "low"),
            StockLevel::Medium => write!(f, "medium"),
            StockLevel::High => write!(f, "high"),
        }
    }
}

fn default_active() -> bool {
    true
}

/// A redeemable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub id: u64,
    pub kind: RewardKind,
    pub description: String,
    /// Points per unit. Always positive.
    pub cost: i64,
    /// Units left. Never negative by construction.
    pub stock: u64,
    #[serde(default)]
    pub partner_id: Option<u64>,
    /// After this instant the reward can no longer be requested.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub details: Option<String>,
}

impl Reward {
    pub fn new(id: u64, kind: RewardKind, description: impl Into<String>, cost: i64, stock: u64) -> Self {
        Self {
            id,
            kind,
            description: description.into(),
            cost,
            stock,
            partner_id: None,
            expires_at: None,
            active: true,
            details: None,
        }
    }

    pub fn validate(&self) -> CatalogResult<()> {
        if self.cost <= 0 {
            return Err(CatalogError::Invalid {
                id: self.id,
                reason: format!("cost must be positive, got {}", self.cost),
            });
        }
        if self.description.trim().is_empty() {
            return Err(CatalogError::Invalid {
                id: self.id,
                reason: "description must not be blank".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| at > expires)
    }

    /// Active, in stock and not expired.
    pub fn is_available(&self, at: DateTime<Utc>) -> bool {
        self.active && self.stock > 0 && !self.is_expired(at)
    }

    pub fn has_stock(&self, quantity: u64) -> bool {
        self.stock >= quantity
    }

    /// Total points for `quantity` units, `None` on overflow.
    pub fn cost_for(&self, quantity: u64) -> Option<i64> {
        i64::try_from(quantity).ok()?.checked_mul(self.cost)
    }

    pub fn stock_level(&self) -> StockLevel {
        if !self.active {
            StockLevel::Inactive
        } else if self.stock == 0 {
            StockLevel::OutOfStock
        } else if self.stock < STOCK_LOW_CEILING {
            StockLevel::Low
        } else if self.stock < STOCK_MEDIUM_CEILING {
            StockLevel::Medium
        } else {
            StockLevel::High
        }
    }

    fn reserved(&self, quantity: u64) -> CatalogResult<Reward> {
        if quantity == 0 {
            return Err(CatalogError::ZeroQuantity);
        }
        if !self.active {
            return Err(CatalogError::Inactive(self.id));
        }
        if !self.has_stock(quantity) {
            return Err(CatalogError::InsufficientStock {
                reward_id: self.id,
                available: self.stock,
                requested: quantity,
            });
        }
        Ok(Reward {
            stock: self.stock - quantity,
            ..self.clone()
        })
    }

    fn released(&self, quantity: u64) -> CatalogResult<Reward> {
        if quantity == 0 {
            return Err(CatalogError::ZeroQuantity);
        }
        let stock = self
            .stock
            .checked_add(quantity)
            .ok_or(CatalogError::StockOverflow(self.id))?;
        Ok(Reward {
            stock,
            ..self.clone()
        })
    }

    fn adjusted(&self, delta: i64) -> CatalogResult<Reward> {
        let magnitude = delta.unsigned_abs();
        let stock = if delta >= 0 {
            self.stock
                .checked_add(magnitude)
                .ok_or(CatalogError::StockOverflow(self.id))?
        } else {
            self.stock
                .checked_sub(magnitude)
                .ok_or(CatalogError::InsufficientStock {
                    reward_id: self.id,
                    available: self.stock,
                    requested: magnitude,
                })?
        };
        Ok(Reward {
            stock,
            ..self.clone()
        })
    }
}

// ---------------------------------------------------------------------------
// RewardCatalog
// ---------------------------------------------------------------------------

/// Reward storage with atomic per-reward updates.
pub trait RewardCatalog: Send + Sync {
    /// Adds a new reward. Refuses an id that already exists.
    fn insert(&self, reward: Reward) -> CatalogResult<Reward>;

    fn get(&self, id: u64) -> CatalogResult<Reward>;

    /// Every reward, ascending by id.
    fn list(&self) -> CatalogResult<Vec<Reward>>;

    /// Applies `change` to the current row and stores the result as one
    /// atomic step. A refusal from `change` leaves the row untouched.
    fn update(&self, id: u64, change: &dyn Fn(&Reward) -> CatalogResult<Reward>) -> CatalogResult<Reward>;

    /// Takes `quantity` units, only while `stock ≥ quantity`.
    fn reserve(&self, id: u64, quantity: u64) -> CatalogResult<Reward> {
        let reward = self.update(id, &|r| r.reserved(quantity))?;
        debug!(reward = id, quantity, stock = reward.stock, "stock reserved");
        Ok(reward)
    }

    /// Puts `quantity` units back.
    fn release(&self, id: u64, quantity: u64) -> CatalogResult<Reward> {
        let reward = self.update(id, &|r| r.released(quantity))?;
        debug!(reward = id, quantity, stock = reward.stock, "stock released");
        Ok(reward)
    }

    /// Restock (positive) or write-off (negative). Never below zero.
    fn adjust_stock(&self, id: u64, delta: i64) -> CatalogResult<Reward> {
        self.update(id, &|r| r.adjusted(delta))
    }

    fn set_active(&self, id: u64, active: bool) -> CatalogResult<Reward> {
        self.update(id, &|r| Ok(Reward { active, ..r.clone() }))
    }

    /// Rewards a cardholder could request at `at`.
    fn available(&self, at: DateTime<Utc>) -> CatalogResult<Vec<Reward>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.is_available(at))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryRewardCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryRewardCatalog {
    rewards: DashMap<u64, Reward>,
}

impl MemoryRewardCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RewardCatalog for MemoryRewardCatalog {
    fn insert(&self, reward: Reward) -> CatalogResult<Reward> {
        reward.validate()?;
        match self.rewards.entry(reward.id) {
            Entry::Occupied(_) => Err(CatalogError::Duplicate(reward.id)),
            Entry::Vacant(row) => Ok(row.insert(reward).clone()),
        }
    }

    fn get(&self, id: u64) -> CatalogResult<Reward> {
        self.rewards
            .get(&id)
            .map(|row| row.clone())
            .ok_or(CatalogError::NotFound(id))
    }

    fn list(&self) -> CatalogResult<Vec<Reward>> {
        let mut rewards: Vec<Reward> = self.rewards.iter().map(|row| row.clone()).collect();
        rewards.sort_by_key(|r| r.id);
        Ok(rewards)
    }

    fn update(&self, id: u64, change: &dyn Fn(&Reward) -> CatalogResult<Reward>) -> CatalogResult<Reward> {
        let mut row = self.rewards.get_mut(&id).ok_or(CatalogError::NotFound(id))?;
        let next = change(row.value())?;
        *row = next.clone();
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// SledRewardCatalog
// ---------------------------------------------------------------------------

/// Rewards stored in the `rewards` tree, keyed by id (8B BE).
#[derive(Debug, Clone)]
pub struct SledRewardCatalog {
    rewards: Tree,
}

impl SledRewardCatalog {
    pub fn open(db: &LoyaltyDb) -> CatalogResult<Self> {
        Ok(Self {
            rewards: db.open_tree("rewards")?,
        })
    }

    pub fn shared(db: &LoyaltyDb) -> CatalogResult<Arc<dyn RewardCatalog>> {
        Ok(Arc::new(Self::open(db)?))
    }
}

impl RewardCatalog for SledRewardCatalog {
    fn insert(&self, reward: Reward) -> CatalogResult<Reward> {
        reward.validate()?;
        let bytes = encode(&reward)?;
        let swapped = self
            .rewards
            .compare_and_swap(reward.id.to_be_bytes(), None as Option<&[u8]>, Some(bytes))?;
        match swapped {
            Ok(()) => Ok(reward),
            Err(_) => Err(CatalogError::Duplicate(reward.id)),
        }
    }

    fn get(&self, id: u64) -> CatalogResult<Reward> {
        match self.rewards.get(id.to_be_bytes())? {
            Some(bytes) => Ok(decode(&bytes)?),
            None => Err(CatalogError::NotFound(id)),
        }
    }

    fn list(&self) -> CatalogResult<Vec<Reward>> {
        self.rewards
            .iter()
            .values()
            .map(|bytes| Ok(decode(&bytes?)?))
            .collect()
    }

    fn update(&self, id: u64, change: &dyn Fn(&Reward) -> CatalogResult<Reward>) -> CatalogResult<Reward> {
        let key = id.to_be_bytes();
        let result = self.rewards.transaction(|tree| {
            let current: Reward = match tree.get(key)? {
                Some(bytes) => decode(&bytes)
                    .map_err(|e| ConflictableTransactionError::Abort(CatalogError::from(e)))?,
                None => return abort(CatalogError::NotFound(id)),
            };
            let next = change(&current).map_err(ConflictableTransactionError::Abort)?;
            let bytes =
                encode(&next).map_err(|e| ConflictableTransactionError::Abort(CatalogError::from(e)))?;
            tree.insert(&key[..], bytes)?;
            Ok(next)
        });
        result.map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => CatalogError::from(e),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
