//! # Storage Module
//!
//! The atomic-conditional-update capability the ledger depends on, plus
//! two backends that provide it.
//!
//! ## Architecture
//!
//! ```text
//! mod.rs    - LedgerStore trait, StoreError, commit/snapshot types
//! memory.rs - MemoryLedgerStore: dashmap rows + parking_lot locks
//! db.rs     - LoyaltyDb: sled named trees and multi-tree transactions
//! ```
//!
//! ## Contract
//!
//! `commit` is the only write path for movements. In one atomic unit it:
//!
//! 1. refuses a link (transaction or redemption reference + kind) that is
//!    already recorded,
//! 2. refuses a debit the balance cannot cover,
//! 3. appends the movement under a fresh id,
//! 4. applies the signed amount to the (user, card) balance, creating the
//!    row at zero on first write.
//!
//! A refusal leaves nothing behind: no movement, no balance row, no id
//! visible to readers.

pub mod db;
pub mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Classify, ErrorKind};
use crate::ledger::{Balance, BalanceKey, ExpiringPoints, Movement, MovementKind, NewMovement};

pub use db::LoyaltyDb;
pub use memory::MemoryLedgerStore;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient balance for {key}: available {available}, requested {requested}")]
    Insufficient {
        key: BalanceKey,
        available: i64,
        requested: i64,
    },

    #[error("{kind} already recorded for {link}")]
    Duplicate { link: Link, kind: MovementKind },

    #[error("balance overflow for {0}")]
    Overflow(BalanceKey),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub(crate) fn serialization(e: impl fmt::Display) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Insufficient { .. } => ErrorKind::InsufficientResource,
            StoreError::Duplicate { .. } => ErrorKind::StateConflict,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Sled(_) | StoreError::Serialization(_) | StoreError::Overflow(_) => {
                ErrorKind::System
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// An external reference a movement is tied to. At most one movement of a
/// given kind may exist per link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Link {
    Transaction(u64),
    Redemption(u64),
}

impl Link {
    /// Links carried by a movement draft, transaction first.
    pub fn of(draft: &NewMovement) -> Vec<Link> {
        draft
            .transaction_ref
            .map(Link::Transaction)
            .into_iter()
            .chain(draft.redemption_ref.map(Link::Redemption))
            .collect()
    }

    /// Fixed-width index key: link tag, reference (BE), kind tag.
    pub(crate) fn index_key(&self, kind: MovementKind) -> [u8; 10] {
        let (tag, id) = match self {
            Link::Transaction(id) => (b't', *id),
            Link::Redemption(id) => (b'r', *id),
        };
        let mut key = [0u8; 10];
        key[0] = tag;
        key[1..9].copy_from_slice(&id.to_be_bytes());
        key[9] = kind.tag();
        key
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Transaction(id) => write!(f, "transaction {id}"),
            Link::Redemption(id) => write!(f, "redemption {id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Commit & Snapshot Types
// ---------------------------------------------------------------------------

/// Result of a successful commit: the stored movement and the balance
/// right after it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub movement: Movement,
    pub balance: Balance,
}

/// A point-in-time view of the whole ledger. No commit is half-visible.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    /// All movements, ascending by id.
    pub movements: Vec<Movement>,
    /// All balance rows, ascending by key.
    pub balances: Vec<Balance>,
}

/// Applies a draft's amount to `balance`, enforcing the no-negative rule.
pub(crate) fn apply_amount(balance: &Balance, draft: &NewMovement) -> StoreResult<i64> {
    if draft.amount < 0 && balance.total < -draft.amount {
        return Err(StoreError::Insufficient {
            key: draft.key,
            available: balance.total,
            requested: -draft.amount,
        });
    }
    balance
        .total
        .checked_add(draft.amount)
        .ok_or(StoreError::Overflow(draft.key))
}

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// Storage capability behind the ledger.
///
/// Implementations must make `commit` atomic per key and linearizable with
/// respect to other commits on the same key, across every handle that
/// shares the underlying data.
pub trait LedgerStore: Send + Sync {
    /// Validated drafts only; the ledger checks sign and kind first.
    fn commit(&self, draft: NewMovement) -> StoreResult<Committed>;

    fn balance(&self, key: &BalanceKey) -> StoreResult<Option<Balance>>;

    /// Every movement for `key`, ascending by id.
    fn movements_for(&self, key: &BalanceKey) -> StoreResult<Vec<Movement>>;

    fn find_by_link(&self, link: Link, kind: MovementKind) -> StoreResult<Option<Movement>>;

    fn snapshot(&self) -> StoreResult<LedgerSnapshot>;

    /// Overwrites the expiring-soon buckets of an existing balance row.
    fn set_expiring(&self, key: &BalanceKey, expiring: ExpiringPoints) -> StoreResult<Balance>;
}
