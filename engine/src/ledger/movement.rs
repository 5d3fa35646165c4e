//! # Movements
//!
//! A [`Movement`] is one signed point change for a (user, card) key. Once
//! committed it is never touched again: the log only grows.
//!
//! ## Sign Convention
//!
//! | Kind         | Sign                                              |
//! |--------------|---------------------------------------------------|
//! | `ACCRUAL`    | credit (> 0)                                      |
//! | `EXPIRATION` | debit (< 0)                                       |
//! | `REDEMPTION` | debit (< 0)                                       |
//! | `ADJUSTMENT` | either, never zero                                |
//! | `REVERSAL`   | opposite of what it reverses: debit when linked to an originating transaction, credit when linked to a redemption |
//!
//! A movement that breaks the table is a programming error on the caller's
//! side. [`NewMovement::validate`] rejects it; nothing gets "fixed up".

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::balance::BalanceKey;
use crate::config::MAX_NOTE_LENGTH;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Contract violations in a movement submitted for append.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MovementError {
    #[error("unknown movement kind: {0}")]
    UnknownKind(String),

    #[error("movement amount must not be zero")]
    ZeroAmount,

    #[error("{kind} movement must be a {expected}, got amount {amount}")]
    SignMismatch {
        kind: MovementKind,
        expected: Direction,
        amount: i64,
    },

    /// A reversal must point at exactly one thing it reverses.
    #[error("reversal must reference exactly one of an originating transaction or a redemption")]
    AmbiguousReversal,

    #[error("note is {length} characters, limit is {limit}")]
    NoteTooLong { length: usize, limit: usize },
}

// ---------------------------------------------------------------------------
// MovementKind
// ---------------------------------------------------------------------------

/// The closed set of movement kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Accrual,
    Expiration,
    Redemption,
    Reversal,
    Adjustment,
}

impl MovementKind {
    pub const ALL: [MovementKind; 5] = [
        MovementKind::Accrual,
        MovementKind::Expiration,
        MovementKind::Redemption,
        MovementKind::Reversal,
        MovementKind::Adjustment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Accrual => "ACCRUAL",
            MovementKind::Expiration => "EXPIRATION",
            MovementKind::Redemption => "REDEMPTION",
            MovementKind::Reversal => "REVERSAL",
            MovementKind::Adjustment => "ADJUSTMENT",
        }
    }

    /// Stable one-byte tag used in storage index keys.
    pub fn tag(&self) -> u8 {
        match self {
            MovementKind::Accrual => 1,
            MovementKind::Expiration => 2,
            MovementKind::Redemption => 3,
            MovementKind::Reversal => 4,
            MovementKind::Adjustment => 5,
        }
    }

    /// Human-readable label for statements.
    pub fn description(&self) -> &'static str {
        match self {
            MovementKind::Accrual => "Points earned",
            MovementKind::Expiration => "Points expired",
            MovementKind::Redemption => "Points redeemed",
            MovementKind::Reversal => "Points reversed",
            MovementKind::Adjustment => "Points adjusted",
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = MovementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        MovementKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| MovementError::UnknownKind(s.to_string()))
    }
}

/// Which way a movement is allowed to move the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Credit,
    Debit,
    Either,
}

impl Direction {
    fn admits(&self, amount: i64) -> bool {
        match self {
            Direction::Credit => amount > 0,
            Direction::Debit => amount < 0,
            Direction::Either => amount != 0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Credit => write!(f, "credit"),
            Direction::Debit => write!(f, "debit"),
            Direction::Either => write!(f, "non-zero amount"),
        }
    }
}

// ---------------------------------------------------------------------------
// NewMovement
// ---------------------------------------------------------------------------

/// A movement that has not been committed yet, and so has no id.
///
/// Built with a small consuming builder:
///
/// ```
/// use loyalty_engine::ledger::{BalanceKey, MovementKind, NewMovement};
///
/// let draft = NewMovement::new(BalanceKey::new(1, 10), MovementKind::Accrual, 250)
///     .transaction(9001)
///     .rule(3)
///     .note("purchase at partner store");
/// assert!(draft.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub key: BalanceKey,
    pub kind: MovementKind,
    pub amount: i64,
    pub transaction_ref: Option<u64>,
    pub redemption_ref: Option<u64>,
    pub note: String,
    pub applied_rule: Option<u64>,
    pub applied_campaign: Option<u64>,
    pub job_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewMovement {
    pub fn new(key: BalanceKey, kind: MovementKind, amount: i64) -> Self {
        Self {
            key,
            kind,
            amount,
            transaction_ref: None,
            redemption_ref: None,
            note: String::new(),
            applied_rule: None,
            applied_campaign: None,
            job_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn transaction(mut self, transaction_ref: u64) -> Self {
        self.transaction_ref = Some(transaction_ref);
        self
    }

    pub fn redemption(mut self, redemption_ref: u64) -> Self {
        self.redemption_ref = Some(redemption_ref);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into().trim().to_string();
        self
    }

    pub fn rule(mut self, rule_id: u64) -> Self {
        self.applied_rule = Some(rule_id);
        self
    }

    pub fn campaign(mut self, campaign_id: u64) -> Self {
        self.applied_campaign = Some(campaign_id);
        self
    }

    pub fn job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into().trim().to_string());
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// The direction this movement must take, given its kind and links.
    pub fn expected_direction(&self) -> Result<Direction, MovementError> {
        Ok(match self.kind {
            MovementKind::Accrual => Direction::Credit,
            MovementKind::Expiration | MovementKind::Redemption => Direction::Debit,
            MovementKind::Adjustment => Direction::Either,
            MovementKind::Reversal => match (self.transaction_ref, self.redemption_ref) {
                (Some(_), None) => Direction::Debit,
                (None, Some(_)) => Direction::Credit,
                _ => return Err(MovementError::AmbiguousReversal),
            },
        })
    }

    /// Checks the sign convention and field limits.
    pub fn validate(&self) -> Result<(), MovementError> {
        if self.amount == 0 {
            return Err(MovementError::ZeroAmount);
        }

        let expected = self.expected_direction()?;
        if !expected.admits(self.amount) {
            return Err(MovementError::SignMismatch {
                kind: self.kind,
                expected,
                amount: self.amount,
            });
        }

        let length = self.note.chars().count();
        if length > MAX_NOTE_LENGTH {
            return Err(MovementError::NoteTooLong {
                length,
                limit: MAX_NOTE_LENGTH,
            });
        }

        Ok(())
    }

    /// Stamps the draft with its storage-assigned id.
    pub fn into_movement(self, id: u64) -> Movement {
        Movement {
            id,
            key: self.key,
            kind: self.kind,
            amount: self.amount,
            transaction_ref: self.transaction_ref,
            redemption_ref: self.redemption_ref,
            note: self.note,
            applied_rule: self.applied_rule,
            applied_campaign: self.applied_campaign,
            job_id: self.job_id,
            created_at: self.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

/// A committed, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    /// Surrogate id assigned by the store.
    pub id: u64,
    pub key: BalanceKey,
    pub kind: MovementKind,
    /// Signed point change.
    pub amount: i64,
    /// Originating card transaction, if any.
    pub transaction_ref: Option<u64>,
    /// Linked redemption request, if any.
    pub redemption_ref: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub note: String,
    /// Conversion rule that produced an accrual. Informational.
    pub applied_rule: Option<u64>,
    /// Campaign that boosted an accrual. Informational.
    pub applied_campaign: Option<u64>,
    /// Batch job that produced the movement (expiry runs, bulk adjustments).
    pub job_id: Option<String>,
}

impl Movement {
    pub fn is_credit(&self) -> bool {
        self.amount > 0
    }

    pub fn is_debit(&self) -> bool {
        self.amount < 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> BalanceKey {
        BalanceKey::new(1, 2)
    }

    #[test]
    fn accrual_must_be_positive() {
        assert!(NewMovement::new(key(), MovementKind::Accrual, 10).validate().is_ok());
        assert!(matches!(
            NewMovement::new(key(), MovementKind::Accrual, -10).validate(),
            Err(MovementError::SignMismatch {
                kind: MovementKind::Accrual,
                expected: Direction::Credit,
                amount: -10,
            })
        ));
    }

    #[test]
    fn debit_kinds_must_be_negative() {
        for kind in [MovementKind::Expiration, MovementKind::Redemption] {
            assert!(NewMovement::new(key(), kind, -5).validate().is_ok());
            assert!(NewMovement::new(key(), kind, 5).validate().is_err());
        }
    }

    #[test]
    fn zero_is_never_valid() {
        for kind in MovementKind::ALL {
            assert_eq!(
                NewMovement::new(key(), kind, 0).transaction(1).validate(),
                Err(MovementError::ZeroAmount)
            );
        }
    }

    #[test]
    fn adjustment_accepts_either_sign() {
        assert!(NewMovement::new(key(), MovementKind::Adjustment, 7).validate().is_ok());
        assert!(NewMovement::new(key(), MovementKind::Adjustment, -7).validate().is_ok());
    }

    #[test]
    fn reversal_direction_follows_its_link() {
        let of_transaction = NewMovement::new(key(), MovementKind::Reversal, -40).transaction(5);
        assert!(of_transaction.validate().is_ok());
        assert!(NewMovement::new(key(), MovementKind::Reversal, 40)
            .transaction(5)
            .validate()
            .is_err());

        let of_redemption = NewMovement::new(key(), MovementKind::Reversal, 40).redemption(9);
        assert!(of_redemption.validate().is_ok());
        assert!(NewMovement::new(key(), MovementKind::Reversal, -40)
            .redemption(9)
            .validate()
            .is_err());
    }

    #[test]
    fn reversal_without_exactly_one_link_is_rejected() {
        assert_eq!(
            NewMovement::new(key(), MovementKind::Reversal, 10).validate(),
            Err(MovementError::AmbiguousReversal)
        );
        assert_eq!(
            NewMovement::new(key(), MovementKind::Reversal, 10)
                .transaction(1)
                .redemption(2)
                .validate(),
            Err(MovementError::AmbiguousReversal)
        );
    }

    #[test]
    fn long_notes_are_rejected() {
        let draft =
            NewMovement::new(key(), MovementKind::Accrual, 1).note("x".repeat(MAX_NOTE_LENGTH + 1));
        assert!(matches!(draft.validate(), Err(MovementError::NoteTooLong { .. })));
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("accrual".parse::<MovementKind>().unwrap(), MovementKind::Accrual);
        assert_eq!(" REVERSAL ".parse::<MovementKind>().unwrap(), MovementKind::Reversal);
        assert!(matches!(
            "BONUS".parse::<MovementKind>(),
            Err(MovementError::UnknownKind(_))
        ));
    }

    #[test]
    fn into_movement_keeps_every_field() {
        let at = Utc::now();
        let m = NewMovement::new(key(), MovementKind::Accrual, 300)
            .transaction(11)
            .rule(2)
            .campaign(3)
            .note("  trimmed  ")
            .at(at)
            .into_movement(42);
        assert_eq!(m.id, 42);
        assert_eq!(m.note, "trimmed");
        assert_eq!(m.transaction_ref, Some(11));
        assert_eq!(m.applied_rule, Some(2));
        assert_eq!(m.applied_campaign, Some(3));
        assert_eq!(m.created_at, at);
        assert!(m.is_credit());
    }
}
