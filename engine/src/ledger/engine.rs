//! # Ledger
//!
//! The only component allowed to change a point balance. Every operation
//! here ends in exactly one `LedgerStore::commit`, which appends the
//! movement and moves the balance as a single atomic unit.
//!
//! ## Operations
//!
//! | Operation              | Kind         | Sign | Link         |
//! |------------------------|--------------|------|--------------|
//! | `credit`               | `ACCRUAL`    | +    | none         |
//! | `accrue`               | `ACCRUAL`    | +    | transaction  |
//! | `debit`                | `ADJUSTMENT` | −    | none         |
//! | `adjust`               | `ADJUSTMENT` | ±    | none         |
//! | `expire`               | `EXPIRATION` | −    | none         |
//! | `reverse_transaction`  | `REVERSAL`   | −    | transaction  |
//! | `debit_for_redemption` | `REDEMPTION` | −    | redemption   |
//! | `restore_redemption`   | `REVERSAL`   | +    | redemption   |
//!
//! Linked movements are unique per (link, kind), so replaying an accrual or
//! a reversal is refused by the store instead of double-counting.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::balance::{Balance, BalanceKey, ExpiringPoints};
use super::movement::{Movement, MovementError, MovementKind, NewMovement};
use super::statement::{Statement, StatementQuery};
use crate::context::OpContext;
use crate::error::{Classify, ErrorKind};
use crate::events::{Envelope, EventSink, LedgerEvent, NullSink};
use crate::scoring::ScoreOutcome;
use crate::storage::{LedgerStore, Link, StoreError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid movement: {0}")]
    Invalid(#[from] MovementError),

    #[error("points must be positive, got {points}")]
    NonPositive { points: i64 },

    #[error("insufficient balance for {key}: available {available}, requested {requested}")]
    InsufficientBalance {
        key: BalanceKey,
        available: i64,
        requested: i64,
    },

    #[error("{kind} already recorded for {link}")]
    AlreadyRecorded { link: Link, kind: MovementKind },

    #[error("no accrual recorded for transaction {transaction_ref} on {key}")]
    NothingToReverse { key: BalanceKey, transaction_ref: u64 },

    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Insufficient {
                key,
                available,
                requested,
            } => LedgerError::InsufficientBalance {
                key,
                available,
                requested,
            },
            StoreError::Duplicate { link, kind } => LedgerError::AlreadyRecorded { link, kind },
            other => LedgerError::Store(other),
        }
    }
}

impl Classify for LedgerError {
    fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Invalid(_) | LedgerError::NonPositive { .. } => ErrorKind::Validation,
            LedgerError::InsufficientBalance { .. } => ErrorKind::InsufficientResource,
            LedgerError::AlreadyRecorded { .. } => ErrorKind::StateConflict,
            LedgerError::NothingToReverse { .. } => ErrorKind::NotFound,
            LedgerError::Store(e) => e.kind(),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

fn require_positive(points: i64) -> LedgerResult<()> {
    if points <= 0 {
        return Err(LedgerError::NonPositive { points });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What `accrue` did with a scored transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "movement", rename_all = "snake_case")]
pub enum AccrualOutcome {
    Credited(Movement),
    /// The transaction had already been credited; nothing was appended.
    AlreadyCredited(Movement),
    /// The score was zero points; nothing was appended.
    NothingToCredit,
}

impl AccrualOutcome {
    pub fn points(&self) -> i64 {
        match self {
            AccrualOutcome::Credited(m) => m.amount,
            _ => 0,
        }
    }
}

/// A key whose stored total disagrees with its movement log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub key: BalanceKey,
    /// What the balance row says; 0 when movements exist without a row.
    pub stored: i64,
    pub ledger_sum: i64,
}

impl Discrepancy {
    pub fn drift(&self) -> i64 {
        self.stored - self.ledger_sum
    }
}

/// Result of a reconciliation audit. Diagnostic only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub keys_checked: usize,
    pub movements_scanned: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn inconsistent_keys(&self) -> BTreeSet<BalanceKey> {
        self.discrepancies.iter().map(|d| d.key).collect()
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Handle to the points ledger. Cheap to clone; clones share the store and
/// the event sink.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    events: Arc<dyn EventSink<LedgerEvent>>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            events: Arc::new(NullSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink<LedgerEvent>>) -> Self {
        self.events = events;
        self
    }

    /// Validates and commits one movement, then announces it.
    ///
    /// Sign or link violations are returned as [`LedgerError::Invalid`]
    /// and nothing is written.
    pub fn append(&self, ctx: &OpContext, draft: NewMovement) -> LedgerResult<Movement> {
        draft.validate()?;

        let committed = self.store.commit(draft)?;
        let movement = committed.movement;
        info!(
            correlation_id = %ctx.correlation_id,
            user = movement.key.user_id,
            card = movement.key.card_id,
            kind = %movement.kind,
            points = movement.amount,
            balance = committed.balance.total,
            "movement appended"
        );

        if let Some(event) = LedgerEvent::for_movement(&movement) {
            self.events.publish(Envelope::new(ctx, event));
        }
        Ok(movement)
    }

    // -- Credit & debit primitives ------------------------------------------

    /// Credits `points` as a plain accrual.
    pub fn credit(&self, ctx: &OpContext, key: BalanceKey, points: i64) -> LedgerResult<Movement> {
        require_positive(points)?;
        self.append(
            ctx,
            NewMovement::new(key, MovementKind::Accrual, points).at(ctx.at),
        )
    }

    /// Debits `points` as a negative adjustment. Refused without any write
    /// when the balance cannot cover it.
    pub fn debit(&self, ctx: &OpContext, key: BalanceKey, points: i64) -> LedgerResult<Movement> {
        require_positive(points)?;
        self.append(
            ctx,
            NewMovement::new(key, MovementKind::Adjustment, -points).at(ctx.at),
        )
    }

    /// Signed manual adjustment. Negative adjustments are guarded like any
    /// other debit.
    pub fn adjust(
        &self,
        ctx: &OpContext,
        key: BalanceKey,
        points: i64,
        note: &str,
    ) -> LedgerResult<Movement> {
        self.append(
            ctx,
            NewMovement::new(key, MovementKind::Adjustment, points)
                .note(note)
                .at(ctx.at),
        )
    }

    /// Records points expired by the batch job `job_id`. Which points
    /// expire is decided by the job, not here.
    pub fn expire(
        &self,
        ctx: &OpContext,
        key: BalanceKey,
        points: i64,
        job_id: &str,
    ) -> LedgerResult<Movement> {
        require_positive(points)?;
        self.append(
            ctx,
            NewMovement::new(key, MovementKind::Expiration, -points)
                .job(job_id)
                .at(ctx.at),
        )
    }

    // -- Transactions -------------------------------------------------------

    /// Credits a scored card transaction, at most once per transaction. A
    /// transaction already accrued to another card is a conflict.
    pub fn accrue(
        &self,
        ctx: &OpContext,
        key: BalanceKey,
        transaction_ref: u64,
        score: &ScoreOutcome,
    ) -> LedgerResult<AccrualOutcome> {
        if score.points_awarded <= 0 {
            debug!(transaction_ref, "zero-point score, nothing to accrue");
            return Ok(AccrualOutcome::NothingToCredit);
        }

        let mut draft = NewMovement::new(key, MovementKind::Accrual, score.points_awarded)
            .transaction(transaction_ref)
            .at(ctx.at);
        draft.applied_rule = score.conversion_rule_id;
        draft.applied_campaign = score.campaign_id;

        match self.append(ctx, draft) {
            Ok(movement) => Ok(AccrualOutcome::Credited(movement)),
            Err(LedgerError::AlreadyRecorded { link, kind }) => {
                let existing = self
                    .store
                    .find_by_link(link, kind)?
                    .ok_or_else(|| {
                        LedgerError::Store(StoreError::NotFound(format!("{kind} for {link}")))
                    })?;
                if existing.key != key {
                    warn!(
                        transaction_ref,
                        user = key.user_id,
                        card = key.card_id,
                        owner = %existing.key,
                        "transaction already accrued to another card"
                    );
                    return Err(LedgerError::AlreadyRecorded { link, kind });
                }
                debug!(transaction_ref, id = existing.id, "transaction already accrued");
                Ok(AccrualOutcome::AlreadyCredited(existing))
            }
            Err(e) => Err(e),
        }
    }

    /// Reverses the accrual of a card transaction (estorno) with a debit of
    /// the same size. Refused if the points were already spent.
    pub fn reverse_transaction(
        &self,
        ctx: &OpContext,
        key: BalanceKey,
        transaction_ref: u64,
        note: &str,
    ) -> LedgerResult<Movement> {
        let accrual = self
            .store
            .find_by_link(Link::Transaction(transaction_ref), MovementKind::Accrual)?
            .filter(|m| m.key == key)
            .ok_or(LedgerError::NothingToReverse {
                key,
                transaction_ref,
            })?;

        let draft = NewMovement::new(key, MovementKind::Reversal, -accrual.amount)
            .transaction(transaction_ref)
            .note(note)
            .at(ctx.at);
        self.append(ctx, draft)
    }

    // -- Redemptions --------------------------------------------------------

    /// Debits the cost of a redemption. Fails without writing when the
    /// balance is short.
    pub fn debit_for_redemption(
        &self,
        ctx: &OpContext,
        key: BalanceKey,
        points: i64,
        redemption_id: u64,
    ) -> LedgerResult<Movement> {
        require_positive(points)?;
        self.append(
            ctx,
            NewMovement::new(key, MovementKind::Redemption, -points)
                .redemption(redemption_id)
                .at(ctx.at),
        )
    }

    /// Gives back the points of a denied or cancelled redemption through a
    /// reversal credit. The original debit stays in the log untouched.
    pub fn restore_redemption(
        &self,
        ctx: &OpContext,
        key: BalanceKey,
        points: i64,
        redemption_id: u64,
        note: &str,
    ) -> LedgerResult<Movement> {
        require_positive(points)?;
        self.append(
            ctx,
            NewMovement::new(key, MovementKind::Reversal, points)
                .redemption(redemption_id)
                .note(note)
                .at(ctx.at),
        )
    }

    // -- Reads --------------------------------------------------------------

    /// Current total, or 0 when the key has never moved.
    pub fn balance_of(&self, key: BalanceKey) -> LedgerResult<i64> {
        Ok(self.store.balance(&key)?.map_or(0, |b| b.total))
    }

    pub fn balance(&self, key: BalanceKey) -> LedgerResult<Option<Balance>> {
        Ok(self.store.balance(&key)?)
    }

    pub fn movements(&self, key: BalanceKey) -> LedgerResult<Vec<Movement>> {
        Ok(self.store.movements_for(&key)?)
    }

    pub fn statement(&self, key: BalanceKey, query: &StatementQuery) -> LedgerResult<Statement> {
        let history = self.store.movements_for(&key)?;
        Ok(Statement::build(key, &history, query))
    }

    /// Points accrued in the calendar month (UTC) containing `as_of`.
    /// Feeds the monthly cap in the points calculator.
    pub fn accrued_in_month(&self, key: BalanceKey, as_of: DateTime<Utc>) -> LedgerResult<i64> {
        let total = self
            .store
            .movements_for(&key)?
            .iter()
            .filter(|m| m.kind == MovementKind::Accrual)
            .filter(|m| m.created_at.year() == as_of.year() && m.created_at.month() == as_of.month())
            .map(|m| m.amount)
            .sum();
        Ok(total)
    }

    /// Stores externally computed expiring-soon buckets on a balance row.
    pub fn set_expiring(&self, key: BalanceKey, expiring: ExpiringPoints) -> LedgerResult<Balance> {
        Ok(self.store.set_expiring(&key, expiring)?)
    }

    // -- Audit --------------------------------------------------------------

    /// Compares every stored balance with the sum of its movements over a
    /// consistent snapshot. Reports differences; never repairs them.
    pub fn reconcile(&self) -> LedgerResult<ReconcileReport> {
        let snapshot = self.store.snapshot()?;

        let mut sums: BTreeMap<BalanceKey, i64> = BTreeMap::new();
        for movement in &snapshot.movements {
            let sum = sums.entry(movement.key).or_insert(0);
            *sum = sum.saturating_add(movement.amount);
        }

        let mut stored: BTreeMap<BalanceKey, i64> = snapshot
            .balances
            .iter()
            .map(|b| (b.key, b.total))
            .collect();

        let mut discrepancies = Vec::new();
        for (key, ledger_sum) in &sums {
            let total = stored.remove(key).unwrap_or(0);
            if total != *ledger_sum {
                discrepancies.push(Discrepancy {
                    key: *key,
                    stored: total,
                    ledger_sum: *ledger_sum,
                });
            }
        }
        // Rows with no movements at all.
        for (key, total) in stored {
            if total != 0 {
                discrepancies.push(Discrepancy {
                    key,
                    stored: total,
                    ledger_sum: 0,
                });
            }
        }
        discrepancies.sort_by_key(|d| d.key);

        for d in &discrepancies {
            warn!(
                user = d.key.user_id,
                card = d.key.card_id,
                stored = d.stored,
                ledger_sum = d.ledger_sum,
                "balance does not match movement log"
            );
        }

        let keys_checked = sums
            .keys()
            .chain(snapshot.balances.iter().map(|b| &b.key))
            .collect::<BTreeSet<_>>()
            .len();
        let report = ReconcileReport {
            keys_checked,
            movements_scanned: snapshot.movements.len(),
            discrepancies,
        };
        info!(
            keys = report.keys_checked,
            movements = report.movements_scanned,
            inconsistent = report.discrepancies.len(),
            "reconciliation finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Outbox;
    use crate::storage::MemoryLedgerStore;
    use chrono::TimeZone;

    fn key() -> BalanceKey {
        BalanceKey::new(1, 1)
    }

    fn ledger() -> (Ledger, Arc<MemoryLedgerStore>) {
        let store = Arc::new(MemoryLedgerStore::new());
        (Ledger::new(store.clone()), store)
    }

    fn score(points: i64) -> ScoreOutcome {
        ScoreOutcome {
            conversion_rule_id: Some(4),
            campaign_id: None,
            points_awarded: points,
        }
    }

    #[test]
    fn balance_of_unknown_key_is_zero() {
        let (ledger, _) = ledger();
        assert_eq!(ledger.balance_of(key()).unwrap(), 0);
        assert!(ledger.balance(key()).unwrap().is_none());
    }

    #[test]
    fn credit_then_debit() {
        let (ledger, _) = ledger();
        let ctx = OpContext::new();
        ledger.credit(&ctx, key(), 100).unwrap();
        let debit = ledger.debit(&ctx, key(), 40).unwrap();
        assert_eq!(debit.amount, -40);
        assert_eq!(debit.kind, MovementKind::Adjustment);
        assert_eq!(ledger.balance_of(key()).unwrap(), 60);
    }

    #[test]
    fn debit_beyond_balance_is_refused_without_writes() {
        let (ledger, store) = ledger();
        let ctx = OpContext::new();
        ledger.credit(&ctx, key(), 50).unwrap();

        let err = ledger.debit(&ctx, key(), 51).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                available: 50,
                requested: 51,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::InsufficientResource);
        assert_eq!(ledger.balance_of(key()).unwrap(), 50);
        assert_eq!(store.movement_count(), 1);
    }

    #[test]
    fn non_positive_points_are_validation_errors() {
        let (ledger, _) = ledger();
        let ctx = OpContext::new();
        for points in [0, -5] {
            let err = ledger.credit(&ctx, key(), points).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert!(ledger.debit(&ctx, key(), points).is_err());
        }
    }

    #[test]
    fn append_rejects_wrong_sign() {
        let (ledger, store) = ledger();
        let err = ledger
            .append(
                &OpContext::new(),
                NewMovement::new(key(), MovementKind::Expiration, 10),
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Invalid(MovementError::SignMismatch { .. })));
        assert_eq!(store.movement_count(), 0);
    }

    #[test]
    fn accrue_is_idempotent_per_transaction() {
        let (ledger, _) = ledger();
        let ctx = OpContext::new();

        let first = ledger.accrue(&ctx, key(), 77, &score(300)).unwrap();
        let movement = match first {
            AccrualOutcome::Credited(m) => m,
            other => panic!("expected a credit, got {other:?}"),
        };
        assert_eq!(movement.applied_rule, Some(4));
        assert_eq!(movement.transaction_ref, Some(77));

        let again = ledger.accrue(&ctx, key(), 77, &score(300)).unwrap();
        assert_eq!(again, AccrualOutcome::AlreadyCredited(movement));
        assert_eq!(ledger.balance_of(key()).unwrap(), 300);
    }

    #[test]
    fn accruing_a_transaction_under_another_card_conflicts() {
        let (ledger, _) = ledger();
        let ctx = OpContext::new();
        let other = BalanceKey::new(2, 20);

        ledger.accrue(&ctx, key(), 77, &score(300)).unwrap();
        let err = ledger.accrue(&ctx, other, 77, &score(300)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::AlreadyRecorded {
                link: Link::Transaction(77),
                kind: MovementKind::Accrual
            }
        ));
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert_eq!(ledger.balance_of(other).unwrap(), 0);
        assert_eq!(ledger.balance_of(key()).unwrap(), 300);
    }

    #[test]
    fn zero_point_score_appends_nothing() {
        let (ledger, store) = ledger();
        let outcome = ledger
            .accrue(&OpContext::new(), key(), 1, &score(0))
            .unwrap();
        assert_eq!(outcome, AccrualOutcome::NothingToCredit);
        assert_eq!(store.movement_count(), 0);
    }

    #[test]
    fn reverse_transaction_debits_the_accrued_amount_once() {
        let (ledger, _) = ledger();
        let ctx = OpContext::new();
        ledger.accrue(&ctx, key(), 5, &score(120)).unwrap();

        let reversal = ledger
            .reverse_transaction(&ctx, key(), 5, "chargeback")
            .unwrap();
        assert_eq!(reversal.amount, -120);
        assert_eq!(reversal.kind, MovementKind::Reversal);
        assert_eq!(ledger.balance_of(key()).unwrap(), 0);

        let err = ledger
            .reverse_transaction(&ctx, key(), 5, "again")
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyRecorded { .. }));
    }

    #[test]
    fn reverse_unknown_transaction() {
        let (ledger, _) = ledger();
        let err = ledger
            .reverse_transaction(&OpContext::new(), key(), 404, "")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn reverse_after_points_were_spent_is_refused() {
        let (ledger, _) = ledger();
        let ctx = OpContext::new();
        ledger.accrue(&ctx, key(), 5, &score(100)).unwrap();
        ledger.debit(&ctx, key(), 80).unwrap();
        let err = ledger.reverse_transaction(&ctx, key(), 5, "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientResource);
        assert_eq!(ledger.balance_of(key()).unwrap(), 20);
    }

    #[test]
    fn redemption_debit_and_restore() {
        let (ledger, _) = ledger();
        let ctx = OpContext::new();
        ledger.credit(&ctx, key(), 500).unwrap();
        ledger.debit_for_redemption(&ctx, key(), 500, 1).unwrap();
        assert_eq!(ledger.balance_of(key()).unwrap(), 0);

        let restore = ledger
            .restore_redemption(&ctx, key(), 500, 1, "denied")
            .unwrap();
        assert_eq!(restore.amount, 500);
        assert_eq!(restore.redemption_ref, Some(1));
        assert_eq!(ledger.balance_of(key()).unwrap(), 500);

        // A second restore for the same redemption is refused.
        assert!(matches!(
            ledger.restore_redemption(&ctx, key(), 500, 1, "twice"),
            Err(LedgerError::AlreadyRecorded { .. })
        ));
    }

    #[test]
    fn expire_carries_the_job_id() {
        let (ledger, _) = ledger();
        let ctx = OpContext::new();
        ledger.credit(&ctx, key(), 30).unwrap();
        let m = ledger.expire(&ctx, key(), 30, "expiry-2026-03").unwrap();
        assert_eq!(m.job_id.as_deref(), Some("expiry-2026-03"));
        assert_eq!(m.amount, -30);
    }

    #[test]
    fn events_follow_commits() {
        let outbox: Arc<Outbox<LedgerEvent>> = Arc::new(Outbox::new());
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = Ledger::new(store).with_events(outbox.clone());
        let ctx = OpContext::new();

        ledger.credit(&ctx, key(), 10).unwrap();
        ledger.debit_for_redemption(&ctx, key(), 10, 3).unwrap();
        assert!(ledger.debit(&ctx, key(), 1).is_err());

        let events = outbox.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, ctx.correlation_id);
        assert!(matches!(events[0].event, LedgerEvent::AccrualCompleted { .. }));
    }

    #[test]
    fn accrued_in_month_counts_only_that_month() {
        let (ledger, _) = ledger();
        let feb = Utc.with_ymd_and_hms(2026, 2, 27, 10, 0, 0).unwrap();
        let mar = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();

        ledger.credit(&OpContext::at(feb), key(), 100).unwrap();
        ledger.credit(&OpContext::at(mar), key(), 40).unwrap();
        ledger.credit(&OpContext::at(mar), key(), 2).unwrap();
        ledger.debit(&OpContext::at(mar), key(), 10).unwrap();

        assert_eq!(ledger.accrued_in_month(key(), mar).unwrap(), 42);
        assert_eq!(ledger.accrued_in_month(key(), feb).unwrap(), 100);
    }

    #[test]
    fn reconcile_reports_only_the_corrupted_key() {
        let (ledger, store) = ledger();
        let ctx = OpContext::new();
        let other = BalanceKey::new(2, 2);
        ledger.credit(&ctx, key(), 100).unwrap();
        ledger.credit(&ctx, other, 10).unwrap();
        assert!(ledger.reconcile().unwrap().is_consistent());

        store.overwrite_balance(other, 999);
        let report = ledger.reconcile().unwrap();
        assert_eq!(report.keys_checked, 2);
        assert_eq!(report.inconsistent_keys(), BTreeSet::from([other]));
        assert_eq!(report.discrepancies[0].drift(), 989);

        // Diagnostic only: the bad row is still there.
        assert_eq!(ledger.balance_of(other).unwrap(), 999);
    }

    #[test]
    fn reconcile_flags_rows_without_movements() {
        let (ledger, store) = ledger();
        store.overwrite_balance(key(), 5);
        let report = ledger.reconcile().unwrap();
        assert_eq!(
            report.discrepancies,
            vec![Discrepancy {
                key: key(),
                stored: 5,
                ledger_sum: 0
            }]
        );
    }
}
