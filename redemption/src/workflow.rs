//! # Redemption Workflow
//!
//! Orchestrates the two scarce resources a redemption consumes, reward
//! stock and points, which live in different rows and cannot share one
//! storage transaction. Each step is an atomic conditional update on its
//! own, and a later failure undoes the earlier steps explicitly:
//!
//! ```text
//! request:  reserve stock ──> debit points ──> store PENDING ──> publish
//!               │ fail            │ fail            │ fail
//!               └─ refuse         └─ release stock  └─ restore points + release stock
//!
//! deny/cancel:  CAS status ──> release stock ──> REVERSAL credit
//! ```
//!
//! The status compare-and-set happens before any compensation, so when two
//! callers race to close the same request only one of them gives the stock
//! and points back. The original REDEMPTION movement is never touched; the
//! refund is a separate REVERSAL linked to the same redemption id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use loyalty_engine::events::{Envelope, EventSink, NullSink};
use loyalty_engine::storage::StoreError;
use loyalty_engine::{BalanceKey, Classify, ErrorKind, Ledger, LedgerError, OpContext};

use crate::request::{
    Fulfillment, RedemptionAction, RedemptionRequest, RedemptionStatus, TransitionError,
};
use crate::reward::{CatalogError, Reward, RewardCatalog};
use crate::store::{RedemptionStore, SwapOutcome};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RedemptionError {
    #[error("redemption {0} not found")]
    NotFound(u64),

    #[error("reward {0} has expired")]
    RewardExpired(u64),

    #[error("cost of {quantity} x reward {reward_id} overflows")]
    CostOverflow { reward_id: u64, quantity: u64 },

    #[error("a reason is required to deny a redemption")]
    MissingReason,

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("redemption store: {0}")]
    Store(#[from] StoreError),

    /// A rollback or refund step failed after the request changed state.
    /// Needs an operator.
    #[error("compensation failed for redemption {id}: {reason}")]
    CompensationFailed { id: u64, reason: String },
}

impl Classify for RedemptionError {
    fn kind(&self) -> ErrorKind {
        match self {
            RedemptionError::NotFound(_) => ErrorKind::NotFound,
            RedemptionError::RewardExpired(_)
            | RedemptionError::CostOverflow { .. }
            | RedemptionError::MissingReason => ErrorKind::Validation,
            RedemptionError::Transition(_) => ErrorKind::StateConflict,
            RedemptionError::Catalog(e) => e.kind(),
            RedemptionError::Ledger(e) => e.kind(),
            RedemptionError::Store(e) => e.kind(),
            RedemptionError::CompensationFailed { .. } => ErrorKind::System,
        }
    }
}

pub type RedemptionResult<T> = Result<T, RedemptionError>;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Facts emitted by the workflow, each with the full request snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RedemptionEvent {
    Requested { request: RedemptionRequest },
    Completed { request: RedemptionRequest },
}

impl RedemptionEvent {
    pub fn request(&self) -> &RedemptionRequest {
        match self {
            RedemptionEvent::Requested { request } | RedemptionEvent::Completed { request } => request,
        }
    }
}

// ---------------------------------------------------------------------------
// RedemptionMachine
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RedemptionMachine {
    ledger: Ledger,
    catalog: Arc<dyn RewardCatalog>,
    store: Arc<dyn RedemptionStore>,
    events: Arc<dyn EventSink<RedemptionEvent>>,
}

impl RedemptionMachine {
    pub fn new(ledger: Ledger, catalog: Arc<dyn RewardCatalog>, store: Arc<dyn RedemptionStore>) -> Self {
        Self {
            ledger,
            catalog,
            store,
            events: Arc::new(NullSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink<RedemptionEvent>>) -> Self {
        self.events = events;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn catalog(&self) -> &dyn RewardCatalog {
        self.catalog.as_ref()
    }

    // -- Request ------------------------------------------------------------

    /// Reserves `quantity` units of the reward, debits their cost and
    /// records a PENDING request. Any refusal leaves stock and balance as
    /// they were.
    pub fn request(
        &self,
        ctx: &OpContext,
        key: BalanceKey,
        reward_id: u64,
        quantity: u64,
    ) -> RedemptionResult<RedemptionRequest> {
        if quantity == 0 {
            return Err(CatalogError::ZeroQuantity.into());
        }
        let reward = self.requestable(ctx, reward_id)?;
        let points = reward.cost_for(quantity).ok_or(RedemptionError::CostOverflow {
            reward_id,
            quantity,
        })?;

        self.catalog.reserve(reward_id, quantity)?;

        let id = match self.store.next_id() {
            Ok(id) => id,
            Err(e) => return Err(self.release_after(reward_id, quantity, None, e.into())),
        };

        if let Err(e) = self.ledger.debit_for_redemption(ctx, key, points, id) {
            return Err(self.release_after(reward_id, quantity, Some(id), e.into()));
        }

        let request = RedemptionRequest::new(id, key, reward_id, quantity, points, ctx.at);
        if let Err(e) = self.store.insert(&request) {
            let cause = RedemptionError::from(e);
            debug!(redemption_id = id, %cause, "rolling back unrecorded redemption");
            return Err(match self.compensate(ctx, &request, "redemption could not be recorded") {
                Ok(()) => cause,
                Err(failed) => failed,
            });
        }

        info!(
            redemption_id = id,
            user = key.user_id,
            card = key.card_id,
            reward = reward_id,
            quantity,
            points,
            correlation_id = %ctx.correlation_id,
            "redemption requested"
        );
        self.publish(ctx, RedemptionEvent::Requested {
            request: request.clone(),
        });
        Ok(request)
    }

    fn requestable(&self, ctx: &OpContext, reward_id: u64) -> RedemptionResult<Reward> {
        let reward = self.catalog.get(reward_id)?;
        if !reward.active {
            return Err(CatalogError::Inactive(reward_id).into());
        }
        if reward.is_expired(ctx.at) {
            return Err(RedemptionError::RewardExpired(reward_id));
        }
        Ok(reward)
    }

    /// Puts reserved stock back after a later step failed. Returns the
    /// original cause unless the release itself fails.
    fn release_after(
        &self,
        reward_id: u64,
        quantity: u64,
        redemption_id: Option<u64>,
        cause: RedemptionError,
    ) -> RedemptionError {
        debug!(reward = reward_id, quantity, %cause, "rolling back stock reservation");
        match self.catalog.release(reward_id, quantity) {
            Ok(_) => cause,
            Err(e) => {
                error!(reward = reward_id, quantity, error = %e, "stock rollback failed");
                RedemptionError::CompensationFailed {
                    id: redemption_id.unwrap_or_default(),
                    reason: format!("{cause}; stock rollback: {e}"),
                }
            }
        }
    }

    // -- Transitions --------------------------------------------------------

    pub fn approve(&self, ctx: &OpContext, id: u64, note: Option<&str>) -> RedemptionResult<RedemptionRequest> {
        let note = note.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
        let approved = self.transition(ctx, id, RedemptionAction::Approve, |r| r.note = note.clone())?;
        info!(redemption_id = id, correlation_id = %ctx.correlation_id, "redemption approved");
        Ok(approved)
    }

    pub fn complete(&self, ctx: &OpContext, id: u64) -> RedemptionResult<RedemptionRequest> {
        self.complete_with(ctx, id, Fulfillment::default())
    }

    /// Completes an approved request, recording how it was fulfilled.
    pub fn complete_with(
        &self,
        ctx: &OpContext,
        id: u64,
        fulfillment: Fulfillment,
    ) -> RedemptionResult<RedemptionRequest> {
        let completed = self.transition(ctx, id, RedemptionAction::Complete, |r| {
            r.tracking_code = fulfillment.tracking_code.clone();
            r.processor = fulfillment.processor.clone();
        })?;
        info!(redemption_id = id, correlation_id = %ctx.correlation_id, "redemption completed");
        self.publish(ctx, RedemptionEvent::Completed {
            request: completed.clone(),
        });
        Ok(completed)
    }

    /// Denies an open request and gives the stock and points back.
    pub fn deny(&self, ctx: &OpContext, id: u64, reason: &str) -> RedemptionResult<RedemptionRequest> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(RedemptionError::MissingReason);
        }
        let denied = self.transition(ctx, id, RedemptionAction::Deny, |r| {
            r.denial_reason = Some(reason.to_string());
        })?;
        info!(redemption_id = id, reason, correlation_id = %ctx.correlation_id, "redemption denied");
        Ok(denied)
    }

    /// Cancels an open request and gives the stock and points back.
    pub fn cancel(&self, ctx: &OpContext, id: u64) -> RedemptionResult<RedemptionRequest> {
        let cancelled = self.transition(ctx, id, RedemptionAction::Cancel, |_| {})?;
        info!(redemption_id = id, correlation_id = %ctx.correlation_id, "redemption cancelled");
        Ok(cancelled)
    }

    /// Moves the request with a status compare-and-set. A lost race is
    /// retried against the fresh status; statuses only move forward, so
    /// this settles after at most two rounds. Only the winner of the swap
    /// runs compensation for actions that give resources back.
    fn transition(
        &self,
        ctx: &OpContext,
        id: u64,
        action: RedemptionAction,
        edit: impl Fn(&mut RedemptionRequest),
    ) -> RedemptionResult<RedemptionRequest> {
        loop {
            let current = self.get(id)?;
            let mut next = current.apply(action, ctx.at)?;
            edit(&mut next);
            match self.store.swap(current.status, &next)? {
                SwapOutcome::Applied => {
                    if action.compensates() {
                        self.compensate(ctx, &next, &refund_note(&next))?;
                    }
                    return Ok(next);
                }
                SwapOutcome::Conflict { current: moved } => {
                    debug!(redemption_id = id, %action, from = %current.status, to = %moved, "lost status race");
                }
            }
        }
    }

    /// Releases stock and credits the points back. A refund that already
    /// exists is left alone.
    fn compensate(&self, ctx: &OpContext, request: &RedemptionRequest, note: &str) -> RedemptionResult<()> {
        let mut failures = Vec::new();
        if let Err(e) = self.catalog.release(request.reward_id, request.quantity) {
            error!(redemption_id = request.id, reward = request.reward_id, error = %e, "stock release failed");
            failures.push(format!("stock: {e}"));
        }
        if let Err(e) = self.refund(ctx, request, note) {
            failures.push(e.to_string());
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RedemptionError::CompensationFailed {
                id: request.id,
                reason: failures.join("; "),
            })
        }
    }

    fn refund(&self, ctx: &OpContext, request: &RedemptionRequest, note: &str) -> RedemptionResult<()> {
        match self
            .ledger
            .restore_redemption(ctx, request.key, request.points_spent, request.id, note)
        {
            Ok(_) | Err(LedgerError::AlreadyRecorded { .. }) => Ok(()),
            Err(e) => {
                error!(
                    redemption_id = request.id,
                    user = request.key.user_id,
                    card = request.key.card_id,
                    points = request.points_spent,
                    error = %e,
                    "points refund failed"
                );
                Err(RedemptionError::CompensationFailed {
                    id: request.id,
                    reason: format!("points: {e}"),
                })
            }
        }
    }

    fn publish(&self, ctx: &OpContext, event: RedemptionEvent) {
        self.events.publish(Envelope::new(ctx, event));
    }

    // -- Reads --------------------------------------------------------------

    pub fn get(&self, id: u64) -> RedemptionResult<RedemptionRequest> {
        self.store.get(id)?.ok_or(RedemptionError::NotFound(id))
    }

    pub fn list_by_status(&self, status: RedemptionStatus) -> RedemptionResult<Vec<RedemptionRequest>> {
        Ok(self.store.list_by_status(status)?)
    }

    pub fn list_by_user(&self, user_id: u64) -> RedemptionResult<Vec<RedemptionRequest>> {
        Ok(self.store.list_by_user(user_id)?)
    }
}

fn refund_note(request: &RedemptionRequest) -> String {
    match &request.denial_reason {
        Some(reason) => format!("redemption {} denied: {reason}", request.id),
        None => format!("redemption {} {}", request.id, request.status.to_string().to_lowercase()),
    }
}

impl std::fmt::Debug for RedemptionMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedemptionMachine")
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loyalty_engine::events::Outbox;
    use loyalty_engine::storage::MemoryLedgerStore;
    use loyalty_engine::MovementKind;

    use crate::reward::{MemoryRewardCatalog, RewardKind};
    use crate::store::MemoryRedemptionStore;

    const KEY: BalanceKey = BalanceKey {
        user_id: 1,
        card_id: 1,
    };

    struct Fixture {
        machine: RedemptionMachine,
        outbox: Arc<Outbox<RedemptionEvent>>,
    }

    fn fixture(balance: i64, stock: u64) -> Fixture {
        let ledger = Ledger::new(Arc::new(MemoryLedgerStore::new()));
        if balance > 0 {
            ledger.credit(&OpContext::new(), KEY, balance).unwrap();
        }
        let catalog = Arc::new(MemoryRewardCatalog::new());
        catalog
            .insert(Reward::new(7, RewardKind::DigitalProduct, "Gift card", 500, stock))
            .unwrap();
        let outbox = Arc::new(Outbox::new());
        let machine = RedemptionMachine::new(ledger, catalog, MemoryRedemptionStore::shared())
            .with_events(outbox.clone());
        Fixture { machine, outbox }
    }

    #[test]
    fn request_publishes_and_debits() {
        let f = fixture(1_000, 3);
        let ctx = OpContext::new();
        let request = f.machine.request(&ctx, KEY, 7, 2).unwrap();
        assert_eq!(request.points_spent, 1_000);
        assert_eq!(f.machine.ledger().balance_of(KEY).unwrap(), 0);

        let events = f.outbox.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, ctx.correlation_id);
        assert_eq!(events[0].event.request().id, request.id);
    }

    #[test]
    fn zero_quantity_is_a_validation_error() {
        let f = fixture(1_000, 3);
        let err = f.machine.request(&OpContext::new(), KEY, 7, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn inactive_and_expired_rewards_are_refused() {
        let f = fixture(1_000, 3);
        f.machine.catalog().set_active(7, false).unwrap();
        let err = f.machine.request(&OpContext::new(), KEY, 7, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        f.machine.catalog().set_active(7, true).unwrap();
        let past = chrono::Utc::now() - chrono::Duration::days(1);
        f.machine
            .catalog()
            .update(7, &|r| Ok(Reward { expires_at: Some(past), ..r.clone() }))
            .unwrap();
        let err = f.machine.request(&OpContext::new(), KEY, 7, 1).unwrap_err();
        assert!(matches!(err, RedemptionError::RewardExpired(7)));
        assert_eq!(f.machine.catalog().get(7).unwrap().stock, 3);
    }

    #[test]
    fn short_balance_rolls_back_the_reservation() {
        let f = fixture(100, 3);
        let err = f.machine.request(&OpContext::new(), KEY, 7, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientResource);
        assert_eq!(f.machine.catalog().get(7).unwrap().stock, 3);
        assert_eq!(f.machine.ledger().balance_of(KEY).unwrap(), 100);
        assert!(f.outbox.is_empty());
    }

    #[test]
    fn deny_requires_a_reason() {
        let f = fixture(500, 3);
        let request = f.machine.request(&OpContext::new(), KEY, 7, 1).unwrap();
        let err = f.machine.deny(&OpContext::new(), request.id, "   ").unwrap_err();
        assert!(matches!(err, RedemptionError::MissingReason));
        assert_eq!(f.machine.get(request.id).unwrap().status, RedemptionStatus::Pending);
    }

    #[test]
    fn deny_refunds_through_a_reversal() {
        let f = fixture(500, 3);
        let request = f.machine.request(&OpContext::new(), KEY, 7, 1).unwrap();
        let denied = f.machine.deny(&OpContext::new(), request.id, "fraud check").unwrap();
        assert_eq!(denied.denial_reason.as_deref(), Some("fraud check"));
        assert_eq!(f.machine.ledger().balance_of(KEY).unwrap(), 500);

        let movements = f.machine.ledger().movements(KEY).unwrap();
        let refund = movements.last().unwrap();
        assert_eq!(refund.kind, MovementKind::Reversal);
        assert_eq!(refund.amount, 500);
        assert_eq!(refund.redemption_ref, Some(request.id));
    }

    #[test]
    fn approve_records_the_note_and_complete_the_fulfilment() {
        let f = fixture(500, 3);
        let request = f.machine.request(&OpContext::new(), KEY, 7, 1).unwrap();
        let approved = f
            .machine
            .approve(&OpContext::new(), request.id, Some(" looks fine "))
            .unwrap();
        assert_eq!(approved.note.as_deref(), Some("looks fine"));

        let done = f
            .machine
            .complete_with(
                &OpContext::new(),
                request.id,
                Fulfillment {
                    tracking_code: Some("BR123".into()),
                    processor: Some("acme".into()),
                },
            )
            .unwrap();
        assert_eq!(done.status, RedemptionStatus::Completed);
        assert_eq!(done.tracking_code.as_deref(), Some("BR123"));
        assert_eq!(done.note.as_deref(), Some("looks fine"));

        let kinds: Vec<_> = f.outbox.drain().into_iter().map(|e| e.event).collect();
        assert!(matches!(kinds.as_slice(), [
            RedemptionEvent::Requested { .. },
            RedemptionEvent::Completed { .. }
        ]));
    }

    #[test]
    fn refund_notes_name_the_closing_action() {
        let f = fixture(1_000, 3);
        let denied = f.machine.request(&OpContext::new(), KEY, 7, 1).unwrap();
        let cancelled = f.machine.request(&OpContext::new(), KEY, 7, 1).unwrap();
        f.machine.deny(&OpContext::new(), denied.id, "stolen card").unwrap();
        f.machine.cancel(&OpContext::new(), cancelled.id).unwrap();

        let notes: Vec<String> = f
            .machine
            .ledger()
            .movements(KEY)
            .unwrap()
            .into_iter()
            .filter(|m| m.kind == MovementKind::Reversal)
            .map(|m| m.note)
            .collect();
        assert_eq!(
            notes,
            vec![
                format!("redemption {} denied: stolen card", denied.id),
                format!("redemption {} cancelled", cancelled.id),
            ]
        );
    }

    #[test]
    fn approve_and_complete_give_nothing_back() {
        let f = fixture(500, 3);
        let request = f.machine.request(&OpContext::new(), KEY, 7, 1).unwrap();
        f.machine.approve(&OpContext::new(), request.id, None).unwrap();
        f.machine.complete(&OpContext::new(), request.id).unwrap();
        assert_eq!(f.machine.ledger().balance_of(KEY).unwrap(), 0);
        assert_eq!(f.machine.catalog().get(7).unwrap().stock, 2);
    }

    #[test]
    fn unknown_redemption_is_not_found() {
        let f = fixture(500, 3);
        let err = f.machine.approve(&OpContext::new(), 404, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
