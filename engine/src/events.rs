//! # Domain Events
//!
//! Outbound facts for an external publication collaborator. The engine does
//! not own a transport: it hands [`Envelope`]s to an [`EventSink`] and moves
//! on. Whatever sits behind the sink (a broker producer, an outbox table, a
//! log line) is somebody else's problem.
//!
//! Publishing happens after the state change is committed. A sink must not
//! fail the operation, so `publish` has no error channel.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::OpContext;
use crate::ledger::{Movement, MovementKind};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// An event plus the correlation id of the operation that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<E> {
    pub correlation_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event: E,
}

impl<E> Envelope<E> {
    pub fn new(ctx: &OpContext, event: E) -> Self {
        Self {
            correlation_id: ctx.correlation_id,
            occurred_at: ctx.at,
            event,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger Events
// ---------------------------------------------------------------------------

/// Facts emitted by the ledger. Each carries the full movement snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    AccrualCompleted { movement: Movement },
    AdjustmentCompleted { movement: Movement },
    ReversalCompleted { movement: Movement },
}

impl LedgerEvent {
    /// The event announcing `movement`, if its kind is one we announce.
    /// Redemption debits are announced by the redemption workflow and
    /// expirations are not announced at all.
    pub fn for_movement(movement: &Movement) -> Option<Self> {
        let movement = movement.clone();
        match movement.kind {
            MovementKind::Accrual => Some(LedgerEvent::AccrualCompleted { movement }),
            MovementKind::Adjustment => Some(LedgerEvent::AdjustmentCompleted { movement }),
            MovementKind::Reversal => Some(LedgerEvent::ReversalCompleted { movement }),
            MovementKind::Redemption | MovementKind::Expiration => None,
        }
    }

    pub fn movement(&self) -> &Movement {
        match self {
            LedgerEvent::AccrualCompleted { movement }
            | LedgerEvent::AdjustmentCompleted { movement }
            | LedgerEvent::ReversalCompleted { movement } => movement,
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receives events once the producing operation has committed.
pub trait EventSink<E>: Send + Sync {
    fn publish(&self, envelope: Envelope<E>);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl<E> EventSink<E> for NullSink {
    fn publish(&self, _envelope: Envelope<E>) {}
}

/// Logs each event as a JSON line through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl<E: Serialize> EventSink<E> for TracingSink {
    fn publish(&self, envelope: Envelope<E>) {
        match serde_json::to_string(&envelope) {
            Ok(json) => tracing::info!(
                target: "loyalty::events",
                correlation_id = %envelope.correlation_id,
                "{json}"
            ),
            Err(e) => tracing::warn!(
                target: "loyalty::events",
                correlation_id = %envelope.correlation_id,
                "failed to encode event: {e}"
            ),
        }
    }
}

/// Buffers events in memory until drained. Used as a transactional outbox
/// stand-in and in tests.
#[derive(Debug)]
pub struct Outbox<E> {
    entries: Mutex<Vec<Envelope<E>>>,
}

impl<E> Outbox<E> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Removes and returns every buffered event, oldest first.
    pub fn drain(&self) -> Vec<Envelope<E>> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<E> Default for Outbox<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send> EventSink<E> for Outbox<E> {
    fn publish(&self, envelope: Envelope<E>) {
        self.entries.lock().push(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BalanceKey, NewMovement};

    fn movement(kind: MovementKind, amount: i64) -> Movement {
        NewMovement::new(BalanceKey::new(1, 1), kind, amount).into_movement(7)
    }

    #[test]
    fn accruals_adjustments_and_reversals_are_announced() {
        assert!(matches!(
            LedgerEvent::for_movement(&movement(MovementKind::Accrual, 10)),
            Some(LedgerEvent::AccrualCompleted { .. })
        ));
        assert!(matches!(
            LedgerEvent::for_movement(&movement(MovementKind::Adjustment, -3)),
            Some(LedgerEvent::AdjustmentCompleted { .. })
        ));
        let reversal = NewMovement::new(BalanceKey::new(1, 1), MovementKind::Reversal, -10)
            .transaction(99)
            .into_movement(8);
        let event = LedgerEvent::for_movement(&reversal).expect("announced");
        assert_eq!(event.movement().id, 8);
    }

    #[test]
    fn redemptions_and_expirations_are_silent() {
        assert!(LedgerEvent::for_movement(&movement(MovementKind::Redemption, -5)).is_none());
        assert!(LedgerEvent::for_movement(&movement(MovementKind::Expiration, -5)).is_none());
    }

    #[test]
    fn outbox_buffers_until_drained() {
        let outbox = Outbox::new();
        let ctx = OpContext::new();
        outbox.publish(Envelope::new(&ctx, "first"));
        outbox.publish(Envelope::new(&ctx, "second"));
        assert_eq!(outbox.len(), 2);

        let drained = outbox.drain();
        assert_eq!(drained[0].event, "first");
        assert_eq!(drained[1].correlation_id, ctx.correlation_id);
        assert!(outbox.is_empty());
    }

    #[test]
    fn envelope_serializes_with_tagged_event() {
        let ctx = OpContext::new();
        let env = Envelope::new(
            &ctx,
            LedgerEvent::for_movement(&movement(MovementKind::Accrual, 10)).unwrap(),
        );
        let json = serde_json::to_value(&env).expect("serialize");
        assert_eq!(json["event"]["type"], "accrual_completed");
        assert_eq!(json["event"]["movement"]["kind"], "ACCRUAL");
    }
}
