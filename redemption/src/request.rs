//! # Redemption Request
//!
//! A cardholder's request to exchange points for a reward, and the state
//! machine it moves through:
//!
//! ```text
//!             approve              complete
//!   PENDING ──────────> APPROVED ──────────> COMPLETED
//!      │                   │
//!      ├── deny ───────────┼──────────────> DENIED
//!      └── cancel ─────────┴──────────────> CANCELLED
//! ```
//!
//! COMPLETED, DENIED and CANCELLED are terminal. Legal moves are listed in
//! [`TRANSITIONS`]; anything not in the table is refused.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use loyalty_engine::BalanceKey;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {action} a redemption that is {current}")]
    InvalidTransition {
        current: RedemptionStatus,
        action: RedemptionAction,
    },
}

// ---------------------------------------------------------------------------
// Status & Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionStatus {
    /// Points debited and stock reserved; waiting for review.
    Pending,
    Approved,
    Completed,
    Denied,
    Cancelled,
}

impl RedemptionStatus {
    pub const ALL: [RedemptionStatus; 5] = [
        RedemptionStatus::Pending,
        RedemptionStatus::Approved,
        RedemptionStatus::Completed,
        RedemptionStatus::Denied,
        RedemptionStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RedemptionStatus::Completed | RedemptionStatus::Denied | RedemptionStatus::Cancelled
        )
    }

    /// Stable one-byte tag for the status index.
    pub fn tag(&self) -> u8 {
        match self {
            RedemptionStatus::Pending => 1,
            RedemptionStatus::Approved => 2,
            RedemptionStatus::Completed => 3,
            RedemptionStatus::Denied => 4,
            RedemptionStatus::Cancelled => 5,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RedemptionStatus::Pending => "Awaiting approval",
            RedemptionStatus::Approved => "Approved",
            RedemptionStatus::Completed => "Completed",
            RedemptionStatus::Denied => "Denied",
            RedemptionStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedemptionStatus::Pending => write!(f, "PENDING"),
            RedemptionStatus::Approved => write!(f, "APPROVED"),
            RedemptionStatus::Completed => write!(f, "COMPLETED"),
            RedemptionStatus::Denied => write!(f, "DENIED"),
            RedemptionStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for RedemptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RedemptionStatus::ALL
            .into_iter()
            .find(|status| status.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown redemption status: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionAction {
    Approve,
    Complete,
    Deny,
    Cancel,
}

impl RedemptionAction {
    /// Whether taking this action gives the points and stock back.
    pub fn compensates(&self) -> bool {
        matches!(self, RedemptionAction::Deny | RedemptionAction::Cancel)
    }
}

impl fmt::Display for RedemptionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedemptionAction::Approve => write!(f, "approve"),
            RedemptionAction::Complete => write!(f, "complete"),
            RedemptionAction::Deny => write!(f, "deny"),
            RedemptionAction::Cancel => write!(f, "cancel"),
        }
    }
}

/// Every legal `(from, action, to)` move.
pub const TRANSITIONS: &[(RedemptionStatus, RedemptionAction, RedemptionStatus)] = &[
    (RedemptionStatus::Pending, RedemptionAction::Approve, RedemptionStatus::Approved),
    (RedemptionStatus::Approved, RedemptionAction::Complete, RedemptionStatus::Completed),
    (RedemptionStatus::Pending, RedemptionAction::Deny, RedemptionStatus::Denied),
    (RedemptionStatus::Approved, RedemptionAction::Deny, RedemptionStatus::Denied),
    (RedemptionStatus::Pending, RedemptionAction::Cancel, RedemptionStatus::Cancelled),
    (RedemptionStatus::Approved, RedemptionAction::Cancel, RedemptionStatus::Cancelled),
];

/// Looks the move up in [`TRANSITIONS`].
pub fn next_status(
    current: RedemptionStatus,
    action: RedemptionAction,
) -> Result<RedemptionStatus, TransitionError> {
    TRANSITIONS
        .iter()
        .find(|(from, act, _)| *from == current && *act == action)
        .map(|(_, _, to)| *to)
        .ok_or(TransitionError::InvalidTransition { current, action })
}

// ---------------------------------------------------------------------------
// RedemptionRequest
// ---------------------------------------------------------------------------

/// Optional fulfilment details recorded on completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fulfillment {
    pub tracking_code: Option<String>,
    /// Partner that processed the redemption.
    pub processor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    /// Surrogate id; also the link on the ledger movements.
    pub id: u64,
    /// Public reference handed to the cardholder and partners.
    pub reference: Uuid,
    pub key: BalanceKey,
    pub reward_id: u64,
    pub quantity: u64,
    /// Points debited for the whole quantity.
    pub points_spent: i64,
    pub status: RedemptionStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub denied_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub denial_reason: Option<String>,
    /// Reviewer's note on approval.
    pub note: Option<String>,
    pub tracking_code: Option<String>,
    pub processor: Option<String>,
}

impl RedemptionRequest {
    /// A new request in PENDING.
    pub fn new(
        id: u64,
        key: BalanceKey,
        reward_id: u64,
        quantity: u64,
        points_spent: i64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            reference: Uuid::new_v4(),
            key,
            reward_id,
            quantity,
            points_spent,
            status: RedemptionStatus::Pending,
            created_at: at,
            approved_at: None,
            completed_at: None,
            denied_at: None,
            cancelled_at: None,
            denial_reason: None,
            note: None,
            tracking_code: None,
            processor: None,
        }
    }

    /// The request after `action`, stamped at `at`. `self` is unchanged.
    pub fn apply(&self, action: RedemptionAction, at: DateTime<Utc>) -> Result<Self, TransitionError> {
        let status = next_status(self.status, action)?;
        let mut next = self.clone();
        next.status = status;
        match status {
            RedemptionStatus::Approved => next.approved_at = Some(at),
            RedemptionStatus::Completed => next.completed_at = Some(at),
            RedemptionStatus::Denied => next.denied_at = Some(at),
            RedemptionStatus::Cancelled => next.cancelled_at = Some(at),
            RedemptionStatus::Pending => {}
        }
        Ok(next)
    }

    pub fn can(&self, action: RedemptionAction) -> bool {
        next_status(self.status, action).is_ok()
    }

    pub fn is_final(&self) -> bool {
        self.status.is_terminal()
    }

    /// When the request reached a terminal state, if it has.
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or(self.denied_at).or(self.cancelled_at)
    }

    /// Time from creation until close, or until `now` while still open.
    pub fn processing_time(&self, now: DateTime<Utc>) -> Duration {
        self.closed_at().unwrap_or(now) - self.created_at
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RedemptionRequest {
        RedemptionRequest::new(1, BalanceKey::new(1, 1), 7, 1, 500, Utc::now())
    }

    #[test]
    fn happy_path() {
        let at = Utc::now();
        let approved = request().apply(RedemptionAction::Approve, at).unwrap();
        assert_eq!(approved.status, RedemptionStatus::Approved);
        assert_eq!(approved.approved_at, Some(at));

        let completed = approved.apply(RedemptionAction::Complete, at).unwrap();
        assert_eq!(completed.status, RedemptionStatus::Completed);
        assert!(completed.is_final());
        assert_eq!(completed.closed_at(), Some(at));
    }

    #[test]
    fn completing_a_pending_request_is_refused() {
        let pending = request();
        assert_eq!(
            pending.apply(RedemptionAction::Complete, Utc::now()),
            Err(TransitionError::InvalidTransition {
                current: RedemptionStatus::Pending,
                action: RedemptionAction::Complete,
            })
        );
        assert_eq!(pending.status, RedemptionStatus::Pending);
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let at = Utc::now();
        let denied = request().apply(RedemptionAction::Deny, at).unwrap();
        let cancelled = request().apply(RedemptionAction::Cancel, at).unwrap();
        let completed = request()
            .apply(RedemptionAction::Approve, at)
            .and_then(|r| r.apply(RedemptionAction::Complete, at))
            .unwrap();
        for r in [denied, cancelled, completed] {
            for action in [
                RedemptionAction::Approve,
                RedemptionAction::Complete,
                RedemptionAction::Deny,
                RedemptionAction::Cancel,
            ] {
                assert!(!r.can(action), "{} must not {}", r.status, action);
            }
        }
    }

    #[test]
    fn deny_and_cancel_from_both_open_states() {
        let at = Utc::now();
        for action in [RedemptionAction::Deny, RedemptionAction::Cancel] {
            assert!(request().can(action));
            let approved = request().apply(RedemptionAction::Approve, at).unwrap();
            assert!(approved.can(action));
            assert!(action.compensates());
        }
        assert!(!RedemptionAction::Approve.compensates());
    }

    #[test]
    fn transition_table_has_no_exits_from_terminal_states() {
        assert!(TRANSITIONS.iter().all(|(from, _, _)| !from.is_terminal()));
        assert!(TRANSITIONS.iter().all(|(_, _, to)| *to != RedemptionStatus::Pending));
    }

    #[test]
    fn status_parses_and_serializes_upper_case() {
        assert_eq!("approved".parse::<RedemptionStatus>().unwrap(), RedemptionStatus::Approved);
        assert!("shipped".parse::<RedemptionStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&RedemptionStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
    }

    #[test]
    fn processing_time_stops_at_close() {
        let created = Utc::now() - Duration::hours(5);
        let mut r = RedemptionRequest::new(1, BalanceKey::new(1, 1), 7, 1, 500, created);
        let closed = created + Duration::hours(2);
        r = r.apply(RedemptionAction::Cancel, closed).unwrap();
        assert_eq!(r.processing_time(Utc::now()), Duration::hours(2));
    }
}
