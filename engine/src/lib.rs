// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Loyalty Engine: Points Ledger & Rule Resolution
//!
//! The core of the card loyalty program: every point a cardholder earns,
//! spends, loses to expiry or gets back on a reversal passes through this
//! crate. Anything that touches a point balance lives here; HTTP shaping,
//! notification delivery and message transport live elsewhere.
//!
//! ## Architecture
//!
//! - **ledger**: Append-only movement log, materialized balances, the
//!   credit/debit primitives, reconciliation and statements.
//! - **rules**: Conversion rule and campaign bonus resolvers plus the
//!   points calculator.
//! - **scoring**: Glues the resolvers and the calculator into a single
//!   "how many points does this purchase earn" call.
//! - **storage**: The atomic conditional update capability the ledger
//!   depends on, with in-memory and sled backends.
//! - **events**: Outbound domain facts for an external publisher.
//! - **config**: Policy constants.
//!
//! ## Ground Rules
//!
//! 1. `balance.total == Σ movement.amount` for every (user, card) key.
//! 2. No debit is ever applied that would take a balance below zero.
//! 3. Movements are never mutated or deleted. Corrections are new movements.
//! 4. Business refusals (not enough points, not enough stock, illegal
//!    transitions) are typed outcomes, never panics. See [`error::ErrorKind`].

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod ledger;
pub mod rules;
pub mod scoring;
pub mod storage;

pub use context::OpContext;
pub use error::{Classify, ErrorKind};
pub use ledger::{
    Balance, BalanceKey, Ledger, LedgerError, Movement, MovementKind, NewMovement,
    ReconcileReport,
};
pub use scoring::{ScoreOutcome, ScoringInput, TransactionScorer};
