//! # Ledger & Balance Engine
//!
//! ## Architecture
//!
//! ```text
//! movement.rs  - Movement, NewMovement, MovementKind, sign convention
//! balance.rs   - BalanceKey, Balance, expiring buckets, tiers
//! engine.rs    - Ledger: append, credit/debit primitives, reconcile
//! statement.rs - Filtered, paginated statements with running balances
//! ```
//!
//! Writes flow `Ledger → LedgerStore::commit`; the store owns atomicity,
//! the ledger owns the contract (sign checks, links, events).

pub mod balance;
pub mod engine;
pub mod movement;
pub mod statement;

pub use balance::{Balance, BalanceKey, BalanceTier, ExpiringPoints};
pub use engine::{AccrualOutcome, Discrepancy, Ledger, LedgerError, ReconcileReport};
pub use movement::{Direction, Movement, MovementError, MovementKind, NewMovement};
pub use statement::{Statement, StatementLine, StatementQuery};
