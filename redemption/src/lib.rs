//! # Loyalty Redemptions
//!
//! Exchanging points for rewards. Builds on the ledger in
//! `loyalty-engine`:
//!
//! - **Reward catalog**: redeemable items with stock that is only ever
//!   changed through atomic conditional updates.
//! - **Redemption requests**: a closed status enum whose legal moves are
//!   listed in one transition table.
//! - **Redemption store**: request persistence with a status
//!   compare-and-set and status/user indexes.
//! - **Workflow**: reserves stock, debits points, and compensates with a
//!   stock release plus a REVERSAL credit when a request is denied,
//!   cancelled, or fails half-way.
//!
//! ## Design Principles
//!
//! 1. Stock and balance never go below zero. Both are guarded by the row
//!    update itself, not by a check made earlier.
//! 2. State transitions are explicit: enum variants and a table, not
//!    boolean flags.
//! 3. Ledger history is append-only. Refunds are new movements.
//! 4. Every public type is serializable (serde) for events and storage.

pub mod request;
pub mod reward;
pub mod store;
pub mod workflow;

pub use request::{
    next_status, Fulfillment, RedemptionAction, RedemptionRequest, RedemptionStatus, TransitionError,
    TRANSITIONS,
};
pub use reward::{
    CatalogError, MemoryRewardCatalog, Reward, RewardCatalog, RewardKind, SledRewardCatalog, StockLevel,
};
pub use store::{MemoryRedemptionStore, RedemptionStore, SledRedemptionStore, SwapOutcome};
pub use workflow::{RedemptionError, RedemptionEvent, RedemptionMachine, RedemptionResult};
