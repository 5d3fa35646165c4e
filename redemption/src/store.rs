//! # Redemption Store
//!
//! Persistence for [`RedemptionRequest`]s. State changes go through
//! [`RedemptionStore::swap`], a compare-and-set on the status: the write
//! lands only if the stored status is still the one the caller read. Two
//! reviewers racing to deny and cancel the same request therefore cannot
//! both win, and only the winner runs compensation.
//!
//! ## Sled layout
//!
//! | Tree                | Key                     | Value            |
//! |---------------------|-------------------------|------------------|
//! | `redemptions`       | id (8B BE)              | bincode request  |
//! | `redemption_status` | status tag (1B) ‖ id    | empty            |
//! | `redemption_user`   | user id (8B BE) ‖ id    | empty            |

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sled::transaction::{abort, ConflictableTransactionError};
use sled::{Transactional, Tree};

use loyalty_engine::ledger::MovementKind;
use loyalty_engine::storage::db::{decode, encode, settle};
use loyalty_engine::storage::{Link, LoyaltyDb, StoreError, StoreResult};

use crate::request::{RedemptionRequest, RedemptionStatus};

/// Result of a conditional status write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Applied,
    /// Somebody moved the request first; nothing was written.
    Conflict { current: RedemptionStatus },
}

pub trait RedemptionStore: Send + Sync {
    /// Allocates the id for the next request.
    fn next_id(&self) -> StoreResult<u64>;

    /// Stores a new request. Refused if the id is taken.
    fn insert(&self, request: &RedemptionRequest) -> StoreResult<()>;

    fn get(&self, id: u64) -> StoreResult<Option<RedemptionRequest>>;

    /// Replaces the stored request with `next` if its status is still
    /// `expected`.
    fn swap(&self, expected: RedemptionStatus, next: &RedemptionRequest) -> StoreResult<SwapOutcome>;

    /// Requests in `status`, oldest first.
    fn list_by_status(&self, status: RedemptionStatus) -> StoreResult<Vec<RedemptionRequest>>;

    /// Every request placed by `user_id`, oldest first.
    fn list_by_user(&self, user_id: u64) -> StoreResult<Vec<RedemptionRequest>>;
}

fn duplicate(id: u64) -> StoreError {
    StoreError::Duplicate {
        link: Link::Redemption(id),
        kind: MovementKind::Redemption,
    }
}

fn missing(id: u64) -> StoreError {
    StoreError::NotFound(format!("redemption {id}"))
}

// ---------------------------------------------------------------------------
// MemoryRedemptionStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryRedemptionStore {
    requests: DashMap<u64, RedemptionRequest>,
    last_id: AtomicU64,
}

impl MemoryRedemptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn RedemptionStore> {
        Arc::new(Self::new())
    }

    fn collect(&self, keep: impl Fn(&RedemptionRequest) -> bool) -> Vec<RedemptionRequest> {
        let mut out: Vec<RedemptionRequest> = self
            .requests
            .iter()
            .filter(|row| keep(row.value()))
            .map(|row| row.value().clone())
            .collect();
        out.sort_by_key(|r| r.id);
        out
    }
}

impl RedemptionStore for MemoryRedemptionStore {
    fn next_id(&self) -> StoreResult<u64> {
        Ok(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn insert(&self, request: &RedemptionRequest) -> StoreResult<()> {
        match self.requests.entry(request.id) {
            Entry::Occupied(_) => Err(duplicate(request.id)),
            Entry::Vacant(slot) => {
                slot.insert(request.clone());
                Ok(())
            }
        }
    }

    fn get(&self, id: u64) -> StoreResult<Option<RedemptionRequest>> {
        Ok(self.requests.get(&id).map(|row| row.value().clone()))
    }

    fn swap(&self, expected: RedemptionStatus, next: &RedemptionRequest) -> StoreResult<SwapOutcome> {
        let mut row = self.requests.get_mut(&next.id).ok_or_else(|| missing(next.id))?;
        if row.status != expected {
            return Ok(SwapOutcome::Conflict { current: row.status });
        }
        *row = next.clone();
        Ok(SwapOutcome::Applied)
    }

    fn list_by_status(&self, status: RedemptionStatus) -> StoreResult<Vec<RedemptionRequest>> {
        Ok(self.collect(|r| r.status == status))
    }

    fn list_by_user(&self, user_id: u64) -> StoreResult<Vec<RedemptionRequest>> {
        Ok(self.collect(|r| r.key.user_id == user_id))
    }
}

// ---------------------------------------------------------------------------
// SledRedemptionStore
// ---------------------------------------------------------------------------

fn status_key(status: RedemptionStatus, id: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = status.tag();
    key[1..].copy_from_slice(&id.to_be_bytes());
    key
}

fn user_key(user_id: u64, id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&user_id.to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

fn id_suffix(key: &[u8]) -> StoreResult<u64> {
    let start = key
        .len()
        .checked_sub(8)
        .ok_or_else(|| StoreError::Serialization("short index key".to_string()))?;
    loyalty_engine::storage::db::decode_u64(&key[start..])
}

/// Requests kept in the shared [`LoyaltyDb`] next to the ledger trees.
#[derive(Debug, Clone)]
pub struct SledRedemptionStore {
    db: LoyaltyDb,
    redemptions: Tree,
    by_status: Tree,
    by_user: Tree,
}

impl SledRedemptionStore {
    pub fn open(db: &LoyaltyDb) -> StoreResult<Self> {
        Ok(Self {
            db: db.clone(),
            redemptions: db.open_tree("redemptions")?,
            by_status: db.open_tree("redemption_status")?,
            by_user: db.open_tree("redemption_user")?,
        })
    }

    pub fn shared(db: &LoyaltyDb) -> StoreResult<Arc<dyn RedemptionStore>> {
        Ok(Arc::new(Self::open(db)?))
    }

    fn load_all(&self, ids: impl Iterator<Item = StoreResult<u64>>) -> StoreResult<Vec<RedemptionRequest>> {
        let mut out = Vec::new();
        for id in ids {
            if let Some(request) = self.get(id?)? {
                out.push(request);
            }
        }
        Ok(out)
    }
}

impl RedemptionStore for SledRedemptionStore {
    fn next_id(&self) -> StoreResult<u64> {
        self.db.generate_id()
    }

    fn insert(&self, request: &RedemptionRequest) -> StoreResult<()> {
        let bytes = encode(request)?;
        let id_key = request.id.to_be_bytes();
        let result = (&self.redemptions, &self.by_status, &self.by_user).transaction(
            |(redemptions, by_status, by_user)| {
                if redemptions.get(id_key)?.is_some() {
                    return abort(duplicate(request.id));
                }
                redemptions.insert(&id_key[..], bytes.clone())?;
                by_status.insert(&status_key(request.status, request.id)[..], &[] as &[u8])?;
                by_user.insert(&user_key(request.key.user_id, request.id)[..], &[] as &[u8])?;
                Ok(())
            },
        );
        settle(result)
    }

    fn get(&self, id: u64) -> StoreResult<Option<RedemptionRequest>> {
        match self.redemptions.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn swap(&self, expected: RedemptionStatus, next: &RedemptionRequest) -> StoreResult<SwapOutcome> {
        let bytes = encode(next)?;
        let id_key = next.id.to_be_bytes();
        let result = (&self.redemptions, &self.by_status).transaction(|(redemptions, by_status)| {
            let current: RedemptionRequest = match redemptions.get(id_key)? {
                Some(raw) => decode(&raw).map_err(ConflictableTransactionError::Abort)?,
                None => return abort(missing(next.id)),
            };
            if current.status != expected {
                return Ok(SwapOutcome::Conflict {
                    current: current.status,
                });
            }
            redemptions.insert(&id_key[..], bytes.clone())?;
            by_status.remove(&status_key(current.status, next.id)[..])?;
            by_status.insert(&status_key(next.status, next.id)[..], &[] as &[u8])?;
            Ok(SwapOutcome::Applied)
        });
        settle(result)
    }

    fn list_by_status(&self, status: RedemptionStatus) -> StoreResult<Vec<RedemptionRequest>> {
        let ids = self
            .by_status
            .scan_prefix([status.tag()])
            .keys()
            .map(|key| id_suffix(&key?));
        self.load_all(ids)
    }

    fn list_by_user(&self, user_id: u64) -> StoreResult<Vec<RedemptionRequest>> {
        let ids = self
            .by_user
            .scan_prefix(user_id.to_be_bytes())
            .keys()
            .map(|key| id_suffix(&key?));
        self.load_all(ids)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
