//! # In-Process Ledger Store
//!
//! [`MemoryLedgerStore`] keeps everything in memory. Rows live in a
//! `DashMap`; holding a row's entry is the row lock, so commits on
//! different keys proceed in parallel while commits on the same key
//! serialize.
//!
//! ## Lock Order
//!
//! ```text
//! gate (read) → balance row → links → log → key index
//! ```
//!
//! Readers never hold more than one of these at a time. `snapshot` takes
//! the gate for writing, which waits out every in-flight commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use super::{
    apply_amount, Committed, LedgerSnapshot, LedgerStore, Link, StoreError, StoreResult,
};
use crate::ledger::{Balance, BalanceKey, ExpiringPoints, Movement, MovementKind, NewMovement};

#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    gate: RwLock<()>,
    balances: DashMap<BalanceKey, Balance>,
    links: Mutex<HashMap<(Link, MovementKind), u64>>,
    log: RwLock<BTreeMap<u64, Movement>>,
    by_key: DashMap<BalanceKey, Vec<u64>>,
    next_id: AtomicU64,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed movements.
    pub fn movement_count(&self) -> usize {
        self.log.read().len()
    }

    /// Writes a balance total directly, bypassing the movement log.
    ///
    /// Breaks the ledger invariant on purpose. Exists so reconciliation can
    /// be exercised against a corrupted row.
    pub fn overwrite_balance(&self, key: BalanceKey, total: i64) {
        let _gate = self.gate.read();
        self.balances
            .entry(key)
            .and_modify(|b| b.total = total)
            .or_insert_with(|| Balance {
                total,
                ..Balance::empty(key, Utc::now())
            });
    }

    /// Everything after the row lock: links, id, log, index.
    /// Duplicates are refused before the balance is checked.
    fn append_locked(&self, draft: NewMovement, current: &Balance) -> StoreResult<Committed> {
        let links = Link::of(&draft);

        let mut recorded = self.links.lock();
        if let Some(link) = links
            .iter()
            .find(|link| recorded.contains_key(&(**link, draft.kind)))
        {
            return Err(StoreError::Duplicate {
                link: *link,
                kind: draft.kind,
            });
        }
        let total = apply_amount(current, &draft)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        for link in links {
            recorded.insert((link, draft.kind), id);
        }
        drop(recorded);

        let key = draft.key;
        let movement = draft.into_movement(id);
        self.log.write().insert(id, movement.clone());
        self.by_key.entry(key).or_default().push(id);

        let balance = Balance {
            key,
            total,
            last_updated: movement.created_at.max(current.last_updated),
            expiring: current.expiring,
        };
        Ok(Committed { movement, balance })
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn commit(&self, draft: NewMovement) -> StoreResult<Committed> {
        let _gate = self.gate.read();

        match self.balances.entry(draft.key) {
            Entry::Occupied(mut row) => {
                let committed = self.append_locked(draft, row.get())?;
                row.insert(committed.balance.clone());
                Ok(committed)
            }
            Entry::Vacant(row) => {
                // A refused debit must not leave an empty row behind, so the
                // vacant entry stays unfilled until the append succeeds.
                let current = Balance::empty(draft.key, draft.created_at);
                let committed = self.append_locked(draft, &current)?;
                row.insert(committed.balance.clone());
                Ok(committed)
            }
        }
    }

    fn balance(&self, key: &BalanceKey) -> StoreResult<Option<Balance>> {
        Ok(self.balances.get(key).map(|row| row.clone()))
    }

    fn movements_for(&self, key: &BalanceKey) -> StoreResult<Vec<Movement>> {
        let ids = match self.by_key.get(key) {
            Some(ids) => ids.clone(),
            None => return Ok(Vec::new()),
        };
        let log = self.log.read();
        Ok(ids.iter().filter_map(|id| log.get(id).cloned()).collect())
    }

    fn find_by_link(&self, link: Link, kind: MovementKind) -> StoreResult<Option<Movement>> {
        let id = self.links.lock().get(&(link, kind)).copied();
        Ok(id.and_then(|id| self.log.read().get(&id).cloned()))
    }

    fn snapshot(&self) -> StoreResult<LedgerSnapshot> {
        let _gate = self.gate.write();
        let movements = self.log.read().values().cloned().collect();
        let mut balances: Vec<Balance> = self.balances.iter().map(|row| row.clone()).collect();
        balances.sort_by_key(|b| b.key);
        Ok(LedgerSnapshot {
            movements,
            balances,
        })
    }

    fn set_expiring(&self, key: &BalanceKey, expiring: ExpiringPoints) -> StoreResult<Balance> {
        let _gate = self.gate.read();
        let mut row = self
            .balances
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(format!("balance {key}")))?;
        row.expiring = expiring;
        Ok(row.clone())
    }
}
