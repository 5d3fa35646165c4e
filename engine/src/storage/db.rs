//! # LoyaltyDb: Persistent Ledger Store
//!
//! The on-disk backend, built on sled's embedded key-value store. Every
//! ledger write goes through a single multi-tree serializable transaction,
//! so the movement, its indexes, the balance row and the id counter land
//! together or not at all.
//!
//! ## Tree Layout
//!
//! | Tree          | Key                                   | Value              |
//! |---------------|---------------------------------------|--------------------|
//! | `movements`   | `id` (8B BE)                          | `bincode(Movement)`|
//! | `key_index`   | `user` ‖ `card` ‖ `id` (24B BE)       | empty              |
//! | `balances`    | `user` ‖ `card` (16B BE)              | `bincode(Balance)` |
//! | `link_index`  | link tag ‖ `ref` (8B BE) ‖ kind tag   | `id` (8B BE)       |
//! | `metadata`    | key (UTF-8)                           | value (bytes)      |
//!
//! Big-endian integers keep sled's lexicographic order equal to numeric
//! order, so a prefix scan of `key_index` yields one key's movements in id
//! order.
//!
//! Other crates open their own trees in the same database through
//! [`LoyaltyDb::open_tree`].

use std::path::Path;

use chrono::Utc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    abort, ConflictableTransactionError, TransactionError, Transactional,
};
use sled::{Db, Tree};
use tracing::debug;

use super::{
    apply_amount, Committed, LedgerSnapshot, LedgerStore, Link, StoreError, StoreResult,
};
use crate::ledger::{Balance, BalanceKey, ExpiringPoints, Movement, MovementKind, NewMovement};

// ---------------------------------------------------------------------------
// Keys & Encoding
// ---------------------------------------------------------------------------

/// Id of the most recently committed movement.
const META_LAST_MOVEMENT_ID: &[u8] = b"last_movement_id";

fn balance_row_key(key: &BalanceKey) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&key.user_id.to_be_bytes());
    out[8..].copy_from_slice(&key.card_id.to_be_bytes());
    out
}

fn key_index_key(key: &BalanceKey, id: u64) -> [u8; 24] {
    let mut out = [0u8; 24];
    out[..16].copy_from_slice(&balance_row_key(key));
    out[16..].copy_from_slice(&id.to_be_bytes());
    out
}

pub fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(StoreError::serialization)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(StoreError::serialization)
}

pub fn decode_u64(bytes: &[u8]) -> StoreResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Serialization("invalid u64 bytes".to_string()))?;
    Ok(u64::from_be_bytes(raw))
}

/// Flattens a sled transaction result into a store result.
pub fn settle<T>(result: Result<T, TransactionError<StoreError>>) -> StoreResult<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Sled(e),
    })
}

// ---------------------------------------------------------------------------
// LoyaltyDb
// ---------------------------------------------------------------------------

/// Persistent ledger store.
///
/// Cloning is cheap and every clone shares the same trees and the same
/// snapshot gate.
#[derive(Debug, Clone)]
pub struct LoyaltyDb {
    db: Db,
    movements: Tree,
    key_index: Tree,
    balances: Tree,
    link_index: Tree,
    metadata: Tree,
    /// Commits share it, `snapshot` takes it exclusively.
    gate: std::sync::Arc<RwLock<()>>,
}

impl LoyaltyDb {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A database that lives in a temp location and is removed on drop.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        Ok(Self {
            movements: db.open_tree("movements")?,
            key_index: db.open_tree("key_index")?,
            balances: db.open_tree("balances")?,
            link_index: db.open_tree("link_index")?,
            metadata: db.open_tree("metadata")?,
            db,
            gate: Default::default(),
        })
    }

    /// Open (or create) a named tree in the same database.
    pub fn open_tree(&self, name: &str) -> StoreResult<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    /// A database-wide unique, monotonic id.
    pub fn generate_id(&self) -> StoreResult<u64> {
        Ok(self.db.generate_id()? + 1)
    }

    pub fn movement_count(&self) -> usize {
        self.movements.len()
    }

    pub fn balance_count(&self) -> usize {
        self.balances.len()
    }

    /// Block until every pending write is durable.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Writes a balance total directly, bypassing the movement log.
    ///
    /// Breaks the ledger invariant on purpose. Exists so reconciliation can
    /// be exercised against a corrupted row.
    pub fn overwrite_balance(&self, key: BalanceKey, total: i64) -> StoreResult<()> {
        let _gate = self.gate.read();
        let row_key = balance_row_key(&key);
        let mut balance = match self.balances.get(row_key)? {
            Some(bytes) => decode::<Balance>(&bytes)?,
            None => Balance::empty(key, Utc::now()),
        };
        balance.total = total;
        self.balances.insert(row_key, encode(&balance)?)?;
        Ok(())
    }

    fn movement(&self, id: u64) -> StoreResult<Option<Movement>> {
        match self.movements.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl LedgerStore for LoyaltyDb {
    fn commit(&self, draft: NewMovement) -> StoreResult<Committed> {
        let _gate = self.gate.read();
        let row_key = balance_row_key(&draft.key);
        let links = Link::of(&draft);

        let result = (
            &self.movements,
            &self.key_index,
            &self.balances,
            &self.link_index,
            &self.metadata,
        )
            .transaction(|(movements, key_index, balances, link_index, metadata)| {
                let current = match balances.get(row_key)? {
                    Some(bytes) => {
                        decode::<Balance>(&bytes).map_err(ConflictableTransactionError::Abort)?
                    }
                    None => Balance::empty(draft.key, draft.created_at),
                };
                for link in &links {
                    if link_index.get(&link.index_key(draft.kind)[..])?.is_some() {
                        return abort(StoreError::Duplicate {
                            link: *link,
                            kind: draft.kind,
                        });
                    }
                }
                let total =
                    apply_amount(&current, &draft).map_err(ConflictableTransactionError::Abort)?;

                let last = match metadata.get(META_LAST_MOVEMENT_ID)? {
                    Some(bytes) => {
                        decode_u64(&bytes).map_err(ConflictableTransactionError::Abort)?
                    }
                    None => 0,
                };
                let id = last + 1;
                let id_bytes = id.to_be_bytes();
                metadata.insert(META_LAST_MOVEMENT_ID, &id_bytes[..])?;

                let movement = draft.clone().into_movement(id);
                let movement_bytes =
                    encode(&movement).map_err(ConflictableTransactionError::Abort)?;
                movements.insert(&id_bytes[..], movement_bytes)?;
                key_index.insert(&key_index_key(&draft.key, id)[..], &[] as &[u8])?;
                for link in &links {
                    link_index.insert(&link.index_key(draft.kind)[..], &id_bytes[..])?;
                }

                let balance = Balance {
                    key: draft.key,
                    total,
                    last_updated: movement.created_at.max(current.last_updated),
                    expiring: current.expiring,
                };
                let balance_bytes = encode(&balance).map_err(ConflictableTransactionError::Abort)?;
                balances.insert(&row_key[..], balance_bytes)?;

                Ok(Committed { movement, balance })
            });

        let committed = settle(result)?;
        debug!(
            id = committed.movement.id,
            key = %committed.balance.key,
            total = committed.balance.total,
            "movement committed"
        );
        Ok(committed)
    }

    fn balance(&self, key: &BalanceKey) -> StoreResult<Option<Balance>> {
        match self.balances.get(balance_row_key(key))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn movements_for(&self, key: &BalanceKey) -> StoreResult<Vec<Movement>> {
        let mut out = Vec::new();
        for entry in self.key_index.scan_prefix(balance_row_key(key)) {
            let (index_key, _) = entry?;
            let id = decode_u64(&index_key[16..])?;
            let movement = self
                .movement(id)?
                .ok_or_else(|| StoreError::NotFound(format!("movement {id}")))?;
            out.push(movement);
        }
        Ok(out)
    }

    fn find_by_link(&self, link: Link, kind: MovementKind) -> StoreResult<Option<Movement>> {
        match self.link_index.get(link.index_key(kind))? {
            Some(bytes) => self.movement(decode_u64(&bytes)?),
            None => Ok(None),
        }
    }

    fn snapshot(&self) -> StoreResult<LedgerSnapshot> {
        let _gate = self.gate.write();
        let movements = self
            .movements
            .iter()
            .values()
            .map(|bytes| decode(&bytes?))
            .collect::<StoreResult<Vec<Movement>>>()?;
        let balances = self
            .balances
            .iter()
            .values()
            .map(|bytes| decode(&bytes?))
            .collect::<StoreResult<Vec<Balance>>>()?;
        Ok(LedgerSnapshot {
            movements,
            balances,
        })
    }

    fn set_expiring(&self, key: &BalanceKey, expiring: ExpiringPoints) -> StoreResult<Balance> {
        let _gate = self.gate.read();
        let row_key = balance_row_key(key);
        let result = self.balances.transaction(|balances| {
            let mut balance: Balance = match balances.get(row_key)? {
                Some(bytes) => decode(&bytes).map_err(ConflictableTransactionError::Abort)?,
                None => return abort(StoreError::NotFound(format!("balance {key}"))),
            };
            balance.expiring = expiring;
            let bytes = encode(&balance).map_err(ConflictableTransactionError::Abort)?;
            balances.insert(&row_key[..], bytes)?;
            Ok(balance)
        });
        settle(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
