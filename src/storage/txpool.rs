//! Bounded pool of unconfirmed transactions.
//!
//! Every admitted transaction is tracked twice:
//! - `all` remembers it for deduplication and is capped at `max_length`,
//!   evicting the oldest entry first
//! - `pending` holds what goes into the next block and is emptied once
//!   that block is produced
//!
//! A transaction that is still in `all` is never admitted again, even after
//! it left `pending`.

use crate::core::transaction::Transaction;
use crate::types::hash::Hash;
use crate::utils::unix_nanos;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Default cap on the number of remembered transactions.
pub const DEFAULT_MAX_POOL_LENGTH: usize = 1000;

/// Orders entries by `(first_seen, admission sequence)`.
type OrderKey = (i64, u64);

/// Hash-keyed transactions kept in admission order.
#[derive(Default)]
struct TxSortedMap {
    lookup: HashMap<Hash, (OrderKey, Transaction)>,
    order: BTreeMap<OrderKey, Hash>,
}

impl TxSortedMap {
    fn contains(&self, hash: &Hash) -> bool {
        self.lookup.contains_key(hash)
    }

    /// Inserts or repositions `tx` under `key`.
    fn insert(&mut self, key: OrderKey, tx: Transaction) {
        let hash = tx.hash();
        if let Some((old_key, _)) = self.lookup.insert(hash, (key, tx)) {
            self.order.remove(&old_key);
        }
        self.order.insert(key, hash);
    }

    fn remove(&mut self, hash: &Hash) -> Option<Transaction> {
        let (key, tx) = self.lookup.remove(hash)?;
        self.order.remove(&key);
        Some(tx)
    }

    fn pop_oldest(&mut self) -> Option<Transaction> {
        let (_, hash) = self.order.pop_first()?;
        self.lookup.remove(&hash).map(|(_, tx)| tx)
    }

    fn ordered(&self) -> Vec<Transaction> {
        self.order
            .values()
            .filter_map(|hash| self.lookup.get(hash).map(|(_, tx)| tx.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.lookup.len()
    }

    fn clear(&mut self) {
        self.lookup.clear();
        self.order.clear();
    }
}

/// Thread-safe mempool.
///
/// Each collection has its own lock. `add` takes both, `all` first, so an
/// admission is visible in both collections at once.
pub struct TxPool {
    all: RwLock<TxSortedMap>,
    pending: RwLock<TxSortedMap>,
    max_length: usize,
    sequence: AtomicU64,
}

fn read(lock: &RwLock<TxSortedMap>) -> RwLockReadGuard<'_, TxSortedMap> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(lock: &RwLock<TxSortedMap>) -> RwLockWriteGuard<'_, TxSortedMap> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl TxPool {
    /// Creates a pool remembering at most `max_length` transactions.
    pub fn new(max_length: usize) -> Self {
        Self {
            all: RwLock::new(TxSortedMap::default()),
            pending: RwLock::new(TxSortedMap::default()),
            max_length: max_length.max(1),
            sequence: AtomicU64::new(0),
        }
    }

    /// Admits `tx` into both collections unless it is already known.
    ///
    /// Returns `true` if the transaction was new. When `all` is full the
    /// oldest remembered entry is evicted first; `pending` is left as is.
    /// An evicted transaction that comes back while still pending is
    /// remembered again but keeps its single pending slot.
    /// A zero `first_seen` is stamped with the current time.
    pub fn add(&self, mut tx: Transaction) -> bool {
        let hash = tx.hash();
        let mut all = write(&self.all);
        if all.contains(&hash) {
            return false;
        }

        while all.len() >= self.max_length {
            if all.pop_oldest().is_none() {
                break;
            }
        }

        if tx.first_seen == 0 {
            tx.first_seen = unix_nanos();
        }
        let key = (tx.first_seen, self.sequence.fetch_add(1, Ordering::Relaxed));

        let mut pending = write(&self.pending);
        if !pending.contains(&hash) {
            pending.insert(key, tx.clone());
        }
        all.insert(key, tx);
        true
    }

    /// Whether `hash` is remembered in `all`.
    pub fn contains(&self, hash: &Hash) -> bool {
        read(&self.all).contains(hash)
    }

    /// Snapshot of `pending`, oldest first.
    pub fn pending(&self) -> Vec<Transaction> {
        read(&self.pending).ordered()
    }

    pub fn pending_count(&self) -> usize {
        read(&self.pending).len()
    }

    pub fn all_count(&self) -> usize {
        read(&self.all).len()
    }

    /// Empties `pending`; `all` keeps its entries.
    pub fn clear_pending(&self) {
        write(&self.pending).clear();
    }

    /// Drops the given hashes from `pending`, e.g. after a peer's block
    /// already included them.
    pub fn remove_pending<'a>(&self, hashes: impl IntoIterator<Item = &'a Hash>) {
        let mut pending = write(&self.pending);
        for hash in hashes {
            pending.remove(hash);
        }
    }
}

impl Default for TxPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOL_LENGTH)
    }
}
