//! In-memory chain store.

use crate::core::block::{Block, Header};
use crate::core::transaction::Transaction;
use crate::storage::storage_trait::{Storage, StorageError};
use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Entry {
    signed: Arc<Block>,
    committed: Arc<Block>,
}

struct Inner {
    /// Index = height.
    entries: Vec<Entry>,
    heights_by_hash: HashMap<Hash, u32>,
    transactions: HashMap<Hash, Transaction>,
}

impl Inner {
    fn height(&self) -> u32 {
        self.entries.len().saturating_sub(1) as u32
    }

    fn entry(&self, height: u32) -> Result<&Entry, StorageError> {
        self.entries
            .get(height as usize)
            .ok_or(StorageError::HeightTooHigh {
                height,
                current: self.height(),
            })
    }

    fn push(&mut self, signed: Arc<Block>, committed: Arc<Block>) {
        let height = self.entries.len() as u32;
        self.heights_by_hash.insert(committed.hash(), height);
        for tx in committed.transactions() {
            self.transactions.insert(tx.hash(), tx.clone());
        }
        self.entries.push(Entry { signed, committed });
    }
}

/// Chain store kept entirely in memory.
///
/// A single reader/writer lock covers every index, so readers never observe
/// a height without its hash and transaction entries.
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn new(genesis: Block) -> Self {
        let genesis = Arc::new(genesis);
        let mut inner = Inner {
            entries: Vec::new(),
            heights_by_hash: HashMap::new(),
            transactions: HashMap::new(),
        };
        inner.push(genesis.clone(), genesis);
        Self {
            inner: RwLock::new(inner),
        }
    }

    fn height(&self) -> u32 {
        self.read().height()
    }

    fn tip(&self) -> Hash {
        let inner = self.read();
        inner
            .entries
            .last()
            .map(|entry| entry.committed.hash())
            .unwrap_or_default()
    }

    fn header(&self, height: u32) -> Result<Header, StorageError> {
        self.read()
            .entry(height)
            .map(|entry| *entry.committed.header())
    }

    fn block(&self, height: u32) -> Result<Arc<Block>, StorageError> {
        self.read()
            .entry(height)
            .map(|entry| entry.committed.clone())
    }

    fn block_by_hash(&self, hash: &Hash) -> Result<Arc<Block>, StorageError> {
        let inner = self.read();
        let height = inner
            .heights_by_hash
            .get(hash)
            .copied()
            .ok_or(StorageError::BlockNotFound(*hash))?;
        inner.entry(height).map(|entry| entry.committed.clone())
    }

    fn transaction(&self, hash: &Hash) -> Result<Transaction, StorageError> {
        self.read()
            .transactions
            .get(hash)
            .cloned()
            .ok_or(StorageError::TransactionNotFound(*hash))
    }

    fn signed_blocks(
        &self,
        from: u32,
        to: u32,
        limit: usize,
        max_bytes: usize,
    ) -> Vec<Arc<Block>> {
        let inner = self.read();
        let tip = inner.height();
        let last = if to == 0 { tip } else { to.min(tip) };
        if from > last {
            return Vec::new();
        }

        let mut blocks = Vec::new();
        let mut size = 0;
        for entry in inner.entries[from as usize..=last as usize].iter().take(limit) {
            size += entry.signed.encoded_len();
            if size > max_bytes && !blocks.is_empty() {
                break;
            }
            blocks.push(entry.signed.clone());
        }
        blocks
    }

    fn append(&self, signed: Arc<Block>, committed: Arc<Block>) -> Result<(), StorageError> {
        let mut inner = self.write();
        let expected = inner.entries.len() as u32;
        if committed.height() != expected {
            return Err(StorageError::NotSequential {
                expected,
                actual: committed.height(),
            });
        }
        inner.push(signed, committed);
        Ok(())
    }
}
