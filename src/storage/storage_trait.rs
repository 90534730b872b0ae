//! Append-only chain store interface.

use crate::core::block::{Block, Header};
use crate::core::transaction::Transaction;
use crate::types::hash::Hash;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("height {height} is above the tip at {current}")]
    HeightTooHigh { height: u32, current: u32 },
    #[error("block {0} not found")]
    BlockNotFound(Hash),
    #[error("transaction {0} not found")]
    TransactionNotFound(Hash),
    #[error("append at height {actual}, next free height is {expected}")]
    NotSequential { expected: u32, actual: u32 },
}

/// Ordered log of accepted blocks.
///
/// Heights are occupied strictly in sequence and never overwritten. Each
/// height holds two forms of its block:
/// - the block as signed by its producer, served to peers
/// - the committed block, whose transaction list excludes transactions that
///   failed execution; lookups and the transaction index use this form
pub trait Storage: Send + Sync {
    /// Creates a store holding only `genesis` at height 0.
    fn new(genesis: Block) -> Self
    where
        Self: Sized;

    /// Height of the newest block (genesis = 0).
    fn height(&self) -> u32;

    fn has_block(&self, height: u32) -> bool {
        height <= self.height()
    }

    /// Hash of the newest block.
    fn tip(&self) -> Hash;

    fn header(&self, height: u32) -> Result<Header, StorageError>;

    fn block(&self, height: u32) -> Result<Arc<Block>, StorageError>;

    fn block_by_hash(&self, hash: &Hash) -> Result<Arc<Block>, StorageError>;

    fn transaction(&self, hash: &Hash) -> Result<Transaction, StorageError>;

    /// Signed blocks from `from` up to `to` inclusive, clamped to the tip.
    /// `to == 0` means up to the tip.
    ///
    /// At most `limit` blocks are returned, and the run stops before the
    /// encoded blocks would exceed `max_bytes`. The first block in range is
    /// always included.
    fn signed_blocks(&self, from: u32, to: u32, limit: usize, max_bytes: usize)
    -> Vec<Arc<Block>>;

    /// Appends the next height. `committed` must share `signed`'s header.
    fn append(&self, signed: Arc<Block>, committed: Arc<Block>) -> Result<(), StorageError>;
}
