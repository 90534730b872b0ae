//! Chain-extension rules for candidate blocks.
//!
//! Provides the [`Validator`] trait for custom validation strategies
//! and [`BlockValidator`] as the default implementation.

use crate::core::block::{Block, BlockError};
use crate::storage::storage_trait::{Storage, StorageError};
use crate::types::hash::Hash;
use thiserror::Error;

/// Reasons a candidate block cannot extend the chain.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block {height} is already known")]
    BlockAlreadyKnown { height: u32 },

    #[error("block {height} does not extend the tip at {current}")]
    HeightTooHigh { height: u32, current: u32 },

    #[error("block {height} links to {actual}, parent hash is {expected}")]
    InvalidPrevHash {
        height: u32,
        expected: Hash,
        actual: Hash,
    },

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Gate every candidate block passes before it is appended.
///
/// Implementations must be thread-safe for concurrent validation.
pub trait Validator: Send + Sync {
    /// Checks `block` against the chain held by `storage`.
    fn validate_block<S: Storage>(&self, block: &Block, storage: &S) -> Result<(), ChainError>;
}

/// Default validator.
///
/// Checks, in order:
/// - the block is above the current height
/// - the block is exactly one above the current height
/// - `prev_block_hash` matches the header below it
/// - [`Block::verify`] passes
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockValidator;

impl Validator for BlockValidator {
    fn validate_block<S: Storage>(&self, block: &Block, storage: &S) -> Result<(), ChainError> {
        let height = block.height();
        let current = storage.height();

        if height <= current {
            return Err(ChainError::BlockAlreadyKnown { height });
        }
        if height != current + 1 {
            return Err(ChainError::HeightTooHigh { height, current });
        }

        let expected = storage.header(height - 1)?.hash();
        if block.prev_block_hash() != expected {
            return Err(ChainError::InvalidPrevHash {
                height,
                expected,
                actual: block.prev_block_hash(),
            });
        }

        block.verify()?;
        Ok(())
    }
}
