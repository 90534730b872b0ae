//! Chain orchestration: validation, contract execution and storage.

use crate::core::block::{Block, Header};
use crate::core::transaction::Transaction;
use crate::core::validator::{BlockValidator, ChainError, Validator};
use crate::storage::memory_storage::MemoryStorage;
use crate::storage::storage_trait::{Storage, StorageError};
use crate::types::hash::Hash;
use crate::virtual_machine::state::{MemoryState, OverlayState, State, Writes, state_key};
use crate::virtual_machine::vm::{ContractExecutor, StackVm};
use crate::{info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The chain: a validator in front of a store, plus the contract state that
/// accepted blocks have produced.
///
/// Generic over the validator and the storage backend.
pub struct Blockchain<V: Validator, S: Storage> {
    validator: V,
    storage: S,
    executor: Box<dyn ContractExecutor>,
    state: Mutex<MemoryState>,
}

impl Blockchain<BlockValidator, MemoryStorage> {
    /// Creates a chain holding only `genesis`, with the default validator,
    /// in-memory storage and the stack VM as executor.
    pub fn new(genesis: Block) -> Self {
        Self::with_executor(BlockValidator, genesis, Box::new(StackVm::default()))
    }
}

impl<V: Validator, S: Storage> Blockchain<V, S> {
    /// Creates a chain from explicit parts.
    ///
    /// Genesis is stored as is: it bypasses the validator and its
    /// transactions are not executed.
    pub fn with_executor(validator: V, genesis: Block, executor: Box<dyn ContractExecutor>) -> Self {
        info!(
            "initializing chain";
            hash = genesis.hash(),
            transactions = genesis.transactions().len()
        );

        Self {
            validator,
            storage: S::new(genesis),
            executor,
            state: Mutex::new(MemoryState::new()),
        }
    }

    /// Validates `block`, executes its payloads and appends it.
    ///
    /// A transaction whose payload fails to execute is left out of the
    /// committed block and its writes are discarded; the rest of the block
    /// is still accepted. Returns the committed block.
    pub fn add_block(&self, block: Block) -> Result<Arc<Block>, ChainError> {
        self.validator.validate_block(&block, &self.storage)?;

        let signed = Arc::new(block);
        let mut state = self.lock_state();
        let (kept, writes) = self.execute(&signed, &state);

        let excluded = signed.transactions().len() - kept.len();
        let committed = if excluded == 0 {
            signed.clone()
        } else {
            Arc::new(signed.with_transactions(kept))
        };

        self.storage.append(signed, committed.clone())?;
        state.apply(writes);

        info!(
            "block added";
            height = committed.height(),
            hash = committed.hash(),
            transactions = committed.transactions().len(),
            excluded = excluded
        );
        Ok(committed)
    }

    /// Runs every non-empty payload on its own overlay and keeps the
    /// transactions that succeed.
    fn execute(&self, block: &Block, state: &MemoryState) -> (Vec<Transaction>, Writes) {
        let mut block_overlay = OverlayState::new(state);
        let mut kept = Vec::with_capacity(block.transactions().len());

        for tx in block.transactions() {
            if !tx.payload.is_empty() {
                let mut tx_overlay = OverlayState::new(&block_overlay);
                if let Err(err) = self.executor.execute(&tx.payload, &mut tx_overlay) {
                    warn!(
                        "transaction excluded";
                        height = block.height(),
                        tx = tx.hash(),
                        error = err
                    );
                    continue;
                }
                let writes = tx_overlay.into_writes();
                block_overlay.apply(writes);
            }
            kept.push(tx.clone());
        }

        (kept, block_overlay.into_writes())
    }

    fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Height of the newest block (genesis = 0).
    pub fn height(&self) -> u32 {
        self.storage.height()
    }

    pub fn has_block(&self, height: u32) -> bool {
        self.storage.has_block(height)
    }

    /// Hash of the newest block.
    pub fn tip(&self) -> Hash {
        self.storage.tip()
    }

    pub fn header(&self, height: u32) -> Result<Header, StorageError> {
        self.storage.header(height)
    }

    /// Header of the newest block.
    pub fn head_header(&self) -> Result<Header, StorageError> {
        self.storage.header(self.storage.height())
    }

    pub fn block(&self, height: u32) -> Result<Arc<Block>, StorageError> {
        self.storage.block(height)
    }

    pub fn block_by_hash(&self, hash: &Hash) -> Result<Arc<Block>, StorageError> {
        self.storage.block_by_hash(hash)
    }

    pub fn tx_by_hash(&self, hash: &Hash) -> Result<Transaction, StorageError> {
        self.storage.transaction(hash)
    }

    /// Blocks as their producers signed them, for serving to peers.
    pub fn signed_blocks(
        &self,
        from: u32,
        to: u32,
        limit: usize,
        max_bytes: usize,
    ) -> Vec<Arc<Block>> {
        self.storage.signed_blocks(from, to, limit, max_bytes)
    }

    /// Value a contract stored under `key`.
    pub fn contract_value(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.lock_state().get(state_key(key))
    }
}
