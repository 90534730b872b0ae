//! Blocks, headers and the genesis block.

use crate::core::transaction::Transaction;
use crate::crypto::key_pair::{PrivateKey, PublicKey, Signature, SignatureError, SigningError};
use crate::types::encoding::Encode;
use crate::types::hash::{Hash, HashCache};
use crate::utils::unix_nanos;
use ledger_derive::BinaryCodec;
use thiserror::Error;

pub const BLOCK_VERSION: u32 = 1;

/// Largest encoded transaction list a block may carry.
pub const MAX_BLOCK_DATA_BYTES: usize = 8 * 1024 * 1024;

/// Largest encoded transaction that still fits alone in a block, after the
/// list's length prefix.
pub const MAX_TRANSACTION_BYTES: usize = MAX_BLOCK_DATA_BYTES - 4;

/// Value minted by the genesis coinbase transaction.
pub const GENESIS_COINBASE_VALUE: u64 = 10_000_000;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block {0}")]
    Signature(#[from] SignatureError),
    #[error("transaction {hash}: {source}")]
    Transaction {
        hash: Hash,
        #[source]
        source: SignatureError,
    },
    #[error("data hash mismatch: header commits to {expected}, transactions hash to {actual}")]
    DataHashMismatch { expected: Hash, actual: Hash },
    #[error("transactions encode to {size} bytes, limit is {limit}")]
    Encoding { size: usize, limit: usize },
    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// Block metadata. Its encoding is both hashed and signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub struct Header {
    pub version: u32,
    /// Hash of the encoded transaction list.
    pub data_hash: Hash,
    pub prev_block_hash: Hash,
    pub height: u32,
    /// Unix nanoseconds.
    pub timestamp: i64,
}

impl Header {
    pub fn hash(&self) -> Hash {
        Hash::of(self)
    }
}

/// Hash committed to by `Header::data_hash`.
pub fn data_hash(transactions: &[Transaction]) -> Hash {
    Hash::of(transactions)
}

/// A header, the ordered transactions it commits to, and the producer's
/// signature over the header encoding.
///
/// The signature does not cover the transactions directly; they are bound
/// to the header through `data_hash` only.
#[derive(Debug, Clone, BinaryCodec)]
pub struct Block {
    header: Header,
    transactions: Vec<Transaction>,
    producer: Option<PublicKey>,
    signature: Option<Signature>,
    #[binary_codec(skip)]
    cached_hash: HashCache,
}

impl Block {
    /// Wraps an already built header. The block is unsigned.
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            producer: None,
            signature: None,
            cached_hash: HashCache::new(),
        }
    }

    /// Builds the unsigned successor of `prev` carrying `transactions`.
    pub fn from_previous_header(
        prev: &Header,
        transactions: Vec<Transaction>,
    ) -> Result<Self, BlockError> {
        let size = transactions.encoded_len();
        if size > MAX_BLOCK_DATA_BYTES {
            return Err(BlockError::Encoding {
                size,
                limit: MAX_BLOCK_DATA_BYTES,
            });
        }

        let header = Header {
            version: BLOCK_VERSION,
            data_hash: data_hash(&transactions),
            prev_block_hash: prev.hash(),
            height: prev.height + 1,
            timestamp: unix_nanos(),
        };
        Ok(Self::new(header, transactions))
    }

    /// Signs the header encoding and records the producer.
    pub fn sign(mut self, key: &PrivateKey) -> Result<Self, BlockError> {
        let signature = key.sign(&self.header.encode_to_vec())?;
        self.producer = Some(key.public_key());
        self.signature = Some(signature);
        Ok(self)
    }

    /// Structural checks, in order: producer signature over the header,
    /// every transaction signature, then the data hash.
    pub fn verify(&self) -> Result<(), BlockError> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(SignatureError::MissingSignature)?;
        let producer = self.producer.ok_or(SignatureError::InvalidSignature)?;
        if !producer.verify(&self.header.encode_to_vec(), signature) {
            return Err(SignatureError::InvalidSignature.into());
        }

        for tx in &self.transactions {
            tx.verify().map_err(|source| BlockError::Transaction {
                hash: tx.hash(),
                source,
            })?;
        }

        self.check_data_hash()
    }

    /// Recomputes the data hash from the current transaction list.
    pub fn check_data_hash(&self) -> Result<(), BlockError> {
        let actual = data_hash(&self.transactions);
        if actual == self.header.data_hash {
            Ok(())
        } else {
            Err(BlockError::DataHashMismatch {
                expected: self.header.data_hash,
                actual,
            })
        }
    }

    /// Header hash, memoized.
    pub fn hash(&self) -> Hash {
        self.cached_hash.get_or_compute(|| self.header.hash())
    }

    /// Same header and signature with a different transaction list.
    ///
    /// The result no longer satisfies `check_data_hash` unless the list is
    /// unchanged. Used to record which transactions were actually applied.
    pub fn with_transactions(&self, transactions: Vec<Transaction>) -> Self {
        Self {
            header: self.header,
            transactions,
            producer: self.producer,
            signature: self.signature,
            cached_hash: self.cached_hash.clone(),
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn prev_block_hash(&self) -> Hash {
        self.header.prev_block_hash
    }

    pub fn data_hash(&self) -> Hash {
        self.header.data_hash
    }

    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn producer(&self) -> Option<&PublicKey> {
        self.producer.as_ref()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }
}

/// The fixed height-0 block every node starts from.
///
/// It holds one unsigned coinbase transaction and carries no producer
/// signature, so every node derives the same genesis hash.
pub fn genesis_block() -> Block {
    let transactions = vec![Transaction::coinbase(GENESIS_COINBASE_VALUE)];
    let header = Header {
        version: BLOCK_VERSION,
        data_hash: data_hash(&transactions),
        prev_block_hash: Hash::zero(),
        height: 0,
        timestamp: 0,
    };
    Block::new(header, transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bytes;
    use crate::types::encoding::{Decode, DecodeError};
    use crate::utils::test_utils::utils::signed_tx;

    fn signed_block(transactions: Vec<Transaction>) -> (Block, PrivateKey) {
        let key = PrivateKey::new();
        let block = Block::from_previous_header(genesis_block().header(), transactions)
            .unwrap()
            .sign(&key)
            .unwrap();
        (block, key)
    }

    #[test]
    fn from_previous_header_links_to_parent() {
        let genesis = genesis_block();
        let block = Block::from_previous_header(genesis.header(), vec![]).unwrap();
        assert_eq!(block.height(), 1);
        assert_eq!(block.prev_block_hash(), genesis.hash());
        assert_eq!(block.header().version, BLOCK_VERSION);
        assert!(block.timestamp() > 0);
        assert!(block.check_data_hash().is_ok());
    }

    #[test]
    fn signed_block_verifies() {
        let (block, key) = signed_block(vec![signed_tx(b"a"), signed_tx(b"b")]);
        assert_eq!(block.producer(), Some(&key.public_key()));
        assert!(block.verify().is_ok());
    }

    #[test]
    fn unsigned_block_is_rejected() {
        let block = Block::from_previous_header(genesis_block().header(), vec![]).unwrap();
        assert!(matches!(
            block.verify(),
            Err(BlockError::Signature(SignatureError::MissingSignature))
        ));
    }

    #[test]
    fn tampered_header_fails_signature() {
        let (mut block, _) = signed_block(vec![]);
        block.header.timestamp += 1;
        assert!(matches!(
            block.verify(),
            Err(BlockError::Signature(SignatureError::InvalidSignature))
        ));
    }

    #[test]
    fn swapped_transaction_fails_data_hash() {
        let (mut block, _) = signed_block(vec![signed_tx(b"a")]);
        block.transactions[0] = signed_tx(b"other");
        assert!(matches!(
            block.verify(),
            Err(BlockError::DataHashMismatch { .. })
        ));
    }

    #[test]
    fn tampered_payload_fails_transaction_signature() {
        let (mut block, _) = signed_block(vec![signed_tx(b"a")]);
        block.transactions[0].payload = Bytes::from_static(b"b");
        assert!(matches!(
            block.verify(),
            Err(BlockError::Transaction {
                source: SignatureError::InvalidSignature,
                ..
            })
        ));
    }

    #[test]
    fn unsigned_transaction_fails_block() {
        let (block, key) = signed_block(vec![]);
        let header = Header {
            data_hash: data_hash(&[Transaction::new(&b"x"[..])]),
            ..*block.header()
        };
        let block = Block::new(header, vec![Transaction::new(&b"x"[..])])
            .sign(&key)
            .unwrap();
        assert!(matches!(
            block.verify(),
            Err(BlockError::Transaction {
                source: SignatureError::MissingSignature,
                ..
            })
        ));
    }

    // The signature covers the header only. Rewriting data_hash to match a
    // tampered list makes the data check pass, and only the header signature
    // still catches the change.
    #[test]
    fn data_hash_rewrite_is_caught_by_header_signature_only() {
        let (mut block, _) = signed_block(vec![signed_tx(b"a")]);
        block.transactions[0] = signed_tx(b"forged");
        block.header.data_hash = data_hash(&block.transactions);

        assert!(block.check_data_hash().is_ok());
        assert!(matches!(
            block.verify(),
            Err(BlockError::Signature(SignatureError::InvalidSignature))
        ));
    }

    #[test]
    fn hash_is_stable_and_memoized() {
        let (block, _) = signed_block(vec![signed_tx(b"a")]);
        let first = block.hash();
        assert_eq!(block.hash(), first);
        assert_eq!(block.cached_hash.get(), Some(first));
        assert_eq!(first, block.header().hash());
    }

    #[test]
    fn every_header_field_changes_the_hash() {
        let header = *signed_block(vec![]).0.header();
        let base = header.hash();
        let variants = [
            Header { version: 2, ..header },
            Header { data_hash: Hash::of(&1u8), ..header },
            Header { prev_block_hash: Hash::of(&2u8), ..header },
            Header { height: 7, ..header },
            Header { timestamp: header.timestamp + 1, ..header },
        ];
        for variant in variants {
            assert_ne!(variant.hash(), base);
        }
        assert_eq!(header.hash(), base);
    }

    #[test]
    fn signature_does_not_change_hash() {
        let block = Block::from_previous_header(genesis_block().header(), vec![]).unwrap();
        let unsigned = block.hash();
        assert_eq!(block.sign(&PrivateKey::new()).unwrap().hash(), unsigned);
    }

    #[test]
    fn codec_reproduces_hash() {
        let (block, _) = signed_block(vec![signed_tx(b"a"), signed_tx(b"b")]);
        let decoded = Block::from_bytes(&block.encode_to_vec()).unwrap();
        assert_eq!(decoded.hash(), block.hash());
        assert_eq!(decoded.transactions(), block.transactions());
        assert!(decoded.verify().is_ok());
    }

    #[test]
    fn truncated_block_fails_to_decode() {
        let (block, _) = signed_block(vec![signed_tx(b"a")]);
        let encoded = block.encode_to_vec();
        assert_eq!(
            Block::from_bytes(&encoded[..encoded.len() - 3]).unwrap_err(),
            DecodeError::UnexpectedEof
        );
    }

    #[test]
    fn oversized_transaction_list_is_rejected() {
        let big = Transaction::new(vec![0u8; MAX_BLOCK_DATA_BYTES]);
        assert!(matches!(
            Block::from_previous_header(genesis_block().header(), vec![big]),
            Err(BlockError::Encoding { .. })
        ));
    }

    #[test]
    fn largest_transaction_fits_alone() {
        let overhead = Transaction::new(Vec::new()).encoded_len();
        let tx = Transaction::new(vec![0u8; MAX_TRANSACTION_BYTES - overhead]);
        assert_eq!(tx.encoded_len(), MAX_TRANSACTION_BYTES);
        assert!(Block::from_previous_header(genesis_block().header(), vec![tx]).is_ok());
    }

    #[test]
    fn with_transactions_keeps_header() {
        let (block, _) = signed_block(vec![signed_tx(b"a"), signed_tx(b"b")]);
        let trimmed = block.with_transactions(vec![block.transactions()[1].clone()]);
        assert_eq!(trimmed.hash(), block.hash());
        assert_eq!(trimmed.transactions().len(), 1);
        assert!(matches!(
            trimmed.check_data_hash(),
            Err(BlockError::DataHashMismatch { .. })
        ));
    }

    #[test]
    fn genesis_is_identical_everywhere() {
        let a = genesis_block();
        let b = genesis_block();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.height(), 0);
        assert!(a.prev_block_hash().is_zero());
        assert_eq!(a.transactions()[0].value, GENESIS_COINBASE_VALUE);
        assert!(a.check_data_hash().is_ok());
    }
}
