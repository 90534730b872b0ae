//! Signed transactions.

use crate::crypto::key_pair::{PrivateKey, PublicKey, Signature, SignatureError, SigningError};
use crate::types::Bytes;
use crate::types::encoding::Encode;
use crate::types::hash::{Hash, HashCache};
use ledger_derive::BinaryCodec;
use rand_core::{OsRng, RngCore};

/// A unit of ledger data: an opaque payload plus optional native-transfer
/// fields, signed by its sender.
///
/// The hash covers `payload`, `to`, `value`, `from` and `nonce` in that order.
/// It never covers the signature, `first_seen` or the hash cache.
#[derive(Debug, Clone, BinaryCodec)]
pub struct Transaction {
    /// Opaque bytes, executed as contract bytecode when non-empty.
    pub payload: Bytes,
    pub to: Option<PublicKey>,
    pub value: u64,
    /// Set by [`Transaction::sign`].
    pub from: Option<PublicKey>,
    /// Random salt so that identical payloads hash differently.
    pub nonce: u64,
    pub signature: Option<Signature>,

    /// Local admission time in unix nanoseconds, used for mempool ordering.
    #[binary_codec(skip)]
    pub first_seen: i64,
    #[binary_codec(skip)]
    cached_hash: HashCache,
}

impl Transaction {
    /// Creates an unsigned transaction carrying `payload`.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            to: None,
            value: 0,
            from: None,
            nonce: OsRng.next_u64(),
            signature: None,
            first_seen: 0,
            cached_hash: HashCache::new(),
        }
    }

    /// Creates an unsigned native transfer of `value` to `to`.
    pub fn transfer(to: PublicKey, value: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            to: Some(to),
            value,
            ..Self::new(payload)
        }
    }

    /// Unsigned minting transaction with a fixed nonce, so it hashes the
    /// same on every node.
    pub fn coinbase(value: u64) -> Self {
        Self {
            value,
            nonce: 0,
            ..Self::new(Bytes::new())
        }
    }

    /// Content hash, computed on first call and memoized.
    pub fn hash(&self) -> Hash {
        self.cached_hash.get_or_compute(|| self.content_hash())
    }

    fn content_hash(&self) -> Hash {
        let mut builder = Hash::sha3();
        self.payload.encode(&mut builder);
        self.to.encode(&mut builder);
        self.value.encode(&mut builder);
        self.from.encode(&mut builder);
        self.nonce.encode(&mut builder);
        builder.finalize()
    }

    /// Sets `from` to the signer and signs the content hash.
    ///
    /// Consumes the transaction and hands back a new value, so a hash cached
    /// before signing is discarded along with the old `from`.
    pub fn sign(mut self, key: &PrivateKey) -> Result<Self, SigningError> {
        self.from = Some(key.public_key());
        let hash = self.content_hash();
        self.signature = Some(key.sign(hash.as_slice())?);
        self.cached_hash = HashCache::new();
        Ok(self)
    }

    /// Checks the signature against `from` and the current field values.
    pub fn verify(&self) -> Result<(), SignatureError> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(SignatureError::MissingSignature)?;
        let from = self.from.as_ref().ok_or(SignatureError::InvalidSignature)?;

        if from.verify(self.content_hash().as_slice(), signature) {
            Ok(())
        } else {
            Err(SignatureError::InvalidSignature)
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
            && self.to == other.to
            && self.value == other.value
            && self.from == other.from
            && self.nonce == other.nonce
            && self.signature == other.signature
    }
}

impl Eq for Transaction {}
