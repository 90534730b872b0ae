//! 32-byte SHA3-256 digests and the memo used to cache them.

use crate::types::encoding::{Encode, EncodeSink};
use ledger_derive::BinaryCodec;
use sha3::{Digest, Sha3_256};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub const HASH_LEN: usize = 32;

/// Content digest of a header or transaction.
///
/// The all-zero value stands for "no hash", e.g. the previous-block link of
/// the genesis header.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BinaryCodec)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub const fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn sha3() -> HashBuilder {
        HashBuilder::default()
    }

    /// Digest of the deterministic encoding of `value`.
    pub fn of<T: Encode + ?Sized>(value: &T) -> Hash {
        let mut builder = Hash::sha3();
        value.encode(&mut builder);
        builder.finalize()
    }

    /// First four bytes in hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; HASH_LEN];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)?;
        Ok(Hash(out))
    }
}

/// Incremental SHA3-256 over encoded values.
#[derive(Default)]
pub struct HashBuilder {
    hasher: Sha3_256,
}

impl HashBuilder {
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}

/// Lazily computed hash attached to an otherwise immutable value.
///
/// The memo is filled on first access and never reset; a value whose hashed
/// fields change must be rebuilt so that it starts with an empty cache.
#[derive(Default)]
pub struct HashCache(OnceLock<Hash>);

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(&self, compute: impl FnOnce() -> Hash) -> Hash {
        *self.0.get_or_init(compute)
    }

    pub fn get(&self) -> Option<Hash> {
        self.0.get().copied()
    }
}

impl Clone for HashCache {
    fn clone(&self) -> Self {
        let cache = HashCache::new();
        if let Some(hash) = self.get() {
            let _ = cache.0.set(hash);
        }
        cache
    }
}

impl fmt::Debug for HashCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(hash) => write!(f, "HashCache({})", hash.short()),
            None => f.write_str("HashCache(empty)"),
        }
    }
}
