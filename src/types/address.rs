//! 20-byte account identifiers.

use crate::types::hash::Hash;
use ledger_derive::BinaryCodec;
use std::fmt;

pub const ADDRESS_LEN: usize = 20;

/// Account identifier: the last 20 bytes of the public key's digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BinaryCodec)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    pub fn from_key_digest(digest: &Hash) -> Address {
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&digest.0[digest.0.len() - ADDRESS_LEN..]);
        Address(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}
