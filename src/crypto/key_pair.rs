//! Schnorr key pairs on secp256k1.
//!
//! Public keys travel on the wire as their 32-byte x-only encoding and
//! signatures as 64 raw bytes. Addresses are derived from the public key's
//! SHA3-256 digest.

use crate::types::address::Address;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::Hash;
use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{SigningKey, VerifyingKey};
use rand_core::OsRng;
use std::fmt;
use thiserror::Error;

/// Rejection of a signed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing signature")]
    MissingSignature,
    #[error("invalid signature")]
    InvalidSignature,
}

/// The signer refused to produce a signature.
#[derive(Debug, Error)]
#[error("signing failed: {0}")]
pub struct SigningError(String);

#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

impl PrivateKey {
    /// Generates a fresh key from OS entropy.
    pub fn new() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Returns `None` if the bytes are not a valid secp256k1 scalar.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        SigningKey::from_bytes(bytes).ok().map(|key| Self { key })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.key.to_bytes().into()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(*self.key.verifying_key())
    }

    pub fn sign(&self, data: &[u8]) -> Result<Signature, SigningError> {
        self.key
            .try_sign(data)
            .map(Signature)
            .map_err(|e| SigningError(e.to_string()))
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.public_key().address())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    key: VerifyingKey,
    address: Address,
}

impl PublicKey {
    fn from_verifying_key(key: VerifyingKey) -> Self {
        let digest = Hash::of(&<[u8; 32]>::from(key.to_bytes()));
        Self {
            key,
            address: Address::from_key_digest(&digest),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.key.to_bytes().into()
    }

    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        self.key.verify(data, &signature.0).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl Encode for PublicKey {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.to_bytes());
    }
}

impl Decode for PublicKey {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let raw = <[u8; 32]>::decode(input)?;
        let key = VerifyingKey::from_bytes(&raw).map_err(|_| DecodeError::InvalidValue)?;
        Ok(Self::from_verifying_key(key))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(k256::schnorr::Signature);

impl Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.to_bytes()[..8]))
    }
}

impl Encode for Signature {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.to_bytes());
    }
}

impl Decode for Signature {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let raw = <[u8; 64]>::decode(input)?;
        k256::schnorr::Signature::try_from(raw.as_slice())
            .map(Signature)
            .map_err(|_| DecodeError::InvalidValue)
    }
}
