//! Signing keys, public keys and signatures.

pub mod key_pair;
