//! Primitive value types shared across the node.

pub mod address;
pub mod encoding;
pub mod hash;

pub use bytes::Bytes;
