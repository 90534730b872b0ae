//! Peer-to-peer ledger node.
//!
//! Signed blocks are validated against a single chain, their transaction
//! payloads run on a small stack machine, and nodes catch up with each
//! other by exchanging heights and block ranges.

pub mod core;
pub mod crypto;
pub mod network;
pub mod storage;
pub mod types;
pub mod utils;
pub mod virtual_machine;
