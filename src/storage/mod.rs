//! Chain store and mempool.
//!
//! - [`storage_trait`]: the [`Storage`](storage_trait::Storage) interface of the append-only chain store
//! - [`memory_storage`]: in-memory implementation indexed by height, block hash and transaction hash
//! - [`txpool`]: bounded mempool of unconfirmed transactions

pub mod memory_storage;
pub mod storage_trait;
pub mod txpool;
