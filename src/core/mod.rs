//! Core ledger data structures.
//!
//! This module contains the fundamental building blocks of the chain:
//! - `Transaction`: signed payload with optional transfer fields
//! - `Block`: header plus ordered transactions, signed by its producer
//! - `Validator`: the single gate in front of the chain store
//! - `Blockchain`: validation, contract execution and storage together

pub mod block;
pub mod blockchain;
pub mod transaction;
pub mod validator;
