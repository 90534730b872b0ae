//! Peer-to-peer networking for ledger nodes.
//!
//! - [`transport`]: Transport trait, events and error types
//! - [`local_transport`]: In-memory transport for tests and simulations
//! - [`tcp_transport`]: Length-prefixed frames over TCP
//! - [`message`]: Protocol messages for gossip and sync
//! - [`server`]: Node event loop, block production and peer sync
//! - [`api`]: HTTP access to a running node

pub mod api;
pub mod local_transport;
pub mod message;
pub mod server;
pub mod tcp_transport;
pub mod transport;
