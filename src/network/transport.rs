//! Core transport abstractions for network communication.
//!
//! Defines the [`Transport`] trait and the events a transport reports to the
//! server: peers coming and going, and raw messages arriving.

use crate::network::message::Rpc;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc::Receiver;

/// Boxed future returned by transport operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Peer with the specified address was not found.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// Failed to send message to the specified address.
    #[error("failed to send message to {0}")]
    SendFailed(String),

    /// Failed to reach the specified address.
    #[error("failed to connect to {addr}: {reason}")]
    ConnectFailed { addr: String, reason: String },
}

/// What a transport reports to its consumer.
#[derive(Debug)]
pub enum TransportEvent {
    /// A peer is reachable under this address.
    Connected(String),
    /// The peer at this address is gone.
    Disconnected(String),
    Message(Rpc),
}

/// Message passing between nodes.
///
/// Peers are identified by their listen address. Messages from a single peer
/// arrive in the order they were sent.
pub trait Transport: Send + Sync + 'static {
    /// Takes the event stream. Only the first call returns a receiver.
    fn consume(&self) -> Option<Receiver<TransportEvent>>;

    /// Dials `addr` and registers it as a peer.
    fn connect(&self, addr: String) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Sends `payload` to the peer at `to`.
    ///
    /// # Errors
    /// Returns `TransportError::PeerNotFound` if the peer is not connected.
    /// Returns `TransportError::SendFailed` if the message cannot be sent.
    fn send_message(
        &self,
        to: String,
        payload: Bytes,
    ) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Sends `payload` to every connected peer except `except`.
    ///
    /// Every peer is attempted; the first failure is returned.
    fn broadcast(
        &self,
        except: Option<String>,
        payload: Bytes,
    ) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Returns the local address of this transport.
    fn addr(&self) -> String;

    /// Addresses of the currently connected peers.
    fn peers(&self) -> Vec<String>;
}
