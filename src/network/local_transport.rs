//! Channel-backed transport for running several nodes in one process.
//!
//! Links are made explicitly with [`LocalTransport::connect_to`]; nothing is
//! dialed.

use crate::network::message::Rpc;
use crate::network::transport::{BoxFuture, Transport, TransportError, TransportEvent};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{Receiver, Sender, channel};

/// A node's end of the in-process network.
///
/// Each linked peer is stored as the sender half of that peer's event
/// channel, keyed by its address.
pub struct LocalTransport {
    address: String,
    peers: DashMap<String, Sender<TransportEvent>>,
    tx: Sender<TransportEvent>,
    rx: Mutex<Option<Receiver<TransportEvent>>>,
}

impl LocalTransport {
    /// Unlinked transport reachable as `address`.
    pub fn new(address: &str) -> Arc<LocalTransport> {
        let (tx, rx) = channel(1024);

        Arc::new(LocalTransport {
            address: address.to_string(),
            peers: DashMap::new(),
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Links both transports.
    ///
    /// Both transports are added to each other's routing tables and both
    /// report a `Connected` event.
    pub async fn connect_to(&self, other: &LocalTransport) {
        self.peers.insert(other.address.clone(), other.tx.clone());
        other.peers.insert(self.address.clone(), self.tx.clone());

        let _ = self
            .tx
            .send(TransportEvent::Connected(other.address.clone()))
            .await;
        let _ = other
            .tx
            .send(TransportEvent::Connected(self.address.clone()))
            .await;
    }

    /// Removes the link to `other` on both sides.
    pub async fn disconnect_from(&self, other: &LocalTransport) {
        self.peers.remove(&other.address);
        other.peers.remove(&self.address);

        let _ = self
            .tx
            .send(TransportEvent::Disconnected(other.address.clone()))
            .await;
        let _ = other
            .tx
            .send(TransportEvent::Disconnected(self.address.clone()))
            .await;
    }
}

impl Transport for LocalTransport {
    fn consume(&self) -> Option<Receiver<TransportEvent>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Local peers are linked with [`LocalTransport::connect_to`]; dialing
    /// only succeeds for an address that is already linked.
    fn connect(&self, addr: String) -> BoxFuture<'static, Result<(), TransportError>> {
        let known = self.peers.contains_key(&addr);
        Box::pin(async move {
            if known {
                Ok(())
            } else {
                Err(TransportError::PeerNotFound(addr))
            }
        })
    }

    fn send_message(
        &self,
        to: String,
        payload: Bytes,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let peer = self.peers.get(&to).map(|entry| entry.value().clone());
        let address = self.address.clone();

        Box::pin(async move {
            let Some(peer) = peer else {
                return Err(TransportError::PeerNotFound(to));
            };

            peer.send(TransportEvent::Message(Rpc::new(address, payload)))
                .await
                .map_err(|_| TransportError::SendFailed(to))
        })
    }

    fn broadcast(
        &self,
        except: Option<String>,
        payload: Bytes,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let targets: Vec<(String, Sender<TransportEvent>)> = self
            .peers
            .iter()
            .filter(|entry| except.as_deref() != Some(entry.key().as_str()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let address = self.address.clone();

        Box::pin(async move {
            let mut result = Ok(());
            for (to, peer) in targets {
                let rpc = Rpc::new(address.clone(), payload.clone());
                if peer.send(TransportEvent::Message(rpc)).await.is_err() && result.is_ok() {
                    result = Err(TransportError::SendFailed(to));
                }
            }
            result
        })
    }

    fn addr(&self) -> String {
        self.address.clone()
    }

    fn peers(&self) -> Vec<String> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_message(rx: &mut Receiver<TransportEvent>) -> Rpc {
        loop {
            match rx.recv().await.unwrap() {
                TransportEvent::Message(rpc) => return rpc,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn connect_is_bidirectional() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        let mut rx_a = tr_a.consume().unwrap();
        let mut rx_b = tr_b.consume().unwrap();

        tr_a.connect_to(&tr_b).await;

        assert_eq!(tr_a.peers(), vec!["B".to_string()]);
        assert_eq!(tr_b.peers(), vec!["A".to_string()]);
        assert!(matches!(rx_a.recv().await, Some(TransportEvent::Connected(addr)) if addr == "B"));
        assert!(matches!(rx_b.recv().await, Some(TransportEvent::Connected(addr)) if addr == "A"));
    }

    #[tokio::test]
    async fn consume_only_once() {
        let tr = LocalTransport::new("A");
        assert!(tr.consume().is_some());
        assert!(tr.consume().is_none());
    }

    #[tokio::test]
    async fn send_reaches_linked_peer() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        tr_a.connect_to(&tr_b).await;

        let mut rx = tr_b.consume().unwrap();

        let payload = Bytes::from("The first message.");
        tr_a.send_message(tr_b.addr(), payload.clone())
            .await
            .unwrap();

        let received = next_message(&mut rx).await;
        assert_eq!(received.from, "A");
        assert_eq!(received.payload, payload);
    }

    #[tokio::test]
    async fn broadcast_skips_excluded_peer() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        let tr_c = LocalTransport::new("C");
        tr_a.connect_to(&tr_b).await;
        tr_a.connect_to(&tr_c).await;

        let mut rx_b = tr_b.consume().unwrap();
        let mut rx_c = tr_c.consume().unwrap();

        tr_a.broadcast(Some("B".into()), Bytes::from("first"))
            .await
            .unwrap();
        tr_a.broadcast(None, Bytes::from("second")).await.unwrap();

        assert_eq!(next_message(&mut rx_c).await.payload, Bytes::from("first"));
        assert_eq!(next_message(&mut rx_c).await.payload, Bytes::from("second"));
        assert_eq!(next_message(&mut rx_b).await.payload, Bytes::from("second"));
    }

    #[tokio::test]
    async fn send_to_nonexistent_peer_fails() {
        let tr_a = LocalTransport::new("A");

        let result = tr_a
            .send_message("NonExistent".to_string(), Bytes::from("test"))
            .await;
        assert!(matches!(result, Err(TransportError::PeerNotFound(_))));
        assert!(tr_a.connect("NonExistent".into()).await.is_err());
    }

    #[tokio::test]
    async fn disconnect_removes_both_sides() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        tr_a.connect_to(&tr_b).await;
        assert!(tr_a.connect("B".into()).await.is_ok());

        tr_a.disconnect_from(&tr_b).await;
        assert!(tr_a.peers().is_empty());
        assert!(tr_b.peers().is_empty());

        let mut rx_b = tr_b.consume().unwrap();
        assert!(matches!(rx_b.recv().await, Some(TransportEvent::Connected(_))));
        assert!(matches!(rx_b.recv().await, Some(TransportEvent::Disconnected(addr)) if addr == "A"));
    }

    #[tokio::test]
    async fn links_are_not_transitive() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        let tr_c = LocalTransport::new("C");

        tr_a.connect_to(&tr_b).await;
        tr_b.connect_to(&tr_c).await;

        let mut rx_b = tr_b.consume().unwrap();

        tr_a.send_message(tr_b.addr(), Bytes::from("from A"))
            .await
            .unwrap();
        assert_eq!(next_message(&mut rx_b).await.from, "A");

        let result = tr_a.send_message(tr_c.addr(), Bytes::from("test")).await;
        assert!(result.is_err());
    }
}
