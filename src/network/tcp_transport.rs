//! TCP-based transport implementation for real network communication.
//!
//! Provides length-prefixed framing over TCP with per-peer connection management.
//! Uses split read/write halves for concurrent IO on each connection.
//!
//! # Connection model
//!
//! - The dialing side sends a hello frame carrying its own listen address.
//! - Both sides key the connection by the peer's listen address, so a single
//!   TCP stream carries traffic in both directions.
//! - Writers are removed when the read loop terminates, which is also when the
//!   `Disconnected` event is emitted.
//!
//! # Frame format
//!
//! ```text
//! [len: u32 LE][payload: len bytes]
//! ```
//! Empty frames and frames above [`MAX_FRAME_LEN`] end the connection.

use crate::network::message::Rpc;
use crate::network::transport::{BoxFuture, Transport, TransportError, TransportEvent};
use crate::{debug, warn};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::time::{Duration, timeout};

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const HELLO_TIMEOUT: Duration = Duration::from_secs(3);

type Writer = Arc<AsyncMutex<OwnedWriteHalf>>;

/// Reads one length-prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid frame length {len}"),
        ));
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(frame)
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    let len = u32::try_from(data.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await
}

/// TCP transport for ledger network communication.
///
/// Manages TCP connections to peers with length-prefixed message framing.
/// Each peer connection is stored as a write half keyed by listen address.
pub struct TcpTransport {
    /// Address this transport listens on.
    listen_address: String,
    writers: Arc<DashMap<String, Writer>>,
    tx: Sender<TransportEvent>,
    rx: Mutex<Option<Receiver<TransportEvent>>>,
}

impl TcpTransport {
    /// Binds `address` and starts accepting peers.
    ///
    /// Port 0 picks a free port; [`Transport::addr`] reports the bound one.
    pub async fn bind(address: &str) -> io::Result<Arc<Self>> {
        let listener = TcpListener::bind(address).await?;
        let listen_address = listener.local_addr()?.to_string();
        let (tx, rx) = channel(1024);

        let transport = Arc::new(Self {
            listen_address,
            writers: Arc::new(DashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        });

        tokio::spawn(transport.clone().accept_loop(listener));
        Ok(transport)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.handle_inbound(stream).await {
                            debug!("inbound connection rejected"; remote = remote, error = e);
                        }
                    });
                }
                Err(e) => warn!("accept failed"; addr = self.listen_address, error = e),
            }
        }
    }

    async fn handle_inbound(self: Arc<Self>, stream: TcpStream) -> io::Result<()> {
        let (mut reader, writer) = stream.into_split();

        let hello = timeout(HELLO_TIMEOUT, read_frame(&mut reader))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no hello frame"))??;
        let peer = String::from_utf8(hello)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "hello is not utf-8"))?;

        Self::register(&self.writers, &self.tx, peer, reader, writer).await;
        Ok(())
    }

    /// Stores the writer, reports the peer and starts its read loop.
    async fn register(
        writers: &Arc<DashMap<String, Writer>>,
        tx: &Sender<TransportEvent>,
        peer: String,
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
    ) {
        let writer: Writer = Arc::new(AsyncMutex::new(writer));
        writers.insert(peer.clone(), writer.clone());
        let _ = tx.send(TransportEvent::Connected(peer.clone())).await;

        let writers = writers.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            Self::read_loop(&peer, reader, &tx).await;
            writers.remove_if(&peer, |_, current| Arc::ptr_eq(current, &writer));
            let _ = tx.send(TransportEvent::Disconnected(peer)).await;
        });
    }

    async fn read_loop(peer: &str, mut reader: OwnedReadHalf, tx: &Sender<TransportEvent>) {
        loop {
            let frame = match read_frame(&mut reader).await {
                Ok(frame) => frame,
                Err(e) => {
                    if e.kind() != io::ErrorKind::UnexpectedEof {
                        debug!("peer read failed"; peer = peer, error = e);
                    }
                    return;
                }
            };

            let rpc = Rpc::new(peer, frame);
            if tx.send(TransportEvent::Message(rpc)).await.is_err() {
                return;
            }
        }
    }

    fn writer(&self, to: &str) -> Option<Writer> {
        self.writers.get(to).map(|entry| entry.value().clone())
    }
}

impl Transport for TcpTransport {
    fn consume(&self) -> Option<Receiver<TransportEvent>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn connect(&self, addr: String) -> BoxFuture<'static, Result<(), TransportError>> {
        let listen_address = self.listen_address.clone();
        let writers = self.writers.clone();
        let tx = self.tx.clone();
        let already_connected = self.writers.contains_key(&addr);

        Box::pin(async move {
            if already_connected {
                return Ok(());
            }

            let failed = |e: io::Error| TransportError::ConnectFailed {
                addr: addr.clone(),
                reason: e.to_string(),
            };
            let stream = TcpStream::connect(&addr).await.map_err(failed)?;
            let (reader, mut writer) = stream.into_split();
            write_frame(&mut writer, listen_address.as_bytes())
                .await
                .map_err(failed)?;

            Self::register(&writers, &tx, addr.clone(), reader, writer).await;
            Ok(())
        })
    }

    fn send_message(
        &self,
        to: String,
        payload: Bytes,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let writer = self.writer(&to);

        Box::pin(async move {
            let Some(writer) = writer else {
                return Err(TransportError::PeerNotFound(to));
            };

            let mut guard = writer.lock().await;
            write_frame(&mut *guard, &payload)
                .await
                .map_err(|_| TransportError::SendFailed(to))
        })
    }

    fn broadcast(
        &self,
        except: Option<String>,
        payload: Bytes,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let targets: Vec<(String, Writer)> = self
            .writers
            .iter()
            .filter(|entry| except.as_deref() != Some(entry.key().as_str()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        Box::pin(async move {
            let mut result = Ok(());
            for (to, writer) in targets {
                let mut guard = writer.lock().await;
                if write_frame(&mut *guard, &payload).await.is_err() && result.is_ok() {
                    result = Err(TransportError::SendFailed(to));
                }
            }
            result
        })
    }

    fn addr(&self) -> String {
        self.listen_address.clone()
    }

    fn peers(&self) -> Vec<String> {
        self.writers.iter().map(|entry| entry.key().clone()).collect()
    }
}
