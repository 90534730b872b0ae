//! Node event loop: peer messages, block production and chain sync.
//!
//! A single loop owns every chain and mempool mutation. It multiplexes:
//! - transport events (peer connected, disconnected, message received)
//! - transactions submitted locally through [`Server::tx_sender`]
//! - the block production ticker, on validator nodes only
//! - the shutdown signal
//!
//! Catching up with a peer that reports a higher height runs in a separate
//! task per peer, which keeps asking for blocks until the local chain
//! reaches the height that peer announced.

use crate::core::block::{Block, BlockError, MAX_TRANSACTION_BYTES, genesis_block};
use crate::core::blockchain::Blockchain;
use crate::core::transaction::Transaction;
use crate::core::validator::{BlockValidator, ChainError};
use crate::crypto::key_pair::{PrivateKey, SignatureError};
use crate::network::api::{self, ApiState};
use crate::network::message::{
    BlocksMessage, DecodedMessage, GetBlocksMessage, PROTOCOL_VERSION, Payload, StatusMessage,
};
use crate::network::transport::{Transport, TransportError, TransportEvent};
use crate::storage::memory_storage::MemoryStorage;
use crate::storage::storage_trait::StorageError;
use crate::storage::txpool::{DEFAULT_MAX_POOL_LENGTH, TxPool};
use crate::types::encoding::{DecodeError, Encode};
use crate::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval, interval_at};

/// Most blocks sent in one `Blocks` reply.
pub const MAX_BLOCKS_PER_REPLY: usize = 256;

/// Byte budget of one `Blocks` reply, below the transport's frame limit.
pub const MAX_REPLY_BYTES: usize = 12 * 1024 * 1024;

pub const DEFAULT_BLOCK_TIME: Duration = Duration::from_secs(5);
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(3);

/// The chain type every node runs.
pub type Chain = Blockchain<BlockValidator, MemoryStorage>;

/// Configuration options for the server.
pub struct ServerOpts {
    /// Node id, reported in `Status` and attached to log lines.
    pub id: String,
    pub transport: Arc<dyn Transport>,
    /// If set, this node becomes a validator node.
    pub private_key: Option<PrivateKey>,
    /// How often new blocks are created.
    pub block_time: Duration,
    /// How often a lagging node asks a peer for blocks.
    pub sync_interval: Duration,
    /// The max capacity of the transaction pool hosted on this node.
    pub max_pool_length: usize,
    /// Addresses dialed at startup.
    pub seed_nodes: Vec<String>,
    /// Listen address of the HTTP API, if enabled.
    pub api_addr: Option<String>,
}

impl ServerOpts {
    /// Non-validator options with default timings.
    pub fn new(id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            transport,
            private_key: None,
            block_time: DEFAULT_BLOCK_TIME,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            max_pool_length: DEFAULT_MAX_POOL_LENGTH,
            seed_nodes: Vec::new(),
            api_addr: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("malformed message: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid transaction: {0}")]
    Signature(#[from] SignatureError),
    #[error("transaction encodes to {size} bytes, limit is {limit}")]
    TransactionTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("transport events were already consumed")]
    TransportConsumed,
    #[error("api: {0}")]
    Io(#[from] std::io::Error),
}

/// Block-request loop running for one peer.
struct SyncTask {
    /// Highest height the peer has announced.
    target: Arc<AtomicU32>,
    handle: JoinHandle<()>,
}

/// A ledger node.
///
/// Holds the chain and the mempool, and drives both from the messages its
/// transport delivers.
pub struct Server {
    id: String,
    transport: Arc<dyn Transport>,
    private_key: Option<PrivateKey>,
    block_time: Duration,
    sync_interval: Duration,
    seed_nodes: Vec<String>,
    api_addr: Option<String>,
    chain: Arc<Chain>,
    tx_pool: Arc<TxPool>,
    sync_tasks: HashMap<String, SyncTask>,
    tx_sender: Sender<Transaction>,
    tx_receiver: Option<Receiver<Transaction>>,
}

impl Server {
    /// Creates a node holding only the genesis block.
    pub fn new(options: ServerOpts) -> Self {
        let (tx_sender, tx_receiver) = channel(1024);

        Server {
            id: options.id,
            transport: options.transport,
            private_key: options.private_key,
            block_time: options.block_time,
            sync_interval: options.sync_interval,
            seed_nodes: options.seed_nodes,
            api_addr: options.api_addr,
            chain: Arc::new(Blockchain::new(genesis_block())),
            tx_pool: Arc::new(TxPool::new(options.max_pool_length)),
            sync_tasks: HashMap::new(),
            tx_sender,
            tx_receiver: Some(tx_receiver),
        }
    }

    pub fn chain(&self) -> Arc<Chain> {
        self.chain.clone()
    }

    pub fn tx_pool(&self) -> Arc<TxPool> {
        self.tx_pool.clone()
    }

    /// Entry point for locally submitted transactions. They follow the same
    /// path as a transaction received from a peer.
    pub fn tx_sender(&self) -> Sender<Transaction> {
        self.tx_sender.clone()
    }

    pub fn is_validator(&self) -> bool {
        self.private_key.is_some()
    }

    /// Runs the event loop until `shutdown` fires or every input closes.
    pub async fn start(mut self, mut shutdown: oneshot::Receiver<()>) -> Result<(), ServerError> {
        let mut events = self
            .transport
            .consume()
            .ok_or(ServerError::TransportConsumed)?;
        let mut local_txs = self
            .tx_receiver
            .take()
            .ok_or(ServerError::TransportConsumed)?;

        if let Some(addr) = &self.api_addr {
            let listener = TcpListener::bind(addr).await?;
            info!("api listening"; id = self.id, addr = addr);
            let state = ApiState {
                id: self.id.clone(),
                chain: self.chain.clone(),
                tx_sender: self.tx_sender.clone(),
            };
            tokio::spawn(api::serve(listener, state));
        }

        for seed in &self.seed_nodes {
            let dial = self.transport.connect(seed.clone());
            let (id, seed) = (self.id.clone(), seed.clone());
            tokio::spawn(async move {
                if let Err(e) = dial.await {
                    warn!("seed node unreachable"; id = id, seed = seed, error = e);
                }
            });
        }

        info!(
            "server started";
            id = self.id,
            addr = self.transport.addr(),
            validator = self.is_validator()
        );

        let mut ticker = interval_at(Instant::now() + self.block_time, self.block_time);
        let is_validator = self.is_validator();

        loop {
            tokio::select! {
                Some(event) = events.recv() => self.handle_event(event),
                Some(tx) = local_txs.recv() => {
                    let hash = tx.hash();
                    if let Err(e) = self.handle_transaction(None, tx) {
                        warn!("local transaction rejected"; id = self.id, tx = hash, error = e);
                    }
                }
                _ = ticker.tick(), if is_validator => {
                    if let Err(e) = self.create_new_block() {
                        warn!("block production failed"; id = self.id, error = e);
                    }
                }
                _ = &mut shutdown => break,
                else => break,
            }
        }

        for (_, task) in self.sync_tasks.drain() {
            task.handle.abort();
        }
        info!("server stopped"; id = self.id);
        Ok(())
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(peer) => {
                info!("peer connected"; id = self.id, peer = peer);
                self.send(peer, Payload::GetStatus);
            }
            TransportEvent::Disconnected(peer) => {
                info!("peer disconnected"; id = self.id, peer = peer);
                if let Some(task) = self.sync_tasks.remove(&peer) {
                    task.handle.abort();
                }
            }
            TransportEvent::Message(rpc) => {
                let from = rpc.from.clone();
                let result = rpc
                    .decode()
                    .map_err(ServerError::from)
                    .and_then(|message| self.process_message(message));
                if let Err(e) = result {
                    self.log_error(&from, &e);
                }
            }
        }
    }

    fn log_error(&self, from: &str, error: &ServerError) {
        match error {
            ServerError::Chain(ChainError::BlockAlreadyKnown { .. }) => {
                debug!("message ignored"; id = self.id, peer = from, reason = error);
            }
            _ => warn!("message rejected"; id = self.id, peer = from, error = error),
        }
    }

    /// Dispatches one decoded message.
    pub fn process_message(&mut self, message: DecodedMessage) -> Result<(), ServerError> {
        let DecodedMessage { from, payload } = message;
        match payload {
            Payload::Tx(tx) => self.handle_transaction(Some(from), tx),
            Payload::Block(block) => self.handle_block(from, block),
            Payload::GetStatus => {
                self.send(from, Payload::Status(self.status()));
                Ok(())
            }
            Payload::Status(status) => {
                self.handle_status(from, status);
                Ok(())
            }
            Payload::GetBlocks(request) => {
                self.handle_get_blocks(from, request);
                Ok(())
            }
            Payload::Blocks(blocks) => {
                self.handle_blocks(blocks);
                Ok(())
            }
        }
    }

    fn status(&self) -> StatusMessage {
        StatusMessage {
            id: self.id.clone(),
            version: PROTOCOL_VERSION,
            current_height: self.chain.height(),
        }
    }

    /// Admits a transaction to the mempool and relays it.
    ///
    /// `origin` is the peer it came from, `None` for local submissions.
    /// Known transactions are dropped silently before verification.
    /// A transaction too large to fit in a block is rejected.
    fn handle_transaction(
        &self,
        origin: Option<String>,
        tx: Transaction,
    ) -> Result<(), ServerError> {
        let hash = tx.hash();
        if self.tx_pool.contains(&hash) {
            debug!("transaction already known"; id = self.id, tx = hash);
            return Ok(());
        }

        let size = tx.encoded_len();
        if size > MAX_TRANSACTION_BYTES {
            return Err(ServerError::TransactionTooLarge {
                size,
                limit: MAX_TRANSACTION_BYTES,
            });
        }
        tx.verify()?;

        let relay = Payload::Tx(tx.clone());
        if self.tx_pool.add(tx) {
            info!(
                "transaction added";
                id = self.id,
                tx = hash,
                pending = self.tx_pool.pending_count()
            );
            self.broadcast(origin, relay);
        }
        Ok(())
    }

    fn handle_block(&self, from: String, block: Block) -> Result<(), ServerError> {
        let hashes: Vec<_> = block.transactions().iter().map(|tx| tx.hash()).collect();
        let relay = Payload::Block(block.clone());

        match self.chain.add_block(block) {
            Ok(committed) => {
                self.tx_pool.remove_pending(&hashes);
                info!(
                    "block received";
                    id = self.id,
                    peer = from,
                    height = committed.height()
                );
                self.broadcast(Some(from), relay);
                Ok(())
            }
            Err(e @ ChainError::HeightTooHigh { .. }) => {
                // Missing blocks below this one; the status reply restarts sync.
                self.send(from, Payload::GetStatus);
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Starts or extends the block-request loop for a peer that is ahead.
    fn handle_status(&mut self, from: String, status: StatusMessage) {
        let height = self.chain.height();
        if status.current_height <= height {
            debug!(
                "peer not ahead";
                id = self.id,
                peer = from,
                peer_height = status.current_height,
                height = height
            );
            return;
        }

        if let Some(task) = self.sync_tasks.get(&from) {
            if !task.handle.is_finished() {
                task.target.fetch_max(status.current_height, Ordering::Relaxed);
                return;
            }
        }

        info!(
            "syncing from peer";
            id = self.id,
            peer = from,
            peer_height = status.current_height,
            height = height
        );
        let target = Arc::new(AtomicU32::new(status.current_height));
        let handle = tokio::spawn(request_blocks(
            self.id.clone(),
            from.clone(),
            self.chain.clone(),
            self.transport.clone(),
            target.clone(),
            self.sync_interval,
        ));
        self.sync_tasks.insert(from, SyncTask { target, handle });
    }

    fn handle_get_blocks(&self, from: String, request: GetBlocksMessage) {
        let blocks: Vec<Block> = self
            .chain
            .signed_blocks(
                request.from,
                request.to,
                MAX_BLOCKS_PER_REPLY,
                MAX_REPLY_BYTES,
            )
            .iter()
            .map(|block| Block::clone(block))
            .collect();

        if blocks.is_empty() {
            return;
        }
        debug!(
            "serving blocks";
            id = self.id,
            peer = from,
            from = request.from,
            count = blocks.len()
        );
        self.send(from, Payload::Blocks(BlocksMessage { blocks }));
    }

    /// Applies a batch in order. Failures are logged and skipped.
    fn handle_blocks(&self, message: BlocksMessage) {
        for block in message.blocks {
            let hashes: Vec<_> = block.transactions().iter().map(|tx| tx.hash()).collect();
            match self.chain.add_block(block) {
                Ok(_) => self.tx_pool.remove_pending(&hashes),
                Err(e @ ChainError::BlockAlreadyKnown { .. }) => {
                    debug!("block skipped"; id = self.id, reason = e);
                }
                Err(e) => warn!("block rejected"; id = self.id, error = e),
            }
        }
    }

    /// Builds a block from the oldest pending transactions that fit, applies
    /// it and broadcasts it.
    ///
    /// Transactions left out stay pending for the next block.
    fn create_new_block(&self) -> Result<(), ServerError> {
        let Some(key) = &self.private_key else {
            return Ok(());
        };

        let transactions = self.select_pending();
        let included: Vec<_> = transactions.iter().map(|tx| tx.hash()).collect();

        let head = self.chain.head_header()?;
        let block = Block::from_previous_header(&head, transactions)?.sign(key)?;
        let relay = Payload::Block(block.clone());

        self.chain.add_block(block)?;
        self.tx_pool.remove_pending(&included);
        self.broadcast(None, relay);
        Ok(())
    }

    /// Takes pending transactions in order until the next one would
    /// overflow a block. A transaction that can never fit is dropped.
    fn select_pending(&self) -> Vec<Transaction> {
        let mut selected = Vec::new();
        let mut budget = MAX_TRANSACTION_BYTES;
        for tx in self.tx_pool.pending() {
            let size = tx.encoded_len();
            if size > MAX_TRANSACTION_BYTES {
                let hash = tx.hash();
                warn!("oversized transaction dropped"; id = self.id, tx = hash, size = size);
                self.tx_pool.remove_pending([&hash]);
                continue;
            }
            if size > budget {
                break;
            }
            budget -= size;
            selected.push(tx);
        }
        selected
    }

    /// Sends to one peer from a background task.
    fn send(&self, to: String, payload: Payload) {
        let sending = self.transport.send_message(to.clone(), payload.encode_message());
        let id = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = sending.await {
                warn!("send failed"; id = id, peer = to, error = e);
            }
        });
    }

    /// Sends to every peer except `except` from a background task.
    fn broadcast(&self, except: Option<String>, payload: Payload) {
        let sending = self.transport.broadcast(except, payload.encode_message());
        let id = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = sending.await {
                warn!("broadcast failed"; id = id, error = e);
            }
        });
    }
}

/// Asks `peer` for the blocks above the local height every `every` until
/// the chain reaches `target`.
async fn request_blocks(
    id: String,
    peer: String,
    chain: Arc<Chain>,
    transport: Arc<dyn Transport>,
    target: Arc<AtomicU32>,
    every: Duration,
) {
    let mut ticker = interval(every);
    loop {
        ticker.tick().await;

        let height = chain.height();
        if height >= target.load(Ordering::Relaxed) {
            info!("synced with peer"; id = id, peer = peer, height = height);
            return;
        }

        let request = Payload::GetBlocks(GetBlocksMessage {
            from: height + 1,
            to: 0,
        });
        if let Err(e) = transport
            .send_message(peer.clone(), request.encode_message())
            .await
        {
            warn!("block request failed"; id = id, peer = peer, error = e);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::local_transport::LocalTransport;
    use crate::utils::test_utils::utils::{chain_of, signed_tx};
    use tokio::time::{sleep, timeout};

    fn node(transport: &Arc<LocalTransport>, id: &str) -> Server {
        let mut opts = ServerOpts::new(id, transport.clone());
        opts.sync_interval = Duration::from_millis(20);
        Server::new(opts)
    }

    fn validator(transport: &Arc<LocalTransport>, id: &str) -> Server {
        let mut opts = ServerOpts::new(id, transport.clone());
        opts.private_key = Some(PrivateKey::new());
        opts.block_time = Duration::from_millis(50);
        opts.sync_interval = Duration::from_millis(20);
        Server::new(opts)
    }

    fn spawn(server: Server) -> oneshot::Sender<()> {
        let (stop, shutdown) = oneshot::channel();
        tokio::spawn(server.start(shutdown));
        stop
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        let waiting = async {
            while !condition() {
                sleep(Duration::from_millis(10)).await;
            }
        };
        timeout(Duration::from_secs(10), waiting)
            .await
            .expect("condition not reached in time");
    }

    fn decoded(from: &str, payload: Payload) -> DecodedMessage {
        DecodedMessage {
            from: from.into(),
            payload,
        }
    }

    #[tokio::test]
    async fn lagging_node_syncs_from_status_exchange() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        let a = node(&tr_a, "a");
        let b = node(&tr_b, "b");
        let chain_a = a.chain();
        let chain_b = b.chain();

        for block in chain_of(&chain_a.head_header().unwrap(), 10, &PrivateKey::new()) {
            chain_a.add_block(block).unwrap();
        }
        assert_eq!(chain_a.height(), 10);

        let stop_a = spawn(a);
        let stop_b = spawn(b);
        tr_a.connect_to(&tr_b).await;

        eventually(|| chain_b.height() == 10).await;
        for height in 0..=10 {
            assert_eq!(
                chain_b.header(height).unwrap().hash(),
                chain_a.header(height).unwrap().hash()
            );
        }

        let _ = stop_a.send(());
        let _ = stop_b.send(());
    }

    #[tokio::test]
    async fn sync_spans_multiple_reply_batches() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        let a = node(&tr_a, "a");
        let b = node(&tr_b, "b");
        let chain_a = a.chain();
        let chain_b = b.chain();

        let total = MAX_BLOCKS_PER_REPLY + 20;
        for block in chain_of(&chain_a.head_header().unwrap(), total, &PrivateKey::new()) {
            chain_a.add_block(block).unwrap();
        }

        let _stop_a = spawn(a);
        let _stop_b = spawn(b);
        tr_b.connect_to(&tr_a).await;

        eventually(|| chain_b.height() == total as u32).await;
        assert_eq!(chain_b.tip(), chain_a.tip());
    }

    #[tokio::test]
    async fn validator_blocks_reach_peers_with_pending_transactions() {
        let tr_v = LocalTransport::new("V");
        let tr_p = LocalTransport::new("P");
        let v = validator(&tr_v, "v");
        let p = node(&tr_p, "p");
        let chain_v = v.chain();
        let chain_p = p.chain();
        let pool_v = v.tx_pool();
        let pool_p = p.tx_pool();
        let submit = p.tx_sender();

        let _stop_v = spawn(v);
        let _stop_p = spawn(p);
        tr_v.connect_to(&tr_p).await;

        // Submitted at the peer, relayed to the validator, included in a block.
        let tx = signed_tx(b"");
        submit.send(tx.clone()).await.unwrap();

        eventually(|| chain_p.tx_by_hash(&tx.hash()).is_ok()).await;
        assert!(chain_v.tx_by_hash(&tx.hash()).is_ok());
        eventually(|| pool_p.pending_count() == 0).await;
        assert_eq!(pool_v.pending_count(), 0);
        assert!(pool_v.contains(&tx.hash()));
        assert!(chain_p.height() >= 1);
    }

    #[tokio::test]
    async fn invalid_transaction_is_not_admitted() {
        let tr = LocalTransport::new("A");
        let mut server = node(&tr, "a");
        let unsigned = Transaction::new(&b"x"[..]);

        let result = server.process_message(decoded("peer", Payload::Tx(unsigned.clone())));
        assert!(matches!(
            result,
            Err(ServerError::Signature(SignatureError::MissingSignature))
        ));
        assert!(!server.tx_pool().contains(&unsigned.hash()));
    }

    #[tokio::test]
    async fn duplicate_transaction_is_dropped() {
        let tr = LocalTransport::new("A");
        let mut server = node(&tr, "a");
        let tx = signed_tx(b"once");

        server
            .process_message(decoded("peer", Payload::Tx(tx.clone())))
            .unwrap();
        server
            .process_message(decoded("peer", Payload::Tx(tx.clone())))
            .unwrap();
        assert_eq!(server.tx_pool().all_count(), 1);
    }

    #[tokio::test]
    async fn transactions_are_relayed_except_to_origin() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        let tr_c = LocalTransport::new("C");
        tr_a.connect_to(&tr_b).await;
        tr_a.connect_to(&tr_c).await;
        let mut rx_b = tr_b.consume().unwrap();
        let mut rx_c = tr_c.consume().unwrap();

        let mut server = node(&tr_a, "a");
        let tx = signed_tx(b"relay");
        server
            .process_message(decoded("B", Payload::Tx(tx.clone())))
            .unwrap();

        let relayed = loop {
            match timeout(Duration::from_secs(5), rx_c.recv()).await.unwrap() {
                Some(TransportEvent::Message(rpc)) => break rpc,
                Some(_) => continue,
                None => panic!("channel closed"),
            }
        };
        assert!(matches!(
            relayed.decode().unwrap().payload,
            Payload::Tx(got) if got.hash() == tx.hash()
        ));

        sleep(Duration::from_millis(50)).await;
        while let Ok(event) = rx_b.try_recv() {
            assert!(!matches!(event, TransportEvent::Message(_)));
        }
    }

    #[tokio::test]
    async fn created_block_clears_pending() {
        let tr = LocalTransport::new("A");
        let server = validator(&tr, "a");
        let tx = signed_tx(b"");
        server.handle_transaction(None, tx.clone()).unwrap();
        assert_eq!(server.tx_pool().pending_count(), 1);

        server.create_new_block().unwrap();
        let chain = server.chain();
        assert_eq!(chain.height(), 1);
        let block = chain.block(1).unwrap();
        assert_eq!(block.transactions().len(), 1);
        assert_eq!(block.transactions()[0].hash(), tx.hash());
        assert_eq!(server.tx_pool().pending_count(), 0);
        assert!(server.tx_pool().contains(&tx.hash()));
    }

    #[tokio::test]
    async fn oversized_transaction_is_not_admitted() {
        let tr = LocalTransport::new("A");
        let mut server = node(&tr, "a");
        let big = Transaction::new(vec![0u8; MAX_TRANSACTION_BYTES]);

        let result = server.process_message(decoded("peer", Payload::Tx(big.clone())));
        assert!(matches!(
            result,
            Err(ServerError::TransactionTooLarge { limit: MAX_TRANSACTION_BYTES, .. })
        ));
        assert!(!server.tx_pool().contains(&big.hash()));
    }

    #[tokio::test]
    async fn oversized_pending_transaction_does_not_stall_production() {
        let tr = LocalTransport::new("A");
        let server = validator(&tr, "a");
        let big = signed_tx(&vec![0u8; MAX_TRANSACTION_BYTES]);
        let small = signed_tx(b"");
        server.tx_pool().add(big.clone());
        server.tx_pool().add(small.clone());

        server.create_new_block().unwrap();
        let chain = server.chain();
        assert_eq!(chain.height(), 1);
        let block = chain.block(1).unwrap();
        assert_eq!(block.transactions().len(), 1);
        assert_eq!(block.transactions()[0].hash(), small.hash());
        assert_eq!(server.tx_pool().pending_count(), 0);
    }

    #[tokio::test]
    async fn transactions_beyond_block_capacity_wait_for_next_block() {
        let tr = LocalTransport::new("A");
        let server = validator(&tr, "a");
        let half = MAX_TRANSACTION_BYTES / 2 + 1024;
        let first = signed_tx(&vec![1u8; half]);
        let second = signed_tx(&vec![2u8; half]);
        server.tx_pool().add(first.clone());
        server.tx_pool().add(second.clone());

        server.create_new_block().unwrap();
        let pending = server.tx_pool().pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].hash(), second.hash());

        server.create_new_block().unwrap();
        assert_eq!(server.tx_pool().pending_count(), 0);

        let chain = server.chain();
        let signed = chain.signed_blocks(1, 0, 10, usize::MAX);
        let included: Vec<Vec<_>> = signed
            .iter()
            .map(|block| block.transactions().iter().map(|tx| tx.hash()).collect())
            .collect();
        assert_eq!(included, vec![vec![first.hash()], vec![second.hash()]]);
    }

    #[tokio::test]
    async fn blocks_reply_respects_byte_budget() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        tr_a.connect_to(&tr_b).await;
        let mut rx_b = tr_b.consume().unwrap();

        let mut server = node(&tr_a, "a");
        let chain = server.chain();
        let key = PrivateKey::new();
        for _ in 0..3 {
            let tx = signed_tx(&vec![3u8; 5 * 1024 * 1024]);
            let block = Block::from_previous_header(&chain.head_header().unwrap(), vec![tx])
                .unwrap()
                .sign(&key)
                .unwrap();
            chain.add_block(block).unwrap();
        }

        server
            .process_message(decoded(
                "B",
                Payload::GetBlocks(GetBlocksMessage { from: 1, to: 0 }),
            ))
            .unwrap();

        let reply = loop {
            match timeout(Duration::from_secs(5), rx_b.recv()).await.unwrap() {
                Some(TransportEvent::Message(rpc)) => break rpc,
                Some(_) => continue,
                None => panic!("channel closed"),
            }
        };
        let Payload::Blocks(BlocksMessage { blocks }) = reply.decode().unwrap().payload else {
            panic!("expected a blocks reply");
        };
        assert_eq!(blocks.iter().map(|b| b.height()).collect::<Vec<_>>(), vec![1, 2]);
        assert!(blocks.encoded_len() <= MAX_REPLY_BYTES);
    }

    #[tokio::test]
    async fn peer_not_ahead_starts_no_sync() {
        let tr = LocalTransport::new("A");
        let mut server = node(&tr, "a");
        let status = StatusMessage {
            id: "b".into(),
            version: PROTOCOL_VERSION,
            current_height: 0,
        };

        server
            .process_message(decoded("B", Payload::Status(status)))
            .unwrap();
        assert!(server.sync_tasks.is_empty());
    }

    #[tokio::test]
    async fn disconnect_stops_block_requests() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        tr_a.connect_to(&tr_b).await;
        let mut rx_b = tr_b.consume().unwrap();

        let mut server = node(&tr_a, "a");
        let status = StatusMessage {
            id: "b".into(),
            version: PROTOCOL_VERSION,
            current_height: 5,
        };
        server
            .process_message(decoded("B", Payload::Status(status)))
            .unwrap();
        assert!(server.sync_tasks.contains_key("B"));

        // At least one request goes out while the task runs.
        let request = loop {
            match timeout(Duration::from_secs(5), rx_b.recv()).await.unwrap() {
                Some(TransportEvent::Message(rpc)) => break rpc,
                Some(_) => continue,
                None => panic!("channel closed"),
            }
        };
        assert!(matches!(
            request.decode().unwrap().payload,
            Payload::GetBlocks(GetBlocksMessage { from: 1, to: 0 })
        ));

        server.handle_event(TransportEvent::Disconnected("B".into()));
        assert!(server.sync_tasks.is_empty());

        sleep(Duration::from_millis(50)).await;
        while rx_b.try_recv().is_ok() {}
        sleep(Duration::from_millis(100)).await;
        while let Ok(event) = rx_b.try_recv() {
            assert!(!matches!(event, TransportEvent::Message(_)));
        }
    }

    #[tokio::test]
    async fn non_validator_never_produces() {
        let tr = LocalTransport::new("A");
        let server = node(&tr, "a");
        server.create_new_block().unwrap();
        assert_eq!(server.chain().height(), 0);
    }

    #[tokio::test]
    async fn out_of_order_block_asks_for_status() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        tr_a.connect_to(&tr_b).await;
        let mut rx_b = tr_b.consume().unwrap();

        let mut server = node(&tr_a, "a");
        let blocks = chain_of(&server.chain().head_header().unwrap(), 2, &PrivateKey::new());
        let result = server.process_message(decoded("B", Payload::Block(blocks[1].clone())));
        assert!(matches!(
            result,
            Err(ServerError::Chain(ChainError::HeightTooHigh { height: 2, current: 0 }))
        ));

        let request = loop {
            match timeout(Duration::from_secs(5), rx_b.recv()).await.unwrap() {
                Some(TransportEvent::Message(rpc)) => break rpc,
                Some(_) => continue,
                None => panic!("channel closed"),
            }
        };
        assert!(matches!(request.decode().unwrap().payload, Payload::GetStatus));
    }

    #[tokio::test]
    async fn known_blocks_in_batch_are_skipped() {
        let tr = LocalTransport::new("A");
        let mut server = node(&tr, "a");
        let blocks = chain_of(&server.chain().head_header().unwrap(), 3, &PrivateKey::new());
        server.chain().add_block(blocks[0].clone()).unwrap();

        server
            .process_message(decoded("peer", Payload::Blocks(BlocksMessage { blocks })))
            .unwrap();
        assert_eq!(server.chain().height(), 3);
    }

    #[tokio::test]
    async fn status_reports_height_and_id() {
        let tr = LocalTransport::new("A");
        let server = node(&tr, "node-a");
        let status = server.status();
        assert_eq!(status.id, "node-a");
        assert_eq!(status.version, PROTOCOL_VERSION);
        assert_eq!(status.current_height, 0);
    }
}
