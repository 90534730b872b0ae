//! Starts a single ledger node.
//!
//! ```text
//! ledger-node --listen 127.0.0.1:3000 --id node-a
//! ledger-node --listen 127.0.0.1:3001 --id node-b --seed 127.0.0.1:3000 --validator
//! ledger-node --listen 127.0.0.1:3002 --seed 127.0.0.1:3000 --api 127.0.0.1:8080
//! ```

use clap::Parser;
use ledger_node::core::transaction::Transaction;
use ledger_node::crypto::key_pair::PrivateKey;
use ledger_node::network::server::{Server, ServerOpts};
use ledger_node::network::tcp_transport::TcpTransport;
use ledger_node::utils::log::{Level, set_level};
use ledger_node::{error, info, warn};
use std::process;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::interval;

#[derive(Debug, Parser)]
#[command(name = "ledger-node", version, about = "Peer-to-peer ledger node")]
struct Cli {
    /// Address to accept peer connections on.
    #[arg(long, default_value = "127.0.0.1:3000")]
    listen: String,

    /// Node id reported to peers. Defaults to the bound listen address.
    #[arg(long)]
    id: Option<String>,

    /// Peer to dial at startup. Repeatable.
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// Address for the HTTP API.
    #[arg(long)]
    api: Option<String>,

    /// Produce blocks with a freshly generated key.
    #[arg(long)]
    validator: bool,

    /// Produce blocks with this hex-encoded 32-byte key.
    #[arg(long, value_name = "HEX")]
    validator_key: Option<String>,

    /// Seconds between produced blocks.
    #[arg(long, default_value_t = 5)]
    block_time: u64,

    /// Milliseconds between block requests while catching up.
    #[arg(long, default_value_t = 3000)]
    sync_interval: u64,

    /// Mempool capacity.
    #[arg(long, default_value_t = 1000)]
    max_pool: usize,

    /// Submit a small contract transaction every second.
    #[arg(long)]
    demo_txs: bool,

    #[arg(long, default_value = "info")]
    log_level: Level,
}

impl Cli {
    fn private_key(&self) -> Result<Option<PrivateKey>, String> {
        match &self.validator_key {
            Some(hex_key) => {
                let bytes = hex::decode(hex_key.trim_start_matches("0x"))
                    .map_err(|e| format!("validator key is not hex: {e}"))?;
                PrivateKey::from_bytes(&bytes)
                    .map(Some)
                    .ok_or_else(|| "validator key is not a valid secret key".to_string())
            }
            None if self.validator => Ok(Some(PrivateKey::new())),
            None => Ok(None),
        }
    }
}

/// Stores `n` under the key "ab".
fn demo_contract(n: u8) -> Vec<u8> {
    vec![b'a', 0x0c, b'b', 0x0c, 0x02, 0x0a, 0x0d, n, 0x0a, 0x0f]
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    set_level(cli.log_level);

    let private_key = match cli.private_key() {
        Ok(key) => key,
        Err(e) => {
            error!("{e}");
            process::exit(2);
        }
    };

    let transport = match TcpTransport::bind(&cli.listen).await {
        Ok(transport) => transport,
        Err(e) => {
            error!("cannot listen"; addr = cli.listen, error = e);
            process::exit(1);
        }
    };

    let id = cli
        .id
        .clone()
        .unwrap_or_else(|| ledger_node::network::transport::Transport::addr(&*transport));

    let mut opts = ServerOpts::new(id.clone(), transport);
    opts.private_key = private_key;
    opts.block_time = Duration::from_secs(cli.block_time.max(1));
    opts.sync_interval = Duration::from_millis(cli.sync_interval.max(1));
    opts.max_pool_length = cli.max_pool;
    opts.seed_nodes = cli.seeds.clone();
    opts.api_addr = cli.api.clone();

    let server = Server::new(opts);

    if cli.demo_txs {
        let submit = server.tx_sender();
        let key = PrivateKey::new();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            let mut counter: u8 = 0;
            loop {
                ticker.tick().await;
                let tx = match Transaction::new(demo_contract(counter % 9 + 1)).sign(&key) {
                    Ok(tx) => tx,
                    Err(e) => {
                        warn!("demo transaction not signed"; error = e);
                        continue;
                    }
                };
                if submit.send(tx).await.is_err() {
                    return;
                }
                counter = counter.wrapping_add(1);
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut server_handle = tokio::spawn(server.start(shutdown_rx));

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("cannot listen for ctrl-c"; error = e);
            }
            info!("shutting down"; id = id);
            let _ = shutdown_tx.send(());
            server_handle.await
        }
        finished = &mut server_handle => finished,
    };

    match finished {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("server failed"; id = id, error = e);
            process::exit(1);
        }
        Err(e) => {
            error!("server task panicked"; id = id, error = e);
            process::exit(1);
        }
    }
}
