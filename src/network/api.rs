//! JSON-over-HTTP access to a running node.
//!
//! | Route             | Result                                   |
//! |-------------------|------------------------------------------|
//! | `POST /tx`        | submits a hex-encoded signed transaction |
//! | `GET /status`     | node id, height and tip hash             |
//! | `GET /block/{id}` | block by height or by hex hash           |
//! | `GET /tx/{hash}`  | committed transaction by hash            |
//!
//! Submitted transactions go through the server's event loop, the same path
//! a transaction received from a peer takes.

use crate::core::block::{Block, MAX_TRANSACTION_BYTES};
use crate::core::transaction::Transaction;
use crate::network::server::Chain;
use crate::storage::storage_trait::StorageError;
use crate::types::encoding::{Decode, Encode};
use crate::types::hash::Hash;
use crate::{info, warn};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc::Sender;

#[derive(Clone)]
pub struct ApiState {
    pub id: String,
    pub chain: Arc<Chain>,
    pub tx_sender: Sender<Transaction>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// The event loop is gone.
    Unavailable,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(e) => (StatusCode::BAD_REQUEST, e),
            ApiError::NotFound(e) => (StatusCode::NOT_FOUND, e),
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "node is shutting down".to_string(),
            ),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::NotFound(e.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub id: String,
    pub height: u32,
    pub tip: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitView {
    pub hash: String,
}

#[derive(Debug, Serialize)]
pub struct TxView {
    pub hash: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: u64,
    pub nonce: u64,
    pub payload: String,
    pub signed: bool,
}

impl From<&Transaction> for TxView {
    fn from(tx: &Transaction) -> Self {
        TxView {
            hash: tx.hash().to_string(),
            from: tx.from.map(|key| hex::encode(key.to_bytes())),
            to: tx.to.map(|key| hex::encode(key.to_bytes())),
            value: tx.value,
            nonce: tx.nonce,
            payload: hex::encode(&tx.payload),
            signed: tx.is_signed(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BlockView {
    pub hash: String,
    pub height: u32,
    pub prev_block_hash: String,
    pub data_hash: String,
    pub timestamp: i64,
    pub producer: Option<String>,
    pub signature: Option<String>,
    pub transactions: Vec<TxView>,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        BlockView {
            hash: block.hash().to_string(),
            height: block.height(),
            prev_block_hash: block.prev_block_hash().to_string(),
            data_hash: block.data_hash().to_string(),
            timestamp: block.timestamp(),
            producer: block.producer().map(|key| hex::encode(key.to_bytes())),
            signature: block.signature().map(|sig| hex::encode(sig.to_bytes())),
            transactions: block.transactions().iter().map(TxView::from).collect(),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/tx", post(submit_tx))
        .route("/tx/{hash}", get(get_tx))
        .route("/status", get(status))
        .route("/block/{id}", get(get_block))
        .with_state(state)
}

/// Serves the API on `listener` until the process exits.
pub async fn serve(listener: TcpListener, state: ApiState) {
    let id = state.id.clone();
    if let Err(e) = axum::serve(listener, router(state)).await {
        warn!("api stopped"; id = id, error = e);
    }
}

async fn submit_tx(
    State(state): State<ApiState>,
    body: String,
) -> Result<Json<SubmitView>, ApiError> {
    let raw = hex::decode(body.trim().trim_start_matches("0x"))
        .map_err(|e| ApiError::BadRequest(format!("body is not hex: {e}")))?;
    let tx = Transaction::from_bytes(&raw)
        .map_err(|e| ApiError::BadRequest(format!("malformed transaction: {e}")))?;
    let size = tx.encoded_len();
    if size > MAX_TRANSACTION_BYTES {
        return Err(ApiError::BadRequest(format!(
            "transaction encodes to {size} bytes, limit is {MAX_TRANSACTION_BYTES}"
        )));
    }
    tx.verify()
        .map_err(|e| ApiError::BadRequest(format!("invalid transaction: {e}")))?;

    let hash = tx.hash();
    state
        .tx_sender
        .send(tx)
        .await
        .map_err(|_| ApiError::Unavailable)?;

    info!("transaction submitted"; id = state.id, tx = hash);
    Ok(Json(SubmitView {
        hash: hash.to_string(),
    }))
}

async fn status(State(state): State<ApiState>) -> Json<StatusView> {
    Json(StatusView {
        id: state.id.clone(),
        height: state.chain.height(),
        tip: state.chain.tip().to_string(),
    })
}

/// `id` is a decimal height or a hex block hash.
async fn get_block(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<BlockView>, ApiError> {
    let block = match id.parse::<u32>() {
        Ok(height) => state.chain.block(height)?,
        Err(_) => {
            let hash = parse_hash(&id)?;
            state.chain.block_by_hash(&hash)?
        }
    };
    Ok(Json(BlockView::from(block.as_ref())))
}

async fn get_tx(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> Result<Json<TxView>, ApiError> {
    let hash = parse_hash(&hash)?;
    let tx = state.chain.tx_by_hash(&hash)?;
    Ok(Json(TxView::from(&tx)))
}

fn parse_hash(s: &str) -> Result<Hash, ApiError> {
    s.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid hash {s}: {e}")))
}
