use crate::transport::HttpPeerTransport;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::constants::MAX_BLOCKS_PER_REQUEST;
use ledger_core::consensus::Resolver;
use ledger_core::ledger::LedgerHandle;
use ledger_core::{Block, HeaderRecord, LedgerError, SignedTransaction, Transaction};
use ledger_storage::SledStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub(crate) struct AppState {
    pub ledger: LedgerHandle<SledStore>,
    pub resolver: Arc<Resolver<HttpPeerTransport>>,
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/transactions", post(submit_transaction))
        .route("/transactions/pending", get(pending_transactions))
        .route("/blocks/mine", post(mine_block))
        .route("/blocks/{index}", get(get_block))
        .route("/chain", get(get_chain))
        .route("/chain/length", get(chain_length))
        .route("/headers", get(get_headers))
        .route("/balance/{address}", get(balance))
        .route("/nodes/register", post(register_nodes))
        .route("/nodes/resolve", get(resolve_nodes))
        .with_state(state)
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Ledger(LedgerError),
    BadRequest(String),
    NotFound(String),
}

#[derive(Serialize, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Ledger(err) => {
                let status = match &err {
                    LedgerError::Transaction(_)
                    | LedgerError::Chain(_)
                    | LedgerError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
                    LedgerError::StaleTip => StatusCode::CONFLICT,
                    LedgerError::MiningAborted => StatusCode::SERVICE_UNAVAILABLE,
                    LedgerError::Storage(_) => {
                        error!("storage failure: {err}");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.kind(), err.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BadRequest", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NotFound", msg),
        };
        let body = ErrorResponse {
            error: message,
            kind: kind.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize, Deserialize)]
pub(crate) struct Health {
    pub status: String,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct TxAccepted {
    pub message: String,
    pub tx_hash: String,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct PendingResponse {
    pub count: usize,
    pub transactions: Vec<Transaction>,
}

#[derive(Deserialize)]
pub(crate) struct MineRequest {
    miner_address: String,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct MinedBlock {
    pub index: u64,
    pub hash: String,
    pub transactions_count: usize,
    pub miner_reward: f64,
    pub miner_address: String,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct MineResponse {
    pub message: String,
    pub block: MinedBlock,
}

/// `start` is a 1-based chain index; `limit` is clamped to
/// `MAX_BLOCKS_PER_REQUEST`.
#[derive(Debug, Deserialize)]
pub(crate) struct Page {
    start: Option<u64>,
    limit: Option<u32>,
}

impl Page {
    fn bounds(&self) -> (u64, usize) {
        let limit = self.limit.unwrap_or(MAX_BLOCKS_PER_REQUEST).clamp(1, MAX_BLOCKS_PER_REQUEST);
        (self.start.unwrap_or(1).max(1), limit as usize)
    }
}

#[derive(Serialize, Deserialize)]
pub(crate) struct ChainPage {
    pub length: u64,
    pub chain: Vec<Block>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct HeaderPage {
    pub length: u64,
    pub headers: Vec<HeaderRecord>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct ChainLength {
    pub length: u64,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct Balance {
    pub address: String,
    pub balance: f64,
}

#[derive(Deserialize)]
pub(crate) struct RegisterRequest {
    #[serde(default)]
    nodes: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct RegisterResponse {
    pub message: String,
    pub total_nodes: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct ResolveResponse {
    pub message: String,
    pub replaced: bool,
    pub length: u64,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

async fn submit_transaction(
    State(state): State<AppState>,
    payload: Result<Json<SignedTransaction>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TxAccepted>)> {
    let Json(signed) = payload?;
    let tx_hash = state.ledger.submit_transaction(signed).await?;
    Ok((
        StatusCode::CREATED,
        Json(TxAccepted {
            message: "Transaction accepted".to_string(),
            tx_hash,
        }),
    ))
}

async fn pending_transactions(State(state): State<AppState>) -> Json<PendingResponse> {
    let transactions = state.ledger.lock().await.mempool().to_vec();
    Json(PendingResponse {
        count: transactions.len(),
        transactions,
    })
}

async fn mine_block(
    State(state): State<AppState>,
    payload: Result<Json<MineRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MineResponse>)> {
    let Json(request) = payload?;
    let miner_address = request.miner_address.trim().to_string();
    if miner_address.is_empty() {
        return Err(ApiError::BadRequest("miner_address is required".to_string()));
    }
    let block = state.ledger.mine(&miner_address).await?;
    let miner_reward = block.transactions.first().map_or(0.0, |tx| tx.amount);
    Ok((
        StatusCode::CREATED,
        Json(MineResponse {
            message: "Block mined successfully".to_string(),
            block: MinedBlock {
                index: block.index,
                hash: block.hash,
                transactions_count: block.transactions.len(),
                miner_reward,
                miner_address,
            },
        }),
    ))
}

async fn get_block(
    State(state): State<AppState>,
    Path(index): Path<u64>,
) -> ApiResult<Json<Block>> {
    let ledger = state.ledger.lock().await;
    let block = ledger
        .block(index)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Block {index} not found")))?;
    Ok(Json(block))
}

async fn get_chain(State(state): State<AppState>, Query(page): Query<Page>) -> Json<ChainPage> {
    let (start, limit) = page.bounds();
    let ledger = state.ledger.lock().await;
    Json(ChainPage {
        length: ledger.len(),
        chain: ledger.blocks_page(start, limit).to_vec(),
    })
}

async fn chain_length(State(state): State<AppState>) -> Json<ChainLength> {
    Json(ChainLength {
        length: state.ledger.lock().await.len(),
    })
}

async fn get_headers(State(state): State<AppState>, Query(page): Query<Page>) -> Json<HeaderPage> {
    let (start, limit) = page.bounds();
    let ledger = state.ledger.lock().await;
    Json(HeaderPage {
        length: ledger.len(),
        headers: ledger.headers_page(start, limit),
    })
}

async fn balance(State(state): State<AppState>, Path(address): Path<String>) -> Json<Balance> {
    let balance = state.ledger.total_balance(&address).await;
    Json(Balance { address, balance })
}

async fn register_nodes(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let Json(request) = payload?;
    if request.nodes.is_empty() {
        return Err(ApiError::BadRequest("Please supply a valid list of nodes".to_string()));
    }
    let mut ledger = state.ledger.lock().await;
    for node in &request.nodes {
        ledger.register_node(node)?;
    }
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "New nodes have been added".to_string(),
            total_nodes: ledger.peers().cloned().collect(),
        }),
    ))
}

async fn resolve_nodes(State(state): State<AppState>) -> ApiResult<Json<ResolveResponse>> {
    let replaced = state.ledger.resolve_conflicts(&state.resolver).await?;
    let length = state.ledger.lock().await.len();
    let message = if replaced {
        "Our chain was replaced"
    } else {
        "Our chain is authoritative"
    };
    Ok(Json(ResolveResponse {
        message: message.to_string(),
        replaced,
        length,
    }))
}
