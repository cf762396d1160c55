use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{
    Block, BlockchainError, ChainDump, SignedTransaction, Transaction, TransactionRequest, Wallet,
};
use crate::node::Node;

/// Data structure for the node state
pub type NodeData = web::Data<Node>;

fn error_response(err: &BlockchainError) -> HttpResponse {
    warn!("Request rejected: {}", err);
    HttpResponse::BadRequest().json(serde_json::json!({
        "error": err.to_string()
    }))
}

/// Response for the pending transactions endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionsResponse {
    pub transactions: Vec<Transaction>,
    pub length: usize,
}

/// Generic acknowledgement
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Response for the consensus endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ConsensusResponse {
    /// Whether the local chain was replaced
    pub replaced: bool,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    pub message: String,
    pub block: Block,
}

/// Query of the amount endpoint
#[derive(Serialize, Deserialize)]
pub struct AmountQuery {
    pub blockchain_address: String,
}

/// Response for the amount endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct AmountResponse {
    pub amount: f64,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's private key (hex encoded)
    pub private_key: String,

    /// 64-hex X followed by 64-hex Y
    pub public_key: String,

    pub blockchain_address: String,
}

/// Request for the wallet transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletTransactionRequest {
    /// The sender's private key (for signing)
    pub sender_private_key: String,

    pub recipient_blockchain_address: String,

    pub value: f64,
}

/// Get the full blockchain
#[utoipa::path(
    get,
    path = "/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainDump)
    )
)]
pub async fn get_chain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.chain_dump())
}

/// Get all pending transactions
#[utoipa::path(
    get,
    path = "/transactions",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = TransactionsResponse)
    )
)]
pub async fn get_transactions(node: NodeData) -> impl Responder {
    let transactions = node.transaction_pool();

    HttpResponse::Ok().json(TransactionsResponse {
        length: transactions.len(),
        transactions,
    })
}

/// Create a new transaction
///
/// Admits a signed transaction and relays it to every neighbor
#[utoipa::path(
    post,
    path = "/transactions",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created", body = MessageResponse),
        (status = 400, description = "Invalid transaction")
    )
)]
pub async fn create_transaction(
    node: NodeData,
    request: web::Json<TransactionRequest>,
) -> impl Responder {
    match node.create_transaction_request(request.into_inner()).await {
        Ok(()) => HttpResponse::Created().json(MessageResponse {
            message: "success".to_string(),
        }),
        Err(err) => error_response(&err),
    }
}

/// Add a relayed transaction
///
/// Admits a signed transaction into the local pool without relaying it
#[utoipa::path(
    put,
    path = "/transactions",
    request_body = TransactionRequest,
    responses(
        (status = 200, description = "Transaction added", body = MessageResponse),
        (status = 400, description = "Invalid transaction")
    )
)]
pub async fn add_transaction(
    node: NodeData,
    request: web::Json<TransactionRequest>,
) -> impl Responder {
    match node.add_transaction_request(request.into_inner()) {
        Ok(()) => HttpResponse::Ok().json(MessageResponse {
            message: "success".to_string(),
        }),
        Err(err) => error_response(&err),
    }
}

/// Clear the pending transactions
#[utoipa::path(
    delete,
    path = "/transactions",
    responses(
        (status = 200, description = "Pool cleared", body = MessageResponse)
    )
)]
pub async fn clear_transactions(node: NodeData) -> impl Responder {
    node.clear_transaction_pool();
    HttpResponse::Ok().json(MessageResponse {
        message: "success".to_string(),
    })
}

/// Run conflict resolution against the neighbors
#[utoipa::path(
    put,
    path = "/consensus",
    responses(
        (status = 200, description = "Consensus finished", body = ConsensusResponse)
    )
)]
pub async fn consensus(node: NodeData) -> impl Responder {
    let replaced = node.resolve_conflicts().await;
    HttpResponse::Ok().json(ConsensusResponse { replaced })
}

/// Mine a new block now
#[utoipa::path(
    post,
    path = "/mine",
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(node: NodeData) -> impl Responder {
    match node.mining().await {
        Ok(block) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
        }),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to mine block: {}", err)
        })),
    }
}

/// Get the balance of an address
#[utoipa::path(
    get,
    path = "/amount",
    params(
        ("blockchain_address" = String, Query, description = "Address to compute the balance of")
    ),
    responses(
        (status = 200, description = "Balance computed", body = AmountResponse)
    )
)]
pub async fn get_amount(node: NodeData, query: web::Query<AmountQuery>) -> impl Responder {
    let amount = node.calculate_total_amount(&query.blockchain_address);
    HttpResponse::Ok().json(AmountResponse { amount })
}

/// Create a new wallet
///
/// The private key must be stored by the caller
#[utoipa::path(
    post,
    path = "/wallet",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        private_key: wallet.secret_key_hex(),
        public_key: wallet.public_key_hex(),
        blockchain_address: wallet.address().0.clone(),
    })
}

/// Sign and submit a transaction from a wallet
#[utoipa::path(
    post,
    path = "/wallet/transactions",
    request_body = WalletTransactionRequest,
    responses(
        (status = 201, description = "Transaction created", body = MessageResponse),
        (status = 400, description = "Invalid key or transaction")
    )
)]
pub async fn create_wallet_transaction(
    node: NodeData,
    request: web::Json<WalletTransactionRequest>,
) -> impl Responder {
    let wallet = match Wallet::from_secret_key_hex(&request.sender_private_key) {
        Ok(wallet) => wallet,
        Err(err) => return error_response(&BlockchainError::from(err)),
    };

    let signed = SignedTransaction::create(
        &wallet,
        request.recipient_blockchain_address.as_str(),
        request.value,
    );

    match node.create_transaction(&signed).await {
        Ok(()) => HttpResponse::Created().json(MessageResponse {
            message: "success".to_string(),
        }),
        Err(err) => error_response(&err),
    }
}
