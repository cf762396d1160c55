use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};

use std::time::Duration;

use crate::blockchain::chain::decode_chain;
use crate::blockchain::{Block, BlockchainError, TransactionRequest};

/// The verbs a node invokes on its neighbors.
///
/// `peer` is always a `host:port` string taken from the neighbor registry.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// `GET /chain`
    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, BlockchainError>;

    /// `PUT /transactions`
    async fn put_transaction(
        &self,
        peer: &str,
        request: &TransactionRequest,
    ) -> Result<(), BlockchainError>;

    /// `DELETE /transactions`
    async fn clear_transactions(&self, peer: &str) -> Result<(), BlockchainError>;

    /// `PUT /consensus`
    async fn request_consensus(&self, peer: &str) -> Result<(), BlockchainError>;
}

/// Talks to neighbors over plain HTTP
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: Client,
}

impl HttpPeerClient {
    /// Creates a client whose every request gives up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, BlockchainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BlockchainError::SystemError(e.to_string()))?;

        Ok(HttpPeerClient { client })
    }
}

fn unreachable(peer: &str, err: impl ToString) -> BlockchainError {
    BlockchainError::PeerUnreachable {
        peer: peer.to_string(),
        reason: err.to_string(),
    }
}

fn expect_success(peer: &str, status: StatusCode) -> Result<(), BlockchainError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(unreachable(peer, format!("status {}", status)))
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, BlockchainError> {
        let response = self
            .client
            .get(format!("http://{}/chain", peer))
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;

        expect_success(peer, response.status())?;

        let body = response.text().await.map_err(|e| unreachable(peer, e))?;
        decode_chain(&body)
    }

    async fn put_transaction(
        &self,
        peer: &str,
        request: &TransactionRequest,
    ) -> Result<(), BlockchainError> {
        let response = self
            .client
            .put(format!("http://{}/transactions", peer))
            .json(request)
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;

        debug!("PUT /transactions on {}: {}", peer, response.status());
        expect_success(peer, response.status())
    }

    async fn clear_transactions(&self, peer: &str) -> Result<(), BlockchainError> {
        let response = self
            .client
            .delete(format!("http://{}/transactions", peer))
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;

        debug!("DELETE /transactions on {}: {}", peer, response.status());
        expect_success(peer, response.status())
    }

    async fn request_consensus(&self, peer: &str) -> Result<(), BlockchainError> {
        let response = self
            .client
            .put(format!("http://{}/consensus", peer))
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;

        debug!("PUT /consensus on {}: {}", peer, response.status());
        expect_success(peer, response.status())
    }
}
