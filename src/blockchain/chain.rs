use log::{error, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::NodeConfig;

use super::block::{Block, BlockHash};
use super::crypto::{Address, CryptoError};
use super::pool::{net_amount, TransactionPool};
use super::pow::{proof_of_work, valid_proof};
use super::transaction::{SignedTransaction, Transaction, TransactionError};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("System error: {0}")]
    SystemError(String),
}

impl BlockchainError {
    /// Whether the error came from a failed signature check
    pub fn is_invalid_signature(&self) -> bool {
        matches!(
            self,
            BlockchainError::CryptoError(CryptoError::InvalidSignature)
                | BlockchainError::TransactionError(TransactionError::CryptoError(
                    CryptoError::InvalidSignature
                ))
        )
    }
}

/// Wire form of a whole chain: `{"chain": [Block, ...]}`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainDump {
    pub chain: Vec<Block>,
}

/// Decodes a chain dump received from a peer
pub fn decode_chain(body: &str) -> Result<Vec<Block>, BlockchainError> {
    let dump: ChainDump =
        serde_json::from_str(body).map_err(|e| BlockchainError::InvalidChain(e.to_string()))?;

    if dump.chain.is_empty() {
        return Err(BlockchainError::InvalidChain("chain has no genesis block".to_string()));
    }

    Ok(dump.chain)
}

/// Checks linkage and proof of work of every block after the genesis.
///
/// The genesis block at index 0 is trusted as is.
pub fn validate_chain(candidate: &[Block], difficulty: usize) -> Result<(), BlockchainError> {
    if candidate.is_empty() {
        return Err(BlockchainError::InvalidChain("chain has no genesis block".to_string()));
    }

    for (index, pair) in candidate.windows(2).enumerate() {
        let (previous, block) = (&pair[0], &pair[1]);

        if block.previous_hash != previous.hash() {
            return Err(BlockchainError::InvalidChain(format!(
                "block {} does not link to its predecessor",
                index + 1
            )));
        }

        if !valid_proof(block.nonce, &block.previous_hash, &block.transactions, difficulty) {
            return Err(BlockchainError::InvalidChain(format!(
                "block {} fails proof of work",
                index + 1
            )));
        }
    }

    Ok(())
}

/// The ledger a node owns: its chain, its pending pool and its reward address.
///
/// `Blockchain` itself does no locking; the owning node serializes access.
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks
    chain: Vec<Block>,

    /// Pending transactions to be included in the next block
    transaction_pool: TransactionPool,

    /// Address credited with mining rewards
    blockchain_address: Address,

    /// Mining difficulty (number of leading hex zeros required in hash)
    difficulty: usize,

    /// Mining reward
    mining_reward: f64,
}

impl Blockchain {
    /// Creates a new blockchain sealed with a genesis block
    ///
    /// # Arguments
    ///
    /// * `blockchain_address` - The address credited with mining rewards
    /// * `difficulty` - Leading hex zeros every block hash must carry
    /// * `mining_reward` - Value of the coin-base transaction of each mined block
    ///
    /// # Returns
    ///
    /// A blockchain of length one with an empty pool
    pub fn new(blockchain_address: impl Into<Address>, difficulty: usize, mining_reward: f64) -> Self {
        let mut blockchain = Blockchain {
            chain: Vec::new(),
            transaction_pool: TransactionPool::new(),
            blockchain_address: blockchain_address.into(),
            difficulty,
            mining_reward,
        };

        // The genesis block: empty pool, zero previous hash
        blockchain.create_block();

        blockchain
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Blockchain::new(
            config.blockchain_address.as_str(),
            config.difficulty,
            config.mining_reward,
        )
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn transaction_pool(&self) -> &TransactionPool {
        &self.transaction_pool
    }

    pub fn clear_transaction_pool(&mut self) {
        self.transaction_pool.clear();
    }

    pub fn blockchain_address(&self) -> &Address {
        &self.blockchain_address
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    /// Hash of the tail block, or the zero digest while the chain is empty
    pub fn last_hash(&self) -> BlockHash {
        self.last_block()
            .map(Block::hash)
            .unwrap_or(BlockHash::ZERO)
    }

    /// Admits a signed transaction into the pool.
    ///
    /// The sender must hold at least `value` once the pool's earlier
    /// transactions are taken into account.
    ///
    /// # Arguments
    ///
    /// * `signed` - The transaction with its sender public key and signature
    ///
    /// # Returns
    ///
    /// `Ok(())` once pooled; a reserved sender, bad value, bad signature or
    /// short balance is rejected and the pool is left unchanged
    pub fn add_transaction(&mut self, signed: &SignedTransaction) -> Result<(), BlockchainError> {
        let transaction = &signed.transaction;

        if transaction.is_coinbase() {
            return Err(TransactionError::ReservedSender(transaction.sender.0.clone()).into());
        }

        transaction.validate_value()?;

        if let Err(err) = signed.verify() {
            error!("ERROR: Verify transaction from {}: {}", transaction.sender, err);
            return Err(err.into());
        }

        let available = self.calculate_total_amount(transaction.sender.as_str())
            + self.transaction_pool.pending_amount(transaction.sender.as_str());

        if available < transaction.value {
            error!(
                "ERROR: Not enough balance in wallet {}: required {}, available {}",
                transaction.sender, transaction.value, available
            );
            return Err(BlockchainError::InsufficientBalance {
                required: transaction.value,
                available,
            });
        }

        self.transaction_pool.add(transaction.clone());
        Ok(())
    }

    /// Searches the nonce for the current pool on top of the current tail
    pub fn proof_of_work(&self) -> u64 {
        let transactions = self.transaction_pool.snapshot();
        proof_of_work(&self.last_hash(), &transactions, self.difficulty)
    }

    /// Seals the pool into a new block, appends it and empties the pool
    pub fn create_block(&mut self) -> Block {
        let nonce = self.proof_of_work();
        let previous_hash = self.last_hash();

        let block = Block::new(nonce, previous_hash, self.transaction_pool.snapshot());
        self.chain.push(block.clone());
        self.transaction_pool.clear();

        block
    }

    /// Pays the mining reward to this node and seals a block.
    ///
    /// A block is mined even when the pool holds no user transactions.
    ///
    /// # Returns
    ///
    /// The block just appended to the chain
    pub fn mine(&mut self) -> Block {
        let reward = Transaction::new_coinbase(self.blockchain_address.clone(), self.mining_reward);
        self.transaction_pool.add(reward);

        let block = self.create_block();
        info!("action=mining, status=success, length={}", self.chain.len());

        block
    }

    /// Balance of `address` over the whole chain
    ///
    /// # Arguments
    ///
    /// * `address` - The address to compute the balance for
    ///
    /// # Returns
    ///
    /// Received minus sent value; pending transactions are not counted
    pub fn calculate_total_amount(&self, address: &str) -> f64 {
        net_amount(
            self.chain.iter().flat_map(|block| block.transactions.iter()),
            address,
        )
    }

    /// Whether `candidate` links correctly and every block meets this node's difficulty
    pub fn valid_chain(&self, candidate: &[Block]) -> bool {
        validate_chain(candidate, self.difficulty).is_ok()
    }

    /// Adopts `candidate` if it is strictly longer than the local chain and valid.
    ///
    /// The pool is left untouched.
    ///
    /// # Arguments
    ///
    /// * `candidate` - A full chain received from a neighbor
    ///
    /// # Returns
    ///
    /// `true` if the local chain was replaced
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> bool {
        if candidate.len() <= self.chain.len() || !self.valid_chain(&candidate) {
            return false;
        }

        self.chain = candidate;
        true
    }

    pub fn to_dump(&self) -> ChainDump {
        ChainDump {
            chain: self.chain.clone(),
        }
    }
}
