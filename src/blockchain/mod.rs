// Blockchain module
//
// This module contains the ledger engine:
// - Block structure
// - Blockchain structure and chain validation
// - Transaction structure
// - Transaction pool
// - Cryptography utilities
// - Proof of work algorithm

pub mod block;
pub mod chain;
pub mod crypto;
pub mod pool;
pub mod pow;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, BlockHash};
pub use chain::{Blockchain, BlockchainError, ChainDump};
pub use crypto::{Address, Wallet};
pub use transaction::{SignedTransaction, Transaction, TransactionRequest};
