use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

use super::transaction::{canonical_digest, Transaction};

/// A 32-byte SHA-256 block digest, hex encoded on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// Previous hash of the genesis block
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether the lowercase hex form starts with `difficulty` '0' characters
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        let hex = self.to_hex();
        difficulty <= hex.len() && hex.bytes().take(difficulty).all(|c| c == b'0')
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for BlockHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(BlockHash(bytes))
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(serde::de::Error::custom)
    }
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Creation time in nanoseconds since the epoch; informational, never hashed
    pub timestamp: i64,

    /// Proof of work
    pub nonce: u64,

    /// Hash of the previous block
    #[schema(value_type = String, example = "0000000000000000000000000000000000000000000000000000000000000000")]
    pub previous_hash: BlockHash,

    pub transactions: Vec<Transaction>,
}

/// The bytes a block hash is computed over: the block with its timestamp
/// pinned to zero, keys in `timestamp, nonce, previous_hash, transactions` order
#[derive(Serialize)]
struct HashPreimage<'a> {
    timestamp: i64,
    nonce: u64,
    previous_hash: &'a BlockHash,
    transactions: &'a [Transaction],
}

impl Block {
    /// Creates a new block stamped with the current wall time
    pub fn new(nonce: u64, previous_hash: BlockHash, transactions: Vec<Transaction>) -> Self {
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Block::assemble(timestamp, nonce, previous_hash, transactions)
    }

    /// Creates a block with a caller-supplied timestamp
    pub fn assemble(
        timestamp: i64,
        nonce: u64,
        previous_hash: BlockHash,
        transactions: Vec<Transaction>,
    ) -> Self {
        Block {
            timestamp,
            nonce,
            previous_hash,
            transactions,
        }
    }

    /// SHA-256 of the canonical encoding.
    ///
    /// The stored timestamp does not take part, so the hash the proof of work
    /// was searched against is the same hash later used for chain linkage.
    pub fn hash(&self) -> BlockHash {
        seal_hash(self.nonce, &self.previous_hash, &self.transactions)
    }
}

/// Hash of a block with the given contents and a zero timestamp
pub fn seal_hash(nonce: u64, previous_hash: &BlockHash, transactions: &[Transaction]) -> BlockHash {
    BlockHash(canonical_digest(&HashPreimage {
        timestamp: 0,
        nonce,
        previous_hash,
        transactions,
    }))
}
