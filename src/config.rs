// Node configuration
//
// Reference constants for mining, neighbor discovery and peer I/O, plus the
// `NodeConfig` a node is built from.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Number of leading hex '0' characters a sealed block hash must carry
pub const MINING_DIFFICULTY: usize = 3;

/// Hex length of a block hash; no nonce satisfies a higher difficulty
pub const MAX_MINING_DIFFICULTY: usize = 64;

/// Coin-base reward paid to the miner of each block
pub const MINING_REWARD: f64 = 1.0;

/// Sender address of coin-base transactions
pub const COINBASE_SENDER: &str = "THE BLOCK CHAIN";

/// Seconds between two mining rounds
pub const MINING_TIMER_SEC: u64 = 20;

/// Seconds between two neighbor scans
pub const NEIGHBOR_SYNC_TIME_SEC: u64 = 20;

/// Last-octet range scanned for neighbors
pub const NEIGHBOR_IP_RANGE_START: u8 = 2;
pub const NEIGHBOR_IP_RANGE_END: u8 = 8;

/// Port range scanned on every candidate host
pub const BLOCKCHAIN_PORT_RANGE_START: u16 = 5000;
pub const BLOCKCHAIN_PORT_RANGE_END: u16 = 5000;

/// Timeout applied to every outbound peer request and liveness probe
pub const PEER_TIMEOUT_SEC: u64 = 2;

/// Everything a node needs to know about itself and its surroundings
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address credited with the mining reward
    pub blockchain_address: String,

    /// IPv4 address this node listens on
    pub host: Ipv4Addr,

    /// Port this node listens on
    pub port: u16,

    pub difficulty: usize,

    pub mining_reward: f64,

    pub mining_interval: Duration,

    pub neighbor_sync_interval: Duration,

    /// Last octets probed around `host`
    pub neighbor_ip_range: RangeInclusive<u8>,

    /// Ports probed on each candidate host
    pub neighbor_port_range: RangeInclusive<u16>,

    pub peer_timeout: Duration,
}

impl NodeConfig {
    /// Creates a configuration with reference defaults for the given miner address
    pub fn new(blockchain_address: impl Into<String>) -> Self {
        NodeConfig {
            blockchain_address: blockchain_address.into(),
            ..Default::default()
        }
    }

    /// `host:port` string under which neighbors reach this node
    pub fn self_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            blockchain_address: String::new(),
            host: Ipv4Addr::LOCALHOST,
            port: BLOCKCHAIN_PORT_RANGE_START,
            difficulty: MINING_DIFFICULTY,
            mining_reward: MINING_REWARD,
            mining_interval: Duration::from_secs(MINING_TIMER_SEC),
            neighbor_sync_interval: Duration::from_secs(NEIGHBOR_SYNC_TIME_SEC),
            neighbor_ip_range: NEIGHBOR_IP_RANGE_START..=NEIGHBOR_IP_RANGE_END,
            neighbor_port_range: BLOCKCHAIN_PORT_RANGE_START..=BLOCKCHAIN_PORT_RANGE_END,
            peer_timeout: Duration::from_secs(PEER_TIMEOUT_SEC),
        }
    }
}
