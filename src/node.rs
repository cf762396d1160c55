use futures::future::join_all;
use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use std::sync::Arc;

use crate::blockchain::chain::validate_chain;
use crate::blockchain::transaction::TransactionError;
use crate::blockchain::{
    Block, Blockchain, BlockchainError, ChainDump, SignedTransaction, Transaction,
    TransactionRequest,
};
use crate::config::NodeConfig;
use crate::network::{find_neighbors, NeighborRegistry, NeighborScan, PeerClient};

/// Lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum NodeState {
    Initialized,
    Running,
    Stopped,
}

/// Handles of the two self-rescheduling activities
#[derive(Default)]
struct Timers {
    mining: Mutex<Option<JoinHandle<()>>>,
    neighbor_sync: Mutex<Option<JoinHandle<()>>>,
}

impl Timers {
    fn replace(slot: &Mutex<Option<JoinHandle<()>>>, handle: Option<JoinHandle<()>>) {
        if let Some(previous) = std::mem::replace(&mut *slot.lock(), handle) {
            previous.abort();
        }
    }
}

/// A ledger node: one chain, one pool, one neighbor registry.
///
/// Cloning a `Node` yields another handle to the same node.
#[derive(Clone)]
pub struct Node {
    /// The mining lock. Every read or write of chain and pool goes through it.
    ledger: Arc<Mutex<Blockchain>>,

    neighbors: Arc<NeighborRegistry>,

    /// Serializes whole neighbor refreshes
    neighbor_sync: Arc<tokio::sync::Mutex<()>>,

    peers: Arc<dyn PeerClient>,

    config: Arc<NodeConfig>,

    timers: Arc<Timers>,

    state: Arc<Mutex<NodeState>>,
}

impl Node {
    /// Creates a node and seals its genesis block
    pub fn new(config: NodeConfig, peers: Arc<dyn PeerClient>) -> Self {
        let blockchain = Blockchain::from_config(&config);

        Node {
            ledger: Arc::new(Mutex::new(blockchain)),
            neighbors: Arc::new(NeighborRegistry::new()),
            neighbor_sync: Arc::new(tokio::sync::Mutex::new(())),
            peers,
            config: Arc::new(config),
            timers: Arc::new(Timers::default()),
            state: Arc::new(Mutex::new(NodeState::Initialized)),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    /// Snapshot of the chain
    pub fn chain(&self) -> Vec<Block> {
        self.ledger.lock().chain().to_vec()
    }

    pub fn chain_dump(&self) -> ChainDump {
        self.ledger.lock().to_dump()
    }

    /// Snapshot of the pending pool
    pub fn transaction_pool(&self) -> Vec<Transaction> {
        self.ledger.lock().transaction_pool().snapshot()
    }

    pub fn clear_transaction_pool(&self) {
        self.ledger.lock().clear_transaction_pool();
    }

    pub fn calculate_total_amount(&self, address: &str) -> f64 {
        self.ledger.lock().calculate_total_amount(address)
    }

    /// Admits a signed transaction into the local pool only
    pub fn add_transaction(&self, signed: &SignedTransaction) -> Result<(), BlockchainError> {
        self.ledger.lock().add_transaction(signed)
    }

    /// Decodes a wire request and admits it into the local pool
    pub fn add_transaction_request(&self, request: TransactionRequest) -> Result<(), BlockchainError> {
        let signed = decode_request(request)?;
        self.add_transaction(&signed)
    }

    /// Admits a signed transaction and relays it to every neighbor
    pub async fn create_transaction(&self, signed: &SignedTransaction) -> Result<(), BlockchainError> {
        self.add_transaction(signed)?;

        let request = signed.to_request();
        let neighbors = self.neighbors.snapshot();
        let peers = &self.peers;
        let request = &request;

        join_all(neighbors.iter().map(|peer| async move {
            if let Err(err) = peers.put_transaction(peer, request).await {
                warn!("Relaying transaction to {} failed: {}", peer, err);
            }
        }))
        .await;

        Ok(())
    }

    pub async fn create_transaction_request(
        &self,
        request: TransactionRequest,
    ) -> Result<(), BlockchainError> {
        let signed = decode_request(request)?;
        self.create_transaction(&signed).await
    }

    /// One mining round: reward self, seal the pool, then have every
    /// neighbor drop its pool and run consensus.
    ///
    /// The mining lock is held for the sealing only; it is released before
    /// any neighbor is contacted.
    pub async fn mining(&self) -> Result<Block, BlockchainError> {
        let ledger = Arc::clone(&self.ledger);
        let block = tokio::task::spawn_blocking(move || {
            let mut guard = ledger.lock();
            guard.mine()
        })
        .await
        .map_err(|e| BlockchainError::SystemError(e.to_string()))?;

        let neighbors = self.neighbors.snapshot();
        let peers = &self.peers;

        join_all(neighbors.iter().map(|peer| async move {
            if let Err(err) = peers.clear_transactions(peer).await {
                warn!("Clearing pool on {} failed: {}", peer, err);
            }
        }))
        .await;

        join_all(neighbors.iter().map(|peer| async move {
            if let Err(err) = peers.request_consensus(peer).await {
                warn!("Requesting consensus from {} failed: {}", peer, err);
            }
        }))
        .await;

        Ok(block)
    }

    /// Mines now, then every `mining_interval` until stopped
    pub fn start_mining(&self) {
        let node = self.clone();
        let interval = self.config.mining_interval;

        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = node.mining().await {
                    warn!("Mining round failed: {}", err);
                }
                tokio::time::sleep(interval).await;
            }
        });

        Timers::replace(&self.timers.mining, Some(handle));
    }

    pub fn stop_mining(&self) {
        Timers::replace(&self.timers.mining, None);
    }

    /// Adopts the longest valid chain among the neighbors, if any is longer
    /// than the local one. Equal lengths go to whichever neighbor is listed first.
    pub async fn resolve_conflicts(&self) -> bool {
        let (local_length, difficulty) = {
            let ledger = self.ledger.lock();
            (ledger.len(), ledger.difficulty())
        };

        let neighbors = self.neighbors.snapshot();
        let peers = &self.peers;
        let responses = join_all(neighbors.iter().map(|peer| peers.fetch_chain(peer))).await;

        let mut longest: Option<Vec<Block>> = None;
        let mut max_length = local_length;

        for (peer, response) in neighbors.iter().zip(responses) {
            let chain = match response {
                Ok(chain) => chain,
                Err(err) => {
                    warn!("Fetching chain from {} failed: {}", peer, err);
                    continue;
                }
            };

            if chain.len() <= max_length {
                continue;
            }

            match validate_chain(&chain, difficulty) {
                Ok(()) => {
                    max_length = chain.len();
                    longest = Some(chain);
                }
                Err(err) => warn!("Discarding chain from {}: {}", peer, err),
            }
        }

        let replaced = match longest {
            Some(chain) => self.ledger.lock().replace_chain(chain),
            None => false,
        };

        if replaced {
            info!("ResolveConflicts replaced, length={}", max_length);
        } else {
            info!("ResolveConflicts not replaced");
        }
        replaced
    }

    /// Snapshot of the neighbor registry
    pub fn neighbors(&self) -> Vec<String> {
        self.neighbors.snapshot()
    }

    pub fn set_neighbors(&self, neighbors: Vec<String>) {
        self.neighbors.replace(neighbors);
    }

    /// Rescans the configured ranges and replaces the registry
    pub async fn sync_neighbors(&self) {
        let _guard = self.neighbor_sync.lock().await;

        let scan = NeighborScan {
            host: self.config.host,
            port: self.config.port,
            ip_range: self.config.neighbor_ip_range.clone(),
            port_range: self.config.neighbor_port_range.clone(),
            probe_timeout: self.config.peer_timeout,
        };

        let found = find_neighbors(&scan).await;
        info!("Found the following neighbors: {:?}", found);
        self.neighbors.replace(found);
    }

    /// Syncs now, then every `neighbor_sync_interval` until stopped
    pub async fn start_sync_neighbors(&self) {
        self.sync_neighbors().await;

        let node = self.clone();
        let interval = self.config.neighbor_sync_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                node.sync_neighbors().await;
            }
        });

        Timers::replace(&self.timers.neighbor_sync, Some(handle));
    }

    pub fn stop_sync_neighbors(&self) {
        Timers::replace(&self.timers.neighbor_sync, None);
    }

    /// One neighbor sync, one conflict resolution, then the mining timer
    pub async fn run(&self) {
        if self.state() == NodeState::Stopped {
            warn!("Restarting a stopped node");
        }

        self.start_sync_neighbors().await;
        self.resolve_conflicts().await;
        self.start_mining();

        *self.state.lock() = NodeState::Running;
        info!("Node {} running", self.config.self_address());
    }

    /// Halts the neighbor sync timer; the mining timer is stopped separately
    pub fn finish(&self) {
        self.stop_sync_neighbors();
        *self.state.lock() = NodeState::Stopped;
        info!("Node {} stopped", self.config.self_address());
    }
}

fn decode_request(request: TransactionRequest) -> Result<SignedTransaction, BlockchainError> {
    request.into_signed().map_err(|err| match err {
        TransactionError::MissingField(field) => {
            BlockchainError::MalformedRequest(format!("missing field {}", field))
        }
        other => other.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{BlockHash, Wallet};
    use crate::config::{COINBASE_SENDER, MINING_REWARD};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// What a fake neighbor answers with
    enum Route {
        Node(Node),
        Body(String),
        Down,
    }

    /// Routes peer calls to in-process nodes or canned responses
    #[derive(Default)]
    struct LocalPeers {
        routes: Mutex<HashMap<String, Arc<Route>>>,
    }

    impl LocalPeers {
        fn route(&self, peer: &str, route: Route) {
            self.routes.lock().insert(peer.to_string(), Arc::new(route));
        }

        fn lookup(&self, peer: &str) -> Result<Arc<Route>, BlockchainError> {
            self.routes
                .lock()
                .get(peer)
                .cloned()
                .ok_or_else(|| BlockchainError::PeerUnreachable {
                    peer: peer.to_string(),
                    reason: "no route".to_string(),
                })
        }
    }

    fn down(peer: &str) -> BlockchainError {
        BlockchainError::PeerUnreachable {
            peer: peer.to_string(),
            reason: "connection refused".to_string(),
        }
    }

    #[async_trait]
    impl PeerClient for LocalPeers {
        async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, BlockchainError> {
            match &*self.lookup(peer)? {
                Route::Node(node) => {
                    let body = serde_json::to_string(&node.chain_dump()).unwrap();
                    crate::blockchain::chain::decode_chain(&body)
                }
                Route::Body(body) => crate::blockchain::chain::decode_chain(body),
                Route::Down => Err(down(peer)),
            }
        }

        async fn put_transaction(
            &self,
            peer: &str,
            request: &TransactionRequest,
        ) -> Result<(), BlockchainError> {
            match &*self.lookup(peer)? {
                Route::Node(node) => node.add_transaction_request(request.clone()),
                _ => Err(down(peer)),
            }
        }

        async fn clear_transactions(&self, peer: &str) -> Result<(), BlockchainError> {
            match &*self.lookup(peer)? {
                Route::Node(node) => {
                    node.clear_transaction_pool();
                    Ok(())
                }
                _ => Err(down(peer)),
            }
        }

        async fn request_consensus(&self, peer: &str) -> Result<(), BlockchainError> {
            match &*self.lookup(peer)? {
                Route::Node(node) => {
                    node.resolve_conflicts().await;
                    Ok(())
                }
                _ => Err(down(peer)),
            }
        }
    }

    fn new_node(address: &str, peers: &Arc<LocalPeers>) -> Node {
        Node::new(NodeConfig::new(address), peers.clone())
    }

    async fn mine_times(node: &Node, times: usize) {
        for _ in 0..times {
            node.mining().await.unwrap();
        }
    }

    fn assert_linked_and_proven(chain: &[Block]) {
        for i in 1..chain.len() {
            assert_eq!(chain[i].previous_hash, chain[i - 1].hash());
            assert!(chain[i].hash().to_hex().starts_with("000"));
        }
    }

    fn signed(wallet: &Wallet, sender: &str, recipient: &str, value: f64) -> SignedTransaction {
        let transaction = Transaction::new(sender, recipient, value);
        let signature = transaction.sign(wallet);
        SignedTransaction {
            transaction,
            public_key: wallet.public_key().clone(),
            signature,
        }
    }

    #[tokio::test]
    async fn test_genesis() {
        let peers = Arc::new(LocalPeers::default());
        let node = new_node("A", &peers);

        let chain = node.chain();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].previous_hash, BlockHash::ZERO);
        assert!(chain[0].transactions.is_empty());
        assert_eq!(node.state(), NodeState::Initialized);
    }

    #[tokio::test]
    async fn test_mining_one_block() {
        let peers = Arc::new(LocalPeers::default());
        let node = new_node("A", &peers);

        let block = node.mining().await.unwrap();

        let chain = node.chain();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1], block);
        assert_eq!(
            chain[1].transactions,
            vec![Transaction::new(COINBASE_SENDER, "A", 1.0)]
        );
        assert_eq!(node.calculate_total_amount("A"), 1.0);
    }

    #[tokio::test]
    async fn test_idle_mining_extends_chain() {
        let peers = Arc::new(LocalPeers::default());
        let node = new_node("A", &peers);

        mine_times(&node, 6).await;

        let chain = node.chain();
        assert_eq!(chain.len(), 7);
        assert_linked_and_proven(&chain);
        assert_eq!(
            node.calculate_total_amount("A"),
            MINING_REWARD * (chain.len() - 1) as f64
        );
    }

    #[tokio::test]
    async fn test_signed_transfer_through_node() {
        let peers = Arc::new(LocalPeers::default());
        let node = new_node("A", &peers);
        let wallet = Wallet::new();
        mine_times(&node, 5).await;

        node.add_transaction_request(signed(&wallet, "A", "B", 2.0).to_request())
            .unwrap();
        node.mining().await.unwrap();

        assert_eq!(node.calculate_total_amount("A"), 4.0);
        assert_eq!(node.calculate_total_amount("B"), 2.0);
        assert!(node.transaction_pool().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_request_rejected() {
        let peers = Arc::new(LocalPeers::default());
        let node = new_node("A", &peers);
        let wallet = Wallet::new();
        mine_times(&node, 2).await;

        let mut request = signed(&wallet, "A", "B", 1.0).to_request();
        request.value = Some(10.0);

        let err = node.add_transaction_request(request).unwrap_err();
        assert!(err.is_invalid_signature());
        assert!(node.transaction_pool().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_request_rejected() {
        let peers = Arc::new(LocalPeers::default());
        let node = new_node("A", &peers);
        let wallet = Wallet::new();

        let mut request = signed(&wallet, "A", "B", 1.0).to_request();
        request.sender_public_key = None;

        assert!(matches!(
            node.add_transaction_request(request),
            Err(BlockchainError::MalformedRequest(_))
        ));

        let mut request = signed(&wallet, "A", "B", 1.0).to_request();
        request.sender_public_key = Some("00".repeat(10));
        assert!(matches!(
            node.add_transaction_request(request),
            Err(BlockchainError::TransactionError(TransactionError::CryptoError(_)))
        ));
    }

    #[tokio::test]
    async fn test_consensus_adopts_longer_chain() {
        let peers = Arc::new(LocalPeers::default());
        let n1 = new_node("N1", &peers);
        let n2 = new_node("N2", &peers);
        mine_times(&n1, 1).await;
        mine_times(&n2, 4).await;

        peers.route("n2", Route::Node(n2.clone()));
        n1.set_neighbors(vec!["n2".to_string()]);

        assert!(n1.resolve_conflicts().await);
        assert_eq!(n1.chain(), n2.chain());
        assert_eq!(n1.chain().len(), 5);
    }

    #[tokio::test]
    async fn test_consensus_keeps_longer_local_chain() {
        let peers = Arc::new(LocalPeers::default());
        let n1 = new_node("N1", &peers);
        let n2 = new_node("N2", &peers);
        mine_times(&n1, 4).await;
        mine_times(&n2, 2).await;

        peers.route("n2", Route::Node(n2.clone()));
        n1.set_neighbors(vec!["n2".to_string()]);
        let before = n1.chain();

        assert!(!n1.resolve_conflicts().await);
        assert_eq!(n1.chain(), before);
    }

    #[tokio::test]
    async fn test_consensus_rejects_invalid_chains() {
        let peers = Arc::new(LocalPeers::default());
        let n1 = new_node("N1", &peers);
        let n2 = new_node("N2", &peers);
        mine_times(&n2, 4).await;

        let mut broken_link = n2.chain_dump();
        broken_link.chain[2].previous_hash = BlockHash([1u8; 32]);

        let mut broken_proof = n2.chain_dump();
        broken_proof.chain[3].nonce += 1;
        let last = broken_proof.chain.len() - 1;
        broken_proof.chain[last].previous_hash = broken_proof.chain[last - 1].hash();

        peers.route("link", Route::Body(serde_json::to_string(&broken_link).unwrap()));
        peers.route("proof", Route::Body(serde_json::to_string(&broken_proof).unwrap()));
        peers.route("garbage", Route::Body(r#"{"chain":[{"nonce":"#.to_string()));
        n1.set_neighbors(vec![
            "link".to_string(),
            "proof".to_string(),
            "garbage".to_string(),
        ]);
        let before = n1.chain();

        assert!(!n1.resolve_conflicts().await);
        assert_eq!(n1.chain(), before);
    }

    #[tokio::test]
    async fn test_consensus_skips_unreachable_neighbor() {
        let peers = Arc::new(LocalPeers::default());
        let n1 = new_node("N1", &peers);
        let n2 = new_node("N2", &peers);
        mine_times(&n2, 2).await;

        peers.route("down", Route::Down);
        peers.route("n2", Route::Node(n2.clone()));
        n1.set_neighbors(vec!["down".to_string(), "unknown".to_string(), "n2".to_string()]);

        assert!(n1.resolve_conflicts().await);
        assert_eq!(n1.chain(), n2.chain());
    }

    #[tokio::test]
    async fn test_consensus_tie_goes_to_first_neighbor() {
        let peers = Arc::new(LocalPeers::default());
        let n1 = new_node("N1", &peers);
        let n2 = new_node("N2", &peers);
        let n3 = new_node("N3", &peers);
        mine_times(&n2, 2).await;
        mine_times(&n3, 2).await;

        peers.route("n2", Route::Node(n2.clone()));
        peers.route("n3", Route::Node(n3.clone()));
        n1.set_neighbors(vec!["n3".to_string(), "n2".to_string()]);

        assert!(n1.resolve_conflicts().await);
        assert_eq!(n1.chain(), n3.chain());
    }

    #[tokio::test]
    async fn test_mining_notifies_neighbors() {
        let peers = Arc::new(LocalPeers::default());
        let n1 = new_node("N1", &peers);
        let n2 = new_node("N2", &peers);
        let wallet = Wallet::new();

        peers.route("n1", Route::Node(n1.clone()));
        peers.route("n2", Route::Node(n2.clone()));
        n1.set_neighbors(vec!["n2".to_string()]);
        n2.set_neighbors(vec!["n1".to_string()]);

        // N2 has its own block and a pending transfer
        n2.ledger.lock().mine();
        n2.add_transaction(&signed(&wallet, "N2", "X", 0.5)).unwrap();
        assert_eq!(n2.transaction_pool().len(), 1);

        n1.mining().await.unwrap();
        n1.mining().await.unwrap();

        assert!(n2.transaction_pool().is_empty());
        assert_eq!(n2.chain(), n1.chain());
        assert_eq!(n2.chain().len(), 3);
    }

    #[tokio::test]
    async fn test_create_transaction_relays_to_neighbors() {
        let peers = Arc::new(LocalPeers::default());
        let n1 = new_node("N1", &peers);
        let n2 = new_node("N2", &peers);
        let wallet = Wallet::new();

        peers.route("n1", Route::Node(n1.clone()));
        peers.route("n2", Route::Node(n2.clone()));
        n2.set_neighbors(vec!["n1".to_string()]);

        mine_times(&n1, 2).await;
        assert!(n2.resolve_conflicts().await);

        n1.set_neighbors(vec!["n2".to_string(), "gone".to_string()]);
        n1.create_transaction(&signed(&wallet, "N1", "B", 1.5))
            .await
            .unwrap();

        assert_eq!(n1.transaction_pool(), vec![Transaction::new("N1", "B", 1.5)]);
        assert_eq!(n2.transaction_pool(), vec![Transaction::new("N1", "B", 1.5)]);
    }

    #[tokio::test]
    async fn test_rejected_transaction_not_relayed() {
        let peers = Arc::new(LocalPeers::default());
        let n1 = new_node("N1", &peers);
        let n2 = new_node("N2", &peers);
        let wallet = Wallet::new();

        peers.route("n2", Route::Node(n2.clone()));
        n1.set_neighbors(vec!["n2".to_string()]);

        let result = n1.create_transaction(&signed(&wallet, "N1", "B", 1.0)).await;

        assert!(matches!(result, Err(BlockchainError::InsufficientBalance { .. })));
        assert!(n2.transaction_pool().is_empty());
    }

    #[tokio::test]
    async fn test_run_and_finish() {
        // A port nobody listens on, so the scan finds nothing
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let closed_port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = NodeConfig {
            port: 0,
            neighbor_ip_range: 1..=1,
            neighbor_port_range: closed_port..=closed_port,
            peer_timeout: Duration::from_millis(200),
            mining_interval: Duration::from_secs(60),
            ..NodeConfig::new("A")
        };
        let node = Node::new(config, Arc::new(LocalPeers::default()));

        node.run().await;
        assert_eq!(node.state(), NodeState::Running);
        assert!(node.neighbors().is_empty());

        let mut waited = 0;
        while node.chain().len() < 2 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += 1;
        }
        assert_eq!(node.chain().len(), 2);

        node.stop_mining();
        node.finish();
        assert_eq!(node.state(), NodeState::Stopped);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(node.chain().len(), 2);
    }
}
