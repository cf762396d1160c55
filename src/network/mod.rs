// Network module
//
// Outbound side of the peer protocol and neighbor discovery.

pub mod neighbors;
pub mod peer;

pub use neighbors::{find_neighbors, local_ipv4, NeighborRegistry, NeighborScan};
pub use peer::{HttpPeerClient, PeerClient};
