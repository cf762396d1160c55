use futures::future::join_all;
use log::debug;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::time::timeout;

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};
use std::ops::RangeInclusive;
use std::time::Duration;

/// The `host:port` neighbors a node currently knows about
#[derive(Debug, Default)]
pub struct NeighborRegistry {
    neighbors: Mutex<Vec<String>>,
}

impl NeighborRegistry {
    pub fn new() -> Self {
        NeighborRegistry::default()
    }

    /// Copy of the current list; callers iterate the copy, not the registry
    pub fn snapshot(&self) -> Vec<String> {
        self.neighbors.lock().clone()
    }

    /// Swaps in a whole new list at once
    pub fn replace(&self, neighbors: Vec<String>) {
        *self.neighbors.lock() = neighbors;
    }

    pub fn len(&self) -> usize {
        self.neighbors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.lock().is_empty()
    }
}

/// Scan parameters around the local host
#[derive(Debug, Clone)]
pub struct NeighborScan {
    pub host: Ipv4Addr,
    pub port: u16,
    pub ip_range: RangeInclusive<u8>,
    pub port_range: RangeInclusive<u16>,
    pub probe_timeout: Duration,
}

impl NeighborScan {
    /// Every `host:port` in range except this node itself
    pub fn candidates(&self) -> Vec<SocketAddrV4> {
        let [a, b, c, _] = self.host.octets();

        self.ip_range
            .clone()
            .flat_map(|last| {
                self.port_range
                    .clone()
                    .map(move |port| SocketAddrV4::new(Ipv4Addr::new(a, b, c, last), port))
            })
            .filter(|candidate| *candidate != SocketAddrV4::new(self.host, self.port))
            .collect()
    }
}

async fn is_alive(address: SocketAddrV4, probe_timeout: Duration) -> bool {
    matches!(
        timeout(probe_timeout, TcpStream::connect(address)).await,
        Ok(Ok(_))
    )
}

/// IPv4 address this machine uses on its LAN, if it has a route out.
///
/// Connecting a UDP socket sends no packet; it only selects the source address.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;

    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Probes every candidate with a TCP connect and returns the ones that answer
pub async fn find_neighbors(scan: &NeighborScan) -> Vec<String> {
    let candidates = scan.candidates();

    let probes = candidates
        .iter()
        .map(|candidate| is_alive(*candidate, scan.probe_timeout));
    let alive = join_all(probes).await;

    let neighbors: Vec<String> = candidates
        .into_iter()
        .zip(alive)
        .filter(|(_, alive)| *alive)
        .map(|(candidate, _)| candidate.to_string())
        .collect();

    debug!("Probed {:?}: {} alive", scan.ip_range, neighbors.len());
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(port: u16, port_range: RangeInclusive<u16>) -> NeighborScan {
        NeighborScan {
            host: Ipv4Addr::LOCALHOST,
            port,
            ip_range: 1..=1,
            port_range,
            probe_timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_registry_replace() {
        let registry = NeighborRegistry::new();
        assert!(registry.is_empty());

        registry.replace(vec!["10.0.0.2:5000".to_string()]);
        let snapshot = registry.snapshot();

        registry.replace(vec![]);
        assert_eq!(snapshot, vec!["10.0.0.2:5000".to_string()]);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_candidates_exclude_self() {
        let scan = NeighborScan {
            host: Ipv4Addr::new(192, 168, 0, 4),
            port: 5000,
            ip_range: 2..=8,
            port_range: 5000..=5001,
            probe_timeout: Duration::from_secs(1),
        };

        let candidates = scan.candidates();

        assert_eq!(candidates.len(), 13);
        assert!(!candidates.contains(&"192.168.0.4:5000".parse().unwrap()));
        assert!(candidates.contains(&"192.168.0.4:5001".parse().unwrap()));
        assert!(candidates.contains(&"192.168.0.2:5000".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_find_live_neighbor() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live_port = listener.local_addr().unwrap().port();

        let found = find_neighbors(&scan(0, live_port..=live_port)).await;
        assert_eq!(found, vec![format!("127.0.0.1:{}", live_port)]);

        // The same port scanned from itself is skipped
        let found = find_neighbors(&scan(live_port, live_port..=live_port)).await;
        assert!(found.is_empty());
    }

    #[test]
    fn test_local_ipv4_is_routable() {
        // Hosts without a default route have no LAN address to report
        if let Some(ip) = local_ipv4() {
            assert!(!ip.is_unspecified());
            assert!(!ip.is_multicast());
        }
    }
}
