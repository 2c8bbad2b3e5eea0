//! Membership lists for cluster-manager configuration
//!
//! Discovery returns peers in no particular order, so everything here is
//! normalized by peer identity to keep regenerated files stable run to run.

use serde::Serialize;
use std::net::IpAddr;

use crate::core::cluster::identity::PeerRecord;
use crate::core::cluster::leader_election::{elect, ElectionResult};
use crate::error::{AppError, Result};

/// `(address, hostname)` pair written into membership files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipEntry {
    pub address: IpAddr,
    pub hostname: String,
}

fn by_identity(peers: &[PeerRecord]) -> Vec<&PeerRecord> {
    let mut sorted: Vec<&PeerRecord> = peers.iter().collect();
    sorted.sort_by(|a, b| a.identity.cmp(&b.identity));
    sorted
}

/// Project every peer onto its membership entry
pub fn compile(peers: &[PeerRecord]) -> Vec<MembershipEntry> {
    by_identity(peers)
        .into_iter()
        .map(|peer| MembershipEntry {
            address: peer.address,
            hostname: peer.hostname.clone(),
        })
        .collect()
}

/// Designated initializer for an integration; same rule as the bootstrap
/// leader.
pub fn initializer(peers: &[PeerRecord], self_identity: &str) -> ElectionResult {
    elect(peers, self_identity)
}

/// Galera group communication address.
///
/// An initializer that has never bootstrapped starts a new cluster with an
/// empty address; every other case joins the known peers.
pub fn galera_cluster_address(
    peers: &[PeerRecord],
    self_address: IpAddr,
    election: &ElectionResult,
    previously_initialized: bool,
) -> String {
    if election.is_self && !previously_initialized {
        return "gcomm://".to_string();
    }
    let addresses: Vec<String> = peer_addresses(peers, self_address)
        .iter()
        .map(IpAddr::to_string)
        .collect();
    format!("gcomm://{}", addresses.join(","))
}

/// Addresses of every peer except this host
pub fn peer_addresses(peers: &[PeerRecord], self_address: IpAddr) -> Vec<IpAddr> {
    by_identity(peers)
        .into_iter()
        .map(|peer| peer.address)
        .filter(|address| *address != self_address)
        .collect()
}

/// RabbitMQ disk node names, sorted
pub fn rabbitmq_disk_nodes(peers: &[PeerRecord]) -> Vec<String> {
    let mut nodes: Vec<String> = peers
        .iter()
        .map(|peer| format!("rabbit@{}", peer.hostname))
        .collect();
    nodes.sort();
    nodes
}

/// Host file entries for every peer except this host
pub fn host_entries(peers: &[PeerRecord], self_address: IpAddr) -> Vec<MembershipEntry> {
    compile(peers)
        .into_iter()
        .filter(|entry| entry.address != self_address)
        .collect()
}

/// Network address corosync binds to: the host address with its last octet
/// zeroed.
pub fn bind_net_address(address: IpAddr) -> Result<IpAddr> {
    match address {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            Ok(IpAddr::from([a, b, c, 0]))
        }
        IpAddr::V6(_) => Err(AppError::ConfigError(format!(
            "Cannot derive a corosync bind network from IPv6 address {}",
            address
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str, ip: &str, hostname: &str) -> PeerRecord {
        PeerRecord::new(name, ip.parse().unwrap(), hostname)
    }

    fn peers() -> Vec<PeerRecord> {
        vec![
            peer("node-c", "10.0.0.3", "gamma"),
            peer("node-a", "10.0.0.1", "alpha"),
            peer("node-b", "10.0.0.2", "beta"),
        ]
    }

    #[test]
    fn test_membership_is_stable() {
        let mut shuffled = peers();
        shuffled.swap(0, 2);

        let entries = compile(&peers());
        assert_eq!(entries, compile(&shuffled));
        assert_eq!(entries[0].hostname, "alpha");
        assert_eq!(entries[2].address.to_string(), "10.0.0.3");
    }

    #[test]
    fn test_initializer_matches_election() {
        let result = initializer(&peers(), "node-b");
        assert_eq!(result.leader_identity, "node-a");
        assert!(!result.is_self);
    }

    #[test]
    fn test_galera_address_for_new_cluster() {
        let election = initializer(&peers(), "node-a");
        let address = galera_cluster_address(&peers(), "10.0.0.1".parse().unwrap(), &election, false);
        assert_eq!(address, "gcomm://");
    }

    #[test]
    fn test_galera_address_after_bootstrap() {
        let election = initializer(&peers(), "node-a");
        let address = galera_cluster_address(&peers(), "10.0.0.1".parse().unwrap(), &election, true);
        assert_eq!(address, "gcomm://10.0.0.2,10.0.0.3");
    }

    #[test]
    fn test_galera_address_for_joiner() {
        let election = initializer(&peers(), "node-c");
        let address = galera_cluster_address(&peers(), "10.0.0.3".parse().unwrap(), &election, false);
        assert_eq!(address, "gcomm://10.0.0.1,10.0.0.2");
    }

    #[test]
    fn test_rabbitmq_disk_nodes_sorted() {
        assert_eq!(
            rabbitmq_disk_nodes(&peers()),
            vec!["rabbit@alpha", "rabbit@beta", "rabbit@gamma"]
        );
    }

    #[test]
    fn test_host_entries_exclude_self() {
        let entries = host_entries(&peers(), "10.0.0.2".parse().unwrap());
        let hosts: Vec<_> = entries.iter().map(|e| e.hostname.as_str()).collect();
        assert_eq!(hosts, vec!["alpha", "gamma"]);
    }

    #[test]
    fn test_bind_net_address() {
        let net = bind_net_address("192.168.10.37".parse().unwrap()).unwrap();
        assert_eq!(net.to_string(), "192.168.10.0");
        assert!(bind_net_address("fe80::1".parse().unwrap()).is_err());
    }
}
