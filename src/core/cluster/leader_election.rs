//! Bootstrap Leader Election
//!
//! Every host runs the same election against the same discovery predicate and
//! arrives at the same answer without exchanging messages: the leader is the
//! peer with the lexicographically smallest identity. Correctness depends on
//! the registry being consistent across the fleet at election time.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::cluster::identity::{ClusterIdentity, PeerRecord};
use crate::error::Result;
use crate::infrastructure::registry::RegistryClient;

/// Role of this host for the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Originates shared cluster state
    Leader,
    /// Receives shared cluster state from the leader
    Follower,
}

/// Outcome of one election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResult {
    pub leader_identity: String,
    pub is_self: bool,
}

impl ElectionResult {
    pub fn role(&self) -> NodeRole {
        if self.is_self {
            NodeRole::Leader
        } else {
            NodeRole::Follower
        }
    }
}

/// Smallest identity among `peers ∪ {self}`.
///
/// Identities are unique, so there are no ties. With no peers, `self` leads.
pub fn elect(peers: &[PeerRecord], self_identity: &str) -> ElectionResult {
    let leader_identity = peers
        .iter()
        .map(|peer| peer.identity.as_str())
        .chain(std::iter::once(self_identity))
        .min()
        .unwrap_or(self_identity)
        .to_string();

    let is_self = leader_identity == self_identity;
    ElectionResult {
        leader_identity,
        is_self,
    }
}

/// Runs the election against live discovery data
pub struct LeaderElector<'a> {
    registry: &'a dyn RegistryClient,
}

impl<'a> LeaderElector<'a> {
    pub fn new(registry: &'a dyn RegistryClient) -> Self {
        Self { registry }
    }

    /// Discover the cluster and elect.
    ///
    /// A failed discovery is returned as-is; no leader is assumed.
    pub async fn elect(
        &self,
        identity: &ClusterIdentity,
        self_identity: &str,
    ) -> Result<(ElectionResult, Vec<PeerRecord>)> {
        let query = identity.query();
        info!(query = %query, "Searching for cluster nodes");

        let peers = self.registry.search(&query).await?;
        for peer in &peers {
            debug!(
                peer = %peer.identity,
                address = %peer.address,
                hostname = %peer.hostname,
                "Found cluster node"
            );
        }

        let result = elect(&peers, self_identity);
        info!(
            cluster = %identity,
            leader = %result.leader_identity,
            is_self = result.is_self,
            peers = peers.len(),
            "Bootstrap leader elected"
        );

        Ok((result, peers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::infrastructure::registry::InMemoryRegistry;

    fn peer(name: &str, ip: &str) -> PeerRecord {
        PeerRecord::new(name, ip.parse().unwrap(), name)
    }

    #[test]
    fn test_smallest_identity_wins() {
        let peers = vec![peer("node-c", "10.0.0.3"), peer("node-a", "10.0.0.1")];

        let result = elect(&peers, "node-b");
        assert_eq!(result.leader_identity, "node-a");
        assert!(!result.is_self);
        assert_eq!(result.role(), NodeRole::Follower);
    }

    #[test]
    fn test_self_leads_without_peers() {
        let result = elect(&[], "node-z");
        assert_eq!(result.leader_identity, "node-z");
        assert!(result.is_self);
        assert_eq!(result.role(), NodeRole::Leader);
    }

    #[test]
    fn test_self_present_in_peer_set() {
        let peers = vec![peer("node-a", "10.0.0.1"), peer("node-b", "10.0.0.2")];
        let result = elect(&peers, "node-a");
        assert!(result.is_self);
    }

    #[test]
    fn test_comparison_is_bytewise() {
        // Uppercase sorts before lowercase.
        let peers = vec![peer("alpha", "10.0.0.1")];
        let result = elect(&peers, "Zulu");
        assert_eq!(result.leader_identity, "Zulu");
    }

    #[tokio::test]
    async fn test_elector_uses_discovery() {
        let registry = InMemoryRegistry::new();
        let identity = ClusterIdentity::new("db", "prod");
        registry.register(&identity, peer("db-2", "10.0.0.2")).await;
        registry.register(&identity, peer("db-1", "10.0.0.1")).await;
        registry
            .register(&ClusterIdentity::new("db", "dev"), peer("db-0", "10.0.0.9"))
            .await;

        let elector = LeaderElector::new(&registry);
        let (result, peers) = elector.elect(&identity, "db-2").await.unwrap();

        assert_eq!(peers.len(), 2);
        assert_eq!(result.leader_identity, "db-1");
        assert!(!result.is_self);
    }

    #[tokio::test]
    async fn test_discovery_failure_propagates() {
        let registry = InMemoryRegistry::new();
        registry.set_unavailable(true).await;

        let elector = LeaderElector::new(&registry);
        let err = elector
            .elect(&ClusterIdentity::new("db", "prod"), "db-1")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DiscoveryError(_)));
    }
}
