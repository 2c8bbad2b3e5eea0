//! Shared state backend used to hand values from the leader to followers.
//!
//! Published attributes become visible to other hosts within the registry's
//! consistency window. There is no read-your-write guarantee across hosts.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::core::cluster::identity::{ClusterIdentity, DiscoveryQuery, PeerRecord};
use crate::error::Result;

/// Attribute carrying the published election outcome of a node
pub const INITIALIZER_ATTRIBUTE: &str = "cluster_initializing_node";

#[async_trait]
pub trait SharedState: Send + Sync {
    /// Merge attributes into the published record of `node`
    async fn publish(
        &self,
        identity: &ClusterIdentity,
        node: &str,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Result<()>;

    /// Nodes whose published record matches the query
    async fn lookup(&self, query: &DiscoveryQuery) -> Result<Vec<PeerRecord>>;
}
