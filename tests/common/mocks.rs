use async_trait::async_trait;
use cluster_forge::core::cluster::{ClusterIdentity, DiscoveryQuery, PeerRecord};
use cluster_forge::infrastructure::{InMemoryRegistry, RegistryClient, SharedState};
use cluster_forge::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry returning search results in reverse order
pub struct ReversingRegistry {
    inner: InMemoryRegistry,
}

impl ReversingRegistry {
    pub fn new(inner: InMemoryRegistry) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RegistryClient for ReversingRegistry {
    async fn search(&self, query: &DiscoveryQuery) -> Result<Vec<PeerRecord>> {
        let mut peers = self.inner.search(query).await?;
        peers.reverse();
        Ok(peers)
    }
}

/// Shared state that hides everything until a number of lookups happened,
/// simulating a leader that publishes late
pub struct LaggingSharedState {
    inner: InMemoryRegistry,
    hidden_lookups: usize,
    lookup_count: Arc<RwLock<usize>>,
}

impl LaggingSharedState {
    pub fn new(inner: InMemoryRegistry, hidden_lookups: usize) -> Self {
        Self {
            inner,
            hidden_lookups,
            lookup_count: Arc::new(RwLock::new(0)),
        }
    }

    pub async fn lookup_count(&self) -> usize {
        *self.lookup_count.read().await
    }
}

#[async_trait]
impl SharedState for LaggingSharedState {
    async fn publish(
        &self,
        identity: &ClusterIdentity,
        node: &str,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        self.inner.publish(identity, node, attributes).await
    }

    async fn lookup(&self, query: &DiscoveryQuery) -> Result<Vec<PeerRecord>> {
        let mut count = self.lookup_count.write().await;
        *count += 1;
        if *count <= self.hidden_lookups {
            return Ok(Vec::new());
        }
        self.inner.lookup(query).await
    }
}
