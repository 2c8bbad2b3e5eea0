//! Registry clients
//!
//! The registry is the external discovery service every host registers with.
//! It answers search queries and stores per-node published attributes, which
//! double as the shared state used for leader-to-follower propagation.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::core::cluster::identity::{ClusterIdentity, DiscoveryQuery, PeerRecord};
use crate::error::{AppError, Result};
use crate::infrastructure::shared_state::SharedState;

/// Discovery query contract
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// All hosts matching the query, in no particular order
    async fn search(&self, query: &DiscoveryQuery) -> Result<Vec<PeerRecord>>;
}

/// Search response body
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    rows: Vec<PeerRecord>,
}

/// REST client for the registry service
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpRegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid registry URL {}: {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    fn search_url(&self, query: &DiscoveryQuery) -> Result<Url> {
        let relative = format!(
            "search/node?q={}",
            urlencoding::encode(&query.to_query_string())
        );
        self.base_url
            .join(&relative)
            .map_err(|e| AppError::ConfigError(format!("Invalid search URL: {}", e)))
    }

    fn attributes_url(&self, node: &str) -> Result<Url> {
        let relative = format!("nodes/{}/attributes", urlencoding::encode(node));
        self.base_url
            .join(&relative)
            .map_err(|e| AppError::ConfigError(format!("Invalid node URL: {}", e)))
    }

    async fn fetch(&self, query: &DiscoveryQuery) -> Result<Vec<PeerRecord>> {
        let url = self.search_url(query)?;
        debug!(url = %url, "Querying registry");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::DiscoveryError(format!("Registry query failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::DiscoveryError(format!(
                "Registry returned {} for query '{}'",
                status, query
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::DiscoveryError(format!("Malformed registry response: {}", e)))?;

        Ok(body.rows)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn search(&self, query: &DiscoveryQuery) -> Result<Vec<PeerRecord>> {
        self.fetch(query).await
    }
}

#[async_trait]
impl SharedState for HttpRegistryClient {
    async fn publish(
        &self,
        identity: &ClusterIdentity,
        node: &str,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        let url = self.attributes_url(node)?;
        debug!(url = %url, cluster = %identity, "Publishing node attributes");

        let response = self
            .client
            .put(url)
            .json(&attributes)
            .send()
            .await
            .map_err(|e| AppError::SharedStateError(format!("Publish failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::SharedStateError(format!(
                "Registry returned {} publishing attributes for '{}'",
                status, node
            )));
        }
        Ok(())
    }

    async fn lookup(&self, query: &DiscoveryQuery) -> Result<Vec<PeerRecord>> {
        self.fetch(query)
            .await
            .map_err(|e| AppError::SharedStateError(e.to_string()))
    }
}

/// Registry kept in process memory, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    clusters: Arc<RwLock<HashMap<ClusterIdentity, BTreeMap<String, PeerRecord>>>>,
    /// Attributes published per node, kept apart from the registered records
    /// so a host can publish before its own record is discoverable
    published: Arc<RwLock<HashMap<(ClusterIdentity, String), BTreeMap<String, serde_json::Value>>>>,
    unavailable: Arc<RwLock<bool>>,
    search_count: Arc<RwLock<usize>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a host under a cluster identity
    pub async fn register(&self, identity: &ClusterIdentity, peer: PeerRecord) {
        let mut clusters = self.clusters.write().await;
        clusters
            .entry(identity.clone())
            .or_default()
            .insert(peer.identity.clone(), peer);
    }

    /// Make every search and publish fail with a collaborator error
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    pub async fn search_count(&self) -> usize {
        *self.search_count.read().await
    }

    async fn matching(&self, query: &DiscoveryQuery) -> Vec<PeerRecord> {
        let clusters = self.clusters.read().await;
        let published = self.published.read().await;
        let nodes = match clusters.get(&query.identity) {
            Some(nodes) => nodes,
            None => return Vec::new(),
        };

        nodes
            .values()
            .map(|peer| {
                let mut peer = peer.clone();
                let key = (query.identity.clone(), peer.identity.clone());
                if let Some(attributes) = published.get(&key) {
                    peer.attributes
                        .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                peer
            })
            .filter(|peer| {
                query
                    .filters
                    .iter()
                    .all(|(field, value)| peer.matches_filter(field, value))
            })
            .collect()
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn search(&self, query: &DiscoveryQuery) -> Result<Vec<PeerRecord>> {
        *self.search_count.write().await += 1;
        if *self.unavailable.read().await {
            return Err(AppError::DiscoveryError(format!(
                "Registry unavailable for query '{}'",
                query
            )));
        }
        Ok(self.matching(query).await)
    }
}

#[async_trait]
impl SharedState for InMemoryRegistry {
    async fn publish(
        &self,
        identity: &ClusterIdentity,
        node: &str,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        if *self.unavailable.read().await {
            return Err(AppError::SharedStateError("Registry unavailable".to_string()));
        }

        let registered = self
            .clusters
            .read()
            .await
            .get(identity)
            .map(|nodes| nodes.contains_key(node))
            .unwrap_or(false);
        if !registered {
            debug!(node = node, cluster = %identity, "Publishing for a node that is not discoverable yet");
        }

        self.published
            .write()
            .await
            .entry((identity.clone(), node.to_string()))
            .or_default()
            .extend(attributes);
        Ok(())
    }

    async fn lookup(&self, query: &DiscoveryQuery) -> Result<Vec<PeerRecord>> {
        if *self.unavailable.read().await {
            return Err(AppError::SharedStateError("Registry unavailable".to_string()));
        }
        Ok(self.matching(query).await)
    }
}
