//! Cluster identity, discovery predicates and peer records
//!
//! Every discovery query issued during one provisioning run is scoped by the
//! same [`ClusterIdentity`]. Peers come back from the registry as
//! [`PeerRecord`]s, which are plain immutable values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Cluster name plus deployment environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub cluster_name: String,
    pub environment: String,
}

impl ClusterIdentity {
    pub fn new(cluster_name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            environment: environment.into(),
        }
    }

    /// Base discovery query for this identity
    pub fn query(&self) -> DiscoveryQuery {
        DiscoveryQuery::new(self.clone())
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster_name, self.environment)
    }
}

/// A registry search predicate: the cluster identity plus optional
/// integration-specific `field:value` filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryQuery {
    pub identity: ClusterIdentity,
    pub filters: Vec<(String, String)>,
}

impl DiscoveryQuery {
    pub fn new(identity: ClusterIdentity) -> Self {
        Self {
            identity,
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Only peers that published `field` with any value
    pub fn with_present(self, field: impl Into<String>) -> Self {
        self.with_filter(field, "*")
    }

    /// Renders the query in the registry's search syntax
    pub fn to_query_string(&self) -> String {
        let mut query = format!(
            "cluster_name:{} AND environment:{}",
            self.identity.cluster_name, self.identity.environment
        );
        for (field, value) in &self.filters {
            query.push_str(&format!(" AND {}:{}", field, value));
        }
        query
    }
}

impl fmt::Display for DiscoveryQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

/// Cloud placement reported by a host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloudTag {
    #[default]
    Untagged,
    CloudTagged {
        provider: String,
        #[serde(default)]
        private_address: Option<IpAddr>,
        #[serde(default)]
        public_address: Option<IpAddr>,
    },
}

impl CloudTag {
    pub fn provider(&self) -> Option<&str> {
        match self {
            CloudTag::Untagged => None,
            CloudTag::CloudTagged { provider, .. } => Some(provider),
        }
    }
}

/// A host returned by a discovery query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Unique node name in the registry
    pub identity: String,
    pub address: IpAddr,
    pub hostname: String,
    #[serde(default)]
    pub cloud: CloudTag,
    /// Published node attributes (initializer flag, shared secrets, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl PeerRecord {
    pub fn new(identity: impl Into<String>, address: IpAddr, hostname: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            address,
            hostname: hostname.into(),
            cloud: CloudTag::Untagged,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_cloud(mut self, cloud: CloudTag) -> Self {
        self.cloud = cloud;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    pub fn attribute_bool(&self, key: &str) -> bool {
        self.attributes
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Whether this record satisfies one `field:value` filter.
    ///
    /// Built-in fields match the record itself; anything else is looked up in
    /// the published attributes, with `*` meaning "present".
    pub fn matches_filter(&self, field: &str, value: &str) -> bool {
        match field {
            "name" => value == "*" || self.identity == value,
            "hostname" => value == "*" || self.hostname == value,
            _ => match self.attributes.get(field) {
                None | Some(serde_json::Value::Null) => false,
                Some(_) if value == "*" => true,
                Some(serde_json::Value::String(s)) => s == value,
                Some(other) => other.to_string() == value,
            },
        }
    }
}
