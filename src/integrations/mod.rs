//! Cluster integrations
//!
//! Each integration turns the run's discovery and election results into the
//! values one clustered service needs: configuration parameters, file
//! artifacts and membership lists. Integrations never write to the host; the
//! report they produce is consumed by the configuration writer.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::config::ProvisionConfig;
use crate::core::cluster::identity::{ClusterIdentity, PeerRecord};
use crate::core::cluster::leader_election::ElectionResult;
use crate::error::{AppError, Result};
use crate::infrastructure::clock::Clock;
use crate::infrastructure::local_state::LocalState;
use crate::infrastructure::registry::RegistryClient;
use crate::infrastructure::secret_store::{DecryptionKey, SecretItem, SecretStore};
use crate::infrastructure::shared_state::SharedState;

pub mod elasticsearch;
pub mod haproxy;
pub mod pacemaker;
pub mod percona;
pub mod rabbitmq;

pub use elasticsearch::{ElasticsearchIntegration, ElasticsearchPlan};
pub use haproxy::{HaproxyIntegration, HaproxyPlan};
pub use pacemaker::{PacemakerIntegration, PacemakerPlan};
pub use percona::{PerconaIntegration, PerconaPlan};
pub use rabbitmq::{RabbitmqIntegration, RabbitmqPlan};

/// Supported integrations, in the order a run applies them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    Pacemaker,
    Percona,
    Rabbitmq,
    Elasticsearch,
    Haproxy,
}

impl IntegrationKind {
    pub const ALL: [IntegrationKind; 5] = [
        IntegrationKind::Pacemaker,
        IntegrationKind::Percona,
        IntegrationKind::Rabbitmq,
        IntegrationKind::Elasticsearch,
        IntegrationKind::Haproxy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationKind::Pacemaker => "pacemaker",
            IntegrationKind::Percona => "percona",
            IntegrationKind::Rabbitmq => "rabbitmq",
            IntegrationKind::Elasticsearch => "elasticsearch",
            IntegrationKind::Haproxy => "haproxy",
        }
    }
}

impl fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        IntegrationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.to_lowercase())
            .ok_or_else(|| AppError::ConfigError(format!("Unknown integration '{}'", s)))
    }
}

/// This host's view of its own cluster for the current run
#[derive(Debug, Clone)]
pub struct ClusterView {
    pub identity: ClusterIdentity,
    pub peers: Vec<PeerRecord>,
    pub election: ElectionResult,
}

/// Everything an integration may read or call during planning
pub struct IntegrationContext<'a> {
    pub config: &'a ProvisionConfig,
    /// `None` when the host does not belong to a cluster
    pub cluster: Option<&'a ClusterView>,
    pub registry: &'a dyn RegistryClient,
    pub shared: &'a dyn SharedState,
    pub secrets: &'a dyn SecretStore,
    pub decryption_key: Option<&'a DecryptionKey>,
    pub local: &'a dyn LocalState,
    pub clock: &'a dyn Clock,
}

impl<'a> IntegrationContext<'a> {
    pub fn environment(&self) -> &str {
        &self.config.cluster.environment
    }

    /// Cluster view, or a configuration error naming the integration
    pub fn require_cluster(&self, kind: IntegrationKind) -> Result<&'a ClusterView> {
        self.cluster.ok_or_else(|| {
            AppError::ConfigError(format!(
                "The {} integration requires cluster.name to be set",
                kind
            ))
        })
    }

    pub async fn load_secret(&self, scope: &str, item: &str) -> Result<SecretItem> {
        let key = self.decryption_key.ok_or_else(|| {
            AppError::SecretStoreError(format!(
                "No decryption key available to load '{}/{}'",
                scope, item
            ))
        })?;
        self.secrets.load(scope, item, key).await
    }
}

/// Output of one integration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "integration", rename_all = "snake_case")]
pub enum IntegrationOutput {
    Pacemaker(PacemakerPlan),
    Percona(PerconaPlan),
    Rabbitmq(RabbitmqPlan),
    Elasticsearch(ElasticsearchPlan),
    Haproxy(HaproxyPlan),
}

impl IntegrationOutput {
    /// Non-fatal problems worth surfacing in the run report
    pub fn warnings(&self) -> Vec<String> {
        match self {
            IntegrationOutput::Haproxy(plan) => plan
                .skipped
                .iter()
                .map(|pool| format!("Skipped pool '{}': {}", pool.name, pool.reason))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Local state entries to record once the whole run has succeeded
    pub fn local_state_updates(&self) -> Vec<(&'static str, serde_json::Value)> {
        match self {
            IntegrationOutput::Percona(plan) if plan.bootstrapping => {
                vec![(percona::BOOTSTRAPPED_KEY, serde_json::Value::Bool(true))]
            }
            _ => Vec::new(),
        }
    }
}

#[async_trait]
pub trait ClusterIntegration: Send + Sync {
    fn kind(&self) -> IntegrationKind;

    async fn plan(&self, ctx: &IntegrationContext<'_>) -> Result<IntegrationOutput>;
}

/// Integrations enabled by `config`, in application order
pub fn enabled(config: &ProvisionConfig) -> Vec<Box<dyn ClusterIntegration>> {
    let mut integrations: Vec<Box<dyn ClusterIntegration>> = Vec::new();
    if let Some(pacemaker) = &config.pacemaker {
        integrations.push(Box::new(PacemakerIntegration::new(pacemaker.clone())));
    }
    if let Some(percona) = &config.percona {
        integrations.push(Box::new(PerconaIntegration::new(percona.clone())));
    }
    if let Some(rabbitmq) = &config.rabbitmq {
        integrations.push(Box::new(RabbitmqIntegration::new(rabbitmq.clone())));
    }
    if let Some(elasticsearch) = &config.elasticsearch {
        integrations.push(Box::new(ElasticsearchIntegration::new(elasticsearch.clone())));
    }
    if let Some(haproxy) = &config.haproxy {
        integrations.push(Box::new(HaproxyIntegration::new(haproxy.clone())));
    }
    integrations
}
