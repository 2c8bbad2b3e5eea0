//! Per-run driver
//!
//! One provisioning run discovers this host's cluster, elects the bootstrap
//! leader, publishes the result and lets every enabled integration plan its
//! service. The run produces a [`ProvisioningReport`]; nothing is written to
//! the host from here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ProvisionConfig;
use crate::core::cluster::identity::ClusterIdentity;
use crate::core::cluster::leader_election::{ElectionResult, LeaderElector};
use crate::core::cluster::membership::{self, MembershipEntry};
use crate::core::loadbalancer::compiler::{compile_all, CompileContext, PoolBatch};
use crate::error::{AppError, Result};
use crate::infrastructure::clock::Clock;
use crate::infrastructure::local_state::LocalState;
use crate::infrastructure::registry::RegistryClient;
use crate::infrastructure::secret_store::{DecryptionKey, SecretStore};
use crate::infrastructure::shared_state::{SharedState, INITIALIZER_ATTRIBUTE};
use crate::integrations::{self, ClusterView, IntegrationContext, IntegrationKind, IntegrationOutput};

/// External systems a run talks to
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub registry: &'a dyn RegistryClient,
    pub shared: &'a dyn SharedState,
    pub secrets: &'a dyn SecretStore,
    pub local: &'a dyn LocalState,
    pub clock: &'a dyn Clock,
}

/// Everything one run decided
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub node: String,
    pub cluster: Option<ClusterIdentity>,
    pub election: Option<ElectionResult>,
    pub members: Vec<MembershipEntry>,
    pub integrations: Vec<IntegrationOutput>,
    pub warnings: Vec<String>,
}

pub struct Provisioner<'a> {
    config: &'a ProvisionConfig,
    deps: Collaborators<'a>,
    decryption_key: Option<DecryptionKey>,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a ProvisionConfig, deps: Collaborators<'a>) -> Self {
        Self {
            config,
            deps,
            decryption_key: None,
        }
    }

    pub fn with_decryption_key(mut self, key: DecryptionKey) -> Self {
        self.decryption_key = Some(key);
        self
    }

    /// Discover and elect within this host's own cluster
    pub async fn elect(&self) -> Result<ClusterView> {
        let identity = self.config.require_cluster_identity()?;
        let (election, peers) = LeaderElector::new(self.deps.registry)
            .elect(&identity, &self.config.node.name)
            .await?;
        Ok(ClusterView {
            identity,
            peers,
            election,
        })
    }

    /// Membership entries of this host's cluster, ordered by identity
    pub async fn membership(&self) -> Result<Vec<MembershipEntry>> {
        Ok(membership::compile(&self.elect().await?.peers))
    }

    /// Compile the configured load-balancer pools without running anything
    /// else.
    pub async fn compile_pools(&self) -> Result<PoolBatch> {
        let haproxy = self.config.haproxy.as_ref().ok_or_else(|| {
            AppError::ConfigError("No haproxy section configured".to_string())
        })?;
        let ctx = CompileContext {
            cert_dir: haproxy.cert_dir(),
            self_cloud: self.config.node.cloud.clone(),
            default_backend: haproxy.backend_default_ip,
        };
        compile_all(
            &haproxy.pools(),
            &haproxy.profiles,
            &self.config.cluster.environment,
            self.deps.registry,
            &ctx,
        )
        .await
    }

    /// Full run. `only` restricts the run to a single integration.
    pub async fn run(&self, only: Option<IntegrationKind>) -> Result<ProvisioningReport> {
        let run_id = Uuid::new_v4();
        info!(run_id = %run_id, node = %self.config.node.name, "Starting provisioning run");

        let view = match self.config.cluster_identity() {
            Some(_) => {
                let view = self.elect().await?;
                self.publish_initializer_flag(&view).await?;
                Some(view)
            }
            None => {
                info!("Node has no cluster name, skipping election");
                None
            }
        };

        let ctx = IntegrationContext {
            config: self.config,
            cluster: view.as_ref(),
            registry: self.deps.registry,
            shared: self.deps.shared,
            secrets: self.deps.secrets,
            decryption_key: self.decryption_key.as_ref(),
            local: self.deps.local,
            clock: self.deps.clock,
        };

        let mut outputs = Vec::new();
        let mut warnings = Vec::new();
        for integration in integrations::enabled(self.config) {
            let kind = integration.kind();
            if only.map(|wanted| wanted != kind).unwrap_or(false) {
                continue;
            }

            info!(integration = %kind, "Planning integration");
            let output = integration.plan(&ctx).await.map_err(|e| {
                warn!(integration = %kind, error = %e, "Integration failed");
                e
            })?;
            for warning in output.warnings() {
                warn!(integration = %kind, "{}", warning);
                warnings.push(warning);
            }
            outputs.push(output);
        }

        self.commit_local_state(&outputs).await?;

        let report = ProvisioningReport {
            run_id,
            generated_at: Utc::now(),
            node: self.config.node.name.clone(),
            cluster: view.as_ref().map(|v| v.identity.clone()),
            election: view.as_ref().map(|v| v.election.clone()),
            members: view
                .as_ref()
                .map(|v| membership::compile(&v.peers))
                .unwrap_or_default(),
            integrations: outputs,
            warnings,
        };

        info!(
            run_id = %run_id,
            integrations = report.integrations.len(),
            warnings = report.warnings.len(),
            "Provisioning run complete"
        );
        Ok(report)
    }

    /// Record what the run established on this host. Only reached when every
    /// integration planned successfully, so a failed run can be retried as if
    /// it never happened.
    async fn commit_local_state(&self, outputs: &[IntegrationOutput]) -> Result<()> {
        for (key, value) in outputs.iter().flat_map(IntegrationOutput::local_state_updates) {
            debug!(key = key, "Recording local state");
            self.deps.local.set(key, value).await?;
        }
        Ok(())
    }

    /// Make this run's election visible to the rest of the cluster
    async fn publish_initializer_flag(&self, view: &ClusterView) -> Result<()> {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            INITIALIZER_ATTRIBUTE.to_string(),
            serde_json::Value::Bool(view.election.is_self),
        );
        self.deps
            .shared
            .publish(&view.identity, &self.config.node.name, attributes)
            .await
    }
}
