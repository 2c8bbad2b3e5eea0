//! Percona XtraDB (Galera) cluster parameters

use async_trait::async_trait;
use serde::Serialize;
use std::net::IpAddr;
use tracing::info;

use crate::config::PerconaConfig;
use crate::core::artifacts::{certificate_files, FileArtifact};
use crate::core::cluster::identity::{ClusterIdentity, PeerRecord};
use crate::core::cluster::membership;
use crate::error::Result;
use crate::infrastructure::local_state::LocalState;
use crate::infrastructure::registry::RegistryClient;
use crate::infrastructure::secret_store::certificates_scope;
use crate::integrations::{ClusterIntegration, IntegrationContext, IntegrationKind, IntegrationOutput};

/// Local state key recording that this host already bootstrapped a cluster
pub const BOOTSTRAPPED_KEY: &str = "galera_bootstrapped";

/// Group communication, state transfer and incremental state transfer
pub const GALERA_PORTS: [(u16, &str); 3] = [
    (4567, "group communication"),
    (4444, "state transfer"),
    (4568, "incremental state transfer"),
];

/// Inbound rule for one Galera peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallRule {
    pub source: IpAddr,
    pub port: u16,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerconaPlan {
    pub wsrep_cluster_name: String,
    pub wsrep_cluster_address: String,
    pub wsrep_node_name: String,
    pub initializer: bool,
    /// This run starts a new cluster; recorded in local state once the run
    /// succeeds
    pub bootstrapping: bool,
    /// Joiners take their passwords from the cluster via state transfer
    pub skip_passwords: bool,
    pub firewall_rules: Vec<FirewallRule>,
    pub ssl_files: Vec<FileArtifact>,
    /// Statement granting the load balancers' health-check user; initializer only
    pub health_check_sql: Option<String>,
}

pub struct PerconaIntegration {
    config: PerconaConfig,
}

impl PerconaIntegration {
    pub fn new(config: PerconaConfig) -> Self {
        Self { config }
    }

    async fn ssl_files(&self, ctx: &IntegrationContext<'_>) -> Result<Vec<FileArtifact>> {
        match self.config.certificate_item.as_deref() {
            Some(item) if self.config.ssl && !item.is_empty() => {
                let certificates = ctx
                    .load_secret(&certificates_scope(ctx.environment()), item)
                    .await?;
                certificate_files(&self.config.config_path, &certificates)
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn health_check_sql(&self, ctx: &IntegrationContext<'_>) -> Result<Option<String>> {
        let cluster_name = match self.config.haproxy_cluster_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return Ok(None),
        };

        let identity = ClusterIdentity::new(cluster_name, ctx.environment());
        let mut hosts: Vec<PeerRecord> = ctx.registry.search(&identity.query()).await?;
        hosts.sort_by(|a, b| a.identity.cmp(&b.identity));

        Ok(Some(health_check_statement(&hosts)))
    }
}

/// Replace the `haproxy` user with one row per load-balancer host
pub fn health_check_statement(hosts: &[PeerRecord]) -> String {
    let mut sql = String::from("USE mysql; DELETE FROM user WHERE User='haproxy';");
    for host in hosts {
        sql.push_str(&format!(
            " INSERT INTO user (Host, User) values ('{}', 'haproxy');",
            host.address
        ));
    }
    sql.push_str(" FLUSH PRIVILEGES;");
    sql
}

#[async_trait]
impl ClusterIntegration for PerconaIntegration {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Percona
    }

    async fn plan(&self, ctx: &IntegrationContext<'_>) -> Result<IntegrationOutput> {
        let view = ctx.require_cluster(self.kind())?;
        let node = &ctx.config.node;

        let previously_initialized = ctx
            .local
            .get(BOOTSTRAPPED_KEY)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let cluster_address = membership::galera_cluster_address(
            &view.peers,
            node.address,
            &view.election,
            previously_initialized,
        );
        let bootstrapping = view.election.is_self && !previously_initialized;
        info!(cluster = %view.identity, address = %cluster_address, "Percona XtraDB cluster address");

        let firewall_rules = membership::peer_addresses(&view.peers, node.address)
            .into_iter()
            .flat_map(|source| {
                GALERA_PORTS.iter().map(move |(port, purpose)| FirewallRule {
                    source,
                    port: *port,
                    description: format!("allow Percona {} to peer {}", purpose, source),
                })
            })
            .collect();

        let health_check_sql = if view.election.is_self {
            self.health_check_sql(ctx).await?
        } else {
            None
        };

        Ok(IntegrationOutput::Percona(PerconaPlan {
            wsrep_cluster_name: view.identity.cluster_name.clone(),
            wsrep_cluster_address: cluster_address,
            wsrep_node_name: node.hostname.clone(),
            initializer: view.election.is_self,
            bootstrapping,
            skip_passwords: !bootstrapping,
            firewall_rules,
            ssl_files: self.ssl_files(ctx).await?,
            health_check_sql,
        }))
    }
}
