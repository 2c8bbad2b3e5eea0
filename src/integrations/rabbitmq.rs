//! RabbitMQ credentials and clustering

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use crate::config::RabbitmqConfig;
use crate::core::artifacts::{certificate_files, FileArtifact};
use crate::core::cluster::membership::{self, MembershipEntry};
use crate::error::Result;
use crate::infrastructure::secret_store::{certificates_scope, passwords_scope};
use crate::integrations::{ClusterIntegration, IntegrationContext, IntegrationKind, IntegrationOutput};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RabbitmqSsl {
    pub cacert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RabbitmqPlan {
    pub default_user: String,
    pub default_pass: String,
    pub erlang_cookie: String,
    pub cluster: bool,
    /// Sorted `rabbit@<hostname>` names
    pub cluster_disk_nodes: Vec<String>,
    pub host_entries: Vec<MembershipEntry>,
    pub ssl: Option<RabbitmqSsl>,
    pub ssl_files: Vec<FileArtifact>,
}

pub struct RabbitmqIntegration {
    config: RabbitmqConfig,
}

impl RabbitmqIntegration {
    pub fn new(config: RabbitmqConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClusterIntegration for RabbitmqIntegration {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Rabbitmq
    }

    async fn plan(&self, ctx: &IntegrationContext<'_>) -> Result<IntegrationOutput> {
        let environment = ctx.environment();
        let passwords = ctx
            .load_secret(&passwords_scope(environment), &self.config.password_item)
            .await?;

        let (ssl, ssl_files) = match self.config.certificate_item.as_deref() {
            Some(item) if self.config.ssl && !item.is_empty() => {
                let certificates = ctx.load_secret(&certificates_scope(environment), item).await?;
                let root = &self.config.config_root;
                let ssl = RabbitmqSsl {
                    cacert: root.join("cacert.pem"),
                    cert: root.join("cert.pem"),
                    key: root.join("key.pem"),
                };
                (Some(ssl), certificate_files(root, &certificates)?)
            }
            _ => (None, Vec::new()),
        };

        let (cluster_disk_nodes, host_entries) = match ctx.cluster {
            Some(view) => {
                let nodes = membership::rabbitmq_disk_nodes(&view.peers);
                info!(cluster = %view.identity, nodes = ?nodes, "RabbitMQ cluster disk nodes");
                (
                    nodes,
                    membership::host_entries(&view.peers, ctx.config.node.address),
                )
            }
            None => (Vec::new(), Vec::new()),
        };

        Ok(IntegrationOutput::Rabbitmq(RabbitmqPlan {
            default_user: passwords.require("default_user")?.to_string(),
            default_pass: passwords.require("default_password")?.to_string(),
            erlang_cookie: passwords.require("erlang_cookie")?.to_string(),
            cluster: ctx.cluster.is_some(),
            cluster_disk_nodes,
            host_entries,
            ssl,
            ssl_files,
        }))
    }
}
