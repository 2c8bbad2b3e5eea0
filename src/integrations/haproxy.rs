//! HAProxy load balancer

use async_trait::async_trait;
use serde::Serialize;
use std::net::IpAddr;
use tracing::info;

use crate::config::HaproxyConfig;
use crate::core::artifacts::{DirectoryArtifact, FileArtifact, FileMode};
use crate::core::loadbalancer::compiler::{compile_all, CompileContext, CompiledPool, SkippedPool};
use crate::error::Result;
use crate::infrastructure::secret_store::certificates_scope;
use crate::integrations::{ClusterIntegration, IntegrationContext, IntegrationKind, IntegrationOutput};

/// Virtual IP fronting the load-balancer cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualIp {
    pub address: IpAddr,
    pub fqdn: Option<String>,
    /// The initializer configures the cluster resource owning the VIP
    pub owner: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HaproxyPlan {
    pub pools: Vec<CompiledPool>,
    pub skipped: Vec<SkippedPool>,
    /// `<conf_dir>/certs/<name>.pem` bundles for SSL termination
    pub certificates: Vec<FileArtifact>,
    pub chroot: Option<DirectoryArtifact>,
    pub virtual_ip: Option<VirtualIp>,
}

pub struct HaproxyIntegration {
    config: HaproxyConfig,
}

impl HaproxyIntegration {
    pub fn new(config: HaproxyConfig) -> Self {
        Self { config }
    }

    async fn certificate_bundles(&self, ctx: &IntegrationContext<'_>) -> Result<Vec<FileArtifact>> {
        let scope = certificates_scope(ctx.environment());
        let cert_dir = self.config.cert_dir();
        let mut bundles = Vec::new();

        for (name, item) in &self.config.certificate_items {
            let certificates = ctx.load_secret(&scope, item).await?;
            let content = format!(
                "{}{}{}",
                certificates.require("cert")?,
                certificates.require("key")?,
                certificates.require("cacert")?
            );
            bundles.push(FileArtifact::certificate(
                cert_dir.join(format!("{}.pem", name)),
                content,
            ));
        }
        Ok(bundles)
    }
}

#[async_trait]
impl ClusterIntegration for HaproxyIntegration {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Haproxy
    }

    async fn plan(&self, ctx: &IntegrationContext<'_>) -> Result<IntegrationOutput> {
        let compile_ctx = CompileContext {
            cert_dir: self.config.cert_dir(),
            self_cloud: ctx.config.node.cloud.clone(),
            default_backend: self.config.backend_default_ip,
        };
        let batch = compile_all(
            &self.config.pools(),
            &self.config.profiles,
            ctx.environment(),
            ctx.registry,
            &compile_ctx,
        )
        .await?;

        let chroot = self.config.chroot.as_ref().map(|path| DirectoryArtifact {
            path: path.clone(),
            owner: self.config.user.clone(),
            group: self.config.group.clone(),
            mode: FileMode::PRIVATE_DIR,
        });

        let virtual_ip = match self.config.virtual_ip_address {
            Some(address) => Some(VirtualIp {
                address,
                fqdn: self.config.fqdn.clone(),
                owner: ctx.require_cluster(self.kind())?.election.is_self,
            }),
            None => None,
        };

        info!(
            pools = batch.pools.len(),
            skipped = batch.skipped.len(),
            "Load balancer configuration compiled"
        );

        Ok(IntegrationOutput::Haproxy(HaproxyPlan {
            pools: batch.pools,
            skipped: batch.skipped,
            certificates: self.certificate_bundles(ctx).await?,
            chroot,
            virtual_ip,
        }))
    }
}
