//! Pacemaker/Corosync cluster membership and authkey distribution

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use serde::Serialize;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::info;

use crate::config::PacemakerConfig;
use crate::core::artifacts::{ArtifactContent, FileArtifact};
use crate::core::cluster::membership::{self, MembershipEntry};
use crate::core::cluster::secret_propagation::{
    NativeEncoding, PropagationState, RandomKeyGenerator, Secret, SecretPropagator,
};
use crate::error::{AppError, Result};
use crate::integrations::{ClusterIntegration, IntegrationContext, IntegrationKind, IntegrationOutput};

/// Shared-state attribute carrying the corosync authkey
pub const AUTHKEY_ATTRIBUTE: &str = "cluster_authkey";

/// Size of a freshly generated corosync authkey
pub const AUTHKEY_LENGTH: usize = 128;

const SUPPORTED_PLATFORM_FAMILY: &str = "debian";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacemakerPlan {
    pub cluster_name: String,
    pub members: Vec<MembershipEntry>,
    pub bind_net_address: IpAddr,
    pub mcast_address: Option<IpAddr>,
    pub mcast_port: Option<u16>,
    /// Host file entries corosync needs to resolve every member
    pub host_entries: Vec<MembershipEntry>,
    pub initializer: bool,
    pub authkey_state: PropagationState,
    pub authkey_source: String,
    /// Raw key file, only present when the key changed on this host
    pub authkey_file: Option<FileArtifact>,
}

/// Decodes the propagated base64 payload back into the raw key file
pub struct AuthkeyFile {
    pub path: PathBuf,
}

impl NativeEncoding for AuthkeyFile {
    fn encode(&self, secret: &Secret) -> Result<FileArtifact> {
        let raw = Base64::decode_vec(secret.payload.trim()).map_err(|e| {
            AppError::SerializationError(format!("Corosync authkey is not valid base64: {}", e))
        })?;
        Ok(FileArtifact::sensitive(
            self.path.clone(),
            ArtifactContent::binary(&raw),
        ))
    }
}

pub struct PacemakerIntegration {
    config: PacemakerConfig,
}

impl PacemakerIntegration {
    pub fn new(config: PacemakerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClusterIntegration for PacemakerIntegration {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Pacemaker
    }

    async fn plan(&self, ctx: &IntegrationContext<'_>) -> Result<IntegrationOutput> {
        let view = ctx.require_cluster(self.kind())?;

        let family = &ctx.config.node.platform_family;
        if family != SUPPORTED_PLATFORM_FAMILY {
            return Err(AppError::ConfigError(format!(
                "Clustering is not supported on the \"{}\" family of platforms",
                family
            )));
        }
        let node = &ctx.config.node;

        let propagator = SecretPropagator::new(
            ctx.shared,
            ctx.local,
            ctx.clock,
            ctx.config.propagation.policy(),
        );
        let encoding = AuthkeyFile {
            path: self.config.authkey_path.clone(),
        };
        let outcome = propagator
            .propagate(
                &view.identity,
                &node.name,
                &view.election,
                AUTHKEY_ATTRIBUTE,
                &RandomKeyGenerator::new(AUTHKEY_LENGTH),
                Some(&encoding),
            )
            .await?;

        let members = membership::compile(&view.peers);
        info!(
            cluster = %view.identity,
            members = members.len(),
            authkey_changed = outcome.changed,
            "Corosync membership compiled"
        );

        Ok(IntegrationOutput::Pacemaker(PacemakerPlan {
            cluster_name: view.identity.cluster_name.clone(),
            host_entries: members.clone(),
            members,
            bind_net_address: membership::bind_net_address(node.address)?,
            mcast_address: self.config.mcast_address,
            mcast_port: self.config.mcast_port,
            initializer: view.election.is_self,
            authkey_state: outcome.state,
            authkey_source: outcome.secret.source_identity,
            authkey_file: outcome.native,
        }))
    }
}
