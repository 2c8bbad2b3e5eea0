//! Elasticsearch discovery and proxy certificates

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

use crate::config::ElasticsearchConfig;
use crate::core::artifacts::{certificate_files, FileArtifact};
use crate::error::Result;
use crate::infrastructure::secret_store::certificates_scope;
use crate::integrations::{ClusterIntegration, IntegrationContext, IntegrationKind, IntegrationOutput};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElasticsearchPlan {
    /// Query the discovery plugin uses to find the other cluster nodes
    pub discovery_search_query: Option<String>,
    pub nginx_cert_file: Option<PathBuf>,
    pub nginx_key_file: Option<PathBuf>,
    pub ssl_files: Vec<FileArtifact>,
}

pub struct ElasticsearchIntegration {
    config: ElasticsearchConfig,
}

impl ElasticsearchIntegration {
    pub fn new(config: ElasticsearchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClusterIntegration for ElasticsearchIntegration {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Elasticsearch
    }

    async fn plan(&self, ctx: &IntegrationContext<'_>) -> Result<IntegrationOutput> {
        let discovery_search_query = ctx
            .cluster
            .map(|view| view.identity.query().to_query_string());

        let mut plan = ElasticsearchPlan {
            discovery_search_query,
            nginx_cert_file: None,
            nginx_key_file: None,
            ssl_files: Vec::new(),
        };

        if let Some(item) = self.config.certificate_item.as_deref().filter(|i| !i.is_empty()) {
            let certificates = ctx
                .load_secret(&certificates_scope(ctx.environment()), item)
                .await?;
            let dir = &self.config.nginx_dir;
            plan.ssl_files = certificate_files(dir, &certificates)?;
            plan.nginx_cert_file = Some(dir.join("cert.pem"));
            plan.nginx_key_file = Some(dir.join("key.pem"));
        }

        Ok(IntegrationOutput::Elasticsearch(plan))
    }
}
