use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::core::cluster::identity::{CloudTag, ClusterIdentity};
use crate::core::cluster::secret_propagation::PollPolicy;
use crate::core::loadbalancer::{PoolProfile, PoolSpec};
use crate::error::{AppError, Result};

/// Everything one provisioning run needs to know about this host
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub node: NodeConfig,
    pub cluster: ClusterConfig,
    pub registry: RegistryConfig,
    pub secrets: SecretsConfig,
    pub state: StateConfig,
    pub propagation: PropagationConfig,
    pub logging: LoggingConfig,
    pub haproxy: Option<HaproxyConfig>,
    pub percona: Option<PerconaConfig>,
    pub pacemaker: Option<PacemakerConfig>,
    pub rabbitmq: Option<RabbitmqConfig>,
    pub elasticsearch: Option<ElasticsearchConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Unique node name in the registry, used for election
    pub name: String,
    pub hostname: String,
    pub address: IpAddr,
    pub platform_family: String,
    pub cloud: CloudTag,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            hostname: String::new(),
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            platform_family: "debian".to_string(),
            cloud: CloudTag::Untagged,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster this host belongs to; hosts without one only run pool
    /// compilation
    pub name: Option<String>,
    pub environment: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: None,
            environment: "_default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub url: String,
    pub timeout_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:4000".to_string(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub root: PathBuf,
    pub encryption_key_file: PathBuf,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/etc/cluster-forge/secrets"),
            encryption_key_file: PathBuf::from("/etc/cluster-forge/encrypted_data_bag_secret"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/cluster-forge/state.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    pub poll_interval_ms: u64,
    pub deadline_seconds: u64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            deadline_seconds: 300,
        }
    }
}

impl PropagationConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            deadline: Duration::from_secs(self.deadline_seconds),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HaproxyConfig {
    pub conf_dir: PathBuf,
    pub user: String,
    pub group: String,
    pub chroot: Option<PathBuf>,
    /// Backend used by pools whose cluster has no nodes yet
    pub backend_default_ip: Option<IpAddr>,
    /// Certificate bundle name => secret store item
    pub certificate_items: BTreeMap<String, String>,
    pub profiles: BTreeMap<String, PoolProfile>,
    pub server_pools: BTreeMap<String, PoolSpec>,
    pub virtual_ip_address: Option<IpAddr>,
    pub fqdn: Option<String>,
}

impl Default for HaproxyConfig {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("/etc/haproxy"),
            user: "haproxy".to_string(),
            group: "haproxy".to_string(),
            chroot: Some(PathBuf::from("/var/lib/haproxy")),
            backend_default_ip: None,
            certificate_items: BTreeMap::new(),
            profiles: BTreeMap::new(),
            server_pools: BTreeMap::new(),
            virtual_ip_address: None,
            fqdn: None,
        }
    }
}

impl HaproxyConfig {
    /// Declared pools in name order, each carrying its name
    pub fn pools(&self) -> Vec<PoolSpec> {
        self.server_pools
            .iter()
            .map(|(name, spec)| PoolSpec {
                name: name.clone(),
                ..spec.clone()
            })
            .collect()
    }

    pub fn cert_dir(&self) -> PathBuf {
        self.conf_dir.join("certs")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerconaConfig {
    /// Load-balancer cluster whose hosts get a health-check user
    pub haproxy_cluster_name: Option<String>,
    pub ssl: bool,
    pub config_path: PathBuf,
    pub certificate_item: Option<String>,
}

impl Default for PerconaConfig {
    fn default() -> Self {
        Self {
            haproxy_cluster_name: None,
            ssl: false,
            config_path: PathBuf::from("/etc/mysql"),
            certificate_item: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacemakerConfig {
    pub mcast_address: Option<IpAddr>,
    pub mcast_port: Option<u16>,
    pub authkey_path: PathBuf,
}

impl Default for PacemakerConfig {
    fn default() -> Self {
        Self {
            mcast_address: None,
            mcast_port: None,
            authkey_path: PathBuf::from("/etc/corosync/authkey"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RabbitmqConfig {
    pub ssl: bool,
    pub config_root: PathBuf,
    pub certificate_item: Option<String>,
    pub password_item: String,
}

impl Default for RabbitmqConfig {
    fn default() -> Self {
        Self {
            ssl: false,
            config_root: PathBuf::from("/etc/rabbitmq"),
            certificate_item: None,
            password_item: "rabbit".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
    pub certificate_item: Option<String>,
    pub nginx_dir: PathBuf,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            certificate_item: None,
            nginx_dir: PathBuf::from("/etc/nginx"),
        }
    }
}

impl ProvisionConfig {
    /// Identity of this host's own cluster, if it belongs to one
    pub fn cluster_identity(&self) -> Option<ClusterIdentity> {
        self.cluster
            .name
            .as_ref()
            .filter(|name| !name.is_empty())
            .map(|name| ClusterIdentity::new(name.clone(), self.cluster.environment.clone()))
    }

    pub fn require_cluster_identity(&self) -> Result<ClusterIdentity> {
        self.cluster_identity().ok_or_else(|| {
            AppError::ConfigError("This integration requires cluster.name to be set".to_string())
        })
    }
}

/// Loads configuration from an optional file plus environment overrides
pub struct ConfigManager;

impl ConfigManager {
    /// File first (`path`, else `CONFIG_FILE`), then environment, then
    /// validation.
    pub async fn load(path: Option<&Path>) -> Result<ProvisionConfig> {
        let env_path = std::env::var("CONFIG_FILE").ok().map(PathBuf::from);
        let path = path.map(Path::to_path_buf).or(env_path);

        let mut config = match &path {
            Some(path) => Self::load_from_file(path).await?,
            None => ProvisionConfig::default(),
        };

        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Self::validate(&config)?;

        info!(
            node = %config.node.name,
            environment = %config.cluster.environment,
            "Configuration loaded successfully"
        );
        Ok(config)
    }

    /// Parse a `.yaml`, `.yml` or `.json` file
    pub async fn load_from_file(path: &Path) -> Result<ProvisionConfig> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match extension {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| AppError::ConfigError(format!("Invalid YAML config: {}", e)))?,
            "json" => serde_json::from_str(&content)
                .map_err(|e| AppError::ConfigError(format!("Invalid JSON config: {}", e)))?,
            _ => {
                return Err(AppError::ConfigError(
                    "Config file must be .yaml, .yml, or .json".to_string(),
                ))
            }
        };

        debug!(path = %path.display(), "Configuration loaded from file");
        Ok(config)
    }

    /// Environment variables override file values
    pub fn apply_env_overrides<F>(config: &mut ProvisionConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("NODE_NAME") {
            config.node.name = name;
        }
        if let Some(hostname) = lookup("NODE_HOSTNAME") {
            config.node.hostname = hostname;
        }
        if let Some(address) = lookup("NODE_ADDRESS") {
            config.node.address = address
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid NODE_ADDRESS: {}", e)))?;
        }
        if let Some(cluster) = lookup("CLUSTER_NAME") {
            config.cluster.name = Some(cluster);
        }
        if let Some(environment) = lookup("CLUSTER_ENVIRONMENT") {
            config.cluster.environment = environment;
        }
        if let Some(url) = lookup("REGISTRY_URL") {
            config.registry.url = url;
        }
        if let Some(root) = lookup("SECRETS_ROOT") {
            config.secrets.root = PathBuf::from(root);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(interval) = lookup("PROPAGATION_POLL_INTERVAL_MS") {
            config.propagation.poll_interval_ms = interval.parse().map_err(|e| {
                AppError::ConfigError(format!("Invalid PROPAGATION_POLL_INTERVAL_MS: {}", e))
            })?;
        }
        if let Some(deadline) = lookup("PROPAGATION_DEADLINE_SECONDS") {
            config.propagation.deadline_seconds = deadline.parse().map_err(|e| {
                AppError::ConfigError(format!("Invalid PROPAGATION_DEADLINE_SECONDS: {}", e))
            })?;
        }

        debug!("Configuration overrides applied from environment variables");
        Ok(())
    }

    pub fn validate(config: &ProvisionConfig) -> Result<()> {
        if config.node.name.is_empty() {
            return Err(AppError::ConfigError("node.name is required".to_string()));
        }
        if config.node.hostname.is_empty() {
            return Err(AppError::ConfigError("node.hostname is required".to_string()));
        }
        if config.cluster.environment.is_empty() {
            return Err(AppError::ConfigError(
                "cluster.environment must not be empty".to_string(),
            ));
        }
        if config.propagation.poll_interval_ms == 0 {
            return Err(AppError::ConfigError(
                "propagation.poll_interval_ms must be positive".to_string(),
            ));
        }

        match config.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(AppError::ConfigError("Invalid log level".to_string())),
        }

        if let Some(haproxy) = &config.haproxy {
            for (name, spec) in &haproxy.server_pools {
                if spec.profile.is_empty() {
                    return Err(AppError::ConfigError(format!(
                        "Pool '{}' does not name a profile",
                        name
                    )));
                }
                if spec.port == Some(0) || spec.bind_port == Some(0) {
                    return Err(AppError::ConfigError(format!(
                        "Pool '{}' has a zero port",
                        name
                    )));
                }
            }
        }
        if let Some(pacemaker) = &config.pacemaker {
            if pacemaker.mcast_port == Some(0) {
                return Err(AppError::ConfigError(
                    "pacemaker.mcast_port must be positive".to_string(),
                ));
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}
