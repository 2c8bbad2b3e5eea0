pub mod app_config;

pub use app_config::{
    ClusterConfig, ConfigManager, ElasticsearchConfig, HaproxyConfig, LoggingConfig, NodeConfig,
    PacemakerConfig, PerconaConfig, PropagationConfig, ProvisionConfig, RabbitmqConfig,
    RegistryConfig, SecretsConfig, StateConfig,
};
