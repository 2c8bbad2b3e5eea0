use cluster_forge::config::ProvisionConfig;
use cluster_forge::core::cluster::{CloudTag, ClusterIdentity, PeerRecord};
use cluster_forge::infrastructure::InMemoryRegistry;
use std::net::IpAddr;

/// Builder pattern for test data creation
pub struct TestDataBuilder;

impl TestDataBuilder {
    pub fn peer(identity: &str) -> PeerTestBuilder {
        PeerTestBuilder::new(identity)
    }

    pub fn config(node: &str) -> ConfigTestBuilder {
        ConfigTestBuilder::new(node)
    }
}

/// Peer record test builder
pub struct PeerTestBuilder {
    identity: String,
    address: IpAddr,
    hostname: String,
    cloud: CloudTag,
}

impl PeerTestBuilder {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            address: "127.0.0.1".parse().unwrap(),
            hostname: identity.to_string(),
            cloud: CloudTag::Untagged,
        }
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.address = address.parse().unwrap();
        self
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = hostname.to_string();
        self
    }

    pub fn in_cloud(mut self, provider: &str, private: &str, public: &str) -> Self {
        self.cloud = CloudTag::CloudTagged {
            provider: provider.to_string(),
            private_address: Some(private.parse().unwrap()),
            public_address: Some(public.parse().unwrap()),
        };
        self
    }

    pub fn build(self) -> PeerRecord {
        PeerRecord::new(self.identity, self.address, self.hostname).with_cloud(self.cloud)
    }
}

/// Provisioning configuration test builder
pub struct ConfigTestBuilder {
    config: ProvisionConfig,
}

impl ConfigTestBuilder {
    pub fn new(node: &str) -> Self {
        let mut config = ProvisionConfig::default();
        config.node.name = node.to_string();
        config.node.hostname = node.to_string();
        config.cluster.environment = "prod".to_string();
        Self { config }
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.config.node.address = address.parse().unwrap();
        self
    }

    pub fn in_cluster(mut self, cluster: &str) -> Self {
        self.config.cluster.name = Some(cluster.to_string());
        self
    }

    pub fn with(mut self, f: impl FnOnce(&mut ProvisionConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> ProvisionConfig {
        self.config
    }
}

/// Register `(identity, address)` pairs under `cluster/prod`
pub async fn register_cluster(
    registry: &InMemoryRegistry,
    cluster: &str,
    nodes: &[(&str, &str)],
) -> ClusterIdentity {
    let identity = ClusterIdentity::new(cluster, "prod");
    for (name, address) in nodes {
        registry
            .register(
                &identity,
                TestDataBuilder::peer(name).with_address(address).build(),
            )
            .await;
    }
    identity
}
