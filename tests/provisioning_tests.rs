//! Full provisioning runs over simulated hosts

mod common;

use cluster_forge::config::{PacemakerConfig, PerconaConfig, ProvisionConfig};
use cluster_forge::core::artifacts::FileArtifact;
use cluster_forge::infrastructure::{
    DecryptionKey, FileLocalState, FileSecretStore, InMemoryRegistry, ManualClock,
};
use cluster_forge::integrations::{IntegrationKind, IntegrationOutput};
use cluster_forge::{AppError, Collaborators, Provisioner, ProvisioningReport};
use common::*;
use tempfile::TempDir;

const DB: [(&str, &str); 3] = [
    ("db-1", "10.0.1.1"),
    ("db-2", "10.0.1.2"),
    ("db-3", "10.0.1.3"),
];

fn db_config(node: &str, address: &str) -> ProvisionConfig {
    TestDataBuilder::config(node)
        .with_address(address)
        .in_cluster("db")
        .with(|config| {
            config.pacemaker = Some(PacemakerConfig::default());
            config.percona = Some(PerconaConfig::default());
        })
        .build()
}

fn authkey(report: &ProvisioningReport) -> Option<FileArtifact> {
    report.integrations.iter().find_map(|output| match output {
        IntegrationOutput::Pacemaker(plan) => plan.authkey_file.clone(),
        _ => None,
    })
}

fn cluster_address(report: &ProvisioningReport) -> String {
    report
        .integrations
        .iter()
        .find_map(|output| match output {
            IntegrationOutput::Percona(plan) => Some(plan.wsrep_cluster_address.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_three_node_cluster_converges() {
    let registry = InMemoryRegistry::new();
    register_cluster(&registry, "db", &DB).await;

    let mut reports = Vec::new();
    for (node, address) in DB {
        let host = TestHost::on(&registry);
        let config = db_config(node, address);
        let report = Provisioner::new(&config, host.deps()).run(None).await.unwrap();
        reports.push(report);
    }

    for report in &reports {
        let election = report.election.as_ref().unwrap();
        assert_eq!(election.leader_identity, "db-1");
        assert_eq!(election.is_self, report.node == "db-1");
        assert_eq!(report.members.len(), 3);
        assert!(report.warnings.is_empty());

        let kinds: Vec<_> = report
            .integrations
            .iter()
            .map(|output| match output {
                IntegrationOutput::Pacemaker(_) => IntegrationKind::Pacemaker,
                IntegrationOutput::Percona(_) => IntegrationKind::Percona,
                _ => panic!("unexpected integration"),
            })
            .collect();
        assert_eq!(kinds, vec![IntegrationKind::Pacemaker, IntegrationKind::Percona]);
    }

    let key = authkey(&reports[0]).unwrap();
    assert_eq!(authkey(&reports[1]).unwrap(), key);
    assert_eq!(authkey(&reports[2]).unwrap(), key);

    assert_eq!(cluster_address(&reports[0]), "gcomm://");
    assert_eq!(cluster_address(&reports[1]), "gcomm://10.0.1.1,10.0.1.3");
    assert_eq!(cluster_address(&reports[2]), "gcomm://10.0.1.1,10.0.1.2");

    let json = serde_json::to_value(&reports[1]).unwrap();
    assert_eq!(json["cluster"]["cluster_name"], "db");
    assert_eq!(json["integrations"][0]["integration"], "pacemaker");
    assert_eq!(json["integrations"][0]["authkey_file"]["mode"], "0400");
}

#[tokio::test]
async fn test_converged_rerun_only_differs_in_run_metadata() {
    let registry = InMemoryRegistry::new();
    register_cluster(&registry, "db", &DB).await;

    let leader = TestHost::on(&registry);
    let config = db_config("db-1", "10.0.1.1");
    Provisioner::new(&config, leader.deps()).run(None).await.unwrap();

    let follower = TestHost::on(&registry);
    let config = db_config("db-2", "10.0.1.2");
    let provisioner = Provisioner::new(&config, follower.deps());
    let first = provisioner.run(None).await.unwrap();
    let second = provisioner.run(None).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.election, second.election);
    assert_eq!(first.members, second.members);
    // The key file is only re-derived when the key changed.
    assert!(authkey(&first).is_some());
    assert!(authkey(&second).is_none());
    assert_eq!(cluster_address(&first), cluster_address(&second));
}

#[tokio::test]
async fn test_follower_without_leader_fails_the_run() {
    let registry = InMemoryRegistry::new();
    register_cluster(&registry, "db", &DB).await;

    let host = TestHost::on(&registry);
    let config = db_config("db-3", "10.0.1.3");
    let result = Provisioner::new(&config, host.deps())
        .run(Some(IntegrationKind::Pacemaker))
        .await;

    assert_error_type!(result, AppError::PropagationTimeout { .. });
    assert!(host.clock.elapsed().as_secs() >= 300);
}

#[tokio::test]
async fn test_file_backed_collaborators() {
    let dir = TempDir::new().unwrap();
    let secrets_root = dir.path().join("secrets");
    tokio::fs::create_dir_all(secrets_root.join("passwords-prod")).await.unwrap();
    tokio::fs::write(
        secrets_root.join("passwords-prod").join("rabbit.json"),
        r#"{"default_user": "admin", "default_password": "pw", "erlang_cookie": "C00KIE"}"#,
    )
    .await
    .unwrap();

    let registry = InMemoryRegistry::new();
    register_cluster(&registry, "mq", &[("mq-1", "10.0.2.1"), ("mq-2", "10.0.2.2")]).await;

    let secrets = FileSecretStore::new(secrets_root);
    let local = FileLocalState::new(dir.path().join("state").join("state.json"));
    let clock = ManualClock::new();
    let deps = Collaborators {
        registry: &registry,
        shared: &registry,
        secrets: &secrets,
        local: &local,
        clock: &clock,
    };
    let config = TestDataBuilder::config("mq-2")
        .with_address("10.0.2.2")
        .in_cluster("mq")
        .with(|config| config.rabbitmq = Some(Default::default()))
        .build();

    let report = Provisioner::new(&config, deps)
        .with_decryption_key(DecryptionKey::new("file-key"))
        .run(None)
        .await
        .unwrap();

    match &report.integrations[0] {
        IntegrationOutput::Rabbitmq(plan) => {
            assert_eq!(plan.default_user, "admin");
            assert_eq!(plan.erlang_cookie, "C00KIE");
            assert_eq!(plan.cluster_disk_nodes, vec!["rabbit@mq-1", "rabbit@mq-2"]);
            assert_eq!(plan.host_entries.len(), 1);
        }
        other => panic!("unexpected output {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_decryption_key_is_fatal_for_secret_items() {
    let registry = InMemoryRegistry::new();
    let host = TestHost::on(&registry);
    let config = TestDataBuilder::config("mq-1")
        .with(|config| config.rabbitmq = Some(Default::default()))
        .build();

    let result = Provisioner::new(&config, host.deps()).run(None).await;
    assert_error_type!(result, AppError::SecretStoreError(_));

    let result = Provisioner::new(&config, host.deps())
        .with_decryption_key(TestHost::key())
        .run(None)
        .await;
    // Key present, item still missing from the store.
    assert_error_type!(result, AppError::SecretStoreError(_));
}
