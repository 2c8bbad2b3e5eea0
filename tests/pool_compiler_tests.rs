//! Load-balancer pool compilation against discovery results

mod common;

use cluster_forge::config::ConfigManager;
use cluster_forge::core::cluster::CloudTag;
use cluster_forge::core::loadbalancer::{compile, compile_all, CompileContext, MemberSlot, PoolProfile, PoolSpec};
use cluster_forge::infrastructure::InMemoryRegistry;
use cluster_forge::{AppError, Provisioner};
use common::*;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

fn ctx() -> CompileContext {
    CompileContext {
        cert_dir: PathBuf::from("/etc/haproxy/certs"),
        self_cloud: CloudTag::Untagged,
        default_backend: None,
    }
}

fn profiles() -> BTreeMap<String, PoolProfile> {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        "mysql".to_string(),
        PoolProfile::new()
            .directive("mode", "tcp")
            .params(["option mysql-check user haproxy"])
            .member_option(MemberSlot::Index(0), "check")
            .member_option(MemberSlot::Wildcard, "check backup"),
    );
    profiles
}

fn servers(directives: &[String]) -> Vec<&str> {
    directives
        .iter()
        .filter(|d| d.starts_with("server "))
        .map(String::as_str)
        .collect()
}

#[tokio::test]
async fn test_compilation_is_idempotent_and_order_independent() {
    let registry = InMemoryRegistry::new();
    register_cluster(
        &registry,
        "db",
        &[("db-3", "10.0.0.3"), ("db-1", "10.0.0.1"), ("db-2", "10.0.0.2")],
    )
    .await;
    let reversed = ReversingRegistry::new(registry.clone());
    let specs = vec![PoolSpec::new("mysql", "mysql").with_cluster("db").with_port(3306)];

    let first = compile_all(&specs, &profiles(), "prod", &registry, &ctx()).await.unwrap();
    let second = compile_all(&specs, &profiles(), "prod", &registry, &ctx()).await.unwrap();
    let third = compile_all(&specs, &profiles(), "prod", &reversed, &ctx()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first, third);
    assert_eq!(
        servers(&first.pools[0].directives),
        vec![
            "server db-1 10.0.0.1:3306 check",
            "server db-2 10.0.0.2:3306 check backup",
            "server db-3 10.0.0.3:3306 check backup",
        ]
    );
}

#[test]
fn test_members_sorted_case_insensitively() {
    let peers = vec![
        TestDataBuilder::peer("n1").with_hostname("beta").with_address("10.0.0.1").build(),
        TestDataBuilder::peer("n2").with_hostname("Alpha").with_address("10.0.0.2").build(),
        TestDataBuilder::peer("n3").with_hostname("gamma").with_address("10.0.0.3").build(),
    ];
    let spec = PoolSpec::new("web", "mysql").with_cluster("app").with_port(80);

    let pool = compile(&spec, &PoolProfile::new(), &peers, &ctx()).unwrap();
    assert_eq!(
        servers(&pool.directives),
        vec![
            "server Alpha 10.0.0.2:80",
            "server beta 10.0.0.1:80",
            "server gamma 10.0.0.3:80",
        ]
    );
}

#[test]
fn test_duplicate_members_collapse_before_options_apply() {
    let peers = vec![
        TestDataBuilder::peer("a-1").with_hostname("a").with_address("10.0.0.1").build(),
        TestDataBuilder::peer("a-2").with_hostname("a").with_address("10.0.0.1").build(),
        TestDataBuilder::peer("b-1").with_hostname("b").with_address("10.0.0.2").build(),
    ];
    let spec = PoolSpec::new("mysql", "mysql").with_cluster("db").with_port(3306);

    let pool = compile(&spec, &profiles()["mysql"], &peers, &ctx()).unwrap();
    assert_eq!(pool.members.len(), 2);
    assert_eq!(
        servers(&pool.directives),
        vec![
            "server a 10.0.0.1:3306 check",
            "server b 10.0.0.2:3306 check backup",
        ]
    );
}

#[test]
fn test_empty_cluster_uses_default_backend() {
    let spec = PoolSpec::new("mysql", "mysql").with_cluster("db").with_port(3306);
    let with_default = CompileContext {
        default_backend: Some("10.9.9.9".parse().unwrap()),
        ..ctx()
    };

    let pool = compile(&spec, &profiles()["mysql"], &[], &with_default).unwrap();
    assert_eq!(servers(&pool.directives), vec!["server default 10.9.9.9:3306 check"]);

    let pool = compile(&spec, &profiles()["mysql"], &[], &ctx()).unwrap();
    assert!(servers(&pool.directives).is_empty());
    assert_eq!(pool.directives, vec!["mode tcp", "option mysql-check user haproxy"]);
}

#[test]
fn test_cloud_peers_resolve_by_provider() {
    let peers = vec![
        TestDataBuilder::peer("web-1")
            .with_address("10.0.0.1")
            .in_cloud("ec2", "172.31.0.1", "52.1.1.1")
            .build(),
        TestDataBuilder::peer("web-2").with_address("192.168.0.2").build(),
    ];
    let spec = PoolSpec::new("web", "http").with_cluster("web").with_port(80);
    let in_ec2 = CompileContext {
        self_cloud: CloudTag::CloudTagged {
            provider: "ec2".to_string(),
            private_address: None,
            public_address: None,
        },
        ..ctx()
    };

    let pool = compile(&spec, &PoolProfile::new(), &peers, &in_ec2).unwrap();
    assert_eq!(
        servers(&pool.directives),
        vec!["server web-1 172.31.0.1:80", "server web-2 192.168.0.2:80"]
    );

    let pool = compile(&spec, &PoolProfile::new(), &peers, &ctx()).unwrap();
    assert_eq!(servers(&pool.directives)[0], "server web-1 52.1.1.1:80");
}

#[tokio::test]
async fn test_skippable_and_fatal_pool_errors() {
    let registry = InMemoryRegistry::new();
    let specs = vec![
        PoolSpec::new("no-port", "mysql").with_cluster("db"),
        PoolSpec::new("no-cluster", "undeclared").with_port(80),
    ];
    let batch = compile_all(&specs, &profiles(), "prod", &registry, &ctx()).await.unwrap();
    assert!(batch.pools.is_empty());
    assert_eq!(batch.skipped.len(), 2);

    let single = compile(&PoolSpec::new("no-port", "mysql"), &profiles()["mysql"], &[], &ctx());
    assert_error_type!(single, AppError::SkippableSpec { .. });

    let fatal = vec![PoolSpec::new("web", "undeclared").with_cluster("app").with_port(80)];
    let result = compile_all(&fatal, &profiles(), "prod", &registry, &ctx()).await;
    assert_error_type!(result, AppError::ConfigError(_));
}

#[tokio::test]
async fn test_pools_compiled_from_yaml_configuration() {
    let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
    writeln!(
        file,
        r#"
node:
  name: lb-1
  hostname: lb-1
cluster:
  environment: prod
haproxy:
  backend_default_ip: 10.0.0.250
  profiles:
    http:
      mode: http
      bind_options:
        - accept-proxy
      params:
        - option httpchk GET /health
      member_options:
        "*": check inter 5s
  server_pools:
    web:
      pool_cluster_name: app
      port: 8080
      bind_port: 80
      profile: http
    admin:
      port: 9000
      profile: http
"#
    )
    .unwrap();

    let config = ConfigManager::load_from_file(file.path()).await.unwrap();
    let registry = InMemoryRegistry::new();
    register_cluster(&registry, "app", &[("app-2", "10.0.1.2"), ("app-1", "10.0.1.1")]).await;
    let host = TestHost::on(&registry);

    let batch = Provisioner::new(&config, host.deps()).compile_pools().await.unwrap();

    assert_eq!(batch.skipped.len(), 1);
    assert_eq!(batch.skipped[0].name, "admin");
    let web = &batch.pools[0];
    assert_eq!(web.bind_name, "web 0.0.0.0:80 accept-proxy");
    assert_eq!(
        web.directives,
        vec![
            "mode http",
            "option httpchk GET /health",
            "server app-1 10.0.1.1:8080 check inter 5s",
            "server app-2 10.0.1.2:8080 check inter 5s",
        ]
    );
}
