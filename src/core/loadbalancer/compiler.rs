//! Load-balancer pool compiler
//!
//! Merges a pool spec, its profile and the discovered backend peers into the
//! ordered directive list of one `listen` section. Compilation is a pure
//! function of its inputs so repeated runs produce byte-identical output.

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::core::cluster::identity::{ClusterIdentity, CloudTag, PeerRecord};
use crate::core::loadbalancer::profile::{MemberOptions, MemberSlot, PoolProfile, PoolSpec, ProfileField};
use crate::error::{AppError, Result};
use crate::infrastructure::registry::RegistryClient;

/// Hostname given to the synthetic member used when a pool has no peers
pub const DEFAULT_MEMBER_HOSTNAME: &str = "default";

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// A resolved backend server
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PoolMember {
    pub address: IpAddr,
    pub hostname: String,
}

/// Final output for one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledPool {
    pub name: String,
    pub bind_name: String,
    pub directives: Vec<String>,
    pub members: Vec<PoolMember>,
}

/// A pool left out of the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPool {
    pub name: String,
    pub reason: String,
}

/// Result of compiling every declared pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolBatch {
    pub pools: Vec<CompiledPool>,
    pub skipped: Vec<SkippedPool>,
}

/// Host-level inputs shared by every pool of a run
#[derive(Debug, Clone)]
pub struct CompileContext {
    /// Directory holding `<bind_ssl>.pem` certificate bundles
    pub cert_dir: PathBuf,
    /// Cloud placement of the host running the compiler
    pub self_cloud: CloudTag,
    pub default_backend: Option<IpAddr>,
}

/// Address a peer should be reached at from this host.
///
/// Same-provider peers are reached on their private address; peers in a
/// cloud we are not part of on their public address; everything else on the
/// plain address. Missing cloud addresses fall back to the plain address.
pub fn resolve_address(self_cloud: &CloudTag, peer: &PeerRecord) -> IpAddr {
    match (&peer.cloud, self_cloud) {
        (
            CloudTag::CloudTagged {
                provider,
                private_address,
                ..
            },
            CloudTag::CloudTagged {
                provider: own_provider,
                ..
            },
        ) if provider == own_provider => private_address.unwrap_or(peer.address),
        (CloudTag::CloudTagged { public_address, .. }, _) => public_address.unwrap_or(peer.address),
        (CloudTag::Untagged, _) => peer.address,
    }
}

/// Sorted, deduplicated members; falls back to the default backend when no
/// peer was discovered.
pub fn resolve_members(
    peers: &[PeerRecord],
    self_cloud: &CloudTag,
    default_backend: Option<IpAddr>,
) -> Vec<PoolMember> {
    let mut members: Vec<PoolMember> = if peers.is_empty() {
        default_backend
            .map(|address| PoolMember {
                address,
                hostname: DEFAULT_MEMBER_HOSTNAME.to_string(),
            })
            .into_iter()
            .collect()
    } else {
        peers
            .iter()
            .map(|peer| PoolMember {
                address: resolve_address(self_cloud, peer),
                hostname: peer.hostname.clone(),
            })
            .collect()
    };

    members.sort_by(|a, b| {
        a.hostname
            .to_lowercase()
            .cmp(&b.hostname.to_lowercase())
            .then_with(|| a.hostname.cmp(&b.hostname))
            .then_with(|| a.address.cmp(&b.address))
    });
    members.dedup();
    members
}

fn member_option(options: &MemberOptions, index: usize) -> &str {
    options
        .get(&MemberSlot::Index(index))
        .or_else(|| options.get(&MemberSlot::Wildcard))
        .map(String::as_str)
        .unwrap_or("")
}

fn join_nonempty(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compile one pool whose spec already carries a port.
pub fn compile(
    spec: &PoolSpec,
    profile: &PoolProfile,
    peers: &[PeerRecord],
    ctx: &CompileContext,
) -> Result<CompiledPool> {
    let port = spec.port.ok_or_else(|| AppError::SkippableSpec {
        pool: spec.name.clone(),
        reason: "no backend port given".to_string(),
    })?;

    let mut bind_options = profile.bind_options.clone();
    if let Some(extra) = &spec.bind_options {
        for option in extra {
            if !bind_options.contains(option) {
                bind_options.push(option.clone());
            }
        }
    }

    let bind_address = spec.bind_address.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS);
    let bind_port = spec.bind_port.unwrap_or(port);
    let endpoint = format!("{}:{}", bind_address, bind_port);

    let mut directives = Vec::new();
    let bind_name = match &spec.bind_ssl {
        None => {
            let options = bind_options.join(" ");
            join_nonempty(&[spec.name.as_str(), endpoint.as_str(), options.as_str()])
        }
        Some(certificate) => {
            let bundle = ctx.cert_dir.join(format!("{}.pem", certificate));
            bind_options.push(format!("ssl crt {}", bundle.display()));
            directives.push(format!("bind {} {}", endpoint, bind_options.join(" ")));
            spec.name.clone()
        }
    };

    for field in &profile.fields {
        match field {
            ProfileField::Params(params) => directives.extend(params.iter().cloned()),
            ProfileField::Directive { key, value } => {
                directives.push(format!("{} {}", key, value))
            }
        }
    }

    let mut member_options = profile.member_options.clone();
    if let Some(overrides) = &spec.member_options {
        member_options.extend(overrides.iter().map(|(slot, option)| (*slot, option.clone())));
    }

    let members = resolve_members(peers, &ctx.self_cloud, ctx.default_backend);
    for (index, member) in members.iter().enumerate() {
        let server = format!("server {} {}:{}", member.hostname, member.address, port);
        directives.push(join_nonempty(&[server.as_str(), member_option(&member_options, index)]));
    }

    Ok(CompiledPool {
        name: spec.name.clone(),
        bind_name,
        directives,
        members,
    })
}

/// Compile every declared pool, discovering each pool's backend cluster.
///
/// A pool without cluster or port is skipped with a warning. A pool naming
/// an undeclared profile aborts the whole batch before any discovery runs.
pub async fn compile_all(
    specs: &[PoolSpec],
    profiles: &BTreeMap<String, PoolProfile>,
    environment: &str,
    registry: &dyn RegistryClient,
    ctx: &CompileContext,
) -> Result<PoolBatch> {
    let mut batch = PoolBatch::default();
    let mut runnable = Vec::new();

    for spec in specs {
        let cluster_name = match (&spec.cluster_name, spec.port) {
            (Some(cluster_name), Some(_)) if !cluster_name.is_empty() => cluster_name,
            (None, _) | (Some(_), Some(_)) => {
                skip(&mut batch, spec, "no cluster to search for backend nodes was given");
                continue;
            }
            (Some(_), None) => {
                skip(&mut batch, spec, "no backend port was given");
                continue;
            }
        };

        let profile = profiles.get(&spec.profile).ok_or_else(|| {
            AppError::ConfigError(format!(
                "No profile '{}' found for pool '{}'",
                spec.profile, spec.name
            ))
        })?;

        runnable.push((spec, profile, ClusterIdentity::new(cluster_name.clone(), environment)));
    }

    for (spec, profile, identity) in runnable {
        let query = identity.query();
        info!(pool = %spec.name, query = %query, "Pool search");

        let peers = registry.search(&query).await?;
        let pool = compile(spec, profile, &peers, ctx)?;

        info!(
            pool = %pool.name,
            members = pool.members.len(),
            directives = pool.directives.len(),
            "Adding server pool"
        );
        batch.pools.push(pool);
    }

    Ok(batch)
}

fn skip(batch: &mut PoolBatch, spec: &PoolSpec, reason: &str) {
    let err = AppError::SkippableSpec {
        pool: spec.name.clone(),
        reason: reason.to_string(),
    };
    warn!(pool = %spec.name, "{}", err);
    batch.skipped.push(SkippedPool {
        name: spec.name.clone(),
        reason: reason.to_string(),
    });
}
