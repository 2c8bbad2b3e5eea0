//! Leader-to-follower secret propagation
//!
//! The leader publishes a secret once per cluster generation; followers poll
//! the shared state until the leader's copy shows up or the deadline passes.
//! Boot order between leader and followers does not matter. A leader that dies
//! before publishing leaves followers timing out, which is fatal for the run.

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::artifacts::FileArtifact;
use crate::core::cluster::identity::{ClusterIdentity, PeerRecord};
use crate::core::cluster::leader_election::{ElectionResult, NodeRole};
use crate::error::{AppError, Result};
use crate::infrastructure::clock::Clock;
use crate::infrastructure::local_state::LocalState;
use crate::infrastructure::shared_state::{SharedState, INITIALIZER_ATTRIBUTE};

/// A propagated value and where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub payload: String,
    pub source_identity: String,
    pub present_at: DateTime<Utc>,
}

impl Secret {
    pub fn new(payload: impl Into<String>, source_identity: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            source_identity: source_identity.into(),
            present_at: Utc::now(),
        }
    }

    /// Read a secret out of a published or persisted attribute.
    ///
    /// A bare string is accepted as a payload published by `source`.
    fn from_attribute(value: &serde_json::Value, source: &str) -> Option<Self> {
        match value {
            serde_json::Value::String(payload) => Some(Secret::new(payload.clone(), source)),
            serde_json::Value::Null => None,
            other => serde_json::from_value(other.clone()).ok(),
        }
    }
}

/// Polling cadence for followers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two reads of the shared state
    pub interval: Duration,
    /// Overall budget after which the follower gives up
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            deadline: Duration::from_secs(300),
        }
    }
}

/// Propagation state machine.
///
/// Leaders go `Uninitialized → Generating → Published` (skipping
/// `Generating` when a secret exists); followers go `Waiting → Retrieved` or
/// `Waiting → TimedOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationState {
    Uninitialized,
    Generating,
    Published,
    Waiting,
    Retrieved,
    TimedOut,
}

/// Produces a fresh secret payload on the leader
pub trait SecretGenerator: Send + Sync {
    fn generate(&self) -> Result<String>;
}

/// Random key material, base64 encoded
#[derive(Debug, Clone, Copy)]
pub struct RandomKeyGenerator {
    pub length: usize,
}

impl RandomKeyGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl SecretGenerator for RandomKeyGenerator {
    fn generate(&self) -> Result<String> {
        let mut bytes = vec![0u8; self.length];
        rand::thread_rng().fill_bytes(&mut bytes);
        Ok(Base64::encode_string(&bytes))
    }
}

/// Re-derives the service-native form of a secret (e.g. a raw key file)
pub trait NativeEncoding: Send + Sync {
    fn encode(&self, secret: &Secret) -> Result<FileArtifact>;
}

/// Result of one propagation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationOutcome {
    pub role: NodeRole,
    pub state: PropagationState,
    pub secret: Secret,
    /// Whether the locally stored value changed during this run
    pub changed: bool,
    /// Native artifact, only re-derived when the value changed
    pub native: Option<FileArtifact>,
}

/// Drives the propagation state machine for one named secret
pub struct SecretPropagator<'a> {
    shared: &'a dyn SharedState,
    local: &'a dyn LocalState,
    clock: &'a dyn Clock,
    policy: PollPolicy,
}

impl<'a> SecretPropagator<'a> {
    pub fn new(
        shared: &'a dyn SharedState,
        local: &'a dyn LocalState,
        clock: &'a dyn Clock,
        policy: PollPolicy,
    ) -> Self {
        Self {
            shared,
            local,
            clock,
            policy,
        }
    }

    pub async fn propagate(
        &self,
        identity: &ClusterIdentity,
        self_identity: &str,
        election: &ElectionResult,
        key: &str,
        generator: &dyn SecretGenerator,
        encoding: Option<&dyn NativeEncoding>,
    ) -> Result<PropagationOutcome> {
        match election.role() {
            NodeRole::Leader => {
                self.lead(identity, self_identity, key, generator, encoding)
                    .await
            }
            NodeRole::Follower => {
                self.follow(identity, election, key, encoding).await
            }
        }
    }

    async fn lead(
        &self,
        identity: &ClusterIdentity,
        self_identity: &str,
        key: &str,
        generator: &dyn SecretGenerator,
        encoding: Option<&dyn NativeEncoding>,
    ) -> Result<PropagationOutcome> {
        let mut state = PropagationState::Uninitialized;

        let published = self.own_published(identity, self_identity, key).await?;
        let stored = self.stored(key, self_identity).await?;

        let secret = match (published, stored.clone()) {
            (Some(secret), _) => {
                debug!(key = key, "Secret already published, skipping generation");
                secret
            }
            (None, Some(secret)) => {
                info!(key = key, "Republishing locally stored secret");
                self.publish(identity, self_identity, key, &secret).await?;
                secret
            }
            (None, None) => {
                state = self.transition(key, state, PropagationState::Generating);
                let secret = Secret::new(generator.generate()?, self_identity);
                self.publish(identity, self_identity, key, &secret).await?;
                info!(cluster = %identity, key = key, "Generated and published cluster secret");
                secret
            }
        };

        let changed = self.store_if_changed(key, stored.as_ref(), &secret).await?;
        state = self.transition(key, state, PropagationState::Published);

        Ok(PropagationOutcome {
            role: NodeRole::Leader,
            state,
            native: self.native(encoding, changed, &secret)?,
            secret,
            changed,
        })
    }

    async fn follow(
        &self,
        identity: &ClusterIdentity,
        election: &ElectionResult,
        key: &str,
        encoding: Option<&dyn NativeEncoding>,
    ) -> Result<PropagationOutcome> {
        let state = PropagationState::Waiting;
        let started = self.clock.now();
        let deadline = started + self.policy.deadline;
        let mut attempts = 0u32;

        info!(
            cluster = %identity,
            key = key,
            leader = %election.leader_identity,
            deadline_secs = self.policy.deadline.as_secs(),
            "Waiting for secret from cluster leader"
        );

        let secret = loop {
            attempts += 1;
            if let Some(secret) = self.leader_published(identity, election, key).await? {
                break secret;
            }

            let now = self.clock.now();
            if now >= deadline {
                self.transition(key, state, PropagationState::TimedOut);
                warn!(
                    cluster = %identity,
                    key = key,
                    attempts = attempts,
                    "Leader never published the secret"
                );
                return Err(AppError::PropagationTimeout {
                    cluster: identity.cluster_name.clone(),
                    key: key.to_string(),
                    waited_secs: (now - started).as_secs(),
                });
            }

            let wait = self.policy.interval.min(deadline - now);
            debug!(
                key = key,
                attempt = attempts,
                wait_ms = wait.as_millis() as u64,
                "Secret not yet published"
            );
            self.clock.sleep(wait).await;
        };

        let stored = self.stored(key, &secret.source_identity).await?;
        let changed = self.store_if_changed(key, stored.as_ref(), &secret).await?;
        let state = self.transition(key, state, PropagationState::Retrieved);

        info!(
            key = key,
            source = %secret.source_identity,
            attempts = attempts,
            changed = changed,
            "Retrieved cluster secret"
        );

        Ok(PropagationOutcome {
            role: NodeRole::Follower,
            state,
            native: self.native(encoding, changed, &secret)?,
            secret,
            changed,
        })
    }

    async fn own_published(
        &self,
        identity: &ClusterIdentity,
        self_identity: &str,
        key: &str,
    ) -> Result<Option<Secret>> {
        let query = identity
            .query()
            .with_filter("name", self_identity)
            .with_present(key);
        let nodes = self.shared.lookup(&query).await?;
        Ok(nodes.iter().find_map(|node| {
            node.attributes
                .get(key)
                .and_then(|v| Secret::from_attribute(v, self_identity))
        }))
    }

    /// Secret published by a node flagged as initializer, preferring the
    /// elected leader when stale flags linger on other nodes.
    async fn leader_published(
        &self,
        identity: &ClusterIdentity,
        election: &ElectionResult,
        key: &str,
    ) -> Result<Option<Secret>> {
        let query = identity
            .query()
            .with_filter(INITIALIZER_ATTRIBUTE, "true")
            .with_present(key);
        let mut nodes: Vec<PeerRecord> = self.shared.lookup(&query).await?;
        nodes.sort_by(|a, b| {
            let a_leader = a.identity != election.leader_identity;
            let b_leader = b.identity != election.leader_identity;
            a_leader.cmp(&b_leader).then_with(|| a.identity.cmp(&b.identity))
        });

        Ok(nodes.iter().find_map(|node| {
            node.attributes
                .get(key)
                .and_then(|v| Secret::from_attribute(v, &node.identity))
        }))
    }

    async fn stored(&self, key: &str, source: &str) -> Result<Option<Secret>> {
        Ok(self
            .local
            .get(key)
            .await?
            .and_then(|v| Secret::from_attribute(&v, source)))
    }

    async fn store_if_changed(
        &self,
        key: &str,
        stored: Option<&Secret>,
        secret: &Secret,
    ) -> Result<bool> {
        if stored.map(|s| s.payload == secret.payload).unwrap_or(false) {
            return Ok(false);
        }
        self.local.set(key, serde_json::to_value(secret)?).await?;
        Ok(true)
    }

    async fn publish(
        &self,
        identity: &ClusterIdentity,
        self_identity: &str,
        key: &str,
        secret: &Secret,
    ) -> Result<()> {
        let mut attributes = BTreeMap::new();
        attributes.insert(INITIALIZER_ATTRIBUTE.to_string(), serde_json::Value::Bool(true));
        attributes.insert(key.to_string(), serde_json::to_value(secret)?);
        self.shared.publish(identity, self_identity, attributes).await
    }

    fn native(
        &self,
        encoding: Option<&dyn NativeEncoding>,
        changed: bool,
        secret: &Secret,
    ) -> Result<Option<FileArtifact>> {
        match encoding {
            Some(encoding) if changed => Ok(Some(encoding.encode(secret)?)),
            _ => Ok(None),
        }
    }

    fn transition(
        &self,
        key: &str,
        from: PropagationState,
        to: PropagationState,
    ) -> PropagationState {
        debug!(key = key, from = ?from, to = ?to, "Propagation state changed");
        to
    }
}
