//! Cluster formation
//!
//! This module contains the components every host runs to join its cluster:
//! identity and discovery predicates, bootstrap leader election, secret
//! propagation from the leader and membership list compilation.

pub mod identity;
pub mod leader_election;
pub mod membership;
pub mod secret_propagation;

// Re-export commonly used types
pub use identity::{CloudTag, ClusterIdentity, DiscoveryQuery, PeerRecord};
pub use leader_election::{elect, ElectionResult, LeaderElector, NodeRole};
pub use membership::MembershipEntry;
pub use secret_propagation::{PollPolicy, PropagationOutcome, PropagationState, Secret, SecretPropagator};
