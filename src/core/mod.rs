//! Core domain logic
//!
//! Everything in here derives values from discovery data and declarative
//! inputs. Talking to collaborators is left to `infrastructure`.

// Artifacts handed to file-writing collaborators
pub mod artifacts;

// Discovery, election, propagation and membership
pub mod cluster;

// Load-balancer pool compilation
pub mod loadbalancer;

// Re-export commonly used types for easy access
pub use artifacts::{ArtifactContent, DirectoryArtifact, FileArtifact, FileMode};
pub use cluster::{ClusterIdentity, ElectionResult, PeerRecord};
