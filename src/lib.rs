//! cluster-forge - cluster formation and configuration compiler
//!
//! This library provides peer discovery, deterministic bootstrap leader
//! election, leader-to-follower secret propagation and the load-balancer and
//! membership compilers used to provision clustered services.

pub mod config;
pub mod core;
pub mod error;
pub mod infrastructure;
pub mod integrations;
pub mod provisioner;

// Re-export commonly used types
pub use error::{AppError, Result};
pub use provisioner::{Collaborators, Provisioner, ProvisioningReport};
