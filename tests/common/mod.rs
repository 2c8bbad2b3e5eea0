#![allow(dead_code)]

use cluster_forge::infrastructure::{
    DecryptionKey, InMemoryLocalState, InMemoryRegistry, InMemorySecretStore, ManualClock,
};
use cluster_forge::Collaborators;

// Test utilities and common setup
pub mod builders;
pub mod mocks;

pub use builders::*;
#[allow(unused_imports)]
pub use mocks::*;

/// In-memory collaborators shared by one simulated host
pub struct TestHost {
    pub registry: InMemoryRegistry,
    pub secrets: InMemorySecretStore,
    pub local: InMemoryLocalState,
    pub clock: ManualClock,
}

impl TestHost {
    /// A host attached to an existing (possibly shared) registry
    pub fn on(registry: &InMemoryRegistry) -> Self {
        Self {
            registry: registry.clone(),
            secrets: InMemorySecretStore::new(),
            local: InMemoryLocalState::new(),
            clock: ManualClock::new(),
        }
    }

    pub fn deps(&self) -> Collaborators<'_> {
        Collaborators {
            registry: &self.registry,
            shared: &self.registry,
            secrets: &self.secrets,
            local: &self.local,
            clock: &self.clock,
        }
    }

    pub fn key() -> DecryptionKey {
        DecryptionKey::new("integration-test-key")
    }
}

/// Common test macros
#[macro_export]
macro_rules! assert_error_type {
    ($result:expr, $error_type:pat) => {
        match $result {
            Err($error_type) => {}
            other => panic!("Expected error type, got: {:?}", other),
        }
    };
}
