//! Collaborators the provisioning core talks to: the discovery registry, the
//! shared attribute state, the secret store, host-local state and time.

pub mod clock;
pub mod local_state;
pub mod registry;
pub mod secret_store;
pub mod shared_state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use local_state::{FileLocalState, InMemoryLocalState, LocalState};
pub use registry::{HttpRegistryClient, InMemoryRegistry, RegistryClient};
pub use secret_store::{DecryptionKey, FileSecretStore, InMemorySecretStore, SecretItem, SecretStore};
pub use shared_state::{SharedState, INITIALIZER_ATTRIBUTE};
