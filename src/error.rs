#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Discovery error: {0}")]
    DiscoveryError(String),

    #[error("Timed out after {waited_secs}s waiting for '{key}' from the leader of cluster '{cluster}'")]
    PropagationTimeout {
        cluster: String,
        key: String,
        waited_secs: u64,
    },

    #[error("Skipping pool '{pool}': {reason}")]
    SkippableSpec { pool: String, reason: String },

    #[error("Secret store error: {0}")]
    SecretStoreError(String),

    #[error("Shared state error: {0}")]
    SharedStateError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AppError {
    /// Whether the provisioning run must stop on this error.
    ///
    /// Only a malformed pool spec is recoverable; everything else is reported
    /// to the driver, which decides whether to retry the whole run later.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AppError::SkippableSpec { .. })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::ConfigError(format!("YAML error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalServiceError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
