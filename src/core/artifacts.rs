//! Artifacts handed to the file-writing collaborator
//!
//! The core decides contents, ownership and permissions; it never writes.

use base64ct::{Base64, Encoding};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Unix permission bits, serialized in octal (`"0644"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(pub u32);

impl FileMode {
    /// World-readable certificate material
    pub const CERTIFICATE: FileMode = FileMode(0o644);
    /// Owner read-only, for key files
    pub const SENSITIVE: FileMode = FileMode(0o400);
    /// Directory only its owner may list or enter
    pub const PRIVATE_DIR: FileMode = FileMode(0o700);
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl Serialize for FileMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "encoding", content = "data", rename_all = "snake_case")]
pub enum ArtifactContent {
    Text(String),
    /// Binary payload, base64 encoded for transport
    Base64(String),
}

impl ArtifactContent {
    pub fn binary(bytes: &[u8]) -> Self {
        ArtifactContent::Base64(Base64::encode_string(bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileArtifact {
    pub path: PathBuf,
    pub owner: String,
    pub group: String,
    pub mode: FileMode,
    pub content: ArtifactContent,
}

impl FileArtifact {
    /// Root-owned certificate file
    pub fn certificate(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            owner: "root".to_string(),
            group: "root".to_string(),
            mode: FileMode::CERTIFICATE,
            content: ArtifactContent::Text(content.into()),
        }
    }

    /// Root-owned, owner read-only file
    pub fn sensitive(path: impl Into<PathBuf>, content: ArtifactContent) -> Self {
        Self {
            path: path.into(),
            owner: "root".to_string(),
            group: "root".to_string(),
            mode: FileMode::SENSITIVE,
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryArtifact {
    pub path: PathBuf,
    pub owner: String,
    pub group: String,
    pub mode: FileMode,
}

/// `cacert.pem`, `cert.pem` and `key.pem` under one directory, as several
/// services expect them
pub fn certificate_files(
    dir: &std::path::Path,
    item: &crate::infrastructure::secret_store::SecretItem,
) -> crate::error::Result<Vec<FileArtifact>> {
    Ok(vec![
        FileArtifact::certificate(dir.join("cacert.pem"), item.require("cacert")?),
        FileArtifact::certificate(dir.join("cert.pem"), item.require("cert")?),
        FileArtifact::certificate(dir.join("key.pem"), item.require("key")?),
    ])
}
