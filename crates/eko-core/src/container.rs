//! Container and storage descriptor types.

use serde::{Deserialize, Serialize};

/// A running container reported by a container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Container {
    /// Runtime-assigned identifier.
    pub id: String,
    /// Human-readable name(s), comma separated.
    pub name: String,
}

impl Container {
    /// Create a new container descriptor.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Diagnostic description of a constructed storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMetadata {
    /// Backend identifier, e.g. `fs`.
    pub name: String,
    /// Connection string the backend was built from.
    pub connection_string: String,
}

impl std::fmt::Display for StorageMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.name, self.connection_string)
    }
}
