//! Error types for the storage subsystem.

use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error variants for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The requested object does not exist.
    #[error("object not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// No backend is registered under the given name.
    #[error("backend not found: {name}")]
    BackendNotFound {
        /// The unresolved backend name.
        name: String,
    },

    /// The facade was used before `initialize` was called.
    #[error("storage facade not initialized")]
    NotInitialized,

    /// `initialize` was called on a facade that already holds a configuration.
    #[error("storage facade already initialized")]
    AlreadyInitialized,

    /// An object key or key reference failed validation.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A backend name failed validation.
    #[error("invalid backend name {name:?}: {reason}")]
    InvalidBackendName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Backend or facade configuration is incomplete or inconsistent.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the problem.
        reason: String,
    },

    /// Metadata sidecar could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend-specific failure.
    #[error("backend error: {reason}")]
    Backend {
        /// Description of the failure.
        reason: String,
    },
}

impl StorageError {
    /// Returns true if the error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound { .. } => true,
            StorageError::IoError(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub(crate) fn not_found(key: &str) -> Self {
        StorageError::NotFound {
            key: key.to_string(),
        }
    }
}
