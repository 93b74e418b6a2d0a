//! Error types for the policy engine.

use objstore_crypt::CryptError;
use objstore_storage::StorageError;
use thiserror::Error;

/// Result type alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Broad error categories callers map to their own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was structurally invalid.
    Validation,
    /// A policy with the same id already exists.
    Conflict,
    /// An unknown policy, backend or provider was referenced.
    NotFound,
    /// Storage was used before being configured.
    NotInitialized,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotInitialized => "not_initialized",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Errors returned by policy stores and engines.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A policy with this id is already registered.
    #[error("policy already exists: {id}")]
    PolicyAlreadyExists {
        /// The duplicate id.
        id: String,
    },

    /// No policy is registered under this id.
    #[error("policy not found: {id}")]
    PolicyNotFound {
        /// The unknown id.
        id: String,
    },

    /// A policy failed validation.
    #[error("invalid policy: {field}: {reason}")]
    InvalidPolicy {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// A named backend could not be resolved.
    #[error("backend not found: {name}")]
    BackendNotFound {
        /// The backend name.
        name: String,
    },

    /// Storage layer failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encryption layer failure.
    #[error("encryption error: {0}")]
    Crypt(#[from] CryptError),

    /// Policy file could not be read or written.
    #[error("policy persistence error: {reason}")]
    Persistence {
        /// What went wrong.
        reason: String,
    },
}

impl PolicyError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        PolicyError::InvalidPolicy {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(id: &str) -> Self {
        PolicyError::PolicyNotFound { id: id.to_string() }
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PolicyError::PolicyAlreadyExists { .. } => ErrorKind::Conflict,
            PolicyError::PolicyNotFound { .. } | PolicyError::BackendNotFound { .. } => {
                ErrorKind::NotFound
            }
            PolicyError::InvalidPolicy { .. } => ErrorKind::Validation,
            PolicyError::Storage(e) => match e {
                StorageError::NotInitialized => ErrorKind::NotInitialized,
                StorageError::BackendNotFound { .. } => ErrorKind::NotFound,
                StorageError::InvalidKey { .. }
                | StorageError::InvalidBackendName { .. }
                | StorageError::InvalidConfig { .. } => ErrorKind::Validation,
                _ => ErrorKind::Internal,
            },
            PolicyError::Crypt(CryptError::ProviderNotFound { .. })
            | PolicyError::Crypt(CryptError::KeyNotFound { .. }) => ErrorKind::NotFound,
            PolicyError::Crypt(_) | PolicyError::Persistence { .. } => ErrorKind::Internal,
        }
    }

    /// HTTP-style status code for this error.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::NotInitialized | ErrorKind::Internal => 500,
        }
    }
}
