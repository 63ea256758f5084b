//! Error types for cache operations.

use std::time::Duration;

/// Error type for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing medium could not be reached or failed an I/O operation.
    #[error("Backend '{backend}' unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// Key is not present and no create function was supplied.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Key is stale, strict expiry is enabled, and no create function was supplied.
    #[error("Key expired: {0}")]
    KeyExpired(String),

    /// The per-key write lock could not be acquired in time.
    #[error("Timed out after {waited:?} waiting for write lock on key '{key}'")]
    LockTimeout { key: String, waited: Duration },

    /// The caller's create function failed; nothing was stored.
    #[error("Create function failed for key '{key}': {source}")]
    CreateFailed {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cache configuration is invalid for the selected backend.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The backend cannot perform the requested operation.
    #[error("Backend '{backend}' does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// A session identifier failed validation.
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),
}

impl Error {
    /// Build a [`Error::BackendUnavailable`] from any displayable cause.
    pub fn unavailable(backend: &'static str, reason: impl std::fmt::Display) -> Self {
        Error::BackendUnavailable {
            backend,
            reason: reason.to_string(),
        }
    }

    /// Whether the caller is expected to handle this as an ordinary outcome.
    ///
    /// Misses, expiry under strict mode, and lock contention are recoverable;
    /// backend and serialization failures are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::KeyNotFound(_) | Error::KeyExpired(_) | Error::LockTimeout { .. }
        )
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;
