//! Error types for the usersync system
//!
//! [`Error`] covers every failure a collaborator can report. [`ReconcileError`]
//! is what a reconciliation pass hands back to its caller, and carries the
//! retry classification the controller acts on.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for usersync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the usersync system
#[derive(Error, Debug)]
pub enum Error {
    /// Directory client errors
    #[error("Directory error: {0}")]
    Directory(String),

    /// Object store errors
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entity not found (directory account or stored object)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The entity already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// A fetched object's type is not registered
    #[error("Scheme mismatch: {0}")]
    SchemeMismatch(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a directory error
    pub fn directory(msg: impl Into<String>) -> Self {
        Self::Directory(msg.into())
    }

    /// Create an object store error
    pub fn object_store(msg: impl Into<String>) -> Self {
        Self::ObjectStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a scheme mismatch error
    pub fn scheme_mismatch(msg: impl Into<String>) -> Self {
        Self::SchemeMismatch(msg.into())
    }

    /// Whether this error means the entity does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// Failure of a single reconciliation pass
///
/// The variant decides how the pass is retried:
///
/// - `Retryable`: directory failure, re-attempted after the fixed hint
/// - `Store`: object store failure, re-attempted with the controller's
///   default error backoff
/// - `Fatal`: wiring bug (malformed reference, unknown type), never retried
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Directory failure during the sync pass
    #[error("{source} (retry in {}s)", requeue_after.as_secs())]
    Retryable {
        /// Underlying directory error
        #[source]
        source: Error,
        /// Fixed delay before the next attempt
        requeue_after: Duration,
    },

    /// Object store read or write failure
    #[error("object store write failed: {0}")]
    Store(#[source] Error),

    /// Programming or wiring error
    #[error("fatal: {0}")]
    Fatal(#[source] Error),
}

impl ReconcileError {
    /// Create a retryable error with a requeue hint
    pub fn retryable(source: Error, requeue_after: Duration) -> Self {
        Self::Retryable {
            source,
            requeue_after,
        }
    }

    /// The fixed backoff hint, if this error carries one
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::Retryable { requeue_after, .. } => Some(*requeue_after),
            Self::Store(_) | Self::Fatal(_) => None,
        }
    }

    /// Whether this error must not be retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
