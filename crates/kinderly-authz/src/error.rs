//! Error types for the authorization route cache.
//!
//! A failed build is always recoverable: the cache keeps serving the last
//! published snapshot and the error is folded into `error_count` and the
//! health report instead of reaching the lookup path.

/// Errors that can occur while building or refreshing the route cache.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The permission store query failed.
    #[error("Store query failed: {message}")]
    Query {
        /// Description of the query failure.
        message: String,
    },

    /// The store query did not complete within the configured timeout.
    #[error("Store query timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// The fetched bindings could not be compiled into a usable snapshot.
    #[error("Validation failed: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl BuildError {
    /// Creates a new `Query` error.
    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the error indicates the store itself is unavailable
    /// (as opposed to bad data or a bug).
    #[must_use]
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Query { .. } | Self::Timeout { .. })
    }

    /// Machine-readable error code for the admin API.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Query { .. } => "store_query_failed",
            Self::Timeout { .. } => "store_query_timeout",
            Self::Validation { .. } => "validation_failed",
            Self::Internal { .. } => "internal_error",
        }
    }
}

/// Convenience result alias used throughout the crate.
pub type AuthzResult<T> = Result<T, BuildError>;
