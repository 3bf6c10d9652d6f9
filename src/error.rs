//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout pgconverge.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `NotFound`: An identity lookup returned zero catalog rows
//! - `Validation`: Desired-state value outside its allowed domain
//! - `UnsupportedFeature`: Capability not available on the connected server
//! - `Statement`: A DDL statement failed; the transaction was rolled back
//! - `Commit`: Commit failed after every statement succeeded
//! - `Lock`: Catalog lock could not be acquired
//! - `ConnectionFailed`: Database connection errors
//! - `QueryFailed`: Catalog read errors
//! - `ConfigError`: Configuration file or connection profile errors

use thiserror::Error;

/// Main error type for reconciliation operations
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Catalog read returned no rows for an identity lookup
    #[error("Not found: {0}")]
    NotFound(String),

    /// Desired state rejected before any statement was built
    #[error("Validation error: {0}")]
    Validation(String),

    /// Capability missing on the connected server version
    #[error("Unsupported feature: {feature} is not available on server version {version}")]
    UnsupportedFeature { feature: String, version: String },

    /// Statement failed during execution, the transaction was rolled back
    #[error("Statement failed while {operation}: {detail}")]
    Statement { operation: String, detail: String },

    /// Commit failed, persisted state is unknown and must be re-read
    #[error("Commit failed, catalog state must be re-read before retrying: {0}")]
    Commit(String),

    /// Catalog lock acquisition failed.
    ///
    /// Acquisition blocks until granted, so this is only produced by a
    /// bounded-wait variant of the lock.
    #[error("Catalog lock unavailable: {0}")]
    Lock(String),

    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Catalog query failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ReconcileError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UnsupportedFeature { .. } => "UNSUPPORTED_FEATURE",
            Self::Statement { .. } => "STATEMENT_FAILED",
            Self::Commit(_) => "COMMIT_FAILED",
            Self::Lock(_) => "LOCK_UNAVAILABLE",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Get human-readable error message
    ///
    /// Statements carrying passwords are never embedded in errors, so this
    /// message is safe to include in JSON output.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Whether the caller must re-read catalog state before retrying
    #[must_use]
    pub const fn requires_reread(&self) -> bool {
        matches!(self, Self::Commit(_))
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an unsupported feature error
    pub fn unsupported(feature: impl Into<String>, version: impl Into<String>) -> Self {
        Self::UnsupportedFeature { feature: feature.into(), version: version.into() }
    }

    /// Create a statement error carrying the logical operation that failed
    pub fn statement(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Statement { operation: operation.into(), detail: detail.into() }
    }

    /// Create a commit error
    pub fn commit(message: impl Into<String>) -> Self {
        Self::Commit(message.into())
    }

    /// Create a lock error
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock(message.into())
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for reconciliation operations
pub type Result<T> = std::result::Result<T, ReconcileError>;
