//! Error types for the instrumentation reconciler.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, ledger/lease storage, the remote provider, and
//! reconciliation itself.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// The main error type for the instrumentation tool.
#[derive(Debug, Error)]
pub enum InstrumentError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Ledger and lease storage errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Remote provider errors.
    #[error("Remote API error: {0}")]
    Remote(#[from] RemoteError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A value that should be an ARN could not be parsed as one.
    #[error("Invalid ARN '{arn}': {reason}")]
    InvalidArn {
        /// The offending value.
        arn: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The same state machine is declared more than once.
    #[error("Duplicate state machine: {arn}")]
    DuplicateStateMachine {
        /// The duplicated ARN.
        arn: String,
    },

    /// No configured state machine matches the requested target.
    #[error("No state machine '{arn}' in configuration")]
    UnknownTarget {
        /// The requested ARN.
        arn: String,
    },
}

/// Ledger and lease storage errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// The ledger record is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Lease acquisition failed.
    #[error("Failed to acquire lease: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// A live lease on the resource is held by another process.
    #[error("Resource {resource} is being reconciled by another process (holder: {holder}, since: {since})")]
    LockedByOther {
        /// The leased resource.
        resource: String,
        /// Identifier of the lease holder.
        holder: String,
        /// When the lease was acquired.
        since: String,
    },

    /// Local filesystem backend error.
    #[error("Local state backend error: {message}")]
    Filesystem {
        /// Description of the filesystem error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Ledger format version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected ledger version.
        expected: String,
        /// Found ledger version.
        found: String,
    },
}

/// Errors reported by the remote provider, classified by kind.
///
/// These are carried as data inside execution reports, so they are
/// cloneable and serializable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteError {
    /// The resource, policy, role or log group does not exist.
    #[error("Not found: {resource}")]
    NotFound {
        /// What was missing.
        resource: String,
    },

    /// The request conflicts with existing remote state.
    #[error("Conflict: {message}")]
    Conflict {
        /// Provider message.
        message: String,
    },

    /// Throttling, timeouts and network failures.
    #[error("Transient remote error: {message}")]
    Transient {
        /// Provider message.
        message: String,
    },

    /// The caller lacks permission for the operation.
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Provider message.
        message: String,
    },

    /// The run was cancelled while this operation was pending.
    #[error("Cancelled by caller")]
    Cancelled,

    /// Any provider error that does not fit the kinds above.
    #[error("Remote error{}: {message}", code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Unexpected {
        /// Provider error code, if any.
        code: Option<String>,
        /// Provider message.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The current state of a resource could not be observed.
    #[error("Failed to observe {resource}: {source}")]
    ObservationFailed {
        /// The resource being observed.
        resource: String,
        /// Underlying remote error.
        #[source]
        source: RemoteError,
    },

    /// The desired intent cannot be derived for a resource.
    #[error("Cannot derive intent for {resource}: {reason}")]
    InvalidIntent {
        /// The resource.
        resource: String,
        /// Reason.
        reason: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for instrumentation operations.
pub type Result<T> = std::result::Result<T, InstrumentError>;

/// Result type alias for remote provider calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

impl InstrumentError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is worth retrying later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Remote(RemoteError::Transient { .. })
                | Self::State(StateError::LockFailed { .. } | StateError::LockedByOther { .. })
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates an invalid ARN error.
    #[must_use]
    pub fn invalid_arn(arn: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArn {
            arn: arn.into(),
            reason: reason.into(),
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local filesystem error with the given message.
    #[must_use]
    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::Filesystem {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl RemoteError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Short machine-friendly name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Transient { .. } => "transient",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Cancelled => "cancelled",
            Self::Unexpected { .. } => "unexpected",
        }
    }
}
