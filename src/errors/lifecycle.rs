//! # Lifecycle Errors
//!
//! Failure taxonomy for lease acquisition, root rotation and broker calls.
//!
//! Connection failures against the datastore are deliberately absent: they are
//! reported as [`ConnectionOutcome`](crate::datastore::ConnectionOutcome) values.

use thiserror::Error;

/// Result type for credential lifecycle operations.
pub type ClmResult<T> = std::result::Result<T, ClmError>;

/// Errors surfaced by the credential lifecycle manager and its broker client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClmError {
    /// The broker could not be reached, timed out, or answered with a 5xx.
    /// Transient; callers may retry with backoff.
    #[error("Secrets broker unavailable: {reason}")]
    BrokerUnavailable { reason: String },

    /// The broker does not know the requested role.
    #[error("Role not found: {role}")]
    RoleNotFound { role: String },

    /// The broker refused to rotate the datastore's root credential.
    #[error("Root rotation denied for datastore '{datastore}': {reason}")]
    RotationDenied { datastore: String, reason: String },

    /// A rotation for the datastore is already running in this process.
    #[error("Root rotation already in progress for datastore '{datastore}'")]
    RotationInProgress { datastore: String },

    /// The broker rejected the request for a reason other than the above.
    #[error("Secrets broker rejected request ({status}): {message}")]
    BrokerRejected { status: u16, message: String },

    /// The broker answered, but the body did not match the expected shape.
    #[error("Invalid response from secrets broker: {reason}")]
    InvalidResponse { reason: String },

    /// Local configuration prevents the operation.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ClmError {
    pub fn broker_unavailable(reason: impl Into<String>) -> Self {
        Self::BrokerUnavailable { reason: reason.into() }
    }

    pub fn role_not_found(role: impl Into<String>) -> Self {
        Self::RoleNotFound { role: role.into() }
    }

    pub fn rotation_denied(datastore: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RotationDenied { datastore: datastore.into(), reason: reason.into() }
    }

    pub fn rotation_in_progress(datastore: impl Into<String>) -> Self {
        Self::RotationInProgress { datastore: datastore.into() }
    }

    pub fn broker_rejected(status: u16, message: impl Into<String>) -> Self {
        Self::BrokerRejected { status, message: message.into() }
    }

    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse { reason: reason.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Whether a caller may reasonably retry the same call after a backoff.
    ///
    /// `RotationInProgress` is excluded: the caller should wait for the running
    /// rotation rather than hammer the coordinator.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BrokerUnavailable { .. } | Self::InvalidResponse { .. })
    }

    /// Short, stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BrokerUnavailable { .. } => "broker_unavailable",
            Self::RoleNotFound { .. } => "role_not_found",
            Self::RotationDenied { .. } => "rotation_denied",
            Self::RotationInProgress { .. } => "rotation_in_progress",
            Self::BrokerRejected { .. } => "broker_rejected",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Config { .. } => "config",
        }
    }
}
