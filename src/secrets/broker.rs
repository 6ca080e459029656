//! Secrets broker boundary.
//!
//! The [`SecretsBroker`] trait is the only way the lifecycle manager talks to
//! the external broker. Implementations hold no lifecycle state: they issue a
//! request, map the answer onto the [`ClmError`] taxonomy and return.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use super::types::SecretString;
use crate::errors::ClmResult;

/// A credential exactly as the broker issued it, before the lifecycle
/// manager tags it with a rotation generation.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCredential {
    /// Broker lease identifier, used for revocation
    pub lease_id: String,
    /// Role the credential was issued under
    pub role: String,
    /// Database username created by the broker
    pub username: String,
    /// Database password (redacted in logs and serialization)
    pub password: SecretString,
    /// Validity window granted by the broker
    #[serde(with = "duration_secs")]
    pub lease_duration: Duration,
    /// Whether the broker allows renewing this lease
    pub renewable: bool,
    /// Local time the response was received
    pub issued_at: DateTime<Utc>,
}

/// Acknowledgement of a completed root rotation at the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootRotation {
    pub datastore: String,
    pub rotated_at: DateTime<Utc>,
    /// Opaque marker some brokers return; Vault answers `204` without one.
    pub generation_marker: Option<String>,
}

/// Role definition as stored by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDefinition {
    pub name: String,
    /// Datastore connection the role issues credentials for
    pub db_name: String,
    #[serde(with = "duration_secs")]
    pub default_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub max_ttl: Duration,
    pub creation_statements: Vec<String>,
}

/// Datastore connection as the broker reports it. Never carries the root password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatastoreConnection {
    pub name: String,
    pub plugin_name: String,
    pub allowed_roles: Vec<String>,
    /// Connection URL with any inline credentials masked
    pub connection_url: Option<String>,
    /// Root username the broker manages and rotates
    pub username: Option<String>,
}

/// Broker-side request operations, used to map HTTP status codes onto the
/// error taxonomy. Each variant carries the name the error should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerOperation<'a> {
    RequestLease { role: &'a str },
    RotateRoot { datastore: &'a str },
    Revoke { lease_id: &'a str },
    RevokeRole { role: &'a str },
    ReadRole { role: &'a str },
    ReadDatastore { name: &'a str },
    Admin { path: &'a str },
}

impl BrokerOperation<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RequestLease { .. } => "request_lease",
            Self::RotateRoot { .. } => "rotate_root",
            Self::Revoke { .. } => "revoke",
            Self::RevokeRole { .. } => "revoke_role",
            Self::ReadRole { .. } => "read_role",
            Self::ReadDatastore { .. } => "read_datastore",
            Self::Admin { .. } => "admin",
        }
    }
}

/// Boundary adapter to the external secrets broker.
///
/// # Errors
///
/// - [`ClmError::BrokerUnavailable`](crate::errors::ClmError::BrokerUnavailable)
///   for network failures, timeouts and 5xx answers
/// - [`ClmError::RoleNotFound`](crate::errors::ClmError::RoleNotFound) for
///   unknown roles on lease and role reads
/// - [`ClmError::RotationDenied`](crate::errors::ClmError::RotationDenied) when
///   the broker refuses a root rotation
#[async_trait]
pub trait SecretsBroker: Send + Sync {
    /// Request a new leased credential for `role`.
    async fn request_lease(&self, role: &str) -> ClmResult<IssuedCredential>;

    /// Force-rotate the root credential the broker uses for `datastore`.
    async fn rotate_root(&self, datastore: &str) -> ClmResult<RootRotation>;

    /// Revoke a lease at the broker.
    ///
    /// Callers treat this as advisory cleanup: staleness is enforced locally,
    /// so a failed revocation is logged rather than propagated.
    async fn revoke(&self, lease_id: &str) -> ClmResult<()>;

    /// Revoke every outstanding lease the broker has issued for `role`,
    /// including leases issued to other processes.
    async fn revoke_role_leases(&self, role: &str) -> ClmResult<()>;

    /// Read a role's definition, including the datastore it is bound to.
    async fn read_role(&self, role: &str) -> ClmResult<RoleDefinition>;

    /// Read the broker's view of a datastore connection.
    async fn read_datastore(&self, name: &str) -> ClmResult<DatastoreConnection>;
}

pub(crate) mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }
}
