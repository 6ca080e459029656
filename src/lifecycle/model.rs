//! Lifecycle data model: roles, leases, rotation epochs and the status values
//! reported back to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::datastore::Credential;
use crate::secrets::broker::{duration_secs, IssuedCredential};
use crate::secrets::SecretString;

/// Named credential policy at the broker, bound to exactly one datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Role {
    pub name: String,
    pub datastore: String,
}

impl Role {
    pub fn new(name: impl Into<String>, datastore: impl Into<String>) -> Self {
        Self { name: name.into(), datastore: datastore.into() }
    }
}

/// A broker-issued credential tagged with the rotation generation that was
/// current when it was requested. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    /// Broker lease id
    pub id: String,
    pub role: String,
    pub datastore: String,
    pub username: String,
    pub secret: SecretString,
    pub issued_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub lease_duration: Duration,
    pub renewable: bool,
    pub generation: u64,
}

impl Lease {
    pub fn from_issued(issued: IssuedCredential, datastore: impl Into<String>, generation: u64) -> Self {
        Self {
            id: issued.lease_id,
            role: issued.role,
            datastore: datastore.into(),
            username: issued.username,
            secret: issued.password,
            issued_at: issued.issued_at,
            lease_duration: issued.lease_duration,
            renewable: issued.renewable,
            generation,
        }
    }

    /// End of the validity window. A zero duration means the broker set no
    /// expiry on the lease.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.lease_duration.is_zero() {
            return None;
        }
        let window = chrono::Duration::from_std(self.lease_duration).ok()?;
        self.issued_at.checked_add_signed(window)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// The username/secret pair to present to the datastore.
    pub fn credential(&self) -> Credential {
        Credential::new(self.username.clone(), self.secret.clone())
    }
}

/// One root-rotation epoch of a datastore. Generation 0 is the epoch every
/// datastore starts in and has no rotation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct RotationEpoch {
    pub generation: u64,
    pub rotated_at: Option<DateTime<Utc>>,
}

impl RotationEpoch {
    pub fn initial() -> Self {
        Self::default()
    }

    pub(crate) fn next(&self, rotated_at: DateTime<Utc>) -> Self {
        Self { generation: self.generation + 1, rotated_at: Some(rotated_at) }
    }
}

/// Answer to `validate`, computed from local state only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Fresh,
    Stale,
    NotFound,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::NotFound => "not_found",
        }
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationPhase {
    #[default]
    Idle,
    Rotating,
}

impl fmt::Display for RotationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Rotating => f.write_str("rotating"),
        }
    }
}

/// How the store currently regards a retained lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// The role's current lease
    Current,
    /// Replaced by a later acquisition for the same role
    Superseded,
    /// Its generation was retired by a root rotation
    Stale,
}

/// A retained lease together with its record state.
#[derive(Debug, Clone, Serialize)]
pub struct StoredLease {
    pub lease: Lease,
    pub state: RecordState,
}

/// Snapshot of one datastore's lifecycle state.
#[derive(Debug, Clone, Serialize)]
pub struct DatastoreStatus {
    pub datastore: String,
    pub epoch: RotationEpoch,
    pub phase: RotationPhase,
    pub roles: Vec<String>,
    pub current_leases: usize,
    pub retained_leases: usize,
}
