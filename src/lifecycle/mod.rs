//! # Credential Lifecycle
//!
//! Leases issued by the secrets broker, the rotation epochs that retire them,
//! and the [`CredentialLifecycleManager`] facade that keeps the two consistent.

pub mod manager;
pub mod model;
pub mod rotation;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use manager::{CredentialLifecycleManager, LifecycleOptions};
pub use model::{
    DatastoreStatus, Lease, LeaseStatus, RecordState, Role, RotationEpoch, RotationPhase,
    StoredLease,
};
pub use rotation::{RotationCoordinator, RotationReport};
pub use store::{LeaseStore, PutOutcome};
