//! # Root Rotation
//!
//! Per-datastore `Idle -> Rotating -> Idle` state machine around the broker's
//! root rotation. A datastore is `Rotating` exactly while an entry exists in
//! the coordinator's phase map; the entry is owned by a guard so that every
//! exit path, including a dropped future, returns the datastore to `Idle`.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::model::{RotationEpoch, RotationPhase};
use super::store::LeaseStore;
use crate::errors::{ClmError, ClmResult};
use crate::observability::metrics;
use crate::secrets::{RootRotation, SecretsBroker};

/// What a completed rotation did.
#[derive(Debug, Clone, Serialize)]
pub struct RotationReport {
    pub datastore: String,
    pub previous_generation: u64,
    pub epoch: RotationEpoch,
    pub receipt: RootRotation,
    /// Leases retired by this rotation
    pub staled_leases: usize,
    /// Retired leases the broker confirmed revoking
    pub revoked_leases: usize,
}

/// Owns a datastore's `Rotating` entry for the duration of one rotation.
struct RotatingGuard<'a> {
    phases: &'a DashMap<String, DateTime<Utc>>,
    datastore: &'a str,
    broker_rotated: bool,
    settled: bool,
}

impl<'a> RotatingGuard<'a> {
    fn enter(phases: &'a DashMap<String, DateTime<Utc>>, datastore: &'a str) -> ClmResult<Self> {
        match phases.entry(datastore.to_string()) {
            Entry::Occupied(_) => Err(ClmError::rotation_in_progress(datastore)),
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(Self { phases, datastore, broker_rotated: false, settled: false })
            }
        }
    }
}

impl Drop for RotatingGuard<'_> {
    fn drop(&mut self) {
        self.phases.remove(self.datastore);
        if self.settled {
            return;
        }
        if self.broker_rotated {
            error!(
                datastore = %self.datastore,
                "Root rotated at broker but rotation was abandoned before local leases were retired"
            );
        } else {
            warn!(
                datastore = %self.datastore,
                "Rotation abandoned while broker call was outstanding; broker-side outcome unknown"
            );
        }
    }
}

/// Serializes root rotations per datastore and retires the leases derived
/// from the previous root.
#[derive(Clone)]
pub struct RotationCoordinator {
    broker: Arc<dyn SecretsBroker>,
    store: LeaseStore,
    /// datastore -> time the in-flight rotation started
    rotating: Arc<DashMap<String, DateTime<Utc>>>,
    revoke_stale: bool,
}

impl std::fmt::Debug for RotationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationCoordinator")
            .field("rotating", &self.rotating.len())
            .field("revoke_stale", &self.revoke_stale)
            .finish()
    }
}

impl RotationCoordinator {
    pub fn new(broker: Arc<dyn SecretsBroker>, store: LeaseStore, revoke_stale: bool) -> Self {
        Self { broker, store, rotating: Arc::new(DashMap::new()), revoke_stale }
    }

    pub fn phase(&self, datastore: &str) -> RotationPhase {
        if self.rotating.contains_key(datastore) {
            RotationPhase::Rotating
        } else {
            RotationPhase::Idle
        }
    }

    pub async fn epoch(&self, datastore: &str) -> RotationEpoch {
        self.store.current_epoch(datastore).await
    }

    /// Rotate the root credential of `datastore`.
    ///
    /// Fails fast with [`ClmError::RotationInProgress`] if a rotation of the
    /// same datastore is already running. A broker failure leaves the epoch
    /// and every lease untouched.
    #[instrument(skip(self), fields(datastore = %datastore))]
    pub async fn rotate(&self, datastore: &str) -> ClmResult<RotationReport> {
        let mut guard = match RotatingGuard::enter(&self.rotating, datastore) {
            Ok(guard) => guard,
            Err(err) => {
                metrics::record_rotation("in_progress");
                info!("Rotation already in progress, rejecting");
                return Err(err);
            }
        };

        let receipt = match self.broker.rotate_root(datastore).await {
            Ok(receipt) => receipt,
            Err(err) => {
                guard.settled = true;
                metrics::record_rotation(err.kind());
                warn!(error = %err, "Root rotation failed at broker");
                return Err(err);
            }
        };
        guard.broker_rotated = true;

        let (epoch, staled) = self.store.advance_epoch(datastore, receipt.rotated_at).await;
        guard.settled = true;
        drop(guard);

        let previous_generation = epoch.generation - 1;
        metrics::record_rotation("success");
        metrics::record_leases_marked_stale(datastore, staled.len());
        info!(
            previous_generation,
            generation = epoch.generation,
            staled_leases = staled.len(),
            "Root rotated, previous generation retired"
        );

        let mut revoked_leases = 0;
        if self.revoke_stale {
            for lease in &staled {
                if revoke_quietly(self.broker.as_ref(), &lease.id).await {
                    revoked_leases += 1;
                }
            }
        }

        Ok(RotationReport {
            datastore: datastore.to_string(),
            previous_generation,
            epoch,
            receipt,
            staled_leases: staled.len(),
            revoked_leases,
        })
    }
}

/// Revoke a lease at the broker, logging instead of propagating failure.
/// Returns whether the broker confirmed the revocation.
pub(crate) async fn revoke_quietly(broker: &dyn SecretsBroker, lease_id: &str) -> bool {
    match broker.revoke(lease_id).await {
        Ok(()) => {
            metrics::record_revocation("success");
            true
        }
        Err(err) => {
            metrics::record_revocation("failure");
            warn!(lease_id = %lease_id, error = %err, "Lease revocation failed");
            false
        }
    }
}
