//! # Credential Lifecycle Manager
//!
//! Facade over the lease store, the rotation coordinator, the broker client
//! and the connection validator. Callers acquire leases, rotate the root
//! credential and ask whether a lease is still usable; the manager keeps the
//! answers consistent with each other under concurrent use.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::model::{DatastoreStatus, Lease, LeaseStatus, Role, StoredLease};
use super::rotation::{revoke_quietly, RotationCoordinator, RotationReport};
use super::store::{LeaseStore, PutOutcome};
use crate::config::{AppConfig, LifecycleConfig};
use crate::datastore::{
    ConnectionAttemptResult, ConnectionOutcome, ConnectionValidator, Credential,
    DatastoreEndpoint,
};
use crate::errors::{ClmError, ClmResult, Result};
use crate::observability::metrics;
use crate::secrets::{DatastoreConnection, SecretsBroker, VaultBrokerClient};

/// Tunables for the manager.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Revoke retired leases at the broker once a rotation completes
    pub revoke_stale_on_rotation: bool,
    /// Lease requests attempted before yielding to concurrent rotations
    pub max_acquire_attempts: u32,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self { revoke_stale_on_rotation: true, max_acquire_attempts: 3 }
    }
}

impl From<&LifecycleConfig> for LifecycleOptions {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            revoke_stale_on_rotation: config.revoke_stale_on_rotation,
            max_acquire_attempts: config.max_acquire_attempts,
        }
    }
}

pub struct CredentialLifecycleManager {
    broker: Arc<dyn SecretsBroker>,
    store: LeaseStore,
    coordinator: RotationCoordinator,
    validator: ConnectionValidator,
    options: LifecycleOptions,
}

impl std::fmt::Debug for CredentialLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialLifecycleManager")
            .field("coordinator", &self.coordinator)
            .field("validator", &self.validator)
            .field("options", &self.options)
            .finish()
    }
}

impl CredentialLifecycleManager {
    pub fn new(
        broker: Arc<dyn SecretsBroker>,
        validator: ConnectionValidator,
        options: LifecycleOptions,
    ) -> Self {
        let store = LeaseStore::new();
        let coordinator =
            RotationCoordinator::new(broker.clone(), store.clone(), options.revoke_stale_on_rotation);
        Self { broker, store, coordinator, validator, options }
    }

    /// Build a manager talking to Vault, with the configured roles
    /// pre-registered against the configured datastore.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let broker = VaultBrokerClient::new(&config.broker)?;
        let manager = Self::new(
            Arc::new(broker),
            ConnectionValidator::new(config.validator.connect_timeout()),
            LifecycleOptions::from(&config.lifecycle),
        );
        for role in &config.lifecycle.roles {
            manager.register_role(Role::new(role.clone(), config.lifecycle.datastore.clone())).await;
        }
        Ok(manager)
    }

    /// Declare a role's datastore binding without asking the broker.
    pub async fn register_role(&self, role: Role) -> Role {
        self.store.register_role(role).await
    }

    async fn resolve_role(&self, role: &str) -> ClmResult<Role> {
        if let Some(known) = self.store.role(role) {
            return Ok(known);
        }
        let definition = self.broker.read_role(role).await?;
        debug!(role = %role, datastore = %definition.db_name, "Resolved role binding from broker");
        Ok(self.store.register_role(Role::new(definition.name, definition.db_name)).await)
    }

    /// Request a new lease for `role` and make it the role's current lease.
    ///
    /// The lease is tagged with the generation read before the broker call.
    /// If a rotation of the role's datastore completes while the request is
    /// in flight, the issued lease is revoked and the request retried; once
    /// the attempts run out the call fails with
    /// [`ClmError::RotationInProgress`].
    #[instrument(skip(self), fields(role = %role))]
    pub async fn acquire_lease(&self, role: &str) -> ClmResult<Lease> {
        let role = self.resolve_role(role).await?;
        let attempts = self.options.max_acquire_attempts.max(1);

        for attempt in 1..=attempts {
            let epoch = self.store.current_epoch(&role.datastore).await;
            let issued = self.broker.request_lease(&role.name).await?;
            let lease = Lease::from_issued(issued, role.datastore.clone(), epoch.generation);

            match self.store.put(lease.clone()).await {
                PutOutcome::Stored { superseded } => {
                    metrics::record_lease_acquired(&role.name);
                    info!(
                        lease_id = %lease.id,
                        username = %lease.username,
                        generation = lease.generation,
                        superseded = ?superseded,
                        "Lease acquired"
                    );
                    return Ok(lease);
                }
                PutOutcome::Outdated { current } => {
                    metrics::record_acquire_retry(&role.name);
                    warn!(
                        attempt,
                        lease_generation = lease.generation,
                        current_generation = current.generation,
                        "Rotation completed while lease request was in flight, discarding lease"
                    );
                    revoke_quietly(self.broker.as_ref(), &lease.id).await;
                }
            }
        }

        Err(ClmError::rotation_in_progress(role.datastore))
    }

    /// Rotate the root credential of `datastore`. Existing leases become
    /// stale; no replacement leases are acquired.
    pub async fn rotate_root(&self, datastore: &str) -> ClmResult<RotationReport> {
        self.coordinator.rotate(datastore).await
    }

    /// Revoke, at the broker, every outstanding lease for the roles allowed on
    /// `datastore`, including leases this manager never saw. Used after a
    /// rotation by processes that did not issue the leases themselves.
    ///
    /// Revocation failures are logged per role. Returns the roles whose
    /// leases the broker confirmed revoking.
    #[instrument(skip(self), fields(datastore = %datastore))]
    pub async fn revoke_outstanding_leases(&self, datastore: &str) -> ClmResult<Vec<String>> {
        let connection = self.broker.read_datastore(datastore).await?;
        let mut revoked = Vec::new();

        for role in &connection.allowed_roles {
            if role == "*" {
                warn!("Datastore allows every role; wildcard leases cannot be revoked by role");
                continue;
            }
            match self.broker.revoke_role_leases(role).await {
                Ok(()) => {
                    metrics::record_revocation("success");
                    revoked.push(role.clone());
                }
                Err(err) => {
                    metrics::record_revocation("failure");
                    warn!(role = %role, error = %err, "Revoking outstanding leases failed");
                }
            }
        }

        info!(roles = ?revoked, "Outstanding leases revoked");
        Ok(revoked)
    }

    /// Classify a lease from local state alone.
    #[instrument(skip(self, lease), fields(lease_id = %lease.id, role = %lease.role))]
    pub async fn validate(&self, lease: &Lease) -> LeaseStatus {
        let status = if !self.store.contains(lease).await {
            LeaseStatus::NotFound
        } else if self.store.is_stale(lease).await {
            LeaseStatus::Stale
        } else {
            LeaseStatus::Fresh
        };
        metrics::record_validation(status.as_str());
        debug!(status = %status, "Lease validated");
        status
    }

    /// Connect to `endpoint` with the lease's credential.
    ///
    /// Stale and unknown leases are refused locally as
    /// [`ConnectionOutcome::AuthenticationFailed`] without dialing.
    #[instrument(skip(self, lease, endpoint), fields(lease_id = %lease.id, role = %lease.role))]
    pub async fn connect(&self, lease: &Lease, endpoint: &DatastoreEndpoint) -> ConnectionAttemptResult {
        match self.validate(lease).await {
            LeaseStatus::Fresh => self.validator.connect(&lease.credential(), endpoint).await,
            status => {
                metrics::record_connection_attempt("authentication_failed");
                info!(status = %status, "Refusing to dial with an unusable lease");
                ConnectionAttemptResult::new(
                    ConnectionOutcome::AuthenticationFailed {
                        reason: format!("lease is {}", status),
                    },
                    lease.credential(),
                    endpoint.to_string(),
                )
            }
        }
    }

    /// Connect with an explicit credential, bypassing the lease store.
    pub async fn probe(
        &self,
        credential: &Credential,
        endpoint: &DatastoreEndpoint,
    ) -> ConnectionAttemptResult {
        self.validator.connect(credential, endpoint).await
    }

    /// The role's current lease, without a broker round trip.
    pub async fn current_lease(&self, role: &str) -> Option<Lease> {
        self.store.get(role).await
    }

    /// Every retained lease for `role`.
    pub async fn leases(&self, role: &str) -> Vec<StoredLease> {
        self.store.leases(role).await
    }

    pub async fn status(&self, datastore: &str) -> DatastoreStatus {
        let phase = self.coordinator.phase(datastore);
        self.store.status(datastore, phase).await
    }

    /// The broker's view of a datastore connection.
    pub async fn datastore_info(&self, datastore: &str) -> ClmResult<DatastoreConnection> {
        self.broker.read_datastore(datastore).await
    }

    pub async fn purge_expired(&self) -> usize {
        self.store.purge_expired().await
    }
}
