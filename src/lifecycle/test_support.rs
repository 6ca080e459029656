//! In-memory broker double for lifecycle unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::store::LeaseStore;
use crate::errors::{ClmError, ClmResult};
use crate::secrets::{
    DatastoreConnection, IssuedCredential, RoleDefinition, RootRotation, SecretString,
    SecretsBroker,
};

#[derive(Default)]
struct FakeState {
    /// role -> datastore
    roles: HashMap<String, String>,
    issued: u64,
    rotations: u64,
    revoked: Vec<String>,
    revoked_roles: Vec<String>,
    rotate_error: Option<ClmError>,
    revoke_error: Option<ClmError>,
    /// Simulates a rotation completing while each of the next N lease
    /// requests is in flight.
    rotate_during_issue: u32,
    rotation_target: Option<LeaseStore>,
}

/// Broker double issuing passwords `p0`, `p1`, ... in request order.
#[derive(Default)]
pub(crate) struct FakeBroker {
    state: Mutex<FakeState>,
    rotate_delay: Option<Duration>,
    lease_duration: Duration,
}

impl FakeBroker {
    pub(crate) fn new() -> Self {
        let broker = Self { lease_duration: Duration::from_secs(3600), ..Default::default() };
        broker.with_role("my-role", "testdb")
    }

    pub(crate) fn with_role(self, role: &str, datastore: &str) -> Self {
        self.state().roles.insert(role.to_string(), datastore.to_string());
        self
    }

    pub(crate) fn with_rotate_delay(mut self, delay: Duration) -> Self {
        self.rotate_delay = Some(delay);
        self
    }

    pub(crate) fn fail_rotations(&self, error: ClmError) {
        self.state().rotate_error = Some(error);
    }

    pub(crate) fn fail_revocations(&self, error: ClmError) {
        self.state().revoke_error = Some(error);
    }

    pub(crate) fn rotate_during_next_issues(&self, store: LeaseStore, count: u32) {
        let mut state = self.state();
        state.rotate_during_issue = count;
        state.rotation_target = Some(store);
    }

    pub(crate) fn revoked(&self) -> Vec<String> {
        self.state().revoked.clone()
    }

    pub(crate) fn revoked_roles(&self) -> Vec<String> {
        self.state().revoked_roles.clone()
    }

    pub(crate) fn rotations(&self) -> u64 {
        self.state().rotations
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl SecretsBroker for FakeBroker {
    async fn request_lease(&self, role: &str) -> ClmResult<IssuedCredential> {
        let (issued, interference) = {
            let mut state = self.state();
            let datastore =
                state.roles.get(role).cloned().ok_or_else(|| ClmError::role_not_found(role))?;
            let n = state.issued;
            state.issued += 1;
            let interference = if state.rotate_during_issue > 0 {
                state.rotate_during_issue -= 1;
                state.rotation_target.clone().map(|store| (store, datastore))
            } else {
                None
            };
            let issued = IssuedCredential {
                lease_id: format!("database/creds/{}/lease-{}", role, n),
                role: role.to_string(),
                username: format!("v-token-{}-{}", role, n),
                password: SecretString::new(format!("p{}", n)),
                lease_duration: self.lease_duration,
                renewable: true,
                issued_at: Utc::now(),
            };
            (issued, interference)
        };

        if let Some((store, datastore)) = interference {
            store.advance_epoch(&datastore, Utc::now()).await;
        }
        Ok(issued)
    }

    async fn rotate_root(&self, datastore: &str) -> ClmResult<RootRotation> {
        if let Some(delay) = self.rotate_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        if let Some(error) = state.rotate_error.clone() {
            return Err(error);
        }
        state.rotations += 1;
        Ok(RootRotation {
            datastore: datastore.to_string(),
            rotated_at: Utc::now(),
            generation_marker: None,
        })
    }

    async fn revoke(&self, lease_id: &str) -> ClmResult<()> {
        let mut state = self.state();
        if let Some(error) = state.revoke_error.clone() {
            return Err(error);
        }
        state.revoked.push(lease_id.to_string());
        Ok(())
    }

    async fn revoke_role_leases(&self, role: &str) -> ClmResult<()> {
        let mut state = self.state();
        if let Some(error) = state.revoke_error.clone() {
            return Err(error);
        }
        state.revoked_roles.push(role.to_string());
        Ok(())
    }

    async fn read_role(&self, role: &str) -> ClmResult<RoleDefinition> {
        let state = self.state();
        let db_name =
            state.roles.get(role).cloned().ok_or_else(|| ClmError::role_not_found(role))?;
        Ok(RoleDefinition {
            name: role.to_string(),
            db_name,
            default_ttl: self.lease_duration,
            max_ttl: Duration::from_secs(86400),
            creation_statements: Vec::new(),
        })
    }

    async fn read_datastore(&self, name: &str) -> ClmResult<DatastoreConnection> {
        let state = self.state();
        let allowed_roles = state
            .roles
            .iter()
            .filter(|(_, datastore)| datastore.as_str() == name)
            .map(|(role, _)| role.clone())
            .collect();
        Ok(DatastoreConnection {
            name: name.to_string(),
            plugin_name: "postgresql-database-plugin".to_string(),
            allowed_roles,
            connection_url: None,
            username: Some("postgres".to_string()),
        })
    }
}
