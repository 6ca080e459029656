//! # Lease Store
//!
//! In-memory record of known leases and the current rotation epoch, kept per
//! datastore. Each datastore has its own ledger behind its own mutex, so
//! datastores never contend with one another. No lock section contains a
//! suspension point besides acquiring the lock itself: a dropped future leaves
//! a ledger either fully updated or untouched.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::model::{DatastoreStatus, Lease, RecordState, Role, RotationEpoch, RotationPhase, StoredLease};

/// Result of [`LeaseStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The lease is now the role's current lease. Carries the id of the
    /// lease it replaced, if any.
    Stored { superseded: Option<String> },
    /// A rotation completed after the lease's generation was read; the lease
    /// was not stored.
    Outdated { current: RotationEpoch },
}

#[derive(Debug, Default)]
struct DatastoreLedger {
    epoch: RotationEpoch,
    roles: BTreeSet<String>,
    /// lease id -> record
    records: HashMap<String, StoredLease>,
    /// role -> lease id of its current lease
    current: HashMap<String, String>,
}

impl DatastoreLedger {
    fn mark_stale(&mut self, generation: u64) -> Vec<Lease> {
        let mut staled = Vec::new();
        for record in self.records.values_mut() {
            if record.lease.generation == generation && record.state != RecordState::Stale {
                record.state = RecordState::Stale;
                staled.push(record.lease.clone());
            }
        }
        let records = &self.records;
        self.current.retain(|_, id| {
            records.get(id.as_str()).is_some_and(|record| record.state == RecordState::Current)
        });
        staled
    }

    fn is_current(&self, lease: &Lease, now: DateTime<Utc>) -> bool {
        lease.generation == self.epoch.generation
            && !lease.is_expired_at(now)
            && self
                .records
                .get(&lease.id)
                .is_some_and(|record| record.state == RecordState::Current)
    }
}

/// Shared lease registry. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct LeaseStore {
    roles: Arc<DashMap<String, Role>>,
    ledgers: Arc<DashMap<String, Arc<Mutex<DatastoreLedger>>>>,
    /// lease id -> datastore
    index: Arc<DashMap<String, String>>,
}

impl LeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger for `datastore`, created on first write.
    fn ledger(&self, datastore: &str) -> Arc<Mutex<DatastoreLedger>> {
        if let Some(ledger) = self.existing_ledger(datastore) {
            return ledger;
        }
        self.ledgers.entry(datastore.to_string()).or_default().value().clone()
    }

    /// Ledger for `datastore` if anything was ever written to it. Read paths
    /// use this so that lookups with arbitrary names allocate nothing.
    fn existing_ledger(&self, datastore: &str) -> Option<Arc<Mutex<DatastoreLedger>>> {
        self.ledgers.get(datastore).map(|ledger| ledger.value().clone())
    }

    /// Register a role binding. Roles are immutable: if the name is already
    /// known the existing binding wins and is returned.
    pub async fn register_role(&self, role: Role) -> Role {
        let registered = self.roles.entry(role.name.clone()).or_insert(role).value().clone();
        let ledger = self.ledger(&registered.datastore);
        ledger.lock().await.roles.insert(registered.name.clone());
        registered
    }

    pub fn role(&self, name: &str) -> Option<Role> {
        self.roles.get(name).map(|role| role.value().clone())
    }

    pub async fn current_epoch(&self, datastore: &str) -> RotationEpoch {
        match self.existing_ledger(datastore) {
            Some(ledger) => ledger.lock().await.epoch,
            None => RotationEpoch::initial(),
        }
    }

    /// Store `lease` as its role's current lease, provided its generation is
    /// still the datastore's current one.
    pub async fn put(&self, lease: Lease) -> PutOutcome {
        let ledger = self.ledger(&lease.datastore);
        let mut ledger = ledger.lock().await;

        if lease.generation != ledger.epoch.generation {
            debug!(
                lease_generation = lease.generation,
                current_generation = ledger.epoch.generation,
                "Rejecting lease from a retired generation"
            );
            return PutOutcome::Outdated { current: ledger.epoch };
        }

        ledger.roles.insert(lease.role.clone());
        let superseded = ledger.current.insert(lease.role.clone(), lease.id.clone());
        if let Some(previous) = superseded.as_deref() {
            if let Some(record) = ledger.records.get_mut(previous) {
                if record.state == RecordState::Current {
                    record.state = RecordState::Superseded;
                }
            }
        }

        self.index.insert(lease.id.clone(), lease.datastore.clone());
        ledger
            .records
            .insert(lease.id.clone(), StoredLease { lease, state: RecordState::Current });

        PutOutcome::Stored { superseded }
    }

    /// Flag every lease of `datastore` with the given generation as stale.
    /// Records are kept for audit. Returns the leases newly marked.
    pub async fn mark_stale(&self, datastore: &str, generation: u64) -> Vec<Lease> {
        match self.existing_ledger(datastore) {
            Some(ledger) => ledger.lock().await.mark_stale(generation),
            None => Vec::new(),
        }
    }

    /// Start a new epoch for `datastore` and retire the previous generation,
    /// as one step. Returns the new epoch and the leases it made stale.
    pub async fn advance_epoch(
        &self,
        datastore: &str,
        rotated_at: DateTime<Utc>,
    ) -> (RotationEpoch, Vec<Lease>) {
        let ledger = self.ledger(datastore);
        let mut ledger = ledger.lock().await;
        let previous = ledger.epoch.generation;
        ledger.epoch = ledger.epoch.next(rotated_at);
        let staled = ledger.mark_stale(previous);
        (ledger.epoch, staled)
    }

    /// The role's current lease, unless it has expired or been retired.
    pub async fn get(&self, role: &str) -> Option<Lease> {
        let datastore = self.role(role)?.datastore;
        let ledger = self.existing_ledger(&datastore)?;
        let ledger = ledger.lock().await;
        let id = ledger.current.get(role)?;
        let record = ledger.records.get(id)?;
        let now = Utc::now();
        ledger.is_current(&record.lease, now).then(|| record.lease.clone())
    }

    /// Whether `lease` is known to this store at all.
    pub async fn contains(&self, lease: &Lease) -> bool {
        let Some(datastore) = self.index.get(&lease.id).map(|entry| entry.value().clone()) else {
            return false;
        };
        let Some(ledger) = self.existing_ledger(&datastore) else {
            return false;
        };
        let ledger = ledger.lock().await;
        ledger.records.contains_key(&lease.id)
    }

    /// True when the lease is expired, superseded, retired by a rotation or
    /// unknown to the store.
    pub async fn is_stale(&self, lease: &Lease) -> bool {
        let Some(ledger) = self.existing_ledger(&lease.datastore) else {
            return true;
        };
        let ledger = ledger.lock().await;
        !ledger.is_current(lease, Utc::now())
    }

    /// All retained leases for `role`, oldest first.
    pub async fn leases(&self, role: &str) -> Vec<StoredLease> {
        let Some(role) = self.role(role) else {
            return Vec::new();
        };
        let Some(ledger) = self.existing_ledger(&role.datastore) else {
            return Vec::new();
        };
        let ledger = ledger.lock().await;
        let mut leases: Vec<StoredLease> = ledger
            .records
            .values()
            .filter(|record| record.lease.role == role.name)
            .cloned()
            .collect();
        leases.sort_by_key(|record| record.lease.issued_at);
        leases
    }

    /// Drop every record whose lease window has elapsed, plus stale and
    /// superseded records that can no longer be returned. Returns the number
    /// of records removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let ledgers: Vec<_> = self.ledgers.iter().map(|entry| entry.value().clone()).collect();
        let mut removed = Vec::new();

        for ledger in ledgers {
            let mut guard = ledger.lock().await;
            let ledger = &mut *guard;
            ledger.records.retain(|id, record| {
                let keep = record.state == RecordState::Current && !record.lease.is_expired_at(now);
                if !keep {
                    removed.push(id.clone());
                }
                keep
            });
            let records = &ledger.records;
            ledger.current.retain(|_, id| records.contains_key(id.as_str()));
        }

        for id in &removed {
            self.index.remove(id);
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "Purged retired lease records");
        }
        removed.len()
    }

    /// Snapshot of a datastore's ledger. The phase is supplied by the caller,
    /// since rotation state lives with the coordinator.
    pub async fn status(&self, datastore: &str, phase: RotationPhase) -> DatastoreStatus {
        let Some(ledger) = self.existing_ledger(datastore) else {
            return DatastoreStatus {
                datastore: datastore.to_string(),
                epoch: RotationEpoch::initial(),
                phase,
                roles: Vec::new(),
                current_leases: 0,
                retained_leases: 0,
            };
        };
        let ledger = ledger.lock().await;
        let now = Utc::now();
        let current_leases = ledger
            .current
            .values()
            .filter_map(|id| ledger.records.get(id))
            .filter(|record| ledger.is_current(&record.lease, now))
            .count();

        DatastoreStatus {
            datastore: datastore.to_string(),
            epoch: ledger.epoch,
            phase,
            roles: ledger.roles.iter().cloned().collect(),
            current_leases,
            retained_leases: ledger.records.len(),
        }
    }
}
