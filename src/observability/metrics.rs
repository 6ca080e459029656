//! # Metrics Collection
//!
//! Lifecycle counters emitted through the `metrics` facade. The library never
//! installs an exporter; without a recorder every call is a no-op.

use metrics::{counter, describe_counter, Unit};

/// Records credential lifecycle metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Record a lease stored as its role's current lease
    pub fn record_lease_acquired(&self, role: &str) {
        let labels = [("role", role.to_string())];
        counter!("leases_acquired_total", &labels).increment(1);
    }

    /// Record an acquisition retried because a rotation completed mid-flight
    pub fn record_acquire_retry(&self, role: &str) {
        let labels = [("role", role.to_string())];
        counter!("lease_acquire_retries_total", &labels).increment(1);
    }

    /// Record the outcome of a root rotation request
    pub fn record_rotation(&self, outcome: &str) {
        let labels = [("outcome", outcome.to_string())];
        counter!("root_rotations_total", &labels).increment(1);
    }

    pub fn record_leases_marked_stale(&self, datastore: &str, count: usize) {
        let labels = [("datastore", datastore.to_string())];
        counter!("leases_marked_stale_total", &labels).increment(count as u64);
    }

    pub fn record_validation(&self, status: &str) {
        let labels = [("status", status.to_string())];
        counter!("lease_validations_total", &labels).increment(1);
    }

    pub fn record_connection_attempt(&self, outcome: &str) {
        let labels = [("outcome", outcome.to_string())];
        counter!("connection_attempts_total", &labels).increment(1);
    }

    pub fn record_revocation(&self, outcome: &str) {
        let labels = [("outcome", outcome.to_string())];
        counter!("lease_revocations_total", &labels).increment(1);
    }

    /// Register descriptions for every lifecycle counter
    pub fn describe_lifecycle_metrics(&self) {
        describe_counter!(
            "leases_acquired_total",
            Unit::Count,
            "Leases issued by the broker and stored as current"
        );
        describe_counter!(
            "lease_acquire_retries_total",
            Unit::Count,
            "Lease requests retried because a rotation completed while in flight"
        );
        describe_counter!(
            "root_rotations_total",
            Unit::Count,
            "Root rotation requests by outcome"
        );
        describe_counter!(
            "leases_marked_stale_total",
            Unit::Count,
            "Leases retired by completed root rotations"
        );
        describe_counter!(
            "lease_validations_total",
            Unit::Count,
            "Local lease validations by status"
        );
        describe_counter!(
            "connection_attempts_total",
            Unit::Count,
            "Datastore connection attempts by outcome"
        );
        describe_counter!(
            "lease_revocations_total",
            Unit::Count,
            "Best-effort lease revocations by outcome"
        );
    }
}

pub fn record_lease_acquired(role: &str) {
    MetricsRecorder.record_lease_acquired(role);
}

pub fn record_acquire_retry(role: &str) {
    MetricsRecorder.record_acquire_retry(role);
}

pub fn record_rotation(outcome: &str) {
    MetricsRecorder.record_rotation(outcome);
}

pub fn record_leases_marked_stale(datastore: &str, count: usize) {
    MetricsRecorder.record_leases_marked_stale(datastore, count);
}

pub fn record_validation(status: &str) {
    MetricsRecorder.record_validation(status);
}

pub fn record_connection_attempt(outcome: &str) {
    MetricsRecorder.record_connection_attempt(outcome);
}

pub fn record_revocation(outcome: &str) {
    MetricsRecorder.record_revocation(outcome);
}
