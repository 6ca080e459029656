//! Credential lifecycle against a mock Vault: lease acquisition, root
//! rotation, staleness and concurrent rotation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use leaseguard::datastore::TlsOptions;
use leaseguard::lifecycle::{Role, RotationPhase};
use leaseguard::{ClmError, ConnectionOutcome, DatastoreEndpoint, LeaseStatus};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn unreachable_endpoint() -> DatastoreEndpoint {
    DatastoreEndpoint::new("127.0.0.1", 1, "testdb").with_tls(TlsOptions::disabled())
}

async fn vault_with_my_role() -> MockServer {
    let server = MockServer::start().await;
    mount_sequential_leases(&server, "my-role").await;
    mount_role(&server, "my-role", "testdb").await;
    mount_revoke(&server, ResponseTemplate::new(204)).await;
    server
}

#[tokio::test]
async fn test_rotation_makes_previous_lease_stale() {
    let server = vault_with_my_role().await;
    mount_rotate(&server, "testdb", ResponseTemplate::new(204)).await;
    let clm = manager_for(&server);

    let old = clm.acquire_lease("my-role").await.unwrap();
    assert_eq!(old.generation, 0);
    assert_eq!(old.datastore, "testdb");
    assert_eq!(old.secret.expose_secret(), "p0");
    assert_eq!(clm.validate(&old).await, LeaseStatus::Fresh);

    let report = clm.rotate_root("testdb").await.unwrap();
    assert_eq!(report.epoch.generation, 1);
    assert_eq!(report.staled_leases, 1);
    assert_eq!(clm.validate(&old).await, LeaseStatus::Stale);
    assert_eq!(revoked_lease_ids(&server).await, vec![old.id.clone()]);

    let attempt = clm.connect(&old, &unreachable_endpoint()).await;
    assert!(matches!(attempt.outcome, ConnectionOutcome::AuthenticationFailed { .. }));

    let fresh = clm.acquire_lease("my-role").await.unwrap();
    assert_eq!(fresh.generation, 1);
    assert_eq!(fresh.secret.expose_secret(), "p1");
    assert_eq!(clm.validate(&fresh).await, LeaseStatus::Fresh);
    assert_eq!(clm.current_lease("my-role").await.unwrap().id, fresh.id);
}

#[tokio::test]
async fn test_confirmed_rotation_with_unreadable_body_retires_leases() {
    let address = spawn_raw_broker(|method: &str, path: &str| match (method, path) {
        ("GET", "/v1/database/creds/my-role") => {
            let body = lease_body("database/creds/my-role/lease-0", "v-token-my-role-0", "p0", 3600)
                .to_string();
            raw_response("200 OK", body.len(), &body)
        }
        ("POST", "/v1/database/rotate-root/testdb") => raw_response("200 OK", 200, "{\"data\":"),
        ("PUT", "/v1/sys/leases/revoke") => raw_response("204 No Content", 0, ""),
        _ => raw_response("404 Not Found", 2, "{}"),
    })
    .await;
    let clm = manager_at(&address);
    clm.register_role(Role::new("my-role", "testdb")).await;

    let old = clm.acquire_lease("my-role").await.unwrap();
    assert_eq!(old.generation, 0);

    let report = clm.rotate_root("testdb").await.unwrap();
    assert_eq!(report.epoch.generation, 1);
    assert_eq!(report.receipt.generation_marker, None);
    assert_eq!(report.staled_leases, 1);
    assert_eq!(clm.validate(&old).await, LeaseStatus::Stale);
}

#[tokio::test]
async fn test_outstanding_leases_revoked_for_every_allowed_role() {
    let server = MockServer::start().await;
    mount_datastore(&server, "testdb", &["my-role", "reporting", "*"]).await;
    mount_rotate(&server, "testdb", ResponseTemplate::new(204)).await;
    for role in ["my-role", "reporting"] {
        Mock::given(method("PUT"))
            .and(path(format!("/v1/sys/leases/revoke-prefix/database/creds/{}", role)))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
    }
    // A fresh manager, as in a separate CLI invocation: it never saw the leases
    let clm = manager_for(&server);

    clm.rotate_root("testdb").await.unwrap();
    let revoked = clm.revoke_outstanding_leases("testdb").await.unwrap();
    assert_eq!(revoked, vec!["my-role".to_string(), "reporting".to_string()]);
}

#[tokio::test]
async fn test_concurrent_rotations_exactly_one_succeeds() {
    let server = vault_with_my_role().await;
    Mock::given(method("POST"))
        .and(path("/v1/database/rotate-root/testdb"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;
    let clm = Arc::new(manager_for(&server));

    let first = {
        let clm = clm.clone();
        tokio::spawn(async move { clm.rotate_root("testdb").await })
    };
    let second = {
        let clm = clm.clone();
        tokio::spawn(async move { clm.rotate_root("testdb").await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(ClmError::RotationInProgress { datastore }) if datastore == "testdb"))
            .count(),
        1
    );
    let status = clm.status("testdb").await;
    assert_eq!(status.epoch.generation, 1);
    assert_eq!(status.phase, RotationPhase::Idle);
}

#[tokio::test]
async fn test_failed_rotation_leaves_leases_fresh() {
    let server = vault_with_my_role().await;
    mount_rotate(
        &server,
        "testdb",
        ResponseTemplate::new(500).set_body_json(error_body("internal error")),
    )
    .await;
    let clm = manager_for(&server);

    let lease = clm.acquire_lease("my-role").await.unwrap();
    let err = clm.rotate_root("testdb").await.unwrap_err();
    assert!(matches!(err, ClmError::BrokerUnavailable { .. }));

    assert_eq!(clm.validate(&lease).await, LeaseStatus::Fresh);
    assert_eq!(clm.status("testdb").await.epoch.generation, 0);
    assert!(revoked_lease_ids(&server).await.is_empty());
}

#[tokio::test]
async fn test_denied_rotation_is_not_swallowed() {
    let server = vault_with_my_role().await;
    mount_rotate(
        &server,
        "testdb",
        ResponseTemplate::new(403).set_body_json(error_body("permission denied")),
    )
    .await;
    let clm = manager_for(&server);
    let lease = clm.acquire_lease("my-role").await.unwrap();

    let err = clm.rotate_root("testdb").await.unwrap_err();
    assert_eq!(err, ClmError::rotation_denied("testdb", "permission denied"));
    assert_eq!(clm.validate(&lease).await, LeaseStatus::Fresh);
}

#[tokio::test]
async fn test_acquisitions_without_rotation_share_generation() {
    let server = vault_with_my_role().await;
    let clm = manager_for(&server);

    let mut generations = Vec::new();
    for _ in 0..3 {
        generations.push(clm.acquire_lease("my-role").await.unwrap().generation);
    }
    assert_eq!(generations, vec![0, 0, 0]);
    assert_eq!(clm.leases("my-role").await.len(), 3);
}

#[tokio::test]
async fn test_unknown_role_surfaces_role_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/database/roles/ghost"))
        .respond_with(ResponseTemplate::new(404).set_body_json(error_body("")))
        .mount(&server)
        .await;
    let clm = manager_for(&server);

    assert_eq!(clm.acquire_lease("ghost").await.unwrap_err(), ClmError::role_not_found("ghost"));
}

#[tokio::test]
async fn test_registered_role_needs_no_role_lookup() {
    let server = MockServer::start().await;
    mount_sequential_leases(&server, "readonly").await;
    let clm = manager_for(&server);
    clm.register_role(Role::new("readonly", "testdb")).await;

    let lease = clm.acquire_lease("readonly").await.unwrap();
    assert_eq!(lease.datastore, "testdb");
    let paths: Vec<String> = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| request.url.path().to_string())
        .collect();
    assert_eq!(paths, vec!["/v1/database/creds/readonly".to_string()]);
}

#[tokio::test]
async fn test_revoke_failure_does_not_fail_rotation() {
    let server = MockServer::start().await;
    mount_sequential_leases(&server, "my-role").await;
    mount_role(&server, "my-role", "testdb").await;
    mount_revoke(&server, ResponseTemplate::new(500).set_body_json(error_body("boom"))).await;
    mount_rotate(&server, "testdb", ResponseTemplate::new(204)).await;
    let clm = manager_for(&server);

    let lease = clm.acquire_lease("my-role").await.unwrap();
    let report = clm.rotate_root("testdb").await.unwrap();
    assert_eq!(report.staled_leases, 1);
    assert_eq!(report.revoked_leases, 0);
    assert_eq!(clm.validate(&lease).await, LeaseStatus::Stale);
}

#[tokio::test]
async fn test_broker_outage_propagates_from_acquire() {
    let server = MockServer::start().await;
    mount_role(&server, "my-role", "testdb").await;
    Mock::given(method("GET"))
        .and(path("/v1/database/creds/my-role"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    let clm = manager_for(&server);

    let err = clm.acquire_lease("my-role").await.unwrap_err();
    assert!(err.is_retryable());
    assert!(clm.current_lease("my-role").await.is_none());
}
