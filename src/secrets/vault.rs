//! HashiCorp Vault database secrets engine client.
//!
//! Implements [`SecretsBroker`] over Vault's HTTP API using `reqwest`, plus
//! the administrative calls needed to bootstrap a database secrets engine
//! (mount, connection config, role definition).
//!
//! # Wire format
//!
//! | Operation      | Request                                   |
//! |----------------|-------------------------------------------|
//! | lease          | `GET  /v1/{mount}/creds/{role}`           |
//! | rotate root    | `POST /v1/{mount}/rotate-root/{name}`     |
//! | revoke         | `PUT  /v1/sys/leases/revoke`              |
//! | revoke role    | `PUT  /v1/sys/leases/revoke-prefix/{mount}/creds/{role}` |
//! | read role      | `GET  /v1/{mount}/roles/{role}`           |
//! | read datastore | `GET  /v1/{mount}/config/{name}`          |
//!
//! Requests are authenticated with the `X-Vault-Token` header and carry
//! `X-Vault-Namespace` when a namespace is configured.
//!
//! # Example
//!
//! ```rust,ignore
//! use leaseguard::config::BrokerConfig;
//! use leaseguard::secrets::{SecretsBroker, VaultBrokerClient};
//!
//! let client = VaultBrokerClient::new(&BrokerConfig::from_env())?;
//! let issued = client.request_lease("my-role").await?;
//! client.rotate_root("testdb").await?;
//! ```

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::broker::{
    BrokerOperation, DatastoreConnection, IssuedCredential, RoleDefinition, RootRotation,
    SecretsBroker,
};
use super::types::SecretString;
use crate::config::BrokerConfig;
use crate::datastore::sanitize_url;
use crate::errors::{ClmError, ClmResult};

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";

/// Broker health as reported by `GET /v1/sys/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerHealth {
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub sealed: bool,
    #[serde(default)]
    pub standby: bool,
    #[serde(default)]
    pub version: Option<String>,
}

impl BrokerHealth {
    /// Whether the broker can serve lease and rotation requests.
    pub fn is_serving(&self) -> bool {
        self.initialized && !self.sealed
    }
}

/// Connection settings written to `{mount}/config/{name}`.
#[derive(Debug, Clone)]
pub struct DatastoreConnectionRequest {
    pub name: String,
    pub plugin_name: String,
    pub allowed_roles: Vec<String>,
    /// URL template, e.g. `postgresql://{{username}}:{{password}}@db:5432/testdb`
    pub connection_url: String,
    pub username: String,
    pub password: SecretString,
}

impl DatastoreConnectionRequest {
    /// PostgreSQL connection managed through the `postgresql-database-plugin`.
    pub fn postgres(
        name: impl Into<String>,
        connection_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<SecretString>,
    ) -> Self {
        Self {
            name: name.into(),
            plugin_name: "postgresql-database-plugin".to_string(),
            allowed_roles: Vec::new(),
            connection_url: connection_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn allow_role(mut self, role: impl Into<String>) -> Self {
        self.allowed_roles.push(role.into());
        self
    }
}

/// Role definition written to `{mount}/roles/{name}`.
#[derive(Debug, Clone)]
pub struct RoleRequest {
    pub name: String,
    pub db_name: String,
    pub creation_statements: Vec<String>,
    pub default_ttl: Duration,
    pub max_ttl: Duration,
}

impl RoleRequest {
    /// Statements that create a login role with the issued password and an
    /// expiry, then grant DML on the public schema.
    pub fn default_postgres_statements() -> Vec<String> {
        vec![
            "CREATE ROLE \"{{name}}\" WITH LOGIN PASSWORD '{{password}}' VALID UNTIL '{{expiration}}';"
                .to_string(),
            "GRANT SELECT, UPDATE, INSERT ON ALL TABLES IN SCHEMA public TO \"{{name}}\";"
                .to_string(),
            "GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA public TO \"{{name}}\";".to_string(),
        ]
    }

    pub fn new(name: impl Into<String>, db_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_name: db_name.into(),
            creation_statements: Self::default_postgres_statements(),
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Vault-backed [`SecretsBroker`].
///
/// Cheap to clone; the underlying `reqwest::Client` shares its connection pool.
#[derive(Clone)]
pub struct VaultBrokerClient {
    http: Client,
    address: String,
    token: SecretString,
    namespace: Option<String>,
    mount_path: String,
}

impl std::fmt::Debug for VaultBrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultBrokerClient")
            .field("address", &self.address)
            .field("token", &self.token)
            .field("namespace", &self.namespace)
            .field("mount_path", &self.mount_path)
            .finish()
    }
}

impl VaultBrokerClient {
    /// Build a client. No request is sent until the first operation.
    ///
    /// # Errors
    ///
    /// [`ClmError::Config`] if the address or mount path is unusable.
    pub fn new(config: &BrokerConfig) -> ClmResult<Self> {
        let address = config.address.trim().trim_end_matches('/');
        if address.is_empty() {
            return Err(ClmError::config("Vault address cannot be empty"));
        }
        url::Url::parse(address).map_err(|e| {
            ClmError::config(format!("Invalid Vault address '{}': {}", address, e))
        })?;

        let mount_path = config.mount_path.trim_matches('/');
        if mount_path.is_empty() {
            return Err(ClmError::config("Database secrets engine mount path cannot be empty"));
        }

        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClmError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            address: address.to_string(),
            token: config.token.clone(),
            namespace: config.namespace.clone(),
            mount_path: mount_path.to_string(),
        })
    }

    /// Build a client from `VAULT_ADDR`, `VAULT_TOKEN` and friends.
    pub fn from_env() -> ClmResult<Self> {
        Self::new(&BrokerConfig::from_env())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    /// Query `sys/health`. Vault answers non-2xx codes for sealed, standby and
    /// uninitialized nodes, so the body is decoded for those as well.
    pub async fn health(&self) -> ClmResult<BrokerHealth> {
        let op = BrokerOperation::Admin { path: "sys/health" };
        let response =
            self.request(Method::GET, "sys/health").send().await.map_err(|e| transport_error(op, &e))?;

        match response.status().as_u16() {
            200 | 429 | 472 | 473 | 501 | 503 => {
                response.json::<BrokerHealth>().await.map_err(|e| decode_error(op, &e))
            }
            _ => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(classify_status(op, status, &body))
            }
        }
    }

    /// Mount the database secrets engine at the configured path.
    ///
    /// Returns `false` when the mount already existed.
    #[instrument(skip(self), fields(mount = %self.mount_path))]
    pub async fn enable_database_engine(&self) -> ClmResult<bool> {
        let path = format!("sys/mounts/{}", self.mount_path);
        let op = BrokerOperation::Admin { path: &path };
        let builder = self.request(Method::POST, &path).json(&json!({ "type": "database" }));

        match self.execute(builder, op).await {
            Ok(_) => {
                info!("Enabled database secrets engine");
                Ok(true)
            }
            Err(ClmError::BrokerRejected { status: 400, message })
                if message.contains("already in use") =>
            {
                debug!("Database secrets engine already mounted");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Write the connection the broker uses to manage a datastore.
    #[instrument(skip(self, request), fields(datastore = %request.name))]
    pub async fn configure_datastore(&self, request: &DatastoreConnectionRequest) -> ClmResult<()> {
        validate_path_segment(&request.name, "datastore name")?;
        let path = format!("{}/config/{}", self.mount_path, request.name);
        let body = json!({
            "plugin_name": request.plugin_name,
            "allowed_roles": request.allowed_roles,
            "connection_url": request.connection_url,
            "username": request.username,
            "password": request.password.expose_secret(),
        });

        self.execute(self.request(Method::POST, &path).json(&body), BrokerOperation::Admin {
            path: &path,
        })
        .await?;

        info!(
            plugin = %request.plugin_name,
            connection_url = %sanitize_url(&request.connection_url),
            allowed_roles = ?request.allowed_roles,
            "Configured datastore connection"
        );
        Ok(())
    }

    /// Write a role definition.
    #[instrument(skip(self, request), fields(role = %request.name, datastore = %request.db_name))]
    pub async fn write_role(&self, request: &RoleRequest) -> ClmResult<()> {
        validate_path_segment(&request.name, "role name")?;
        let path = format!("{}/roles/{}", self.mount_path, request.name);
        let body = json!({
            "db_name": request.db_name,
            "creation_statements": request.creation_statements,
            "default_ttl": request.default_ttl.as_secs(),
            "max_ttl": request.max_ttl.as_secs(),
        });

        self.execute(self.request(Method::POST, &path).json(&body), BrokerOperation::Admin {
            path: &path,
        })
        .await?;

        info!(default_ttl_secs = request.default_ttl.as_secs(), "Wrote role definition");
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/v1/{}", self.address, path);
        debug!(method = %method, url = %url, "Sending request to secrets broker");

        let builder = self.http.request(method, url).header(TOKEN_HEADER, self.token.expose_secret());
        match &self.namespace {
            Some(namespace) => builder.header(NAMESPACE_HEADER, namespace),
            None => builder,
        }
    }

    async fn execute(
        &self,
        builder: RequestBuilder,
        op: BrokerOperation<'_>,
    ) -> ClmResult<Response> {
        let response = builder.send().await.map_err(|e| transport_error(op, &e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = classify_status(op, status, &body);
        warn!(
            operation = op.label(),
            status = status.as_u16(),
            error = %error,
            "Secrets broker request failed"
        );
        Err(error)
    }

    async fn read_data<T: DeserializeOwned>(
        &self,
        path: &str,
        op: BrokerOperation<'_>,
    ) -> ClmResult<T> {
        let response = self.execute(self.request(Method::GET, path), op).await?;
        let envelope: DataEnvelope<T> = response.json().await.map_err(|e| decode_error(op, &e))?;
        envelope
            .data
            .ok_or_else(|| ClmError::invalid_response(format!("{} response has no data", op.label())))
    }
}

#[async_trait]
impl SecretsBroker for VaultBrokerClient {
    #[instrument(skip(self))]
    async fn request_lease(&self, role: &str) -> ClmResult<IssuedCredential> {
        validate_path_segment(role, "role name")?;
        let path = format!("{}/creds/{}", self.mount_path, role);
        let op = BrokerOperation::RequestLease { role };

        let response = self.execute(self.request(Method::GET, &path), op).await?;
        let lease: LeaseResponse = response.json().await.map_err(|e| decode_error(op, &e))?;
        let issued_at = Utc::now();

        if lease.lease_id.is_empty() {
            return Err(ClmError::invalid_response("lease response has no lease_id"));
        }
        let data = lease
            .data
            .ok_or_else(|| ClmError::invalid_response("lease response has no credential data"))?;

        debug!(
            lease_id = %lease.lease_id,
            username = %data.username,
            lease_duration_secs = lease.lease_duration,
            "Broker issued credential"
        );

        Ok(IssuedCredential {
            lease_id: lease.lease_id,
            role: role.to_string(),
            username: data.username,
            password: data.password,
            lease_duration: Duration::from_secs(lease.lease_duration),
            renewable: lease.renewable,
            issued_at,
        })
    }

    #[instrument(skip(self))]
    async fn rotate_root(&self, datastore: &str) -> ClmResult<RootRotation> {
        validate_path_segment(datastore, "datastore name")?;
        let path = format!("{}/rotate-root/{}", self.mount_path, datastore);
        let op = BrokerOperation::RotateRoot { datastore };

        let response = self.execute(self.request(Method::POST, &path), op).await?;
        let rotated_at = Utc::now();

        // A 2xx status means the root was rotated; the body only carries the
        // optional marker.
        let generation_marker = match response.text().await {
            Ok(body) => parse_generation_marker(&body),
            Err(e) => {
                warn!(
                    error = %e,
                    "Broker confirmed root rotation but the response body could not be read"
                );
                None
            }
        };

        Ok(RootRotation { datastore: datastore.to_string(), rotated_at, generation_marker })
    }

    #[instrument(skip(self))]
    async fn revoke(&self, lease_id: &str) -> ClmResult<()> {
        let builder = self
            .request(Method::PUT, "sys/leases/revoke")
            .json(&json!({ "lease_id": lease_id }));
        self.execute(builder, BrokerOperation::Revoke { lease_id }).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn revoke_role_leases(&self, role: &str) -> ClmResult<()> {
        validate_path_segment(role, "role name")?;
        let path = format!("sys/leases/revoke-prefix/{}/creds/{}", self.mount_path, role);
        self.execute(self.request(Method::PUT, &path), BrokerOperation::RevokeRole { role })
            .await?;
        info!("Revoked outstanding leases for role");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_role(&self, role: &str) -> ClmResult<RoleDefinition> {
        validate_path_segment(role, "role name")?;
        let path = format!("{}/roles/{}", self.mount_path, role);
        let data: RoleData = self.read_data(&path, BrokerOperation::ReadRole { role }).await?;

        if data.db_name.is_empty() {
            return Err(ClmError::invalid_response(format!("role '{}' has no db_name", role)));
        }

        Ok(RoleDefinition {
            name: role.to_string(),
            db_name: data.db_name,
            default_ttl: Duration::from_secs(data.default_ttl),
            max_ttl: Duration::from_secs(data.max_ttl),
            creation_statements: data.creation_statements,
        })
    }

    #[instrument(skip(self))]
    async fn read_datastore(&self, name: &str) -> ClmResult<DatastoreConnection> {
        validate_path_segment(name, "datastore name")?;
        let path = format!("{}/config/{}", self.mount_path, name);
        let data: DatastoreData =
            self.read_data(&path, BrokerOperation::ReadDatastore { name }).await?;

        Ok(DatastoreConnection {
            name: name.to_string(),
            plugin_name: data.plugin_name,
            allowed_roles: data.allowed_roles,
            connection_url: data.connection_details.connection_url.as_deref().map(sanitize_url),
            username: data.connection_details.username,
        })
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct LeaseResponse {
    #[serde(default)]
    lease_id: String,
    #[serde(default)]
    lease_duration: u64,
    #[serde(default)]
    renewable: bool,
    data: Option<CredentialData>,
}

#[derive(Deserialize)]
struct CredentialData {
    username: String,
    password: SecretString,
}

#[derive(Deserialize)]
struct RoleData {
    #[serde(default)]
    db_name: String,
    #[serde(default)]
    default_ttl: u64,
    #[serde(default)]
    max_ttl: u64,
    #[serde(default)]
    creation_statements: Vec<String>,
}

#[derive(Deserialize)]
struct DatastoreData {
    #[serde(default)]
    plugin_name: String,
    #[serde(default)]
    allowed_roles: Vec<String>,
    #[serde(default)]
    connection_details: ConnectionDetails,
}

#[derive(Deserialize, Default)]
struct ConnectionDetails {
    connection_url: Option<String>,
    username: Option<String>,
}

#[derive(Deserialize)]
struct RotateResponse {
    generation_marker: Option<String>,
    data: Option<RotateData>,
}

#[derive(Deserialize)]
struct RotateData {
    generation_marker: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

// ============================================================================
// Status mapping
// ============================================================================

/// Map a non-success broker answer onto the error taxonomy.
///
/// 5xx and 429 are transient. 404 (and Vault's 400 "unknown role") on lease and
/// role reads mean the role does not exist. 409/423 and 401/403 on rotation
/// mean the broker refused it. Anything else is a non-retryable rejection.
pub fn classify_status(op: BrokerOperation<'_>, status: StatusCode, body: &str) -> ClmError {
    let message = vault_error_message(body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown status").to_string());

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return ClmError::broker_unavailable(format!(
            "{} returned {}: {}",
            op.label(),
            status.as_u16(),
            message
        ));
    }

    let unknown_role = status == StatusCode::NOT_FOUND
        || (status == StatusCode::BAD_REQUEST && message.contains("unknown role"));
    let refused = matches!(status.as_u16(), 401 | 403 | 409 | 423);

    match op {
        BrokerOperation::RequestLease { role } | BrokerOperation::ReadRole { role }
            if unknown_role =>
        {
            ClmError::role_not_found(role)
        }
        BrokerOperation::RotateRoot { datastore } if refused => {
            ClmError::rotation_denied(datastore, message)
        }
        _ => ClmError::broker_rejected(status.as_u16(), message),
    }
}

fn vault_error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    if parsed.errors.is_empty() {
        None
    } else {
        Some(parsed.errors.join("; "))
    }
}

fn parse_generation_marker(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    let parsed: RotateResponse = serde_json::from_str(body).ok()?;
    parsed.generation_marker.or_else(|| parsed.data.and_then(|d| d.generation_marker))
}

fn transport_error(op: BrokerOperation<'_>, error: &reqwest::Error) -> ClmError {
    if error.is_timeout() {
        ClmError::broker_unavailable(format!("{} timed out", op.label()))
    } else {
        ClmError::broker_unavailable(format!("{} failed: {}", op.label(), error))
    }
}

fn decode_error(op: BrokerOperation<'_>, error: &reqwest::Error) -> ClmError {
    if error.is_decode() {
        ClmError::invalid_response(format!("{} response could not be decoded: {}", op.label(), error))
    } else {
        transport_error(op, error)
    }
}

/// Reject names that would escape their URL path segment.
///
/// Role and datastore names are interpolated into request paths, so `/`, `..`,
/// `?` and `#` are refused, as are empty names and names over 128 characters.
pub fn validate_path_segment(value: &str, what: &str) -> ClmResult<()> {
    if value.is_empty() {
        return Err(ClmError::config(format!("{} cannot be empty", what)));
    }
    if value.len() > 128 {
        return Err(ClmError::config(format!(
            "{} exceeds maximum length of 128 characters (got {})",
            what,
            value.len()
        )));
    }
    if value.contains(['/', '?', '#']) || value.contains("..") {
        return Err(ClmError::config(format!(
            "{} '{}' contains a reserved path character",
            what, value
        )));
    }
    Ok(())
}
