//! # Configuration Settings
//!
//! Defines the configuration structure for leaseguard.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::datastore::DatastoreEndpoint;
use crate::errors::{Error, Result};
use crate::secrets::vault::validate_path_segment;
use crate::secrets::SecretString;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Secrets broker connection
    #[validate(nested)]
    pub broker: BrokerConfig,

    /// Datastore the leased credentials are used against
    #[validate(nested)]
    pub endpoint: DatastoreEndpoint,

    /// Connection validation
    #[validate(nested)]
    pub validator: ValidatorConfig,

    /// Lease and rotation behaviour
    #[validate(nested)]
    pub lifecycle: LifecycleConfig,

    /// Logging configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load every section from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            broker: BrokerConfig::from_env(),
            endpoint: DatastoreEndpoint::from_env()?,
            validator: ValidatorConfig::from_env(),
            lifecycle: LifecycleConfig::from_env(),
            observability: ObservabilityConfig::from_env(),
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    /// Checks that go beyond what the validator crate can do
    fn validate_custom(&self) -> Result<()> {
        if url::Url::parse(&self.broker.address).is_err() {
            return Err(Error::validation_field(
                format!("Broker address '{}' is not a valid URL", self.broker.address),
                "broker.address",
            ));
        }

        self.endpoint.tls.check()?;

        validate_path_segment(&self.lifecycle.datastore, "datastore")
            .map_err(|e| Error::validation_field(e.to_string(), "lifecycle.datastore"))?;
        for role in &self.lifecycle.roles {
            validate_path_segment(role, "role")
                .map_err(|e| Error::validation_field(e.to_string(), "lifecycle.roles"))?;
        }

        Ok(())
    }
}

/// Secrets broker (Vault) configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BrokerConfig {
    /// Broker base URL
    #[validate(length(min = 1, message = "Broker address cannot be empty"))]
    pub address: String,

    /// Token sent as `X-Vault-Token`
    pub token: SecretString,

    /// Enterprise namespace, if any
    pub namespace: Option<String>,

    /// Mount path of the database secrets engine
    #[validate(length(min = 1, message = "Mount path cannot be empty"))]
    pub mount_path: String,

    /// Per-request timeout in seconds
    #[validate(range(
        min = 1,
        max = 120,
        message = "Broker timeout must be between 1 and 120 seconds"
    ))]
    pub request_timeout_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".to_string(),
            token: SecretString::default(),
            namespace: None,
            mount_path: "database".to_string(),
            request_timeout_seconds: 10,
        }
    }
}

impl BrokerConfig {
    /// Create broker configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let address = std::env::var("VAULT_ADDR").unwrap_or(defaults.address);
        let token = std::env::var("VAULT_TOKEN").map(SecretString::new).unwrap_or_default();
        let namespace = std::env::var("VAULT_NAMESPACE").ok().filter(|ns| !ns.trim().is_empty());
        let mount_path = std::env::var("LEASEGUARD_DB_MOUNT").unwrap_or(defaults.mount_path);
        let request_timeout_seconds = std::env::var("LEASEGUARD_BROKER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.request_timeout_seconds);

        Self { address, token, namespace, mount_path, request_timeout_seconds }
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Connection validation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ValidatorConfig {
    /// Bound on connect plus the `SELECT 1` round trip
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { connect_timeout_seconds: 5 }
    }
}

impl ValidatorConfig {
    pub fn from_env() -> Self {
        let connect_timeout_seconds = std::env::var("LEASEGUARD_CONNECT_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(5);
        Self { connect_timeout_seconds }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Lease and rotation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LifecycleConfig {
    /// Datastore connection name at the broker
    #[validate(length(min = 1, message = "Datastore name cannot be empty"))]
    pub datastore: String,

    /// Roles known to be bound to `datastore`; others are resolved through the broker
    pub roles: Vec<String>,

    /// Revoke retired leases at the broker after a rotation
    pub revoke_stale_on_rotation: bool,

    /// Lease requests attempted before giving up to a concurrent rotation
    #[validate(range(
        min = 1,
        max = 10,
        message = "Max acquire attempts must be between 1 and 10"
    ))]
    pub max_acquire_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            datastore: "testdb".to_string(),
            roles: Vec::new(),
            revoke_stale_on_rotation: true,
            max_acquire_attempts: 3,
        }
    }
}

impl LifecycleConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let datastore = std::env::var("LEASEGUARD_DATASTORE").unwrap_or(defaults.datastore);
        let roles = std::env::var("LEASEGUARD_ROLES")
            .map(|raw| parse_list(&raw))
            .unwrap_or_default();
        let revoke_stale_on_rotation = std::env::var("LEASEGUARD_REVOKE_STALE")
            .map(|s| parse_bool(&s))
            .unwrap_or(defaults.revoke_stale_on_rotation);
        let max_acquire_attempts = std::env::var("LEASEGUARD_MAX_ACQUIRE_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.max_acquire_attempts);

        Self { datastore, roles, revoke_stale_on_rotation, max_acquire_attempts }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Log filter used when `RUST_LOG` is unset
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logging: false }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        let log_level =
            std::env::var("LEASEGUARD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let json_logging =
            std::env::var("LEASEGUARD_LOG_JSON").map(|s| parse_bool(&s)).unwrap_or(false);
        Self { log_level, json_logging }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn parse_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}
