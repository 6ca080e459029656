//! # Datastore Endpoints
//!
//! Resolved connection target for the PostgreSQL datastore. Transport security
//! (certificate paths, CA validation mode) is provisioned out-of-band; this
//! module only carries the already-resolved settings to the driver.

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use validator::Validate;

use super::Credential;
use crate::errors::{Error, Result};

/// How strictly the client validates the server during the TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    /// Plaintext only
    Disable,
    /// TLS if the server offers it
    #[default]
    Prefer,
    /// TLS without certificate validation
    Require,
    /// Certificate must chain to the configured root CA
    VerifyCa,
    /// As `VerifyCa`, and the host name must match the certificate
    VerifyFull,
}

impl TlsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }

    /// Whether the mode validates the server certificate against a root CA.
    pub fn verifies_server(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }
}

impl FromStr for TlsMode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" | "verify_ca" => Ok(Self::VerifyCa),
            "verify-full" | "verify_full" => Ok(Self::VerifyFull),
            other => Err(Error::validation_field(
                format!("Unknown TLS mode '{}'", other),
                "tls.mode",
            )),
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TlsMode> for PgSslMode {
    fn from(mode: TlsMode) -> Self {
        match mode {
            TlsMode::Disable => PgSslMode::Disable,
            TlsMode::Prefer => PgSslMode::Prefer,
            TlsMode::Require => PgSslMode::Require,
            TlsMode::VerifyCa => PgSslMode::VerifyCa,
            TlsMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

/// Transport security settings for a datastore connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    #[serde(default)]
    pub mode: TlsMode,
    /// Root CA bundle used by the verify modes
    pub root_cert: Option<PathBuf>,
    /// Client certificate for mutual TLS
    pub client_cert: Option<PathBuf>,
    /// Private key matching `client_cert`
    pub client_key: Option<PathBuf>,
}

impl TlsOptions {
    pub fn disabled() -> Self {
        Self { mode: TlsMode::Disable, ..Default::default() }
    }

    /// Cross-field checks the derive validator cannot express.
    pub fn check(&self) -> Result<()> {
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(Error::validation_field(
                "Client certificate and client key must be configured together",
                "tls.client_cert",
            ));
        }
        if self.mode.verifies_server() && self.root_cert.is_none() {
            return Err(Error::validation_field(
                format!("TLS mode '{}' requires a root certificate", self.mode),
                "tls.root_cert",
            ));
        }
        Ok(())
    }
}

/// A resolved PostgreSQL endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DatastoreEndpoint {
    #[validate(length(min = 1, message = "Datastore host cannot be empty"))]
    pub host: String,

    #[validate(range(min = 1, message = "Datastore port must be between 1 and 65535"))]
    pub port: u16,

    #[validate(length(min = 1, message = "Database name cannot be empty"))]
    pub database: String,

    #[serde(default)]
    pub tls: TlsOptions,
}

impl Default for DatastoreEndpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "testdb".to_string(),
            tls: TlsOptions::default(),
        }
    }
}

impl DatastoreEndpoint {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self { host: host.into(), port, database: database.into(), tls: TlsOptions::default() }
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Create a DatastoreEndpoint from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let host = std::env::var("LEASEGUARD_DB_HOST").unwrap_or(defaults.host);
        let port = match std::env::var("LEASEGUARD_DB_PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|e| {
                Error::config(format!("Invalid LEASEGUARD_DB_PORT '{}': {}", raw, e))
            })?,
            Err(_) => defaults.port,
        };
        let database = std::env::var("LEASEGUARD_DB_NAME").unwrap_or(defaults.database);

        let mode = match std::env::var("LEASEGUARD_DB_SSLMODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => TlsMode::default(),
        };
        let tls = TlsOptions {
            mode,
            root_cert: std::env::var("LEASEGUARD_DB_SSLROOTCERT").ok().map(PathBuf::from),
            client_cert: std::env::var("LEASEGUARD_DB_SSLCERT").ok().map(PathBuf::from),
            client_key: std::env::var("LEASEGUARD_DB_SSLKEY").ok().map(PathBuf::from),
        };

        Ok(Self { host, port, database, tls })
    }

    /// Validate field ranges and TLS consistency.
    pub fn check(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.tls.check()
    }

    /// Driver options for connecting as `credential`.
    pub fn connect_options(&self, credential: &Credential) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&credential.username)
            .password(credential.secret.expose_secret())
            .ssl_mode(self.tls.mode.into());

        if let Some(root) = &self.tls.root_cert {
            options = options.ssl_root_cert(root);
        }
        if let Some(cert) = &self.tls.client_cert {
            options = options.ssl_client_cert(cert);
        }
        if let Some(key) = &self.tls.client_key {
            options = options.ssl_client_key(key);
        }
        options
    }
}

impl fmt::Display for DatastoreEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{} (sslmode={})", self.host, self.port, self.database, self.tls.mode)
    }
}

/// Sanitize a database URL for logging (mask credentials).
pub fn sanitize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) if parsed.password().is_some() || !parsed.username().is_empty() => format!(
            "{}://***:***@{}{}{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or("unknown"),
            parsed.port().map(|p| format!(":{}", p)).unwrap_or_default(),
            parsed.path()
        ),
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_mode_parse() {
        assert_eq!("verify-ca".parse::<TlsMode>().unwrap(), TlsMode::VerifyCa);
        assert_eq!("VERIFY_FULL".parse::<TlsMode>().unwrap(), TlsMode::VerifyFull);
        assert_eq!("disable".parse::<TlsMode>().unwrap(), TlsMode::Disable);
        assert!("strict".parse::<TlsMode>().is_err());
    }

    #[test]
    fn test_tls_mode_serde_kebab_case() {
        let json = serde_json::to_string(&TlsMode::VerifyCa).unwrap();
        assert_eq!(json, "\"verify-ca\"");
        let mode: TlsMode = serde_json::from_str("\"verify-full\"").unwrap();
        assert_eq!(mode, TlsMode::VerifyFull);
    }

    #[test]
    fn test_tls_options_require_cert_key_pair() {
        let tls = TlsOptions {
            mode: TlsMode::Require,
            client_cert: Some(PathBuf::from("certs/client.crt")),
            ..Default::default()
        };
        let err = tls.check().unwrap_err();
        assert!(err.to_string().contains("configured together"));
    }

    #[test]
    fn test_tls_verify_requires_root_cert() {
        let tls = TlsOptions { mode: TlsMode::VerifyCa, ..Default::default() };
        assert!(tls.check().is_err());

        let tls = TlsOptions {
            mode: TlsMode::VerifyCa,
            root_cert: Some(PathBuf::from("certs/root.crt")),
            client_cert: Some(PathBuf::from("certs/client.crt")),
            client_key: Some(PathBuf::from("certs/client.key")),
        };
        assert!(tls.check().is_ok());
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(DatastoreEndpoint::default().check().is_ok());

        let endpoint = DatastoreEndpoint::new("", 5432, "testdb");
        assert!(endpoint.check().is_err());

        let endpoint = DatastoreEndpoint::new("localhost", 0, "testdb");
        assert!(endpoint.check().is_err());
    }

    #[test]
    fn test_endpoint_display_has_no_credentials() {
        let endpoint = DatastoreEndpoint::new("db.internal", 5433, "testdb")
            .with_tls(TlsOptions::disabled());
        assert_eq!(endpoint.to_string(), "db.internal:5433/testdb (sslmode=disable)");
    }

    #[test]
    fn test_sanitize_url() {
        assert_eq!(
            sanitize_url("postgresql://postgres:postgres123@db:5432/testdb"),
            "postgresql://***:***@db:5432/testdb"
        );
        assert_eq!(
            sanitize_url("postgresql://{{username}}:{{password}}@db:5432/testdb"),
            "postgresql://***:***@db:5432/testdb"
        );
        assert_eq!(sanitize_url("postgresql://db/testdb"), "postgresql://db/testdb");
        assert_eq!(sanitize_url("not a url"), "not a url");
    }
}
