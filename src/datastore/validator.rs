//! # Connection Validation
//!
//! Dials the datastore with a credential and reports what happened as data.
//! Authentication rejections and transport failures are both ordinary
//! outcomes here; the only way to get an `Err` out of this module is to
//! misconfigure it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Connection, PgConnection};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::{Credential, DatastoreEndpoint};
use crate::observability::metrics;

/// PostgreSQL SQLSTATE class 28: invalid authorization specification.
const AUTH_SQLSTATE_CLASS: &str = "28";

/// Why a connection attempt failed below the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransportFailure {
    /// The bounded connect timeout elapsed
    Timeout { after_ms: u64 },
    /// Socket-level failure (refused, reset, unreachable)
    Io(String),
    /// TLS negotiation or certificate validation failed
    Tls(String),
    /// The server answered with something other than an auth rejection
    Protocol(String),
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { after_ms } => write!(f, "timeout after {}ms", after_ms),
            Self::Io(detail) => write!(f, "io: {}", detail),
            Self::Tls(detail) => write!(f, "tls: {}", detail),
            Self::Protocol(detail) => write!(f, "protocol: {}", detail),
        }
    }
}

/// Classified result of a single connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConnectionOutcome {
    Success,
    AuthenticationFailed { reason: String },
    TransportFailed { reason: TransportFailure },
}

impl ConnectionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::AuthenticationFailed { .. } => "authentication_failed",
            Self::TransportFailed { .. } => "transport_failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ConnectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::AuthenticationFailed { reason } => write!(f, "authentication failed: {}", reason),
            Self::TransportFailed { reason } => write!(f, "transport failed: {}", reason),
        }
    }
}

/// Immutable record of one connection attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionAttemptResult {
    pub outcome: ConnectionOutcome,
    /// Credential used (secret redacted on output)
    pub credential: Credential,
    pub endpoint: String,
    pub attempted_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl ConnectionAttemptResult {
    pub fn new(outcome: ConnectionOutcome, credential: Credential, endpoint: String) -> Self {
        Self { outcome, credential, endpoint, attempted_at: Utc::now(), elapsed_ms: 0 }
    }

    fn elapsed(mut self, started: Instant) -> Self {
        self.elapsed_ms = started.elapsed().as_millis() as u64;
        self
    }
}

/// Attempts datastore connections with a bounded timeout.
#[derive(Debug, Clone)]
pub struct ConnectionValidator {
    connect_timeout: Duration,
}

impl Default for ConnectionValidator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ConnectionValidator {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connect as `credential`, run `SELECT 1`, close, and classify.
    #[instrument(skip(self, credential), fields(username = %credential.username, endpoint = %endpoint))]
    pub async fn connect(
        &self,
        credential: &Credential,
        endpoint: &DatastoreEndpoint,
    ) -> ConnectionAttemptResult {
        let started = Instant::now();
        let options = endpoint.connect_options(credential);

        let attempt = async {
            let mut connection = PgConnection::connect_with(&options).await?;
            let round_trip = sqlx::query("SELECT 1").execute(&mut connection).await.map(|_| ());
            settle_round_trip(round_trip, connection.close().await)
        };

        let outcome = match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(Ok(())) => ConnectionOutcome::Success,
            Ok(Err(error)) => classify_error(&error),
            Err(_) => ConnectionOutcome::TransportFailed {
                reason: TransportFailure::Timeout {
                    after_ms: self.connect_timeout.as_millis() as u64,
                },
            },
        };

        match &outcome {
            ConnectionOutcome::Success => info!("Datastore connection established"),
            ConnectionOutcome::AuthenticationFailed { reason } => {
                info!(reason = %reason, "Datastore rejected credential")
            }
            ConnectionOutcome::TransportFailed { reason } => {
                warn!(reason = %reason, "Datastore connection failed below the auth layer")
            }
        }
        metrics::record_connection_attempt(outcome.label());

        ConnectionAttemptResult::new(outcome, credential.clone(), endpoint.to_string())
            .elapsed(started)
    }
}

/// Outcome of an authenticated session once it has been closed. The
/// `SELECT 1` result decides; a failed close after a good round trip is
/// only logged.
fn settle_round_trip(
    round_trip: Result<(), sqlx::Error>,
    closed: Result<(), sqlx::Error>,
) -> Result<(), sqlx::Error> {
    round_trip?;
    if let Err(error) = closed {
        debug!(error = %error, "Closing a validated connection failed");
    }
    Ok(())
}

/// Map a driver error onto [`ConnectionOutcome`].
///
/// Only SQLSTATE class 28 (invalid password, invalid authorization) counts as
/// an authentication failure. Everything else the server or the socket can
/// throw at us is a transport failure.
pub fn classify_error(error: &sqlx::Error) -> ConnectionOutcome {
    match error {
        sqlx::Error::Database(db_error) => {
            let code = db_error.code().map(|c| c.into_owned());
            debug!(sqlstate = ?code, message = %db_error.message(), "Datastore returned error");
            classify_sqlstate(code.as_deref(), db_error.message())
        }
        sqlx::Error::Io(io) => {
            ConnectionOutcome::TransportFailed { reason: TransportFailure::Io(io.to_string()) }
        }
        sqlx::Error::Tls(tls) => {
            ConnectionOutcome::TransportFailed { reason: TransportFailure::Tls(tls.to_string()) }
        }
        sqlx::Error::PoolTimedOut => ConnectionOutcome::TransportFailed {
            reason: TransportFailure::Timeout { after_ms: 0 },
        },
        other => ConnectionOutcome::TransportFailed {
            reason: TransportFailure::Protocol(other.to_string()),
        },
    }
}

/// Classify a server-side error by SQLSTATE.
pub fn classify_sqlstate(code: Option<&str>, message: &str) -> ConnectionOutcome {
    match code {
        Some(code) if code.starts_with(AUTH_SQLSTATE_CLASS) => {
            ConnectionOutcome::AuthenticationFailed {
                reason: format!("{} (SQLSTATE {})", message, code),
            }
        }
        Some(code) => ConnectionOutcome::TransportFailed {
            reason: TransportFailure::Protocol(format!("{} (SQLSTATE {})", message, code)),
        },
        None => ConnectionOutcome::TransportFailed {
            reason: TransportFailure::Protocol(message.to_string()),
        },
    }
}
