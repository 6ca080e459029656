//! Output formatting for CLI commands
//!
//! JSON for scripts, aligned `key: value` lines for people.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;

use crate::datastore::{ConnectionAttemptResult, ConnectionOutcome};
use crate::lifecycle::{DatastoreStatus, Lease};
use crate::secrets::{BrokerHealth, DatastoreConnection, RootRotation};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Json,
    #[default]
    Table,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "table" | "text" => Ok(OutputFormat::Table),
            _ => anyhow::bail!("Unsupported output format: '{}'. Use 'json' or 'table'.", s),
        }
    }
}

/// Print data as JSON
pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

fn print_rows(rows: &[(&str, String)]) {
    let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    for (key, value) in rows {
        println!("{:<width$}  {}", format!("{}:", key), value, width = width + 1);
    }
}

/// Print a lease. The generation is left out: it is counted per process and
/// means nothing once the command exits.
pub fn print_lease(lease: &Lease, show_secret: bool, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let mut value = serde_json::to_value(lease).context("Failed to serialize lease")?;
        if let Some(fields) = value.as_object_mut() {
            fields.remove("generation");
        }
        if show_secret {
            value["secret"] = serde_json::Value::String(lease.secret.expose_secret().to_string());
        }
        return print_json(&value);
    }

    let mut rows = vec![
        ("role", lease.role.clone()),
        ("datastore", lease.datastore.clone()),
        ("lease_id", lease.id.clone()),
        ("username", lease.username.clone()),
        ("lease_duration", format!("{}s", lease.lease_duration.as_secs())),
        ("renewable", lease.renewable.to_string()),
        (
            "expires_at",
            lease.expires_at().map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string()),
        ),
    ];
    if show_secret {
        rows.push(("password", lease.secret.expose_secret().to_string()));
    }
    print_rows(&rows);
    Ok(())
}

/// What `rotate` reports: the broker's receipt and the roles whose
/// outstanding leases were revoked afterwards.
#[derive(Debug, Serialize)]
pub struct RotationView<'a> {
    pub datastore: &'a str,
    pub rotated_at: DateTime<Utc>,
    pub generation_marker: Option<&'a str>,
    pub revoked_roles: &'a [String],
}

impl<'a> RotationView<'a> {
    pub fn new(receipt: &'a RootRotation, revoked_roles: &'a [String]) -> Self {
        Self {
            datastore: &receipt.datastore,
            rotated_at: receipt.rotated_at,
            generation_marker: receipt.generation_marker.as_deref(),
            revoked_roles,
        }
    }
}

pub fn print_rotation(view: &RotationView<'_>, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(view);
    }
    print_rows(&[
        ("datastore", view.datastore.to_string()),
        ("rotated_at", view.rotated_at.to_rfc3339()),
        ("generation_marker", view.generation_marker.unwrap_or("none").to_string()),
        ("revoked_roles", view.revoked_roles.join(",")),
    ]);
    Ok(())
}

pub fn print_attempt(attempt: &ConnectionAttemptResult, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(attempt);
    }
    let detail = match &attempt.outcome {
        ConnectionOutcome::Success => String::new(),
        ConnectionOutcome::AuthenticationFailed { reason } => reason.clone(),
        ConnectionOutcome::TransportFailed { reason } => reason.to_string(),
    };
    print_rows(&[
        ("outcome", attempt.outcome.label().to_string()),
        ("detail", detail),
        ("username", attempt.credential.username.clone()),
        ("endpoint", attempt.endpoint.clone()),
        ("elapsed", format!("{}ms", attempt.elapsed_ms)),
    ]);
    Ok(())
}

/// Broker and local view of a datastore, printed by `status`.
#[derive(Debug, Serialize)]
pub struct StatusView<'a> {
    pub broker: &'a BrokerHealth,
    pub connection: &'a DatastoreConnection,
    pub local: &'a DatastoreStatus,
}

pub fn print_status(view: &StatusView<'_>, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(view);
    }
    print_rows(&[
        ("broker_version", view.broker.version.clone().unwrap_or_else(|| "unknown".to_string())),
        ("broker_sealed", view.broker.sealed.to_string()),
        ("datastore", view.connection.name.clone()),
        ("plugin", view.connection.plugin_name.clone()),
        ("allowed_roles", view.connection.allowed_roles.join(",")),
        ("connection_url", view.connection.connection_url.clone().unwrap_or_default()),
        ("root_username", view.connection.username.clone().unwrap_or_default()),
        ("local_generation", view.local.epoch.generation.to_string()),
        ("rotation_phase", view.local.phase.to_string()),
    ]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("TABLE".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_rotation_view_omits_local_generation() {
        let receipt = RootRotation {
            datastore: "testdb".to_string(),
            rotated_at: Utc::now(),
            generation_marker: Some("r-7".to_string()),
        };
        let roles = vec!["my-role".to_string()];

        let json = serde_json::to_value(RotationView::new(&receipt, &roles)).unwrap();
        assert_eq!(json["datastore"], "testdb");
        assert_eq!(json["generation_marker"], "r-7");
        assert_eq!(json["revoked_roles"][0], "my-role");
        assert!(json.get("generation").is_none());
    }
}
