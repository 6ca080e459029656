//! # Structured Logging
//!
//! Subscriber installation for the binary and the startup configuration log.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{Error, Result};

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Installing twice is
/// an error; callers that may race with a test harness should ignore it.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            Error::config(format!("Invalid log filter '{}': {}", config.log_level, e))
        })?;

    let builder = fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json_logging {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| Error::internal(format!("Failed to install log subscriber: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        broker_address = %config.broker.address,
        mount_path = %config.broker.mount_path,
        namespace = ?config.broker.namespace,
        datastore = %config.lifecycle.datastore,
        endpoint = %config.endpoint,
        roles = ?config.lifecycle.roles,
        revoke_stale_on_rotation = config.lifecycle.revoke_stale_on_rotation,
        "leaseguard configuration"
    );
}
