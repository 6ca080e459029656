//! # Observability Infrastructure
//!
//! Structured logging and lifecycle metrics for leaseguard.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info};
pub use metrics::MetricsRecorder;

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use tracing::info;

/// Initialize logging and register metric descriptions.
pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    init_logging(config)?;
    MetricsRecorder::new().describe_lifecycle_metrics();

    info!(
        log_level = %config.log_level,
        json_logging = config.json_logging,
        "Observability initialized"
    );
    Ok(())
}
