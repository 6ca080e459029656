//! # leaseguard
//!
//! Lifecycle management for dynamically issued, time-bounded database
//! credentials obtained from a secrets broker (HashiCorp Vault's database
//! secrets engine), including root-credential rotation and the retirement of
//! every credential derived from the old root.
//!
//! ## Architecture
//!
//! ```text
//!                    CredentialLifecycleManager
//!            ┌──────────────┬───────┴──────┬────────────────────┐
//!       LeaseStore   RotationCoordinator  SecretsBroker   ConnectionValidator
//!      (per-datastore  (Idle/Rotating    (Vault HTTP)       (PostgreSQL)
//!        ledgers)       per datastore)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use leaseguard::{AppConfig, CredentialLifecycleManager, LeaseStatus};
//!
//! # async fn run() -> leaseguard::Result<()> {
//! let config = AppConfig::from_env()?;
//! let clm = CredentialLifecycleManager::from_config(&config).await?;
//!
//! let lease = clm.acquire_lease("my-role").await?;
//! clm.rotate_root("testdb").await?;
//! assert_eq!(clm.validate(&lease).await, LeaseStatus::Stale);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod datastore;
pub mod errors;
pub mod lifecycle;
pub mod observability;
pub mod secrets;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use datastore::{ConnectionAttemptResult, ConnectionOutcome, ConnectionValidator, DatastoreEndpoint};
pub use errors::{ClmError, ClmResult, Error, Result};
pub use lifecycle::{CredentialLifecycleManager, Lease, LeaseStatus, LifecycleOptions};
pub use secrets::{SecretString, SecretsBroker, VaultBrokerClient};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
