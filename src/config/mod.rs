//! # Configuration Management
//!
//! Typed configuration for the broker client, the datastore endpoint and the
//! lifecycle manager. Every section has defaults suitable for a local Vault
//! dev server and can be overridden from the environment.

pub mod settings;

pub use settings::{
    AppConfig, BrokerConfig, LifecycleConfig, ObservabilityConfig, ValidatorConfig,
};
