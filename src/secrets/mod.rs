//! Secrets broker access.
//!
//! The lifecycle manager depends only on the [`SecretsBroker`] trait;
//! [`VaultBrokerClient`] implements it against the HashiCorp Vault database
//! secrets engine. Secret material travels as [`SecretString`], which never
//! prints or serializes its contents.

pub mod broker;
pub mod types;
pub mod vault;

pub use broker::{
    BrokerOperation, DatastoreConnection, IssuedCredential, RoleDefinition, RootRotation,
    SecretsBroker,
};
pub use types::SecretString;
pub use vault::{BrokerHealth, DatastoreConnectionRequest, RoleRequest, VaultBrokerClient};
