//! # Datastore Boundary
//!
//! Everything the lifecycle manager needs to know about the relational
//! datastore: where it is, how to secure the transport, and how to tell an
//! authentication rejection from a network failure.

pub mod endpoint;
pub mod validator;

pub use endpoint::{sanitize_url, DatastoreEndpoint, TlsMode, TlsOptions};
pub use validator::{
    classify_error, classify_sqlstate, ConnectionAttemptResult, ConnectionOutcome,
    ConnectionValidator, TransportFailure,
};

use serde::Serialize;

use crate::secrets::SecretString;

/// A username/secret pair presented to the datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credential {
    pub username: String,
    pub secret: SecretString,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<SecretString>) -> Self {
        Self { username: username.into(), secret: secret.into() }
    }
}
