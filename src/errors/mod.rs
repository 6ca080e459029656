//! # Error Handling
//!
//! Application-level errors for leaseguard, built with `thiserror`.
//! Lifecycle failures live in [`ClmError`] and are wrapped here when they cross
//! into configuration loading or the command-line tool.

pub mod lifecycle;

pub use lifecycle::{ClmError, ClmResult};

/// Custom result type for leaseguard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for leaseguard
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Credential lifecycle errors
    #[error(transparent)]
    Lifecycle(#[from] ClmError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field_errors = errors.field_errors();
        let mut fields: Vec<&str> = field_errors.keys().map(|k| k.as_ref()).collect();
        fields.sort_unstable();

        let message = fields
            .iter()
            .filter_map(|field| {
                field_errors.get(*field).map(|errs| {
                    let details: Vec<String> = errs
                        .iter()
                        .map(|e| {
                            e.message
                                .as_ref()
                                .map(|m| m.to_string())
                                .unwrap_or_else(|| e.code.to_string())
                        })
                        .collect();
                    format!("{}: {}", field, details.join(", "))
                })
            })
            .collect::<Vec<_>>()
            .join("; ");

        match fields.first() {
            Some(field) if fields.len() == 1 => Self::validation_field(message, *field),
            _ => Self::validation(message),
        }
    }
}
