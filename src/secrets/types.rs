//! Redacting wrapper for credential material.
//!
//! Passwords issued by the broker and the broker token itself travel through
//! logs, debug output and serialized status reports. [`SecretString`] keeps
//! them out of all three and clears its buffer on drop.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const REDACTED: &str = "[REDACTED]";

/// A string that prints, debugs and serializes as `[REDACTED]`.
///
/// The value is only reachable through [`SecretString::expose_secret`].
///
/// # Security
///
/// - Debug output is `SecretString([REDACTED])` and Display output is `[REDACTED]`
/// - Serialization writes `"[REDACTED]"`, so leases and attempt reports can be
///   printed as JSON without leaking passwords
/// - Deserialization accepts the real value, so tokens can come from config
/// - The buffer is overwritten with zeros on drop (via `zeroize`)
///
/// Callers that must hand the value on (the `X-Vault-Token` header, the
/// PostgreSQL password, `lease --show-secret`) call `expose_secret()` at the
/// last moment and never keep the result.
///
/// # Example
///
/// ```rust
/// use leaseguard::SecretString;
///
/// let password = SecretString::new("p0");
/// assert_eq!(format!("{:?}", password), "SecretString([REDACTED])");
/// assert_eq!(password.to_string(), "[REDACTED]");
/// assert_eq!(password.expose_secret(), "p0");
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the underlying value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // SECURITY: the real value never reaches a serializer
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString({})", REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Default for SecretString {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_string_redacts_debug_and_display() {
        let secret = SecretString::new("A1a-p0-password");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn test_secret_string_expose() {
        let secret = SecretString::new("p0");
        assert_eq!(secret.expose_secret(), "p0");
        assert_eq!(secret.len(), 2);
        assert!(SecretString::default().is_empty());
    }

    #[test]
    fn test_secret_string_serialization_redacts() {
        #[derive(Serialize)]
        struct Issued {
            username: String,
            password: SecretString,
        }

        let issued = Issued {
            username: "v-token-my-role-abc".to_string(),
            password: SecretString::new("hidden-password"),
        };

        let json = serde_json::to_string(&issued).unwrap();
        assert!(json.contains("v-token-my-role-abc"));
        assert!(json.contains("[REDACTED]"));
        assert!(!json.contains("hidden-password"));
    }

    #[test]
    fn test_secret_string_deserialization_accepts_values() {
        let secret: SecretString = serde_json::from_str("\"root-token\"").unwrap();
        assert_eq!(secret.expose_secret(), "root-token");
    }

    #[test]
    fn test_secret_string_equality() {
        assert_eq!(SecretString::from("same"), SecretString::from("same".to_string()));
        assert_ne!(SecretString::from("p0"), SecretString::from("p1"));
    }
}
