//! Handshake credential validation.
//!
//! Grounded on `AuthConfig::validate` in this codebase's MCP server builder:
//! the presented token is compared against the expected one as SHA-256
//! digests via `subtle::ConstantTimeEq`, never via `==`, so a timing
//! side-channel can't leak how many leading bytes matched.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Validates the bearer credential presented at WebSocket handshake.
#[derive(Clone, Debug)]
pub struct CredentialValidator {
    expected_token: Option<String>,
}

impl CredentialValidator {
    /// `expected_token = None` accepts any connection (useful for local
    /// development and tests); production deployments should always set one.
    pub fn new(expected_token: Option<String>) -> Self {
        Self { expected_token }
    }

    pub fn validate(&self, presented: Option<&str>) -> bool {
        match (&self.expected_token, presented) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(expected), Some(presented)) => {
                let expected_hash = Sha256::digest(expected.as_bytes());
                let presented_hash = Sha256::digest(presented.as_bytes());
                expected_hash.ct_eq(&presented_hash).into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_token() {
        let validator = CredentialValidator::new(Some("secret".into()));
        assert!(validator.validate(Some("secret")));
        assert!(!validator.validate(Some("wrong")));
        assert!(!validator.validate(None));
    }

    #[test]
    fn open_validator_accepts_anything() {
        let validator = CredentialValidator::new(None);
        assert!(validator.validate(None));
        assert!(validator.validate(Some("anything")));
    }
}
