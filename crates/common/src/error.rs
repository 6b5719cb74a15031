//! Common error types shared across crates.

use thiserror::Error;

/// Top-level error returned by every encrypt/decrypt pipeline.
///
/// Variants follow the failure taxonomy callers are expected to act on:
/// - [`VaultError::TransientKms`] is the only variant worth retrying, and only
///   after the KMS client's own bounded retries were exhausted.
/// - [`VaultError::UnwrapIntegrity`] and [`VaultError::AuthenticationFailure`]
///   indicate tampering or a wrong key and are reported as security events.
/// - Everything else is fatal for the record at hand.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The KEK reference does not exist, is disabled, or the service identity
    /// lacks permission to use it.
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// A wrapped DEK was tampered with or was wrapped under a different KEK.
    #[error("wrapped key failed integrity check under KEK {kek}")]
    UnwrapIntegrity {
        /// KEK reference the unwrap was attempted with.
        kek: String,
    },

    /// An encrypted field failed AEAD authentication.
    #[error("authentication failed for field `{field}`")]
    AuthenticationFailure {
        /// Storage name of the field (without the `encrypted_` prefix).
        field: String,
    },

    /// The KMS kept failing with network/throttling errors.
    #[error("KMS unavailable after {attempts} attempts: {message}")]
    TransientKms {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// Last error observed.
        message: String,
    },

    /// The record does not match its record type's schema or routing table.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A field decrypted successfully but its payload could not be parsed.
    #[error("could not deserialise field `{field}`: {reason}")]
    Deserialization {
        /// Storage name of the field.
        field: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Short machine-readable code, safe to log and to surface to callers.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::KeyUnavailable(_) => "key_unavailable",
            VaultError::UnwrapIntegrity { .. } => "unwrap_integrity",
            VaultError::AuthenticationFailure { .. } => "authentication_failure",
            VaultError::TransientKms { .. } => "transient_kms",
            VaultError::MalformedRecord(_) => "malformed_record",
            VaultError::Deserialization { .. } => "deserialization",
            VaultError::Internal(_) => "internal",
        }
    }

    /// Returns `true` if a caller may reasonably retry the whole operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::TransientKms { .. })
    }

    /// Returns `true` for failures that indicate tampering or key confusion.
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            VaultError::UnwrapIntegrity { .. } | VaultError::AuthenticationFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(VaultError::TransientKms {
            attempts: 5,
            message: "timeout".into()
        }
        .is_retryable());
        assert!(!VaultError::KeyUnavailable("x".into()).is_retryable());
        assert!(!VaultError::UnwrapIntegrity { kek: "k".into() }.is_retryable());
        assert!(!VaultError::MalformedRecord("x".into()).is_retryable());
    }

    #[test]
    fn integrity_failures_are_security_events() {
        assert!(VaultError::UnwrapIntegrity { kek: "k".into() }.is_security_event());
        assert!(VaultError::AuthenticationFailure {
            field: "dob".into()
        }
        .is_security_event());
        assert!(!VaultError::Deserialization {
            field: "dob".into(),
            reason: "x".into()
        }
        .is_security_event());
    }

    #[test]
    fn codes_are_distinct_for_auth_and_deserialisation() {
        let auth = VaultError::AuthenticationFailure { field: "a".into() };
        let de = VaultError::Deserialization {
            field: "a".into(),
            reason: "b".into(),
        };
        assert_ne!(auth.code(), de.code());
    }

    #[test]
    fn display_includes_field_name() {
        let e = VaultError::AuthenticationFailure {
            field: "resident_name".into(),
        };
        assert!(e.to_string().contains("resident_name"));
    }
}
