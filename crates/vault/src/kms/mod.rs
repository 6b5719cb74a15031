//! Key Management Client: wrap and unwrap DEKs under purpose-scoped KEKs.
//!
//! # Responsibilities
//!
//! - Define the [`KeyManagementClient`] seam every backend implements.
//! - [`AwsKms`]: production backend over AWS KMS `Encrypt` / `Decrypt`.
//! - [`LocalKms`]: in-process backend with HMAC-derived KEKs, used for local
//!   seeding and tests.
//! - [`GuardedKms`]: wraps any backend with bounded exponential backoff on
//!   transient failures and a semaphore limiting in-flight calls.
//!
//! # Invariants
//!
//! - KEK material never leaves the backend.
//! - Authorization and integrity failures are never retried.
//! - After [`KeyManagementClient::close`] every call fails with [`KmsError::Closed`].

pub mod aws;
pub mod guarded;
pub mod local;

pub use aws::AwsKms;
pub use guarded::{GuardedKms, RetryPolicy};
pub use local::LocalKms;

use std::fmt;

use async_trait::async_trait;
use common::VaultError;
use serde::Deserialize;
use thiserror::Error;
use zeroize::Zeroizing;

/// Opaque reference to a master key held by the KMS (key ARN, alias or path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct KekRef(String);

impl KekRef {
    /// Wrap a KMS key identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as passed to the KMS.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KekRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KekRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Errors produced by KMS backends.
#[derive(Debug, Error)]
pub enum KmsError {
    /// The KEK does not exist, is disabled, or access was denied.
    #[error("KEK {kek} unavailable: {reason}")]
    KeyUnavailable {
        /// KEK reference used.
        kek: String,
        /// Backend diagnostic.
        reason: String,
    },

    /// The wrapped key is corrupt or was wrapped under a different KEK.
    #[error("wrapped key failed integrity check under KEK {kek}")]
    UnwrapIntegrity {
        /// KEK reference used.
        kek: String,
    },

    /// Network, timeout or throttling failure; safe to retry.
    #[error("transient KMS failure: {0}")]
    Transient(String),

    /// Transient failures persisted through every allowed attempt.
    #[error("KMS still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Last transient error.
        last: String,
    },

    /// The backend returned a response missing required data.
    #[error("invalid KMS response: {0}")]
    InvalidResponse(String),

    /// The client was shut down.
    #[error("KMS client is closed")]
    Closed,
}

impl KmsError {
    /// Returns `true` if the call may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, KmsError::Transient(_))
    }
}

impl From<KmsError> for VaultError {
    fn from(e: KmsError) -> Self {
        match e {
            KmsError::KeyUnavailable { .. } | KmsError::Closed => {
                VaultError::KeyUnavailable(e.to_string())
            }
            KmsError::UnwrapIntegrity { kek } => VaultError::UnwrapIntegrity { kek },
            KmsError::Transient(message) => VaultError::TransientKms {
                attempts: 1,
                message,
            },
            KmsError::RetriesExhausted { attempts, last } => VaultError::TransientKms {
                attempts,
                message: last,
            },
            KmsError::InvalidResponse(m) => VaultError::Internal(m),
        }
    }
}

/// A client for an external key-management service.
///
/// Implementations must be safe to share across concurrent tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyManagementClient: Send + Sync {
    /// Encrypt `plaintext_key` under the KEK named by `kek`.
    async fn wrap(&self, kek: &KekRef, plaintext_key: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Decrypt a key previously produced by [`KeyManagementClient::wrap`] under `kek`.
    async fn unwrap(
        &self,
        kek: &KekRef,
        wrapped_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError>;

    /// Release any persistent connection. Later calls fail with [`KmsError::Closed`].
    async fn close(&self) -> Result<(), KmsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_transient() {
        assert!(KmsError::Transient("timeout".into()).is_transient());
        assert!(!KmsError::Closed.is_transient());
        assert!(!KmsError::UnwrapIntegrity { kek: "k".into() }.is_transient());
        assert!(!KmsError::RetriesExhausted {
            attempts: 3,
            last: "x".into()
        }
        .is_transient());
    }

    #[test]
    fn converts_into_vault_taxonomy() {
        let e: VaultError = KmsError::UnwrapIntegrity { kek: "kek-a".into() }.into();
        assert!(matches!(e, VaultError::UnwrapIntegrity { ref kek } if kek == "kek-a"));

        let e: VaultError = KmsError::Closed.into();
        assert!(matches!(e, VaultError::KeyUnavailable(_)));

        let e: VaultError = KmsError::RetriesExhausted {
            attempts: 4,
            last: "throttled".into(),
        }
        .into();
        assert!(matches!(e, VaultError::TransientKms { attempts: 4, .. }));
    }

    #[test]
    fn kek_ref_display() {
        let k = KekRef::from("projects/p/keyRings/r/cryptoKeys/general");
        assert_eq!(k.to_string(), k.as_str());
    }
}
