//! Data Key Generator: per-record DEK creation and unwrapping.
//!
//! # Lifecycle
//!
//! 1. On a write, [`DataKeyGenerator::generate`] draws a fresh 256-bit DEK from
//!    the OS CSPRNG and wraps it under the purpose's KEK via the KMS.
//! 2. The plaintext [`DataKey`] encrypts that purpose's fields and is dropped
//!    (and zeroed) as soon as the record is sealed.
//! 3. Only the [`WrappedDek`] is persisted, next to the ciphertexts.
//! 4. On a read, [`DataKeyGenerator::unwrap`] asks the KMS to decrypt the
//!    wrapped DEK under the same KEK.
//!
//! # Security invariants
//!
//! - The plaintext DEK is **never** persisted, logged, or included in traces.
//! - No DEK is reused across records.

pub mod key;

pub use key::{DataKey, DekError, WrappedDek};

use std::sync::Arc;

use tracing::debug;

use crate::kms::{KekRef, KeyManagementClient};

/// A freshly generated DEK in both plaintext and wrapped form.
#[derive(Debug)]
pub struct GeneratedKey {
    /// Plaintext key for sealing this record's fields.
    pub plaintext: DataKey,
    /// Wrapped key to persist.
    pub wrapped: WrappedDek,
}

/// Produces and unwraps DEKs using a [`KeyManagementClient`].
#[derive(Clone)]
pub struct DataKeyGenerator {
    kms: Arc<dyn KeyManagementClient>,
}

impl DataKeyGenerator {
    /// Create a generator over `kms`.
    pub fn new(kms: Arc<dyn KeyManagementClient>) -> Self {
        Self { kms }
    }

    /// Generate a new DEK and wrap it under `kek`.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::Kms`] if the KMS refuses or fails the wrap.
    pub async fn generate(&self, kek: &KekRef) -> Result<GeneratedKey, DekError> {
        let plaintext = DataKey::generate();
        let wrapped = self.kms.wrap(kek, plaintext.as_bytes()).await?;
        debug!(kek = %kek, "DEK generated and wrapped");
        Ok(GeneratedKey {
            plaintext,
            wrapped: WrappedDek::new(kek.clone(), wrapped),
        })
    }

    /// Unwrap a stored DEK.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::Kms`] if the KMS fails, including integrity failure
    /// when the DEK was wrapped under another KEK, or
    /// [`DekError::InvalidLength`] if the unwrapped material is not a DEK.
    pub async fn unwrap(&self, wrapped: &WrappedDek) -> Result<DataKey, DekError> {
        let bytes = self.kms.unwrap(wrapped.kek(), wrapped.as_bytes()).await?;
        DataKey::from_slice(wrapped.kek(), &bytes)
    }

    /// Close the underlying KMS client.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::Kms`] if the backend fails to shut down cleanly.
    pub async fn close(&self) -> Result<(), DekError> {
        self.kms.close().await.map_err(DekError::from)
    }
}
