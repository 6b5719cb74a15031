//! [`DataKey`] and [`WrappedDek`]: the two forms a DEK takes.

use aes_gcm_siv::aead::{rand_core::RngCore, OsRng};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::KEY_LEN;
use crate::kms::{KekRef, KmsError};

/// Errors produced by the DEK layer.
#[derive(Debug, Error)]
pub enum DekError {
    /// Unwrapped key material has an unexpected length.
    #[error("DEK under KEK {kek} has invalid length: expected {KEY_LEN} bytes, got {len}")]
    InvalidLength {
        /// KEK the key was unwrapped under.
        kek: String,
        /// Length actually seen.
        len: usize,
    },

    /// The stored wrapped DEK is not valid base64.
    #[error("wrapped DEK for KEK {kek} is not valid base64")]
    InvalidEncoding {
        /// KEK the key claims to be wrapped under.
        kek: String,
    },

    /// The KMS call failed.
    #[error(transparent)]
    Kms(#[from] KmsError),
}

impl From<DekError> for common::VaultError {
    fn from(e: DekError) -> Self {
        match e {
            // Either form means the stored blob is not a DEK we produced.
            DekError::InvalidLength { kek, .. } | DekError::InvalidEncoding { kek } => {
                common::VaultError::UnwrapIntegrity { kek }
            }
            DekError::Kms(e) => e.into(),
        }
    }
}

/// Plaintext DEK material, exactly [`KEY_LEN`] bytes.
///
/// Lives only for the duration of one record operation. The bytes are
/// overwritten with zeroes on drop.
#[derive(Clone)]
pub struct DataKey(Box<[u8; KEY_LEN]>);

impl Drop for DataKey {
    fn drop(&mut self) {
        self.0.as_mut().zeroize();
    }
}

impl DataKey {
    /// Draw a fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut buf = Box::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(buf.as_mut_slice());
        Self(buf)
    }

    /// Copy key material out of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::InvalidLength`] if `bytes` is not [`KEY_LEN`] long.
    pub fn from_slice(kek: &KekRef, bytes: &[u8]) -> Result<Self, DekError> {
        if bytes.len() != KEY_LEN {
            return Err(DekError::InvalidLength {
                kek: kek.to_string(),
                len: bytes.len(),
            });
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey([REDACTED])")
    }
}

/// A DEK encrypted under a KEK, safe to store next to the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedDek {
    kek: KekRef,
    bytes: Vec<u8>,
}

impl WrappedDek {
    /// Pair wrapped bytes with the KEK that produced them.
    pub fn new(kek: KekRef, bytes: Vec<u8>) -> Self {
        Self { kek, bytes }
    }

    /// Parse the stored base64 form.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::InvalidEncoding`] if `encoded` is not valid base64.
    pub fn from_base64(kek: KekRef, encoded: &str) -> Result<Self, DekError> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|_| DekError::InvalidEncoding {
                kek: kek.to_string(),
            })?;
        Ok(Self { kek, bytes })
    }

    /// Stored base64 form.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// KEK the DEK is wrapped under.
    pub fn kek(&self) -> &KekRef {
        &self.kek
    }

    /// Raw wrapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        let a = DataKey::generate();
        let b = DataKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes().len(), KEY_LEN);
    }

    #[test]
    fn rejects_wrong_length() {
        let kek = KekRef::from("k");
        assert!(matches!(
            DataKey::from_slice(&kek, &[0u8; 16]),
            Err(DekError::InvalidLength { len: 16, .. })
        ));
        assert!(DataKey::from_slice(&kek, &[0u8; KEY_LEN]).is_ok());
    }

    #[test]
    fn data_key_redacted_in_debug() {
        let key = DataKey::from_slice(&KekRef::from("k"), &[0xFF; KEY_LEN]).unwrap();
        let shown = format!("{key:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("255"));
    }

    #[test]
    fn wrapped_dek_base64_round_trip() {
        let w = WrappedDek::new(KekRef::from("k"), vec![1, 2, 3, 250]);
        let back = WrappedDek::from_base64(KekRef::from("k"), &w.to_base64()).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn invalid_base64_maps_to_integrity_error() {
        let err = WrappedDek::from_base64(KekRef::from("kek-a"), "!!!").unwrap_err();
        let vault: common::VaultError = err.into();
        assert!(matches!(vault, common::VaultError::UnwrapIntegrity { .. }));
    }
}
