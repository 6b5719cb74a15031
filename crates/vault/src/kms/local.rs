//! In-process KMS with KEKs derived from a single seed.
//!
//! Each KEK is `HMAC-SHA256(seed, "field-vault/local-kek/" || kek_ref)`. Only
//! KEK references registered at construction exist; anything else reports
//! [`KmsError::KeyUnavailable`] just as a real KMS would for a missing key.
//!
//! Wrapped keys are laid out as `iv (12) || tag (16) || ciphertext`, sealed
//! with AES-256-GCM-SIV using the KEK reference as associated data.

use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::info;
use zeroize::Zeroizing;

use super::{KekRef, KeyManagementClient, KmsError};
use crate::crypto::{
    cipher::{NONCE_LEN, TAG_LEN},
    decrypt_field, encrypt_field, SealedField, KEY_LEN,
};

type HmacSha256 = Hmac<Sha256>;

const DERIVATION_LABEL: &[u8] = b"field-vault/local-kek/";

type KekTable = HashMap<KekRef, Zeroizing<[u8; KEY_LEN]>>;

/// Local KMS backend for development, seeding and tests.
pub struct LocalKms {
    keks: RwLock<Option<KekTable>>,
}

impl std::fmt::Debug for LocalKms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKms").field("keks", &"[REDACTED]").finish()
    }
}

impl LocalKms {
    /// Derive one KEK per reference in `keks` from `seed`.
    ///
    /// # Errors
    ///
    /// Returns [`KmsError::KeyUnavailable`] if `seed` is empty.
    pub fn from_seed(
        seed: &[u8],
        keks: impl IntoIterator<Item = KekRef>,
    ) -> Result<Self, KmsError> {
        if seed.is_empty() {
            return Err(KmsError::KeyUnavailable {
                kek: "*".into(),
                reason: "local KEK seed must not be empty".into(),
            });
        }

        let mut table = KekTable::new();
        for kek in keks {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(seed).map_err(|e| {
                KmsError::KeyUnavailable {
                    kek: kek.to_string(),
                    reason: e.to_string(),
                }
            })?;
            mac.update(DERIVATION_LABEL);
            mac.update(kek.as_str().as_bytes());

            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(&mac.finalize().into_bytes());
            table.insert(kek, key);
        }

        info!(kek_count = table.len(), "local KMS initialised");
        Ok(Self {
            keks: RwLock::new(Some(table)),
        })
    }

    fn unknown(kek: &KekRef) -> KmsError {
        KmsError::KeyUnavailable {
            kek: kek.to_string(),
            reason: "no such key".into(),
        }
    }
}

#[async_trait]
impl KeyManagementClient for LocalKms {
    async fn wrap(&self, kek: &KekRef, plaintext_key: &[u8]) -> Result<Vec<u8>, KmsError> {
        let guard = self.keks.read().await;
        let table = guard.as_ref().ok_or(KmsError::Closed)?;
        let master = table.get(kek).ok_or_else(|| Self::unknown(kek))?;

        let sealed = encrypt_field(plaintext_key, master.as_slice(), kek.as_str().as_bytes())
            .map_err(|e| KmsError::InvalidResponse(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + sealed.ciphertext.len());
        out.extend_from_slice(&sealed.iv);
        out.extend_from_slice(&sealed.auth_tag);
        out.extend_from_slice(&sealed.ciphertext);
        Ok(out)
    }

    async fn unwrap(
        &self,
        kek: &KekRef,
        wrapped_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let guard = self.keks.read().await;
        let table = guard.as_ref().ok_or(KmsError::Closed)?;
        let master = table.get(kek).ok_or_else(|| Self::unknown(kek))?;

        let integrity = || KmsError::UnwrapIntegrity {
            kek: kek.to_string(),
        };
        if wrapped_key.len() < NONCE_LEN + TAG_LEN {
            return Err(integrity());
        }
        let (iv, rest) = wrapped_key.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);
        let sealed = SealedField {
            iv: iv.try_into().map_err(|_| integrity())?,
            auth_tag: tag.try_into().map_err(|_| integrity())?,
            ciphertext: ciphertext.to_vec(),
        };

        decrypt_field(&sealed, master.as_slice(), kek.as_str().as_bytes())
            .map(Zeroizing::new)
            .map_err(|_| integrity())
    }

    async fn close(&self) -> Result<(), KmsError> {
        self.keks.write().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kms() -> LocalKms {
        LocalKms::from_seed(
            b"test-seed",
            [KekRef::from("kek/general"), KekRef::from("kek/clinical")],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn wrap_unwrap_round_trip() {
        let kms = kms();
        let kek = KekRef::from("kek/general");
        let wrapped = kms.wrap(&kek, &[7u8; 32]).await.unwrap();
        assert_ne!(&wrapped[NONCE_LEN + TAG_LEN..], &[7u8; 32]);
        let key = kms.unwrap(&kek, &wrapped).await.unwrap();
        assert_eq!(key.as_slice(), &[7u8; 32]);
    }

    #[tokio::test]
    async fn unwrap_under_other_kek_fails_integrity() {
        let kms = kms();
        let wrapped = kms
            .wrap(&KekRef::from("kek/general"), &[1u8; 32])
            .await
            .unwrap();
        let err = kms
            .unwrap(&KekRef::from("kek/clinical"), &wrapped)
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::UnwrapIntegrity { .. }));
    }

    #[tokio::test]
    async fn tampered_or_truncated_wrapped_key_fails_integrity() {
        let kms = kms();
        let kek = KekRef::from("kek/general");
        let mut wrapped = kms.wrap(&kek, &[1u8; 32]).await.unwrap();
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0x01;
        assert!(matches!(
            kms.unwrap(&kek, &wrapped).await,
            Err(KmsError::UnwrapIntegrity { .. })
        ));
        assert!(matches!(
            kms.unwrap(&kek, &wrapped[..10]).await,
            Err(KmsError::UnwrapIntegrity { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_kek_is_unavailable() {
        let kms = kms();
        let err = kms
            .wrap(&KekRef::from("kek/financial"), &[1u8; 32])
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::KeyUnavailable { .. }));
    }

    #[tokio::test]
    async fn same_seed_derives_same_keks() {
        let a = kms();
        let b = kms();
        let kek = KekRef::from("kek/clinical");
        let wrapped = a.wrap(&kek, &[9u8; 32]).await.unwrap();
        assert_eq!(b.unwrap(&kek, &wrapped).await.unwrap().as_slice(), &[9u8; 32]);
    }

    #[tokio::test]
    async fn closed_client_rejects_calls() {
        let kms = kms();
        kms.close().await.unwrap();
        assert!(matches!(
            kms.wrap(&KekRef::from("kek/general"), &[0u8; 32]).await,
            Err(KmsError::Closed)
        ));
    }

    #[test]
    fn empty_seed_is_rejected() {
        assert!(LocalKms::from_seed(b"", [KekRef::from("k")]).is_err());
    }
}
