//! AES-256-GCM-SIV encryption and decryption of individual field values.
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) is nonce-misuse-resistant,
//! but every call still draws a fresh 96-bit nonce from the OS CSPRNG, so the
//! same plaintext under the same DEK never produces the same `{ciphertext, iv}`.
//!
//! The field name is passed as associated data. A ciphertext copied from
//! `encrypted_dob` into `encrypted_pcp` therefore fails authentication even
//! though both are sealed under the same DEK.

use aes_gcm_siv::{
    aead::{generic_array::GenericArray, rand_core::RngCore, AeadInPlace, KeyInit, OsRng},
    Aes256GcmSiv, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::EncryptedFieldValue;
use thiserror::Error;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the AES-GCM-SIV authentication tag.
pub const TAG_LEN: usize = 16;

/// A sealed field value in raw byte form.
///
/// The stored representation is [`EncryptedFieldValue`], with every component
/// base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedField {
    /// Raw nonce bytes.
    pub iv: [u8; NONCE_LEN],
    /// Raw ciphertext bytes, tag detached.
    pub ciphertext: Vec<u8>,
    /// Raw authentication tag.
    pub auth_tag: [u8; TAG_LEN],
}

impl SealedField {
    /// Encode to the stored `{ciphertext, iv, authTag}` shape.
    pub fn to_wire(&self) -> EncryptedFieldValue {
        EncryptedFieldValue {
            ciphertext: STANDARD.encode(&self.ciphertext),
            iv: STANDARD.encode(self.iv),
            auth_tag: STANDARD.encode(self.auth_tag),
        }
    }

    /// Decode a stored `{ciphertext, iv, authTag}` value.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidFormat`] if any component is not valid
    /// base64 or the nonce/tag has the wrong length.
    pub fn from_wire(wire: &EncryptedFieldValue) -> Result<Self, CipherError> {
        let ciphertext = STANDARD
            .decode(&wire.ciphertext)
            .map_err(|_| CipherError::InvalidFormat)?;
        let iv = decode_fixed::<NONCE_LEN>(&wire.iv)?;
        let auth_tag = decode_fixed::<TAG_LEN>(&wire.auth_tag)?;
        Ok(Self {
            iv,
            ciphertext,
            auth_tag,
        })
    }
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], CipherError> {
    let bytes = STANDARD.decode(s).map_err(|_| CipherError::InvalidFormat)?;
    bytes.try_into().map_err(|_| CipherError::InvalidFormat)
}

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The DEK is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid DEK length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// AES-GCM-SIV encryption failed, or decryption failed authentication.
    #[error("aead operation failed")]
    AeadFailure,

    /// The stored field value is not well-formed.
    #[error("invalid encrypted field format")]
    InvalidFormat,
}

/// Encrypt `plaintext` under `dek`, binding `aad` as associated data.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `dek` is not [`KEY_LEN`] bytes.
/// Returns [`CipherError::AeadFailure`] on an internal AEAD error (should be unreachable
/// with a valid key and nonce).
pub fn encrypt_field(plaintext: &[u8], dek: &[u8], aad: &[u8]) -> Result<SealedField, CipherError> {
    let cipher = build_cipher(dek)?;

    let mut iv = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), aad, &mut buffer)
        .map_err(|_| CipherError::AeadFailure)?;

    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(tag.as_slice());

    Ok(SealedField {
        iv,
        ciphertext: buffer,
        auth_tag,
    })
}

/// Decrypt a [`SealedField`] back to plaintext bytes.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `dek` is not [`KEY_LEN`] bytes.
/// Returns [`CipherError::AeadFailure`] if authentication fails (wrong key,
/// wrong associated data, or tampered ciphertext/iv/tag).
pub fn decrypt_field(field: &SealedField, dek: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(dek)?;
    let mut buffer = field.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&field.iv),
            aad,
            &mut buffer,
            GenericArray::from_slice(&field.auth_tag),
        )
        .map_err(|_| CipherError::AeadFailure)?;
    Ok(buffer)
}

fn build_cipher(dek: &[u8]) -> Result<Aes256GcmSiv, CipherError> {
    if dek.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    Aes256GcmSiv::new_from_slice(dek).map_err(|_| CipherError::InvalidKeyLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_dek() -> Vec<u8> {
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let dek = random_dek();
        let sealed = encrypt_field(b"1950-01-01", &dek, b"dob").unwrap();
        let opened = decrypt_field(&sealed, &dek, b"dob").unwrap();
        assert_eq!(opened, b"1950-01-01");
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let sealed = encrypt_field(b"secret", &random_dek(), b"f").unwrap();
        assert!(matches!(
            decrypt_field(&sealed, &random_dek(), b"f"),
            Err(CipherError::AeadFailure)
        ));
    }

    #[test]
    fn wrong_field_name_fails_decryption() {
        let dek = random_dek();
        let sealed = encrypt_field(b"Dr. X", &dek, b"pcp").unwrap();
        assert!(decrypt_field(&sealed, &dek, b"dob").is_err());
    }

    #[test]
    fn invalid_key_length_rejected() {
        assert!(matches!(
            encrypt_field(b"x", &[0u8; 16], b""),
            Err(CipherError::InvalidKeyLength)
        ));
    }

    #[test]
    fn same_plaintext_yields_distinct_nonce_and_ciphertext() {
        let dek = random_dek();
        let a = encrypt_field(b"Jane Doe", &dek, b"resident_name").unwrap();
        let b = encrypt_field(b"Jane Doe", &dek, b"resident_name").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn any_bit_flip_fails_authentication() {
        let dek = random_dek();
        let sealed = encrypt_field(b"tamper me", &dek, b"f").unwrap();

        for i in 0..sealed.ciphertext.len() * 8 {
            let mut t = sealed.clone();
            t.ciphertext[i / 8] ^= 1 << (i % 8);
            assert!(matches!(decrypt_field(&t, &dek, b"f"), Err(CipherError::AeadFailure)));
        }
        for i in 0..NONCE_LEN * 8 {
            let mut t = sealed.clone();
            t.iv[i / 8] ^= 1 << (i % 8);
            assert!(matches!(decrypt_field(&t, &dek, b"f"), Err(CipherError::AeadFailure)));
        }
        for i in 0..TAG_LEN * 8 {
            let mut t = sealed.clone();
            t.auth_tag[i / 8] ^= 1 << (i % 8);
            assert!(matches!(decrypt_field(&t, &dek, b"f"), Err(CipherError::AeadFailure)));
        }
    }

    #[test]
    fn wire_round_trip() {
        let dek = random_dek();
        let sealed = encrypt_field(b"hello", &dek, b"f").unwrap();
        let wire = sealed.to_wire();
        let parsed = SealedField::from_wire(&wire).unwrap();
        assert_eq!(parsed, sealed);
    }

    #[test]
    fn from_wire_rejects_short_iv() {
        let dek = random_dek();
        let mut wire = encrypt_field(b"hello", &dek, b"f").unwrap().to_wire();
        wire.iv = STANDARD.encode([0u8; 8]);
        assert!(matches!(
            SealedField::from_wire(&wire),
            Err(CipherError::InvalidFormat)
        ));
    }

    #[test]
    fn from_wire_rejects_bad_base64() {
        let wire = EncryptedFieldValue {
            ciphertext: "!!!".into(),
            iv: "!!!".into(),
            auth_tag: "!!!".into(),
        };
        assert!(SealedField::from_wire(&wire).is_err());
    }
}
