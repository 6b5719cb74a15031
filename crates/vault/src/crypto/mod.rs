//! AES-256-GCM-SIV field encryption primitives and value encodings.
//!
//! This module is intentionally free of KMS dependencies. It provides the
//! low-level encrypt/decrypt operations used by the envelope codec.
//!
//! # Stored field format
//!
//! ```text
//! { "ciphertext": <base64>, "iv": <base64, 12 bytes>, "authTag": <base64, 16 bytes> }
//! ```

pub mod cipher;
pub mod encoding;

pub use cipher::{decrypt_field, encrypt_field, CipherError, SealedField, KEY_LEN};
pub use encoding::{EncodingError, FieldEncoding};
