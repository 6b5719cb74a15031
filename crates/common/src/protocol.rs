//! Storage and export wire types.
//!
//! These types describe exactly what is persisted in the document store and
//! what the bulk export files contain. Nothing in here knows how to encrypt or
//! decrypt; the shapes are shared so that data-access code can move encrypted
//! records around without depending on the crypto crate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix of every encrypted field key in a stored record.
pub const ENCRYPTED_PREFIX: &str = "encrypted_";

/// Key of the wrapped DEK for record types protected by a single purpose.
pub const SINGLE_DEK_KEY: &str = "encrypted_dek";

/// Plain field carrying the routing table version the record was written with.
pub const ROUTING_VERSION_KEY: &str = "routing_version";

// ---------------------------------------------------------------------------
// Encrypted field value
// ---------------------------------------------------------------------------

/// Stored form of one encrypted field: base64 ciphertext, nonce and AEAD tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedFieldValue {
    /// Base64 ciphertext (without the tag).
    pub ciphertext: String,
    /// Base64 96-bit nonce.
    pub iv: String,
    /// Base64 128-bit authentication tag.
    #[serde(rename = "authTag")]
    pub auth_tag: String,
}

impl EncryptedFieldValue {
    /// Render as a JSON object suitable for embedding in a stored record.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("ciphertext".into(), Value::String(self.ciphertext.clone()));
        obj.insert("iv".into(), Value::String(self.iv.clone()));
        obj.insert("authTag".into(), Value::String(self.auth_tag.clone()));
        Value::Object(obj)
    }

    /// Parse a stored JSON value. Returns `None` if the shape is wrong.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

// ---------------------------------------------------------------------------
// Encrypted record
// ---------------------------------------------------------------------------

/// A record exactly as persisted: plain index fields, `encrypted_<name>`
/// fields, wrapped DEKs and the routing version tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedRecord(Map<String, Value>);

impl EncryptedRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a raw document map loaded from storage.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Borrow the underlying document map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying document map.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Look up a raw key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Store a plain (unencrypted) field verbatim.
    pub fn insert_plain(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Store an encrypted field under `encrypted_<name>`.
    pub fn insert_field(&mut self, name: &str, value: &EncryptedFieldValue) {
        self.0.insert(encrypted_key(name), value.to_value());
    }

    /// Store a base64 wrapped DEK under `key`.
    pub fn insert_wrapped_dek(&mut self, key: impl Into<String>, wrapped_b64: String) {
        self.0.insert(key.into(), Value::String(wrapped_b64));
    }

    /// Return the base64 wrapped DEK stored under `key`, if present and a string.
    pub fn wrapped_dek(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Return the raw stored value of encrypted field `name`, if present and non-null.
    pub fn field_raw(&self, name: &str) -> Option<&Value> {
        self.0.get(&encrypted_key(name)).filter(|v| !v.is_null())
    }

    /// Remove a raw key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Iterate over all raw keys.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

/// Storage key for encrypted field `name`.
pub fn encrypted_key(name: &str) -> String {
    format!("{ENCRYPTED_PREFIX}{name}")
}

// ---------------------------------------------------------------------------
// Bulk export
// ---------------------------------------------------------------------------

/// One entry of a bulk export / seed file: document path plus its body.
///
/// In export files `data` is an [`EncryptedRecord`]; seed input files use the
/// same envelope with a plaintext JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEntry<T = EncryptedRecord> {
    /// Document path in the store (e.g. `residents/abc123`).
    pub path: String,
    /// Document body.
    pub data: T,
}
