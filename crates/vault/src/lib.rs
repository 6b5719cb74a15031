//! `field-vault`: field-level envelope encryption for assisted-living resident
//! records.
//!
//! Every sensitive field is sealed with AES-256-GCM-SIV under a per-record,
//! per-purpose DEK. DEKs are wrapped by a purpose-scoped KEK held in a KMS and
//! stored next to the ciphertexts. Reads unwrap, decrypt, validate and then
//! release only the purposes the caller's roles permit.
//!
//! Layering, leaf first: [`kms`] → [`dek`] → [`crypto`] → [`schema`] →
//! [`codec`] → [`access`] → [`bulk`].

pub mod access;
pub mod bulk;
pub mod codec;
pub mod crypto;
pub mod dek;
pub mod kms;
pub mod money;
pub mod schema;

pub use access::{filter_by_role, Role, RoleSet};
pub use codec::{EnvelopeCodec, PlaintextRecord};
pub use common::{EncryptedFieldValue, EncryptedRecord, ExportEntry, VaultError};
pub use schema::{KekRing, Purpose, RecordKind};
