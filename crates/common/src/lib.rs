//! Common types, storage wire shapes, and errors shared across `field-vault` crates.

pub mod error;
pub mod protocol;

pub use error::VaultError;
pub use protocol::{EncryptedFieldValue, EncryptedRecord, ExportEntry};
