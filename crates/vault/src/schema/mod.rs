//! Record catalogue: purposes, routing tables and typed records.
//!
//! # Responsibilities
//!
//! - Assign every sensitive field of every record kind to exactly one
//!   [`Purpose`] ([`router`]).
//! - Map purposes to configured KEKs ([`KekRing`]).
//! - Define the typed plaintext records and validate untyped ones ([`records`]).
//!
//! # Module invariants
//!
//! - **No crypto or KMS calls.** This module only describes records; sealing
//!   lives in `crate::codec`.
//! - Routing tables are static. Changing one requires bumping
//!   [`ROUTING_VERSION`].

pub mod purpose;
pub mod records;
pub mod router;

pub use purpose::{KekRing, Purpose};
pub use records::SensitiveRecord;
pub use router::{
    DekLayout, FieldRoute, RecordKind, RecordLayout, UnknownRecordKind, ROUTING_VERSION,
};
