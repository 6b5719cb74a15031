//! Envelope codec: plaintext records ⇄ stored encrypted records.
//!
//! # Write path
//!
//! 1. Validate the record against its typed schema.
//! 2. Route every populated field to its purpose; unrouted fields are rejected.
//! 3. Per purpose, concurrently: generate a DEK under the purpose KEK and seal
//!    each field with the field name as associated data.
//! 4. Emit plain index fields, `encrypted_<name>` values, wrapped DEKs and the
//!    routing version.
//!
//! # Read path
//!
//! 1. Check the routing version and reject unknown keys.
//! 2. Per purpose, concurrently: unwrap the DEK and open each field.
//! 3. Validate the merged plaintext, then apply the access gate.
//!
//! A failure in any purpose fails the whole record; no partially decrypted
//! record is ever returned.

pub mod record;

pub use record::PlaintextRecord;

use std::{collections::BTreeMap, sync::Arc};

use common::{
    protocol::{encrypted_key, ENCRYPTED_PREFIX, ROUTING_VERSION_KEY},
    EncryptedFieldValue, EncryptedRecord, VaultError,
};
use futures::future::try_join_all;
use serde_json::{Map, Value};
use tracing::{debug, error, instrument};
use zeroize::Zeroizing;

use crate::access::{filter_by_role, RoleSet};
use crate::crypto::{decrypt_field, encrypt_field, CipherError, SealedField};
use crate::dek::{DataKey, DataKeyGenerator, GeneratedKey, WrappedDek};
use crate::kms::KeyManagementClient;
use crate::schema::{
    FieldRoute, KekRing, Purpose, RecordKind, RecordLayout, SensitiveRecord, ROUTING_VERSION,
};

/// Encodes plaintext records into encrypted records and back.
///
/// Cheap to share behind an [`Arc`]; every method takes `&self`.
pub struct EnvelopeCodec {
    keys: DataKeyGenerator,
    keks: KekRing,
}

/// One purpose's output on the write path.
struct SealedPurpose {
    dek_key: String,
    wrapped: WrappedDek,
    fields: Vec<(&'static str, EncryptedFieldValue)>,
}

impl SealedPurpose {
    fn attach(self, out: &mut EncryptedRecord) {
        for (name, value) in &self.fields {
            out.insert_field(name, value);
        }
        out.insert_wrapped_dek(self.dek_key, self.wrapped.to_base64());
    }
}

type EncodedGroups = BTreeMap<Purpose, Vec<(&'static FieldRoute, Zeroizing<String>)>>;

impl EnvelopeCodec {
    /// Build a codec over `kms`, wrapping DEKs under the KEKs in `keks`.
    pub fn new(kms: Arc<dyn KeyManagementClient>, keks: KekRing) -> Self {
        Self {
            keys: DataKeyGenerator::new(kms),
            keks,
        }
    }

    /// Encrypt a plaintext record with fresh per-purpose DEKs.
    ///
    /// # Errors
    ///
    /// - [`VaultError::MalformedRecord`] if the record fails validation or has
    ///   a field with no routing entry.
    /// - Any KMS error raised while wrapping a DEK.
    #[instrument(skip_all, fields(kind = %record.kind()))]
    pub async fn to_encrypted_record(
        &self,
        record: &PlaintextRecord,
    ) -> Result<EncryptedRecord, VaultError> {
        let kind = record.kind();
        let layout = kind.layout();
        kind.validate(record.fields())
            .map_err(|e| malformed(kind, &e))?;

        let mut out = EncryptedRecord::new();
        let mut groups = EncodedGroups::new();
        for (name, value) in record.fields() {
            // Absent and null are both omitted from storage.
            if value.is_null() {
                continue;
            }
            if layout.is_plain(name) {
                out.insert_plain(name.clone(), value.clone());
                continue;
            }
            let route = layout.route(name).ok_or_else(|| unrouted(kind, name))?;
            groups
                .entry(route.purpose)
                .or_default()
                .push((route, encode_field(kind, route, value)?));
        }

        let sealed = try_join_all(
            groups
                .into_iter()
                .map(|(purpose, fields)| self.seal_purpose(layout, purpose, fields, None)),
        )
        .await?;

        for s in sealed {
            s.attach(&mut out);
        }
        out.insert_plain(ROUTING_VERSION_KEY, Value::from(ROUTING_VERSION));
        debug!("record encrypted");
        Ok(out)
    }

    /// Decrypt a stored record and release only what `roles` may see.
    ///
    /// # Errors
    ///
    /// - [`VaultError::MalformedRecord`] for unknown keys, a missing wrapped
    ///   DEK, an unknown routing version, or a schema violation.
    /// - [`VaultError::UnwrapIntegrity`] / [`VaultError::AuthenticationFailure`]
    ///   on tampering.
    /// - [`VaultError::Deserialization`] if a field decrypts but does not
    ///   decode.
    /// - Any KMS error raised while unwrapping.
    pub async fn from_encrypted_record(
        &self,
        kind: RecordKind,
        stored: &EncryptedRecord,
        roles: &RoleSet,
    ) -> Result<PlaintextRecord, VaultError> {
        let record = self.decrypt_full(kind, stored).await?;
        Ok(filter_by_role(record, roles))
    }

    /// Decrypt every field of a stored record, bypassing the access gate.
    ///
    /// Used by trusted internal jobs (re-keying, verification).
    ///
    /// # Errors
    ///
    /// As for [`EnvelopeCodec::from_encrypted_record`].
    #[instrument(skip_all, fields(kind = %kind))]
    pub async fn decrypt_full(
        &self,
        kind: RecordKind,
        stored: &EncryptedRecord,
    ) -> Result<PlaintextRecord, VaultError> {
        let layout = kind.layout();
        check_routing_version(kind, stored)?;

        let mut fields = Map::new();
        let mut groups: BTreeMap<Purpose, Vec<(&'static FieldRoute, &Value)>> = BTreeMap::new();
        for (key, value) in stored.as_map() {
            if key == ROUTING_VERSION_KEY || layout.is_dek_key(key) {
                continue;
            }
            if let Some(name) = key.strip_prefix(ENCRYPTED_PREFIX) {
                let route = layout.route(name).ok_or_else(|| unrouted(kind, key))?;
                if !value.is_null() {
                    groups.entry(route.purpose).or_default().push((route, value));
                }
            } else if layout.is_plain(key) {
                if !value.is_null() {
                    fields.insert(key.clone(), value.clone());
                }
            } else {
                return Err(VaultError::MalformedRecord(format!(
                    "{kind} record has unexpected plaintext field `{key}`"
                )));
            }
        }

        let opened = try_join_all(
            groups
                .into_iter()
                .map(|(purpose, group)| self.open_purpose(kind, stored, purpose, group)),
        )
        .await?;
        for group in opened {
            fields.extend(group);
        }

        kind.validate(&fields).map_err(|e| malformed(kind, &e))?;
        debug!("record decrypted");
        Ok(PlaintextRecord::new(kind, fields))
    }

    /// Encrypt a typed record.
    ///
    /// # Errors
    ///
    /// As for [`EnvelopeCodec::to_encrypted_record`].
    pub async fn encrypt_typed<T: SensitiveRecord>(
        &self,
        record: &T,
    ) -> Result<EncryptedRecord, VaultError> {
        self.to_encrypted_record(&PlaintextRecord::from_typed(record)?)
            .await
    }

    /// Decrypt into a typed record after applying the access gate.
    ///
    /// Types with required fields in a withheld purpose fail with
    /// [`VaultError::MalformedRecord`] for callers without that purpose.
    ///
    /// # Errors
    ///
    /// As for [`EnvelopeCodec::from_encrypted_record`].
    pub async fn decrypt_typed<T: SensitiveRecord>(
        &self,
        stored: &EncryptedRecord,
        roles: &RoleSet,
    ) -> Result<T, VaultError> {
        self.from_encrypted_record(T::KIND, stored, roles)
            .await?
            .into_typed()
    }

    /// Apply field changes to a stored record without touching other fields.
    ///
    /// The stored record is decrypted and the changes are merged into it. The
    /// merged record must pass validation before anything is resealed. Changed
    /// fields are sealed under the purpose's existing DEK when the record
    /// already has one, otherwise under a newly generated DEK. A `null` change
    /// removes the field.
    ///
    /// # Errors
    ///
    /// - [`VaultError::MalformedRecord`] for unrouted fields, a merged record
    ///   that fails validation, or any read-path defect in `stored`.
    /// - Any error from [`EnvelopeCodec::decrypt_full`] on `stored`.
    /// - Any KMS error raised while unwrapping or wrapping.
    #[instrument(skip_all, fields(kind = %changes.kind()))]
    pub async fn update_fields(
        &self,
        stored: &EncryptedRecord,
        changes: &PlaintextRecord,
    ) -> Result<EncryptedRecord, VaultError> {
        let kind = changes.kind();
        let layout = kind.layout();

        let mut merged = self.decrypt_full(kind, stored).await?.into_fields();
        for (name, value) in changes.fields() {
            if !layout.is_plain(name) && layout.route(name).is_none() {
                return Err(unrouted(kind, name));
            }
            if value.is_null() {
                merged.remove(name);
            } else {
                merged.insert(name.clone(), value.clone());
            }
        }
        kind.validate(&merged).map_err(|e| malformed(kind, &e))?;

        let mut out = stored.clone();
        let mut groups = EncodedGroups::new();
        for (name, value) in changes.fields() {
            if layout.is_plain(name) {
                if value.is_null() {
                    out.remove(name);
                } else {
                    out.insert_plain(name.clone(), value.clone());
                }
                continue;
            }
            let route = layout.route(name).ok_or_else(|| unrouted(kind, name))?;
            if value.is_null() {
                out.remove(&encrypted_key(name));
                continue;
            }
            groups
                .entry(route.purpose)
                .or_default()
                .push((route, encode_field(kind, route, value)?));
        }

        let pending = groups.into_iter().map(|(purpose, fields)| {
            let existing = stored.wrapped_dek(&layout.dek_key(purpose));
            self.seal_purpose(layout, purpose, fields, existing)
        });
        for s in try_join_all(pending).await? {
            s.attach(&mut out);
        }
        out.insert_plain(ROUTING_VERSION_KEY, Value::from(ROUTING_VERSION));
        debug!("record updated");
        Ok(out)
    }

    /// Decrypt a stored record and re-encrypt it under fresh DEKs.
    ///
    /// # Errors
    ///
    /// Any error from [`EnvelopeCodec::decrypt_full`] or
    /// [`EnvelopeCodec::to_encrypted_record`].
    pub async fn rekey(
        &self,
        kind: RecordKind,
        stored: &EncryptedRecord,
    ) -> Result<EncryptedRecord, VaultError> {
        let plaintext = self.decrypt_full(kind, stored).await?;
        self.to_encrypted_record(&plaintext).await
    }

    /// Close the underlying KMS client.
    ///
    /// # Errors
    ///
    /// Returns the KMS error if shutdown fails.
    pub async fn close(&self) -> Result<(), VaultError> {
        self.keys.close().await.map_err(VaultError::from)
    }

    // -----------------------------------------------------------------------
    // Per-purpose helpers
    // -----------------------------------------------------------------------

    async fn seal_purpose(
        &self,
        layout: &RecordLayout,
        purpose: Purpose,
        fields: Vec<(&'static FieldRoute, Zeroizing<String>)>,
        existing: Option<&str>,
    ) -> Result<SealedPurpose, VaultError> {
        let kek = self.keks.kek_for(purpose);
        let (dek, wrapped) = match existing {
            Some(encoded) => {
                let wrapped = WrappedDek::from_base64(kek.clone(), encoded)?;
                let dek = self
                    .keys
                    .unwrap(&wrapped)
                    .await
                    .map_err(|e| security_event(layout.kind, purpose, e.into()))?;
                (dek, wrapped)
            }
            None => {
                let GeneratedKey { plaintext, wrapped } = self.keys.generate(kek).await?;
                (plaintext, wrapped)
            }
        };

        let sealed = fields
            .iter()
            .map(|(route, text)| {
                encrypt_field(text.as_bytes(), dek.as_bytes(), route.name.as_bytes())
                    .map(|s| (route.name, s.to_wire()))
                    .map_err(|e| VaultError::Internal(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SealedPurpose {
            dek_key: layout.dek_key(purpose),
            wrapped,
            fields: sealed,
        })
    }

    async fn open_purpose(
        &self,
        kind: RecordKind,
        stored: &EncryptedRecord,
        purpose: Purpose,
        group: Vec<(&'static FieldRoute, &Value)>,
    ) -> Result<Vec<(String, Value)>, VaultError> {
        let dek_key = kind.layout().dek_key(purpose);
        let encoded = stored.wrapped_dek(&dek_key).ok_or_else(|| {
            VaultError::MalformedRecord(format!(
                "{kind} record has {purpose} fields but no `{dek_key}`"
            ))
        })?;

        let wrapped = WrappedDek::from_base64(self.keks.kek_for(purpose).clone(), encoded)
            .map_err(|e| security_event(kind, purpose, e.into()))?;
        let dek = self
            .keys
            .unwrap(&wrapped)
            .await
            .map_err(|e| security_event(kind, purpose, e.into()))?;

        group
            .into_iter()
            .map(|(route, raw)| open_field(kind, &dek, route, raw))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn encode_field(
    kind: RecordKind,
    route: &FieldRoute,
    value: &Value,
) -> Result<Zeroizing<String>, VaultError> {
    route.encoding.encode(value).map(Zeroizing::new).map_err(|_| {
        VaultError::MalformedRecord(format!(
            "{kind} field `{}` is not a valid {:?} value",
            route.name, route.encoding
        ))
    })
}

fn open_field(
    kind: RecordKind,
    dek: &DataKey,
    route: &FieldRoute,
    raw: &Value,
) -> Result<(String, Value), VaultError> {
    let field = route.name;
    let auth_failure = || {
        error!(
            security_event = true,
            kind = %kind,
            field,
            "encrypted field failed authentication"
        );
        VaultError::AuthenticationFailure {
            field: field.to_owned(),
        }
    };

    let wire = EncryptedFieldValue::from_value(raw).ok_or_else(auth_failure)?;
    let sealed = SealedField::from_wire(&wire).map_err(|_| auth_failure())?;
    let plaintext = decrypt_field(&sealed, dek.as_bytes(), field.as_bytes())
        .map(Zeroizing::new)
        .map_err(|e| match e {
            CipherError::InvalidKeyLength => VaultError::Internal(e.to_string()),
            CipherError::AeadFailure | CipherError::InvalidFormat => auth_failure(),
        })?;

    let deserialization = || VaultError::Deserialization {
        field: field.to_owned(),
        reason: format!("not a valid {:?} value", route.encoding),
    };
    let text = std::str::from_utf8(&plaintext).map_err(|_| deserialization())?;
    let value = route.encoding.decode(text).map_err(|_| deserialization())?;
    Ok((field.to_owned(), value))
}

fn check_routing_version(kind: RecordKind, stored: &EncryptedRecord) -> Result<(), VaultError> {
    match stored.get(ROUTING_VERSION_KEY) {
        // Records written before the tag existed use version 1.
        None => Ok(()),
        Some(v) if v.as_u64() == Some(ROUTING_VERSION) => Ok(()),
        Some(v) => Err(VaultError::MalformedRecord(format!(
            "{kind} record has unsupported routing version {v}"
        ))),
    }
}

fn unrouted(kind: RecordKind, name: &str) -> VaultError {
    VaultError::MalformedRecord(format!("{kind} field `{name}` has no routing entry"))
}

fn malformed(kind: RecordKind, reason: &str) -> VaultError {
    VaultError::MalformedRecord(format!("{kind} record failed validation: {reason}"))
}

fn security_event(kind: RecordKind, purpose: Purpose, e: VaultError) -> VaultError {
    if e.is_security_event() {
        error!(
            security_event = true,
            kind = %kind,
            purpose = %purpose,
            code = e.code(),
            "wrapped DEK failed integrity check"
        );
    }
    e
}
