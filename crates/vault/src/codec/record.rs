//! [`PlaintextRecord`]: an untyped record tagged with its kind.

use common::VaultError;
use serde_json::{Map, Value};

use crate::schema::{RecordKind, SensitiveRecord};

/// A decrypted (or not yet encrypted) record.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaintextRecord {
    kind: RecordKind,
    fields: Map<String, Value>,
}

impl PlaintextRecord {
    /// Tag `fields` with `kind`. No validation happens here.
    pub fn new(kind: RecordKind, fields: Map<String, Value>) -> Self {
        Self { kind, fields }
    }

    /// Serialise a typed record.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::MalformedRecord`] if `record` does not serialise
    /// to a JSON object.
    pub fn from_typed<T: SensitiveRecord>(record: &T) -> Result<Self, VaultError> {
        match serde_json::to_value(record) {
            Ok(Value::Object(fields)) => Ok(Self::new(T::KIND, fields)),
            Ok(_) => Err(VaultError::MalformedRecord(format!(
                "{} did not serialise to an object",
                T::KIND
            ))),
            Err(e) => Err(VaultError::MalformedRecord(e.to_string())),
        }
    }

    /// Deserialise into a typed record.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::MalformedRecord`] if the kinds differ or the
    /// fields do not fit `T`.
    pub fn into_typed<T: SensitiveRecord>(self) -> Result<T, VaultError> {
        if self.kind != T::KIND {
            return Err(VaultError::MalformedRecord(format!(
                "expected {} record, found {}",
                T::KIND,
                self.kind
            )));
        }
        serde_json::from_value(Value::Object(self.fields))
            .map_err(|e| VaultError::MalformedRecord(e.to_string()))
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&String, &mut Value) -> bool) {
        self.fields.retain(keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::records::{fixtures, Allergy, Resident};

    #[test]
    fn typed_round_trip() {
        let allergy = fixtures::allergy();
        let record = PlaintextRecord::from_typed(&allergy).unwrap();
        assert_eq!(record.kind(), RecordKind::Allergy);
        assert_eq!(record.get("recordedDate"), Some(&Value::from("2024-03-01")));
        assert_eq!(record.into_typed::<Allergy>().unwrap(), allergy);
    }

    #[test]
    fn into_typed_rejects_kind_mismatch() {
        let record = PlaintextRecord::from_typed(&fixtures::allergy()).unwrap();
        assert!(matches!(
            record.into_typed::<Resident>(),
            Err(VaultError::MalformedRecord(_))
        ));
    }
}
