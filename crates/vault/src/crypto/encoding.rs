//! Canonical text form of field values before encryption and after decryption.
//!
//! The cipher only ever sees UTF-8 text. Each routed field declares a
//! [`FieldEncoding`] so the read path knows how to turn the decrypted text back
//! into the JSON value the write path started from.

use serde_json::{Number, Value};
use thiserror::Error;

use crate::money::Money;

/// How a field value is turned into plaintext bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldEncoding {
    /// JSON string, encrypted as-is.
    Text,
    /// JSON number, encrypted as its decimal string.
    Number,
    /// Two-decimal money amount, given as a JSON number or decimal string.
    ///
    /// The plaintext is the normalised two-decimal string and reads always
    /// return that string: `250`, `250.0` and `"250"` all come back as
    /// `"250.00"`. More than two decimal places is rejected.
    Money,
    /// JSON boolean, encrypted as `true` / `false`.
    Boolean,
    /// Any JSON object or array, encrypted as canonical (key-sorted) JSON.
    Json,
}

/// Errors converting between field values and their plaintext form.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The value's JSON type does not match the field's declared encoding.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        /// Declared encoding.
        expected: &'static str,
        /// JSON type actually seen.
        found: &'static str,
    },

    /// The value or decrypted text could not be parsed.
    #[error("{0}")]
    Parse(String),
}

impl FieldEncoding {
    fn name(self) -> &'static str {
        match self {
            FieldEncoding::Text => "string",
            FieldEncoding::Number => "number",
            FieldEncoding::Money => "money amount",
            FieldEncoding::Boolean => "boolean",
            FieldEncoding::Json => "object or array",
        }
    }

    /// Serialise `value` to the text that will be encrypted.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::TypeMismatch`] if the JSON type is wrong, or
    /// [`EncodingError::Parse`] for an invalid money amount.
    pub fn encode(self, value: &Value) -> Result<String, EncodingError> {
        let mismatch = || EncodingError::TypeMismatch {
            expected: self.name(),
            found: json_type(value),
        };
        match (self, value) {
            (FieldEncoding::Text, Value::String(s)) => Ok(s.clone()),
            (FieldEncoding::Number, Value::Number(n)) => Ok(n.to_string()),
            (FieldEncoding::Money, Value::String(s)) => s
                .parse::<Money>()
                .map(|m| m.to_string())
                .map_err(|e| EncodingError::Parse(e.to_string())),
            (FieldEncoding::Money, Value::Number(n)) => Money::from_number(n)
                .map(|m| m.to_string())
                .map_err(|e| EncodingError::Parse(e.to_string())),
            (FieldEncoding::Boolean, Value::Bool(b)) => Ok(b.to_string()),
            (FieldEncoding::Json, Value::Object(_) | Value::Array(_)) => {
                serde_json::to_string(value).map_err(|e| EncodingError::Parse(e.to_string()))
            }
            _ => Err(mismatch()),
        }
    }

    /// Parse decrypted text back into a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::Parse`] if the text is not a valid instance of
    /// this encoding.
    pub fn decode(self, text: &str) -> Result<Value, EncodingError> {
        let parse_err = |e: &dyn std::fmt::Display| EncodingError::Parse(e.to_string());
        match self {
            FieldEncoding::Text => Ok(Value::String(text.to_owned())),
            FieldEncoding::Number => serde_json::from_str::<Number>(text)
                .map(Value::Number)
                .map_err(|e| parse_err(&e)),
            FieldEncoding::Money => text
                .parse::<Money>()
                .map(|m| Value::String(m.to_string()))
                .map_err(|e| parse_err(&e)),
            FieldEncoding::Boolean => text
                .parse::<bool>()
                .map(Value::Bool)
                .map_err(|e| parse_err(&e)),
            FieldEncoding::Json => {
                let value: Value = serde_json::from_str(text).map_err(|e| parse_err(&e))?;
                if value.is_object() || value.is_array() {
                    Ok(value)
                } else {
                    Err(EncodingError::TypeMismatch {
                        expected: self.name(),
                        found: json_type(&value),
                    })
                }
            }
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
