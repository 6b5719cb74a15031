//! Purpose-scoped key router: the static field → purpose table per record type.
//!
//! The same table drives both the write path and the read path, so a field is
//! always decrypted with the DEK of the purpose it was encrypted under. Any
//! change to a table entry must bump [`ROUTING_VERSION`].

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::purpose::Purpose;
use crate::crypto::FieldEncoding;

/// Version of the routing tables written into every encrypted record.
pub const ROUTING_VERSION: u64 = 1;

/// Prefix of wrapped-DEK keys on multi-purpose records.
const PER_PURPOSE_DEK_PREFIX: &str = "encrypted_dek_";

/// Every record type the vault knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Top-level resident document.
    Resident,
    /// `emergency_contacts` subcollection.
    EmergencyContact,
    /// `allergies` subcollection.
    Allergy,
    /// `prescriptions` subcollection.
    Prescription,
    /// `observations` subcollection.
    Observation,
    /// `diagnostic_history` subcollection.
    DiagnosticHistory,
    /// `emar` subcollection (medication administrations).
    MedicationAdministration,
    /// `financials` subcollection.
    FinancialTransaction,
}

/// Error for an unrecognised record type name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown record kind `{0}`")]
pub struct UnknownRecordKind(pub String);

impl RecordKind {
    /// Every record kind.
    pub const ALL: [RecordKind; 8] = [
        RecordKind::Resident,
        RecordKind::EmergencyContact,
        RecordKind::Allergy,
        RecordKind::Prescription,
        RecordKind::Observation,
        RecordKind::DiagnosticHistory,
        RecordKind::MedicationAdministration,
        RecordKind::FinancialTransaction,
    ];

    /// Name of the collection the record is stored in.
    pub fn collection(self) -> &'static str {
        match self {
            RecordKind::Resident => "residents",
            RecordKind::EmergencyContact => "emergency_contacts",
            RecordKind::Allergy => "allergies",
            RecordKind::Prescription => "prescriptions",
            RecordKind::Observation => "observations",
            RecordKind::DiagnosticHistory => "diagnostic_history",
            RecordKind::MedicationAdministration => "emar",
            RecordKind::FinancialTransaction => "financials",
        }
    }

    /// The routing table for this kind.
    pub fn layout(self) -> &'static RecordLayout {
        match self {
            RecordKind::Resident => &RESIDENT,
            RecordKind::EmergencyContact => &EMERGENCY_CONTACT,
            RecordKind::Allergy => &ALLERGY,
            RecordKind::Prescription => &PRESCRIPTION,
            RecordKind::Observation => &OBSERVATION,
            RecordKind::DiagnosticHistory => &DIAGNOSTIC_HISTORY,
            RecordKind::MedicationAdministration => &MEDICATION_ADMINISTRATION,
            RecordKind::FinancialTransaction => &FINANCIAL_TRANSACTION,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for RecordKind {
    type Err = UnknownRecordKind;

    /// Accepts collection names and their singular forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resident" | "residents" => Ok(RecordKind::Resident),
            "emergency_contact" | "emergency_contacts" => Ok(RecordKind::EmergencyContact),
            "allergy" | "allergies" => Ok(RecordKind::Allergy),
            "prescription" | "prescriptions" => Ok(RecordKind::Prescription),
            "observation" | "observations" => Ok(RecordKind::Observation),
            "diagnostic_history" => Ok(RecordKind::DiagnosticHistory),
            "emar" | "medication_administration" => Ok(RecordKind::MedicationAdministration),
            "financial" | "financials" | "financial_transaction" => {
                Ok(RecordKind::FinancialTransaction)
            }
            _ => Err(UnknownRecordKind(s.to_owned())),
        }
    }
}

/// Routing entry for one sensitive field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRoute {
    /// Field name in the plaintext record.
    pub name: &'static str,
    /// Purpose whose DEK seals the field.
    pub purpose: Purpose,
    /// Plaintext encoding of the value.
    pub encoding: FieldEncoding,
}

const fn route(name: &'static str, purpose: Purpose, encoding: FieldEncoding) -> FieldRoute {
    FieldRoute {
        name,
        purpose,
        encoding,
    }
}

const fn text(name: &'static str, purpose: Purpose) -> FieldRoute {
    route(name, purpose, FieldEncoding::Text)
}

const fn json(name: &'static str, purpose: Purpose) -> FieldRoute {
    route(name, purpose, FieldEncoding::Json)
}

/// Where wrapped DEKs live on a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DekLayout {
    /// One purpose, one `encrypted_dek`.
    Single,
    /// One `encrypted_dek_<purpose>` per purpose present.
    PerPurpose,
}

/// The full routing table for one record kind.
#[derive(Debug)]
pub struct RecordLayout {
    /// Kind this layout routes.
    pub kind: RecordKind,
    /// Fields stored without encryption (identifiers used for indexing).
    pub plain: &'static [&'static str],
    /// Sensitive fields and their purposes.
    pub sensitive: &'static [FieldRoute],
}

impl RecordLayout {
    /// Routing entry for `name`, if it is a sensitive field.
    pub fn route(&self, name: &str) -> Option<&'static FieldRoute> {
        self.sensitive.iter().find(|r| r.name == name)
    }

    /// Whether `name` is stored in plaintext.
    pub fn is_plain(&self, name: &str) -> bool {
        self.plain.iter().any(|p| *p == name)
    }

    /// Distinct purposes used by this kind, in [`Purpose::ALL`] order.
    pub fn purposes(&self) -> Vec<Purpose> {
        Purpose::ALL
            .into_iter()
            .filter(|p| self.sensitive.iter().any(|r| r.purpose == *p))
            .collect()
    }

    /// How wrapped DEKs are keyed on the stored record.
    pub fn dek_layout(&self) -> DekLayout {
        if self.purposes().len() == 1 {
            DekLayout::Single
        } else {
            DekLayout::PerPurpose
        }
    }

    /// Stored key holding the wrapped DEK for `purpose`.
    pub fn dek_key(&self, purpose: Purpose) -> String {
        match self.dek_layout() {
            DekLayout::Single => common::protocol::SINGLE_DEK_KEY.to_owned(),
            DekLayout::PerPurpose => format!("{PER_PURPOSE_DEK_PREFIX}{}", purpose.as_str()),
        }
    }

    /// Whether `key` is one of this layout's wrapped-DEK keys.
    pub fn is_dek_key(&self, key: &str) -> bool {
        self.purposes().into_iter().any(|p| self.dek_key(p) == key)
    }
}

use Purpose::{Clinical, Contact, Financial, General};

static RESIDENT: RecordLayout = RecordLayout {
    kind: RecordKind::Resident,
    plain: &["facility_id", "room_no"],
    sensitive: &[
        text("resident_name", General),
        text("gender", General),
        text("avatar_url", General),
        text("dob", Contact),
        text("resident_email", Contact),
        text("cell_phone", Contact),
        text("work_phone", Contact),
        text("home_phone", Contact),
        text("pcp", Clinical),
        json("financials", Financial),
    ],
};

static EMERGENCY_CONTACT: RecordLayout = RecordLayout {
    kind: RecordKind::EmergencyContact,
    plain: &["resident_id"],
    sensitive: &[
        text("contact_name", Contact),
        text("cell_phone", Contact),
        text("work_phone", Contact),
        text("home_phone", Contact),
        json("relationship", Contact),
    ],
};

static ALLERGY: RecordLayout = RecordLayout {
    kind: RecordKind::Allergy,
    plain: &["resident_id", "recorder_id"],
    sensitive: &[
        text("clinicalStatus", Clinical),
        text("verificationStatus", Clinical),
        text("type", Clinical),
        text("recordedDate", Clinical),
        json("substance", Clinical),
        json("reaction", Clinical),
    ],
};

static PRESCRIPTION: RecordLayout = RecordLayout {
    kind: RecordKind::Prescription,
    plain: &["resident_id", "recorder_id"],
    sensitive: &[
        text("effective_period_start", Clinical),
        text("effective_period_end", Clinical),
        text("status", Clinical),
        text("adherence", Clinical),
        json("medication", Clinical),
        json("dosageInstruction", Clinical),
    ],
};

static OBSERVATION: RecordLayout = RecordLayout {
    kind: RecordKind::Observation,
    plain: &["resident_id", "recorder_id"],
    sensitive: &[
        text("status", Clinical),
        text("effective_datetime", Clinical),
        text("loinc_code", Clinical),
        text("name", Clinical),
        route("value", Clinical, FieldEncoding::Number),
        text("unit", Clinical),
        json("body_site", Clinical),
        json("method", Clinical),
        json("device", Clinical),
    ],
};

static DIAGNOSTIC_HISTORY: RecordLayout = RecordLayout {
    kind: RecordKind::DiagnosticHistory,
    plain: &["resident_id", "recorder_id"],
    sensitive: &[
        text("clinicalStatus", Clinical),
        text("recordedDate", Clinical),
        text("onsetDateTime", Clinical),
        text("abatementDateTime", Clinical),
        text("title", Clinical),
        text("snomed_code", Clinical),
    ],
};

static MEDICATION_ADMINISTRATION: RecordLayout = RecordLayout {
    kind: RecordKind::MedicationAdministration,
    plain: &["resident_id", "prescription_id", "recorder_id"],
    sensitive: &[
        json("medication", Clinical),
        text("status", Clinical),
        text("effective_datetime", Clinical),
        json("dosage", Clinical),
    ],
};

static FINANCIAL_TRANSACTION: RecordLayout = RecordLayout {
    kind: RecordKind::FinancialTransaction,
    plain: &["resident_id"],
    sensitive: &[
        route("amount", Financial, FieldEncoding::Money),
        text("occurrence_datetime", Financial),
        text("type", Financial),
        text("description", Financial),
    ],
};

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use common::protocol::{ENCRYPTED_PREFIX, ROUTING_VERSION_KEY};

    #[test]
    fn every_layout_matches_its_kind() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.layout().kind, kind);
        }
    }

    #[test]
    fn field_names_are_unique_and_disjoint_from_plain() {
        for kind in RecordKind::ALL {
            let layout = kind.layout();
            let mut seen = HashSet::new();
            for r in layout.sensitive {
                assert!(seen.insert(r.name), "{kind}: duplicate {}", r.name);
                assert!(!layout.is_plain(r.name), "{kind}: {} is also plain", r.name);
            }
        }
    }

    #[test]
    fn no_field_collides_with_reserved_keys() {
        for kind in RecordKind::ALL {
            let layout = kind.layout();
            for name in layout.sensitive.iter().map(|r| r.name).chain(layout.plain.iter().copied()) {
                assert!(!name.starts_with(ENCRYPTED_PREFIX), "{kind}: {name}");
                assert_ne!(name, ROUTING_VERSION_KEY);
            }
        }
    }

    #[test]
    fn resident_routes_match_catalogue() {
        let l = RecordKind::Resident.layout();
        assert_eq!(l.route("resident_name").unwrap().purpose, Purpose::General);
        assert_eq!(l.route("dob").unwrap().purpose, Purpose::Contact);
        assert_eq!(l.route("pcp").unwrap().purpose, Purpose::Clinical);
        assert_eq!(l.route("financials").unwrap().purpose, Purpose::Financial);
        assert!(l.is_plain("facility_id"));
        assert!(l.route("facility_id").is_none());
    }

    #[test]
    fn resident_uses_per_purpose_deks() {
        let l = RecordKind::Resident.layout();
        assert_eq!(l.dek_layout(), DekLayout::PerPurpose);
        assert_eq!(l.dek_key(Purpose::Clinical), "encrypted_dek_clinical");
        assert!(l.is_dek_key("encrypted_dek_general"));
        assert!(!l.is_dek_key("encrypted_dek"));
    }

    #[test]
    fn subcollections_use_single_dek() {
        for kind in RecordKind::ALL.into_iter().filter(|k| *k != RecordKind::Resident) {
            let l = kind.layout();
            assert_eq!(l.dek_layout(), DekLayout::Single, "{kind}");
            assert_eq!(l.dek_key(l.purposes()[0]), "encrypted_dek");
        }
    }

    #[test]
    fn parses_collection_and_singular_names() {
        assert_eq!("residents".parse(), Ok(RecordKind::Resident));
        assert_eq!("Allergy".parse(), Ok(RecordKind::Allergy));
        assert_eq!("emar".parse(), Ok(RecordKind::MedicationAdministration));
        assert_eq!("financials".parse(), Ok(RecordKind::FinancialTransaction));
        assert!("vitals".parse::<RecordKind>().is_err());
        for kind in RecordKind::ALL {
            assert_eq!(kind.collection().parse(), Ok(kind));
        }
    }
}
