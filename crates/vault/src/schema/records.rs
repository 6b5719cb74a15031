//! Typed plaintext records.
//!
//! Every routed record deserialises into one of these structs. They are used
//! both as the strongly-typed API (`encrypt_typed` / `decrypt_typed`) and to
//! validate untyped records on the way in and out of the codec: a record that
//! does not fit its struct is rejected as malformed.
//!
//! Stored field names follow the application's documents, so a few fields are
//! camelCase.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use super::router::RecordKind;
use crate::money::Money;

/// A typed record the vault can encrypt.
pub trait SensitiveRecord: Serialize + DeserializeOwned {
    /// Routing table used for this type.
    const KIND: RecordKind;
}

// ---------------------------------------------------------------------------
// Shared value types
// ---------------------------------------------------------------------------

/// A SNOMED CT concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnomedConcept {
    pub name: String,
    pub snomed_code: String,
}

/// A numeric quantity with its unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Quantity {
    pub value: f64,
    pub unit: String,
}

/// A medication product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Medication {
    pub rxnorm_code: String,
    pub snomed_code: String,
    pub name: String,
    pub strength: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Charge,
    Payment,
    Adjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relationship {
    HcpAgentDurable,
    PoaFinancial,
    GuardianOfPerson,
    GuardianOfEstate,
    Trustee,
    Spouse,
    DomesticPartner,
    Parent,
    Child,
    Sibling,
    EmergencyContact,
    Caretaker,
    Friend,
    OtherRelative,
}

/// One ledger line embedded in a resident's `financials`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerEntry {
    pub amount: Money,
    pub occurrence_datetime: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Top-level resident document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resident {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resident_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resident_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financials: Option<Vec<LedgerEntry>>,
}

impl SensitiveRecord for Resident {
    const KIND: RecordKind = RecordKind::Resident;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmergencyContact {
    pub resident_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    pub cell_phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<Vec<Relationship>>,
}

impl SensitiveRecord for EmergencyContact {
    const KIND: RecordKind = RecordKind::EmergencyContact;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reaction {
    pub code: String,
    pub name: String,
    pub severity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Allergy {
    pub resident_id: String,
    pub recorder_id: String,
    #[serde(rename = "clinicalStatus")]
    pub clinical_status: String,
    #[serde(rename = "verificationStatus")]
    pub verification_status: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "recordedDate")]
    pub recorded_date: String,
    pub substance: SnomedConcept,
    pub reaction: Reaction,
}

impl SensitiveRecord for Allergy {
    const KIND: RecordKind = RecordKind::Allergy;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DoseAndRate {
    #[serde(rename = "doseQuantity")]
    pub dose_quantity: Quantity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DosageInstruction {
    pub timing: String,
    pub site: SnomedConcept,
    pub route: SnomedConcept,
    pub method: SnomedConcept,
    #[serde(rename = "doseAndRate")]
    pub dose_and_rate: Vec<DoseAndRate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Prescription {
    pub resident_id: String,
    pub recorder_id: String,
    pub effective_period_start: String,
    pub effective_period_end: String,
    pub status: String,
    pub adherence: String,
    pub medication: Medication,
    #[serde(rename = "dosageInstruction")]
    pub dosage_instruction: Vec<DosageInstruction>,
}

impl SensitiveRecord for Prescription {
    const KIND: RecordKind = RecordKind::Prescription;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Device {
    pub name: String,
    pub udi_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Observation {
    pub resident_id: String,
    pub recorder_id: String,
    pub status: String,
    pub effective_datetime: String,
    pub loinc_code: String,
    pub name: String,
    pub value: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_site: Option<SnomedConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<SnomedConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
}

impl SensitiveRecord for Observation {
    const KIND: RecordKind = RecordKind::Observation;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticHistory {
    pub resident_id: String,
    pub recorder_id: String,
    #[serde(rename = "clinicalStatus")]
    pub clinical_status: String,
    #[serde(rename = "recordedDate")]
    pub recorded_date: String,
    #[serde(rename = "onsetDateTime")]
    pub onset_date_time: String,
    #[serde(
        rename = "abatementDateTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub abatement_date_time: Option<String>,
    pub title: String,
    pub snomed_code: String,
}

impl SensitiveRecord for DiagnosticHistory {
    const KIND: RecordKind = RecordKind::DiagnosticHistory;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdministeredDosage {
    pub route: SnomedConcept,
    #[serde(rename = "administeredDose")]
    pub administered_dose: Quantity,
}

/// One eMAR entry: a single administration of a prescribed medication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MedicationAdministration {
    pub resident_id: String,
    pub prescription_id: String,
    pub recorder_id: String,
    pub medication: Medication,
    pub status: String,
    pub effective_datetime: String,
    pub dosage: AdministeredDosage,
}

impl SensitiveRecord for MedicationAdministration {
    const KIND: RecordKind = RecordKind::MedicationAdministration;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinancialTransaction {
    pub resident_id: String,
    pub amount: Money,
    pub occurrence_datetime: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SensitiveRecord for FinancialTransaction {
    const KIND: RecordKind = RecordKind::FinancialTransaction;
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn check<T: DeserializeOwned>(fields: &Map<String, Value>) -> Result<(), String> {
    serde_json::from_value::<T>(Value::Object(fields.clone()))
        .map(drop)
        .map_err(|e| {
            // serde quotes the offending value after the first colon; it may be PII.
            let message = e.to_string();
            match message.split_once(':') {
                Some((head, _)) => head.to_owned(),
                None => message,
            }
        })
}

impl RecordKind {
    /// Check that `fields` is a well-formed record of this kind.
    ///
    /// # Errors
    ///
    /// Returns a description of the first schema violation.
    pub fn validate(self, fields: &Map<String, Value>) -> Result<(), String> {
        match self {
            RecordKind::Resident => check::<Resident>(fields),
            RecordKind::EmergencyContact => check::<EmergencyContact>(fields),
            RecordKind::Allergy => check::<Allergy>(fields),
            RecordKind::Prescription => check::<Prescription>(fields),
            RecordKind::Observation => check::<Observation>(fields),
            RecordKind::DiagnosticHistory => check::<DiagnosticHistory>(fields),
            RecordKind::MedicationAdministration => check::<MedicationAdministration>(fields),
            RecordKind::FinancialTransaction => check::<FinancialTransaction>(fields),
        }
    }
}
