//! Access-control gate: which purposes a caller's roles may see.
//!
//! The policy is a static table over (record kind, purpose, role). A caller
//! sees a purpose if any of their roles grants it. Unrecognised roles and an
//! empty role set grant only [`Purpose::MINIMUM`]. Withheld fields are removed
//! from the record, never replaced with placeholders.
//!
//! Plain index fields (`resident_id`, `facility_id`, ...) are not sensitive and
//! always pass through.

use std::{collections::BTreeSet, fmt};

use tracing::debug;

use crate::codec::PlaintextRecord;
use crate::schema::{Purpose, RecordKind};

/// A caller role as carried in identity claims.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Admin,
    Clinician,
    Caregiver,
    Billing,
    Viewer,
    /// Any role name the policy does not know. Grants nothing beyond the minimum.
    Unrecognized(String),
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Role::Admin,
            "CLINICIAN" => Role::Clinician,
            "CAREGIVER" => Role::Caregiver,
            "BILLING" => Role::Billing,
            "VIEWER" => Role::Viewer,
            _ => Role::Unrecognized(s.to_owned()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => f.write_str("ADMIN"),
            Role::Clinician => f.write_str("CLINICIAN"),
            Role::Caregiver => f.write_str("CAREGIVER"),
            Role::Billing => f.write_str("BILLING"),
            Role::Viewer => f.write_str("VIEWER"),
            Role::Unrecognized(s) => f.write_str(s),
        }
    }
}

impl Role {
    /// Whether this role alone may read `purpose` fields of a `kind` record.
    pub fn permits(&self, kind: RecordKind, purpose: Purpose) -> bool {
        use Purpose::*;
        match (self, purpose) {
            (_, General) => true,
            (Role::Admin, _) => true,
            (Role::Clinician, Contact | Clinical) => true,
            (Role::Caregiver, Contact) => true,
            (Role::Caregiver, Clinical) => matches!(
                kind,
                RecordKind::Resident
                    | RecordKind::Allergy
                    | RecordKind::Prescription
                    | RecordKind::MedicationAdministration
            ),
            (Role::Billing, Contact | Financial) => true,
            _ => false,
        }
    }
}

/// The set of roles a caller holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    /// Parse role names from identity claims. Unknown names are kept as
    /// [`Role::Unrecognized`].
    pub fn from_claims<I, S>(claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(claims.into_iter().map(|c| Role::from(c.as_ref())).collect())
    }

    /// A set holding every role with full access.
    pub fn full_access() -> Self {
        Self::from_claims(["ADMIN"])
    }

    /// Whether any held role may read `purpose` fields of a `kind` record.
    pub fn permits(&self, kind: RecordKind, purpose: Purpose) -> bool {
        purpose == Purpose::MINIMUM || self.0.iter().any(|r| r.permits(kind, purpose))
    }
}

/// Remove every field the caller's roles may not see.
pub fn filter_by_role(mut record: PlaintextRecord, roles: &RoleSet) -> PlaintextRecord {
    let kind = record.kind();
    let layout = kind.layout();
    let before = record.fields().len();

    record.retain(|name, _| match layout.route(name) {
        Some(route) => roles.permits(kind, route.purpose),
        None => layout.is_plain(name),
    });

    let withheld = before - record.fields().len();
    if withheld > 0 {
        debug!(kind = %kind, withheld, "fields withheld by access policy");
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resident() -> PlaintextRecord {
        let fields = json!({
            "facility_id": "fac-1",
            "resident_name": "Jane Doe",
            "dob": "1940-02-29",
            "pcp": "Dr. X",
            "financials": [{"amount": "250.00", "occurrence_datetime": "2024-03-01", "type": "CHARGE"}]
        });
        match fields {
            serde_json::Value::Object(m) => PlaintextRecord::new(RecordKind::Resident, m),
            _ => unreachable!(),
        }
    }

    fn visible(record: &PlaintextRecord) -> Vec<&str> {
        record.fields().keys().map(String::as_str).collect()
    }

    #[test]
    fn viewer_sees_only_general_and_plain_fields() {
        let out = filter_by_role(resident(), &RoleSet::from_claims(["VIEWER"]));
        assert_eq!(visible(&out), vec!["facility_id", "resident_name"]);
        assert_eq!(out.get("resident_name"), Some(&json!("Jane Doe")));
    }

    #[test]
    fn admin_sees_everything() {
        let out = filter_by_role(resident(), &RoleSet::full_access());
        assert_eq!(out, resident());
    }

    #[test]
    fn billing_sees_financials_but_not_clinical() {
        let out = filter_by_role(resident(), &RoleSet::from_claims(["billing"]));
        assert!(out.get("financials").is_some());
        assert!(out.get("dob").is_some());
        assert!(out.get("pcp").is_none());
    }

    #[test]
    fn clinician_sees_clinical_but_not_financials() {
        let out = filter_by_role(resident(), &RoleSet::from_claims(["CLINICIAN"]));
        assert!(out.get("pcp").is_some());
        assert!(out.get("financials").is_none());
    }

    #[test]
    fn unknown_and_empty_roles_get_minimum() {
        for roles in [RoleSet::default(), RoleSet::from_claims(["JANITOR"])] {
            let out = filter_by_role(resident(), &roles);
            assert_eq!(visible(&out), vec!["facility_id", "resident_name"]);
        }
    }

    #[test]
    fn roles_combine_by_union() {
        let roles = RoleSet::from_claims(["VIEWER", "BILLING"]);
        assert!(roles.permits(RecordKind::Resident, Purpose::Financial));
        assert!(!roles.permits(RecordKind::Resident, Purpose::Clinical));
    }

    #[test]
    fn caregiver_clinical_access_depends_on_kind() {
        let r = Role::Caregiver;
        assert!(r.permits(RecordKind::Allergy, Purpose::Clinical));
        assert!(r.permits(RecordKind::MedicationAdministration, Purpose::Clinical));
        assert!(!r.permits(RecordKind::Observation, Purpose::Clinical));
        assert!(!r.permits(RecordKind::DiagnosticHistory, Purpose::Clinical));
        assert!(!r.permits(RecordKind::FinancialTransaction, Purpose::Financial));
    }

    #[test]
    fn role_names_parse_case_insensitively() {
        assert_eq!(Role::from(" admin "), Role::Admin);
        assert_eq!(Role::from("Viewer"), Role::Viewer);
        assert_eq!(Role::from("nurse"), Role::Unrecognized("nurse".into()));
    }
}
