//! Sensitivity purposes and the KEK assigned to each.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kms::KekRef;

/// Sensitivity class of a field. Each purpose has its own KEK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// Identity and display data.
    General,
    /// Contact details and date of birth.
    Contact,
    /// Health data.
    Clinical,
    /// Billing data.
    Financial,
}

impl Purpose {
    /// Every purpose, in routing order.
    pub const ALL: [Purpose; 4] = [
        Purpose::General,
        Purpose::Contact,
        Purpose::Clinical,
        Purpose::Financial,
    ];

    /// The purpose every caller may read, including unrecognized roles.
    pub const MINIMUM: Purpose = Purpose::General;

    /// Lower-case name used in stored keys and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::General => "general",
            Purpose::Contact => "contact",
            Purpose::Clinical => "clinical",
            Purpose::Financial => "financial",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The configured KEK for every purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KekRing {
    general: KekRef,
    contact: KekRef,
    clinical: KekRef,
    financial: KekRef,
}

impl KekRing {
    /// Assign one KEK per purpose.
    pub fn new(general: KekRef, contact: KekRef, clinical: KekRef, financial: KekRef) -> Self {
        Self {
            general,
            contact,
            clinical,
            financial,
        }
    }

    /// The KEK that wraps DEKs for `purpose`.
    pub fn kek_for(&self, purpose: Purpose) -> &KekRef {
        match purpose {
            Purpose::General => &self.general,
            Purpose::Contact => &self.contact,
            Purpose::Clinical => &self.clinical,
            Purpose::Financial => &self.financial,
        }
    }

    /// Every configured KEK, in [`Purpose::ALL`] order.
    pub fn all(&self) -> impl Iterator<Item = &KekRef> {
        Purpose::ALL.into_iter().map(|p| self.kek_for(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_maps_each_purpose() {
        let ring = KekRing::new("g".into(), "c".into(), "m".into(), "f".into());
        assert_eq!(ring.kek_for(Purpose::General).as_str(), "g");
        assert_eq!(ring.kek_for(Purpose::Contact).as_str(), "c");
        assert_eq!(ring.kek_for(Purpose::Clinical).as_str(), "m");
        assert_eq!(ring.kek_for(Purpose::Financial).as_str(), "f");
        assert_eq!(ring.all().count(), 4);
    }

    #[test]
    fn purpose_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Purpose::Clinical).unwrap(), r#""clinical""#);
        assert_eq!(Purpose::Financial.to_string(), "financial");
    }
}
