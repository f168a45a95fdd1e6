//! Analysis records: structured findings attached to source units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::unit::{hex_digest, UnitKey};

/// Closed two-valued domain for finding flags.
///
/// Every enum-typed field coming back from the generative service is
/// coerced into this set at the reconciliation boundary. The raw
/// external value is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Yes,
    #[default]
    No,
}

impl Presence {
    /// Coerce an arbitrary external value into the closed set.
    ///
    /// Anything not recognizably affirmative maps to the default.
    pub fn coerce(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Self::Yes,
            _ => Self::No,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }

    pub fn is_yes(&self) -> bool {
        matches!(self, Self::Yes)
    }
}

/// The closed set of figurative-language categories.
///
/// The category labels themselves are domain configuration; the
/// pipeline only relies on the set being fixed and closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FindingKinds {
    #[serde(default)]
    pub metaphor: Presence,
    #[serde(default)]
    pub simile: Presence,
    #[serde(default)]
    pub personification: Presence,
    #[serde(default)]
    pub idiom: Presence,
    #[serde(default)]
    pub hyperbole: Presence,
    #[serde(default)]
    pub metonymy: Presence,
}

impl FindingKinds {
    /// Coerce a free-form category label into the closed flag set.
    ///
    /// Unrecognized labels produce the all-default (all "no") value
    /// rather than raising: constraint violations must never abort a
    /// batch over a single bad label.
    pub fn from_label(label: &str) -> Self {
        let mut kinds = Self::default();
        match label.trim().to_ascii_lowercase().as_str() {
            "metaphor" => kinds.metaphor = Presence::Yes,
            "simile" => kinds.simile = Presence::Yes,
            "personification" => kinds.personification = Presence::Yes,
            "idiom" => kinds.idiom = Presence::Yes,
            "hyperbole" => kinds.hyperbole = Presence::Yes,
            "metonymy" => kinds.metonymy = Presence::Yes,
            _ => {}
        }
        kinds
    }

    /// Primary label for display and fingerprinting.
    pub fn primary_label(&self) -> &'static str {
        if self.metaphor.is_yes() {
            "metaphor"
        } else if self.simile.is_yes() {
            "simile"
        } else if self.personification.is_yes() {
            "personification"
        } else if self.idiom.is_yes() {
            "idiom"
        } else if self.hyperbole.is_yes() {
            "hyperbole"
        } else if self.metonymy.is_yes() {
            "metonymy"
        } else {
            "none"
        }
    }

    /// True when no category flag is set.
    pub fn is_empty(&self) -> bool {
        !(self.metaphor.is_yes()
            || self.simile.is_yes()
            || self.personification.is_yes()
            || self.idiom.is_yes()
            || self.hyperbole.is_yes()
            || self.metonymy.is_yes())
    }
}

/// Validation status of a finding.
///
/// Transitions are monotone: `Unvalidated` moves to exactly one of the
/// validated states and never regresses, except via an explicit
/// recovery re-run which fully overwrites the prior outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    Unvalidated,
    Kept,
    Reclassified,
    Rejected,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unvalidated => "unvalidated",
            Self::Kept => "kept",
            Self::Reclassified => "reclassified",
            Self::Rejected => "rejected",
        }
    }

    /// Coerce an external verdict string into the closed set.
    ///
    /// Unknown verdicts default to `Kept`: a garbled validation reply
    /// must not silently delete a finding.
    pub fn coerce_verdict(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "keep" | "kept" | "valid" => Self::Kept,
            "reclassify" | "reclassified" => Self::Reclassified,
            "reject" | "rejected" | "invalid" => Self::Rejected,
            _ => Self::Kept,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "kept" => Self::Kept,
            "reclassified" => Self::Reclassified,
            "rejected" => Self::Rejected,
            _ => Self::Unvalidated,
        }
    }

    pub fn is_validated(&self) -> bool {
        !matches!(self, Self::Unvalidated)
    }
}

/// Provenance of an accepted analysis result, attached for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Model tier that actually produced the accepted response
    pub model: String,

    /// Index of the extraction strategy that succeeded (0-based)
    pub strategy: usize,

    /// Number of service calls spent on this unit
    pub attempts: u32,

    /// Hash of the prompt the finding was produced with
    pub prompt_hash: String,
}

/// One structured finding derived from a source unit.
///
/// Created by the pipeline; mutated only by reconciliation or recovery
/// passes, never by presentation code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Store-assigned identifier. Zero until inserted.
    pub id: i64,

    /// Foreign key to the owning source unit
    pub unit_id: i64,

    /// Category flags (closed set)
    pub kinds: FindingKinds,

    /// Evidentiary span quoted from the unit text
    pub excerpt: String,

    /// Free-text rationale from the service
    pub explanation: String,

    /// Audit trail for the accepted result
    pub provenance: Provenance,

    /// Validation status (monotone transitions)
    pub validation: ValidationStatus,

    /// Derived field set by the validation pass
    pub validation_note: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Finding {
    /// Content fingerprint scoped to the owning unit's key.
    ///
    /// Identifier-independent, so consolidation can detect duplicates
    /// even though ids are reassigned every merge.
    pub fn fingerprint(&self, key: &UnitKey) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.fingerprint().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.kinds.primary_label().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.excerpt.as_bytes());
        hex_digest(hasher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_coercion() {
        assert_eq!(Presence::coerce("yes"), Presence::Yes);
        assert_eq!(Presence::coerce(" TRUE "), Presence::Yes);
        assert_eq!(Presence::coerce("no"), Presence::No);
        assert_eq!(Presence::coerce("maybe?"), Presence::No);
        assert_eq!(Presence::coerce(""), Presence::No);
    }

    #[test]
    fn test_kinds_from_label() {
        assert!(FindingKinds::from_label("Metaphor").metaphor.is_yes());
        assert!(FindingKinds::from_label("SIMILE").simile.is_yes());

        // Out-of-set labels coerce to the all-"no" default, never raise
        let unknown = FindingKinds::from_label("allegory");
        assert!(unknown.is_empty());
        assert_eq!(unknown.primary_label(), "none");
    }

    #[test]
    fn test_verdict_coercion_defaults_to_kept() {
        assert_eq!(ValidationStatus::coerce_verdict("reject"), ValidationStatus::Rejected);
        assert_eq!(
            ValidationStatus::coerce_verdict("garbage"),
            ValidationStatus::Kept
        );
    }

    #[test]
    fn test_fingerprint_ignores_ids() {
        let key = UnitKey::new("Genesis", 1, 1);
        let mut a = sample_finding();
        let mut b = sample_finding();
        a.id = 17;
        b.id = 9000;
        a.unit_id = 3;
        b.unit_id = 42;
        assert_eq!(a.fingerprint(&key), b.fingerprint(&key));
    }

    fn sample_finding() -> Finding {
        Finding {
            id: 0,
            unit_id: 0,
            kinds: FindingKinds::from_label("metaphor"),
            excerpt: "the Lord is my shepherd".to_string(),
            explanation: "divine care framed as herding".to_string(),
            provenance: Provenance {
                model: "standard".to_string(),
                strategy: 0,
                attempts: 1,
                prompt_hash: "abc".to_string(),
            },
            validation: ValidationStatus::Unvalidated,
            validation_note: None,
            created_at: chrono::Utc::now(),
        }
    }
}
