//! Storage traits for the canonical store.
//!
//! Split into focused traits, composed by [`AnalysisStore`]:
//! - `UnitStore`: ingestion-path reads and writes
//! - `MergeStore`: primitives the consolidation engine drives
//! - `ValidationStore`: recovery and health-check queries

use async_trait::async_trait;

use crate::error::{IntegrityError, Result};
use crate::types::{
    finding::{Finding, ValidationStatus},
    unit::{GroupKey, SourceUnit, UnitKey},
};

/// Ingestion-path storage operations.
///
/// Each write is a single independent transaction scoped to one source
/// unit's records; workers never share rows, so the store's own
/// transaction isolation is the only locking required.
#[async_trait]
pub trait UnitStore: Send + Sync {
    /// Insert a source unit, returning its identifier.
    ///
    /// Idempotent on the composite key: re-inserting an existing unit
    /// returns the existing id without modifying the row.
    async fn insert_source_unit(&self, key: &UnitKey, text: &str) -> Result<i64>;

    /// Look up a unit by its composite key.
    async fn get_source_unit(&self, key: &UnitKey) -> Result<Option<SourceUnit>>;

    /// Insert a batch of analysis records for one unit in a single
    /// transaction. Returns assigned identifiers in insertion order.
    async fn insert_analysis_records(&self, unit_id: i64, findings: &[Finding])
        -> Result<Vec<i64>>;

    /// All findings attached to a unit.
    async fn findings_for_unit(&self, unit_id: i64) -> Result<Vec<Finding>>;

    /// Total number of stored units.
    async fn count_units(&self) -> Result<u64>;

    /// Total number of stored findings.
    async fn count_findings(&self) -> Result<u64>;
}

/// Primitives for the consolidation engine.
///
/// The engine owns the algorithm (id remapping, fingerprint dedup);
/// the store supplies ordered exports and one atomic import.
#[async_trait]
pub trait MergeStore: Send + Sync {
    /// All source units ordered by identifier.
    async fn export_source_units(&self) -> Result<Vec<SourceUnit>>;

    /// All findings ordered by identifier.
    async fn export_findings(&self) -> Result<Vec<Finding>>;

    /// Current maximum unit identifier (0 when empty).
    async fn max_unit_id(&self) -> Result<i64>;

    /// Current maximum finding identifier (0 when empty).
    async fn max_finding_id(&self) -> Result<i64>;

    /// Fingerprints of every stored finding.
    async fn finding_fingerprints(&self) -> Result<std::collections::HashSet<String>>;

    /// Insert pre-remapped rows with explicit identifiers as one
    /// atomic transaction: all rows in or none. Implementations must
    /// run the integrity check inside the same transaction and roll
    /// back on violation.
    async fn import_merge(&self, units: &[SourceUnit], findings: &[Finding]) -> Result<()>;

    /// Post-merge invariant check: zero orphans, zero duplicate ids.
    async fn verify_integrity(&self) -> Result<IntegrityReport>;
}

/// Recovery and health-check queries.
#[async_trait]
pub trait ValidationStore: Send + Sync {
    /// All logical groups present in the store.
    async fn groups(&self) -> Result<Vec<GroupKey>>;

    /// Validation completeness for one group.
    async fn validation_completeness(&self, group: &GroupKey) -> Result<Completeness>;

    /// Findings in a group whose validation is incomplete, paired with
    /// their owning units.
    async fn incomplete_for_group(&self, group: &GroupKey)
        -> Result<Vec<(SourceUnit, Finding)>>;

    /// Overwrite validation outcomes atomically.
    ///
    /// Recovery semantics: the prior outcome is fully replaced, never
    /// merged.
    async fn overwrite_validation(&self, updates: &[ValidationUpdate]) -> Result<()>;
}

/// Composite storage trait used by the pipeline and maintenance code.
pub trait AnalysisStore: UnitStore + MergeStore + ValidationStore {}

// Blanket implementation: anything implementing all three is a store
impl<T: UnitStore + MergeStore + ValidationStore> AnalysisStore for T {}

/// Per-group validation completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completeness {
    /// Findings in the group
    pub total: u64,

    /// Findings with a complete validation outcome
    pub complete: u64,
}

impl Completeness {
    /// Fraction of complete findings; an empty group counts as fully
    /// complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.complete as f64 / self.total as f64
        }
    }
}

/// One validation overwrite.
#[derive(Debug, Clone)]
pub struct ValidationUpdate {
    pub finding_id: i64,
    pub status: ValidationStatus,
    pub note: Option<String>,
}

/// Result of the post-merge invariant check.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityReport {
    /// Findings whose unit_id resolves to no unit
    pub orphaned_findings: u64,

    /// Duplicate identifiers in the units table
    pub duplicate_unit_ids: u64,

    /// Duplicate identifiers in the findings table
    pub duplicate_finding_ids: u64,
}

impl IntegrityReport {
    /// Convert to an error if any invariant is violated.
    pub fn into_result(self) -> Result<()> {
        if self.orphaned_findings > 0 {
            return Err(IntegrityError::OrphanedRecords {
                count: self.orphaned_findings,
            }
            .into());
        }
        if self.duplicate_unit_ids > 0 {
            return Err(IntegrityError::DuplicateIds {
                table: "source_units".to_string(),
                count: self.duplicate_unit_ids,
            }
            .into());
        }
        if self.duplicate_finding_ids > 0 {
            return Err(IntegrityError::DuplicateIds {
                table: "findings".to_string(),
                count: self.duplicate_finding_ids,
            }
            .into());
        }
        Ok(())
    }
}
