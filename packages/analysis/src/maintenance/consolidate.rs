//! Database consolidation: merge a secondary store into a canonical one.
//!
//! The engine owns the algorithm; stores supply ordered exports and one
//! atomic import. Identifier remapping preserves the secondary store's
//! relative ordering, and content fingerprints (never raw identifiers)
//! decide duplication, so re-running a merge is a no-op.

use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::error::{IntegrityError, Result};
use crate::traits::store::MergeStore;
use crate::types::{finding::Finding, unit::SourceUnit};

/// Outcome of one consolidation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Units copied into the canonical store
    pub units_merged: u64,

    /// Findings copied into the canonical store
    pub findings_merged: u64,

    /// Units skipped as fingerprint duplicates
    pub units_skipped: u64,

    /// Findings skipped as fingerprint duplicates
    pub findings_skipped: u64,
}

/// Merge `secondary` into `canonical`.
///
/// Secondary identifiers are remapped past the canonical store's
/// current maxima; rows whose fingerprint already exists in the
/// canonical store are skipped, with their identifiers mapped to the
/// existing canonical rows so dependent records still resolve. The
/// import is a single all-or-nothing transaction, verified afterwards.
pub async fn consolidate<C, S>(canonical: &C, secondary: &S) -> Result<MergeReport>
where
    C: MergeStore + ?Sized,
    S: MergeStore + ?Sized,
{
    let canonical_units = canonical.export_source_units().await?;
    let canonical_finding_prints = canonical.finding_fingerprints().await?;
    let mut next_unit_id = canonical.max_unit_id().await? + 1;
    let mut next_finding_id = canonical.max_finding_id().await? + 1;

    // Fingerprint of each canonical unit key, for duplicate mapping
    let canonical_by_print: HashMap<String, i64> = canonical_units
        .iter()
        .map(|u| (u.key.fingerprint(), u.id))
        .collect();

    let secondary_units = secondary.export_source_units().await?;
    let secondary_findings = secondary.export_findings().await?;

    let mut report = MergeReport::default();
    let mut unit_id_map: HashMap<i64, i64> = HashMap::new();
    let mut units_to_import: Vec<SourceUnit> = Vec::new();

    for unit in &secondary_units {
        let print = unit.key.fingerprint();
        let new_id = match canonical_by_print.get(&print) {
            // Duplicate unit: dependent findings point at the
            // canonical row instead
            Some(existing) => {
                report.units_skipped += 1;
                *existing
            }
            None => {
                let id = next_unit_id;
                next_unit_id += 1;
                let mut remapped = unit.clone();
                remapped.id = id;
                units_to_import.push(remapped);
                report.units_merged += 1;
                id
            }
        };
        if unit_id_map.insert(unit.id, new_id).is_some() {
            return Err(IntegrityError::RemapCollision { old_id: unit.id }.into());
        }
    }

    // Owning key lookup for finding fingerprints
    let secondary_keys: HashMap<i64, &crate::types::unit::UnitKey> =
        secondary_units.iter().map(|u| (u.id, &u.key)).collect();

    let mut seen_prints: HashSet<String> = canonical_finding_prints;
    let mut findings_to_import: Vec<Finding> = Vec::new();

    for finding in &secondary_findings {
        let Some(key) = secondary_keys.get(&finding.unit_id) else {
            return Err(IntegrityError::OrphanedRecords { count: 1 }.into());
        };
        let print = finding.fingerprint(key);
        if !seen_prints.insert(print) {
            report.findings_skipped += 1;
            continue;
        }
        let Some(&new_unit_id) = unit_id_map.get(&finding.unit_id) else {
            return Err(IntegrityError::OrphanedRecords { count: 1 }.into());
        };
        let mut remapped = finding.clone();
        remapped.id = next_finding_id;
        next_finding_id += 1;
        remapped.unit_id = new_unit_id;
        findings_to_import.push(remapped);
        report.findings_merged += 1;
    }

    canonical
        .import_merge(&units_to_import, &findings_to_import)
        .await?;
    canonical.verify_integrity().await?.into_result()?;

    info!(
        units_merged = report.units_merged,
        findings_merged = report.findings_merged,
        units_skipped = report.units_skipped,
        findings_skipped = report.findings_skipped,
        "consolidation complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::traits::store::UnitStore;
    use crate::types::finding::{FindingKinds, Provenance, ValidationStatus};
    use crate::types::unit::UnitKey;
    use chrono::Utc;

    fn finding(label: &str, excerpt: &str) -> Finding {
        Finding {
            id: 0,
            unit_id: 0,
            kinds: FindingKinds::from_label(label),
            excerpt: excerpt.to_string(),
            explanation: "explanation".to_string(),
            provenance: Provenance {
                model: "standard".to_string(),
                strategy: 0,
                attempts: 1,
                prompt_hash: "abc".to_string(),
            },
            validation: ValidationStatus::Unvalidated,
            validation_note: None,
            created_at: Utc::now(),
        }
    }

    async fn seeded(entries: &[(&str, u32, u32, &str, &str)]) -> MemoryStore {
        let store = MemoryStore::new();
        for (book, chapter, verse, label, excerpt) in entries {
            let id = store
                .insert_source_unit(&UnitKey::new(*book, *chapter, *verse), "text")
                .await
                .unwrap();
            store
                .insert_analysis_records(id, &[finding(label, excerpt)])
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_merge_disjoint_stores() {
        let canonical = seeded(&[("Psalms", 18, 2, "metaphor", "my rock")]).await;
        let secondary = seeded(&[("Isaiah", 40, 31, "simile", "wings like eagles")]).await;

        let report = consolidate(&canonical, &secondary).await.unwrap();
        assert_eq!(report.units_merged, 1);
        assert_eq!(report.findings_merged, 1);
        assert_eq!(report.units_skipped, 0);

        assert_eq!(canonical.count_units().await.unwrap(), 2);
        assert_eq!(canonical.count_findings().await.unwrap(), 2);
        canonical
            .verify_integrity()
            .await
            .unwrap()
            .into_result()
            .unwrap();
    }

    #[tokio::test]
    async fn test_merge_remaps_colliding_ids() {
        // Both stores allocate ids starting at 1 for different content
        let canonical = seeded(&[("Psalms", 18, 2, "metaphor", "my rock")]).await;
        let secondary = seeded(&[("Isaiah", 40, 31, "simile", "wings like eagles")]).await;

        consolidate(&canonical, &secondary).await.unwrap();

        let units = canonical.export_source_units().await.unwrap();
        let ids: Vec<i64> = units.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![1, 2]);

        // The merged finding follows its remapped unit
        let findings = canonical.export_findings().await.unwrap();
        let merged = findings.iter().find(|f| f.excerpt == "wings like eagles").unwrap();
        let owner = units.iter().find(|u| u.id == merged.unit_id).unwrap();
        assert_eq!(owner.key.book, "Isaiah");
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let canonical = seeded(&[("Psalms", 18, 2, "metaphor", "my rock")]).await;
        let secondary = seeded(&[
            ("Psalms", 18, 2, "metaphor", "my rock"),
            ("Isaiah", 40, 31, "simile", "wings like eagles"),
        ])
        .await;

        let first = consolidate(&canonical, &secondary).await.unwrap();
        assert_eq!(first.units_merged, 1);
        assert_eq!(first.units_skipped, 1);
        assert_eq!(first.findings_merged, 1);
        assert_eq!(first.findings_skipped, 1);

        let second = consolidate(&canonical, &secondary).await.unwrap();
        assert_eq!(second.units_merged, 0);
        assert_eq!(second.findings_merged, 0);
        assert_eq!(canonical.count_units().await.unwrap(), 2);
        assert_eq!(canonical.count_findings().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_unit_keeps_new_findings() {
        // Same unit in both stores, but the secondary carries an extra
        // finding: the unit is skipped, the finding still merges and
        // attaches to the canonical unit
        let canonical = seeded(&[("Psalms", 18, 2, "metaphor", "my rock")]).await;
        let secondary = seeded(&[("Psalms", 18, 2, "metaphor", "my fortress")]).await;

        let report = consolidate(&canonical, &secondary).await.unwrap();
        assert_eq!(report.units_skipped, 1);
        assert_eq!(report.findings_merged, 1);

        let findings = canonical.export_findings().await.unwrap();
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.unit_id == 1));
    }
}
