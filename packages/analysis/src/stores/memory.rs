//! In-memory storage implementation.
//!
//! Backed by `RwLock`-protected maps. Useful for tests and ephemeral
//! runs; identifier allocation mirrors the durable store's contract
//! (monotonic, never reused, even across failed transactions).

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use crate::error::{AnalysisError, Result};
use crate::traits::store::{
    Completeness, IntegrityReport, MergeStore, UnitStore, ValidationStore, ValidationUpdate,
};
use crate::types::{
    finding::Finding,
    unit::{GroupKey, SourceUnit, UnitKey},
};

/// In-memory analysis store.
pub struct MemoryStore {
    units: RwLock<BTreeMap<i64, SourceUnit>>,
    findings: RwLock<BTreeMap<i64, Finding>>,
    next_unit_id: AtomicI64,
    next_finding_id: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            units: RwLock::new(BTreeMap::new()),
            findings: RwLock::new(BTreeMap::new()),
            // Identifiers start at 1; zero is the not-yet-inserted
            // sentinel on domain types
            next_unit_id: AtomicI64::new(1),
            next_finding_id: AtomicI64::new(1),
        }
    }

    fn unit_by_key(&self, key: &UnitKey) -> Option<SourceUnit> {
        self.units
            .read()
            .expect("units lock")
            .values()
            .find(|u| &u.key == key)
            .cloned()
    }

    fn key_for_unit(&self, unit_id: i64) -> Result<UnitKey> {
        self.units
            .read()
            .expect("units lock")
            .get(&unit_id)
            .map(|u| u.key.clone())
            .ok_or_else(|| AnalysisError::storage(format!("unknown unit id {unit_id}")))
    }

    /// Whether a finding's validation outcome is complete.
    fn is_complete(finding: &Finding) -> bool {
        finding.validation.is_validated() && finding.validation_note.is_some()
    }
}

#[async_trait]
impl UnitStore for MemoryStore {
    async fn insert_source_unit(&self, key: &UnitKey, text: &str) -> Result<i64> {
        if let Some(existing) = self.unit_by_key(key) {
            return Ok(existing.id);
        }
        let id = self.next_unit_id.fetch_add(1, Ordering::SeqCst);
        let unit = SourceUnit {
            id,
            key: key.clone(),
            text: text.to_string(),
            created_at: chrono::Utc::now(),
        };
        self.units.write().expect("units lock").insert(id, unit);
        Ok(id)
    }

    async fn get_source_unit(&self, key: &UnitKey) -> Result<Option<SourceUnit>> {
        Ok(self.unit_by_key(key))
    }

    async fn insert_analysis_records(
        &self,
        unit_id: i64,
        findings: &[Finding],
    ) -> Result<Vec<i64>> {
        // Referential integrity enforced up front, as the durable
        // store's foreign key constraint would
        if !self.units.read().expect("units lock").contains_key(&unit_id) {
            return Err(AnalysisError::ConstraintViolation(format!(
                "no source unit with id {unit_id}"
            )));
        }

        let mut map = self.findings.write().expect("findings lock");
        let mut ids = Vec::with_capacity(findings.len());
        for finding in findings {
            let id = self.next_finding_id.fetch_add(1, Ordering::SeqCst);
            let mut stored = finding.clone();
            stored.id = id;
            stored.unit_id = unit_id;
            map.insert(id, stored);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn findings_for_unit(&self, unit_id: i64) -> Result<Vec<Finding>> {
        Ok(self
            .findings
            .read()
            .expect("findings lock")
            .values()
            .filter(|f| f.unit_id == unit_id)
            .cloned()
            .collect())
    }

    async fn count_units(&self) -> Result<u64> {
        Ok(self.units.read().expect("units lock").len() as u64)
    }

    async fn count_findings(&self) -> Result<u64> {
        Ok(self.findings.read().expect("findings lock").len() as u64)
    }
}

#[async_trait]
impl MergeStore for MemoryStore {
    async fn export_source_units(&self) -> Result<Vec<SourceUnit>> {
        Ok(self.units.read().expect("units lock").values().cloned().collect())
    }

    async fn export_findings(&self) -> Result<Vec<Finding>> {
        Ok(self
            .findings
            .read()
            .expect("findings lock")
            .values()
            .cloned()
            .collect())
    }

    async fn max_unit_id(&self) -> Result<i64> {
        Ok(self
            .units
            .read()
            .expect("units lock")
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    async fn max_finding_id(&self) -> Result<i64> {
        Ok(self
            .findings
            .read()
            .expect("findings lock")
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    async fn finding_fingerprints(&self) -> Result<HashSet<String>> {
        let units = self.units.read().expect("units lock");
        Ok(self
            .findings
            .read()
            .expect("findings lock")
            .values()
            .filter_map(|f| units.get(&f.unit_id).map(|u| f.fingerprint(&u.key)))
            .collect())
    }

    async fn import_merge(&self, units: &[SourceUnit], findings: &[Finding]) -> Result<()> {
        // All-or-nothing: validate against a staged copy, then swap
        let mut staged_units = self.units.read().expect("units lock").clone();
        let mut staged_findings = self.findings.read().expect("findings lock").clone();

        for unit in units {
            if staged_units.insert(unit.id, unit.clone()).is_some() {
                return Err(crate::error::IntegrityError::DuplicateIds {
                    table: "source_units".to_string(),
                    count: 1,
                }
                .into());
            }
        }
        for finding in findings {
            if !staged_units.contains_key(&finding.unit_id) {
                return Err(crate::error::IntegrityError::OrphanedRecords { count: 1 }.into());
            }
            if staged_findings.insert(finding.id, finding.clone()).is_some() {
                return Err(crate::error::IntegrityError::DuplicateIds {
                    table: "findings".to_string(),
                    count: 1,
                }
                .into());
            }
        }

        *self.units.write().expect("units lock") = staged_units;
        *self.findings.write().expect("findings lock") = staged_findings;

        // Keep id allocation monotone past the imported rows
        let max_unit = self.max_unit_id().await?;
        let max_finding = self.max_finding_id().await?;
        self.next_unit_id.fetch_max(max_unit + 1, Ordering::SeqCst);
        self.next_finding_id
            .fetch_max(max_finding + 1, Ordering::SeqCst);
        Ok(())
    }

    async fn verify_integrity(&self) -> Result<IntegrityReport> {
        let units = self.units.read().expect("units lock");
        let findings = self.findings.read().expect("findings lock");
        let orphaned = findings
            .values()
            .filter(|f| !units.contains_key(&f.unit_id))
            .count() as u64;
        // Map keys cannot collide; duplicate counts are structurally 0
        Ok(IntegrityReport {
            orphaned_findings: orphaned,
            duplicate_unit_ids: 0,
            duplicate_finding_ids: 0,
        })
    }
}

#[async_trait]
impl ValidationStore for MemoryStore {
    async fn groups(&self) -> Result<Vec<GroupKey>> {
        let mut groups: Vec<GroupKey> = self
            .units
            .read()
            .expect("units lock")
            .values()
            .map(|u| u.key.group())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        groups.sort();
        Ok(groups)
    }

    async fn validation_completeness(&self, group: &GroupKey) -> Result<Completeness> {
        let units = self.units.read().expect("units lock");
        let findings = self.findings.read().expect("findings lock");

        let mut total = 0u64;
        let mut complete = 0u64;
        for finding in findings.values() {
            let Some(unit) = units.get(&finding.unit_id) else {
                continue;
            };
            if &unit.key.group() != group {
                continue;
            }
            total += 1;
            if Self::is_complete(finding) {
                complete += 1;
            }
        }
        Ok(Completeness { total, complete })
    }

    async fn incomplete_for_group(
        &self,
        group: &GroupKey,
    ) -> Result<Vec<(SourceUnit, Finding)>> {
        let units = self.units.read().expect("units lock");
        let findings = self.findings.read().expect("findings lock");
        Ok(findings
            .values()
            .filter(|f| !Self::is_complete(f))
            .filter_map(|f| {
                let unit = units.get(&f.unit_id)?;
                (&unit.key.group() == group).then(|| (unit.clone(), f.clone()))
            })
            .collect())
    }

    async fn overwrite_validation(&self, updates: &[ValidationUpdate]) -> Result<()> {
        let mut findings = self.findings.write().expect("findings lock");
        for update in updates {
            let finding = findings.get_mut(&update.finding_id).ok_or_else(|| {
                AnalysisError::storage(format!("unknown finding id {}", update.finding_id))
            })?;
            // Full overwrite, never a merge with the prior outcome
            finding.validation = update.status;
            finding.validation_note = update.note.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::finding::{FindingKinds, Provenance, ValidationStatus};
    use chrono::Utc;

    fn finding() -> Finding {
        Finding {
            id: 0,
            unit_id: 0,
            kinds: FindingKinds::from_label("metaphor"),
            excerpt: "my rock".to_string(),
            explanation: "refuge".to_string(),
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

    #[tokio::test]
    async fn test_unit_insert_is_idempotent_on_key() {
        let store = MemoryStore::new();
        let key = UnitKey::new("Psalms", 18, 2);
        let a = store.insert_source_unit(&key, "text").await.unwrap();
        let b = store.insert_source_unit(&key, "text").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.count_units().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_findings_require_existing_unit() {
        let store = MemoryStore::new();
        let err = store
            .insert_analysis_records(99, &[finding()])
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_ids_monotone_and_never_reused() {
        let store = MemoryStore::new();
        let unit_id = store
            .insert_source_unit(&UnitKey::new("Psalms", 18, 2), "t")
            .await
            .unwrap();

        let first = store
            .insert_analysis_records(unit_id, &[finding()])
            .await
            .unwrap();

        // A failed batch must not recycle identifiers
        let _ = store.insert_analysis_records(99, &[finding()]).await;

        let second = store
            .insert_analysis_records(unit_id, &[finding()])
            .await
            .unwrap();
        assert!(second[0] > first[0]);
    }

    #[tokio::test]
    async fn test_overwrite_validation_replaces_outcome() {
        let store = MemoryStore::new();
        let unit_id = store
            .insert_source_unit(&UnitKey::new("Psalms", 18, 2), "t")
            .await
            .unwrap();
        let ids = store
            .insert_analysis_records(unit_id, &[finding()])
            .await
            .unwrap();

        store
            .overwrite_validation(&[ValidationUpdate {
                finding_id: ids[0],
                status: ValidationStatus::Rejected,
                note: Some("not figurative".to_string()),
            }])
            .await
            .unwrap();
        store
            .overwrite_validation(&[ValidationUpdate {
                finding_id: ids[0],
                status: ValidationStatus::Kept,
                note: Some("second review".to_string()),
            }])
            .await
            .unwrap();

        let stored = &store.findings_for_unit(unit_id).await.unwrap()[0];
        assert_eq!(stored.validation, ValidationStatus::Kept);
        assert_eq!(stored.validation_note.as_deref(), Some("second review"));
    }
}
