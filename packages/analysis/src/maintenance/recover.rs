//! Recovery engine: detect and repair incomplete validation state.
//!
//! Validation outcomes can be lost mid-run (a crash between writing a
//! status and its derived note, or a run that never validated at all).
//! The engine scans per-group completeness, re-runs the validation pass
//! for affected units, and overwrites the prior outcomes.

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::Result;
use crate::pipeline::validate::validate_findings;
use crate::traits::generator::Generator;
use crate::traits::store::ValidationStore;
use crate::types::config::PipelineConfig;
use crate::types::finding::Finding;
use crate::types::unit::{GroupKey, SourceUnit};

/// Validation completeness of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupHealth {
    pub group: GroupKey,

    /// Findings in the group
    pub total: u64,

    /// Findings with a complete validation outcome
    pub complete: u64,
}

impl GroupHealth {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.complete as f64 / self.total as f64
        }
    }
}

/// Outcome of one recovery run.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Groups found below the completeness threshold
    pub groups_recovered: Vec<GroupKey>,

    /// Validation outcomes overwritten
    pub findings_revalidated: u64,

    /// Units whose validation pass failed and was left untouched
    pub units_failed: u64,
}

/// Report validation completeness for every group, worst first.
pub async fn health_check<S: ValidationStore + ?Sized>(store: &S) -> Result<Vec<GroupHealth>> {
    let mut health = Vec::new();
    for group in store.groups().await? {
        let completeness = store.validation_completeness(&group).await?;
        health.push(GroupHealth {
            group,
            total: completeness.total,
            complete: completeness.complete,
        });
    }
    health.sort_by(|a, b| {
        a.fraction()
            .partial_cmp(&b.fraction())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(health)
}

/// Scan every group and recover those below the configured
/// completeness threshold.
pub async fn auto_detect_and_recover<S, G>(
    store: &S,
    generator: &G,
    config: &PipelineConfig,
) -> Result<RecoveryReport>
where
    S: ValidationStore + ?Sized,
    G: Generator + ?Sized,
{
    let mut report = RecoveryReport::default();
    for health in health_check(store).await? {
        if health.fraction() >= config.completeness_threshold {
            continue;
        }
        info!(
            group = %health.group,
            complete = health.complete,
            total = health.total,
            "group below completeness threshold, recovering"
        );
        let group_report = recover_group(store, generator, config, &health.group).await?;
        report.findings_revalidated += group_report.findings_revalidated;
        report.units_failed += group_report.units_failed;
        report.groups_recovered.push(health.group);
    }
    Ok(report)
}

/// Re-validate every incomplete finding in one group.
///
/// Outcomes are written per unit as a full overwrite. A unit whose
/// validation pass fails is skipped and counted; its stored state is
/// left untouched so a later run can pick it up.
pub async fn recover_group<S, G>(
    store: &S,
    generator: &G,
    config: &PipelineConfig,
    group: &GroupKey,
) -> Result<RecoveryReport>
where
    S: ValidationStore + ?Sized,
    G: Generator + ?Sized,
{
    let incomplete = store.incomplete_for_group(group).await?;

    // Regroup the flat pairs by owning unit
    let mut by_unit: BTreeMap<i64, (SourceUnit, Vec<Finding>)> = BTreeMap::new();
    for (unit, finding) in incomplete {
        by_unit
            .entry(unit.id)
            .or_insert_with(|| (unit, Vec::new()))
            .1
            .push(finding);
    }

    let mut report = RecoveryReport::default();
    for (unit, findings) in by_unit.into_values() {
        match validate_findings(generator, &config.tiers, &unit, &findings).await {
            Ok(updates) => {
                let count = updates.len() as u64;
                store.overwrite_validation(&updates).await?;
                report.findings_revalidated += count;
            }
            Err(err) => {
                warn!(unit = %unit.key, error = %err, "validation pass failed, skipping unit");
                report.units_failed += 1;
            }
        }
    }

    info!(
        group = %group,
        revalidated = report.findings_revalidated,
        failed_units = report.units_failed,
        "group recovery complete"
    );
    report.groups_recovered.push(group.clone());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::MockGenerator;
    use crate::traits::store::UnitStore;
    use crate::types::finding::{FindingKinds, Provenance, ValidationStatus};
    use crate::types::response::RawResponse;
    use crate::types::unit::UnitKey;
    use chrono::Utc;

    fn finding(validated: bool) -> Finding {
        Finding {
            id: 0,
            unit_id: 0,
            kinds: FindingKinds::from_label("simile"),
            excerpt: "wings like eagles".to_string(),
            explanation: "comparison".to_string(),
            provenance: Provenance {
                model: "standard".to_string(),
                strategy: 0,
                attempts: 1,
                prompt_hash: "abc".to_string(),
            },
            validation: if validated {
                ValidationStatus::Kept
            } else {
                ValidationStatus::Unvalidated
            },
            validation_note: validated.then(|| "confirmed".to_string()),
            created_at: Utc::now(),
        }
    }

    async fn store_with_incomplete_group() -> MemoryStore {
        let store = MemoryStore::new();
        let id = store
            .insert_source_unit(&UnitKey::new("Isaiah", 40, 31), "wings like eagles")
            .await
            .unwrap();
        store
            .insert_analysis_records(id, &[finding(true), finding(false)])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_health_check_reports_completeness() {
        let store = store_with_incomplete_group().await;
        let health = health_check(&store).await.unwrap();
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].total, 2);
        assert_eq!(health[0].complete, 1);
    }

    #[tokio::test]
    async fn test_auto_recover_completes_the_group() {
        let store = store_with_incomplete_group().await;
        let generator = MockGenerator::new().with_response(
            "wings like eagles",
            RawResponse::normal(r#"[{"index": 0, "verdict": "keep", "note": "clear simile"}]"#),
        );
        let config = PipelineConfig::default();

        let report = auto_detect_and_recover(&store, &generator, &config)
            .await
            .unwrap();
        assert_eq!(report.groups_recovered.len(), 1);
        assert_eq!(report.findings_revalidated, 1);

        let health = health_check(&store).await.unwrap();
        assert_eq!(health[0].complete, 2);
    }

    #[tokio::test]
    async fn test_healthy_group_left_untouched() {
        let store = MemoryStore::new();
        let id = store
            .insert_source_unit(&UnitKey::new("Psalms", 18, 2), "my rock")
            .await
            .unwrap();
        store
            .insert_analysis_records(id, &[finding(true)])
            .await
            .unwrap();

        let generator = MockGenerator::new();
        let config = PipelineConfig::default();
        let report = auto_detect_and_recover(&store, &generator, &config)
            .await
            .unwrap();

        assert!(report.groups_recovered.is_empty());
        assert!(generator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_validation_leaves_state_untouched() {
        let store = store_with_incomplete_group().await;
        let generator =
            MockGenerator::new().with_default_response(RawResponse::normal("no structure here"));
        let config = PipelineConfig::default();

        let report = recover_group(
            &store,
            &generator,
            &config,
            &GroupKey {
                book: "Isaiah".to_string(),
                chapter: 40,
            },
        )
        .await
        .unwrap();

        assert_eq!(report.units_failed, 1);
        assert_eq!(report.findings_revalidated, 0);
        let health = health_check(&store).await.unwrap();
        assert_eq!(health[0].complete, 1);
    }
}
