//! Record reconciliation: accepted payloads to database rows.
//!
//! Sanitization here is unconditional, not an exception handler. Every
//! enum-typed field is coerced into its closed set before the insert
//! is attempted, so a constraint violation can never abort a batch
//! over a single bad value.

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::AnalysisError;
use crate::pipeline::orchestrate::{AcceptedAnalysis, FailureKind, UnitFailure};
use crate::traits::store::UnitStore;
use crate::types::finding::{Finding, FindingKinds, ValidationStatus};
use crate::types::unit::SourceUnit;

/// Longest excerpt/explanation kept by aggressive sanitization.
const AGGRESSIVE_MAX_LEN: usize = 2000;

/// Build sanitized findings from an accepted payload.
///
/// Every category label is coerced into the closed flag set;
/// unrecognized labels degrade to the all-"no" default instead of
/// failing. Objects with no usable text at all are dropped.
pub fn findings_from_payload(accepted: &AcceptedAnalysis, unit_id: i64) -> Vec<Finding> {
    let items: Vec<&Value> = match &accepted.value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![&accepted.value],
        _ => vec![],
    };

    items
        .into_iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let label = obj.get("type").and_then(Value::as_str).unwrap_or_default();
            let excerpt = obj.get("text").and_then(Value::as_str).unwrap_or_default();
            let explanation = obj
                .get("explanation")
                .and_then(Value::as_str)
                .unwrap_or_default();

            if excerpt.trim().is_empty() && label.trim().is_empty() {
                return None;
            }

            Some(Finding {
                id: 0,
                unit_id,
                kinds: FindingKinds::from_label(label),
                excerpt: excerpt.to_string(),
                explanation: explanation.to_string(),
                provenance: accepted.provenance.clone(),
                validation: ValidationStatus::Unvalidated,
                validation_note: None,
                created_at: Utc::now(),
            })
        })
        .collect()
}

/// More aggressive sanitization applied before the single retry:
/// control characters stripped, free-text fields truncated.
fn sanitize_aggressively(finding: &Finding) -> Finding {
    let scrub = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_control() || *c == '\n')
            .take(AGGRESSIVE_MAX_LEN)
            .collect()
    };

    let mut cleaned = finding.clone();
    cleaned.excerpt = scrub(&finding.excerpt);
    cleaned.explanation = scrub(&finding.explanation);
    cleaned
}

/// Write one unit's accepted findings transactionally.
///
/// If the store rejects the batch despite sanitization, the raw
/// payload is logged, every finding is sanitized more aggressively,
/// and the insert is retried exactly once before the unit is recorded
/// as failed. Failure here never affects other units.
pub async fn reconcile_unit<S: UnitStore + ?Sized>(
    store: &S,
    unit: &SourceUnit,
    accepted: &AcceptedAnalysis,
) -> Result<usize, UnitFailure> {
    let findings = findings_from_payload(accepted, unit.id);
    if findings.is_empty() {
        info!(unit = %unit.key, "accepted with zero findings");
        return Ok(0);
    }

    match store.insert_analysis_records(unit.id, &findings).await {
        Ok(ids) => Ok(ids.len()),
        Err(AnalysisError::ConstraintViolation(msg)) => {
            warn!(
                unit = %unit.key,
                error = %msg,
                payload = %accepted.value,
                "store rejected sanitized records; retrying once with aggressive sanitization"
            );
            let cleaned: Vec<Finding> = findings.iter().map(sanitize_aggressively).collect();
            match store.insert_analysis_records(unit.id, &cleaned).await {
                Ok(ids) => Ok(ids.len()),
                Err(e) => Err(UnitFailure {
                    key: unit.key.clone(),
                    kind: FailureKind::ConstraintViolation(e.to_string()),
                    attempts: accepted.provenance.attempts,
                }),
            }
        }
        Err(e) => Err(UnitFailure {
            key: unit.key.clone(),
            kind: FailureKind::Storage(e.to_string()),
            attempts: accepted.provenance.attempts,
        }),
    }
}
