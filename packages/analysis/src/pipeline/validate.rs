//! Validation pass: a second-opinion review of stored findings.
//!
//! Used by the recovery engine to complete records whose validation
//! never ran or lost its derived fields. Outcomes fully overwrite the
//! prior validation state.

use serde_json::Value;
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::pipeline::extract::extract_payload;
use crate::pipeline::prompts::format_validate_prompt;
use crate::traits::generator::{GenerationRequest, Generator};
use crate::traits::store::ValidationUpdate;
use crate::types::config::ModelTiers;
use crate::types::finding::{Finding, ValidationStatus};
use crate::types::response::ShapeDescriptor;
use crate::types::unit::SourceUnit;

/// Re-run validation for one unit's findings.
///
/// Returns one update per finding. Verdicts the response does not
/// cover, and verdict strings outside the closed set, coerce to
/// `Kept`: a garbled review must not silently delete findings.
pub async fn validate_findings<G: Generator + ?Sized>(
    generator: &G,
    tiers: &ModelTiers,
    unit: &SourceUnit,
    findings: &[Finding],
) -> Result<Vec<ValidationUpdate>> {
    if findings.is_empty() {
        return Ok(Vec::new());
    }

    let shape = ShapeDescriptor::verdicts();
    let prompt = format_validate_prompt(&unit.key, &unit.text, findings);
    let request = GenerationRequest::new(prompt, &tiers.primary, shape.clone());
    let response = generator.generate(&request).await?;

    let extracted = extract_payload(&response.text, &shape).ok_or_else(|| {
        AnalysisError::ExtractionFailed {
            response_len: response.text.len(),
        }
    })?;
    debug!(unit = %unit.key, strategy = extracted.strategy, "validation response extracted");

    let verdicts = extracted.value.as_array().cloned().unwrap_or_default();

    let updates = findings
        .iter()
        .enumerate()
        .map(|(i, finding)| {
            let verdict = verdicts.iter().find(|v| {
                v.get("index")
                    .and_then(Value::as_u64)
                    .or_else(|| {
                        v.get("index")
                            .and_then(Value::as_str)
                            .and_then(|s| s.parse().ok())
                    })
                    .is_some_and(|idx| idx == i as u64)
            });

            let (status, note) = match verdict {
                Some(v) => {
                    let raw = v.get("verdict").and_then(Value::as_str).unwrap_or_default();
                    let note = v
                        .get("note")
                        .and_then(Value::as_str)
                        .filter(|n| !n.trim().is_empty())
                        .map(str::to_string);
                    (ValidationStatus::coerce_verdict(raw), note)
                }
                None => (ValidationStatus::Kept, None),
            };

            ValidationUpdate {
                finding_id: finding.id,
                status,
                note: Some(note.unwrap_or_else(|| "no reviewer note".to_string())),
            }
        })
        .collect();

    Ok(updates)
}
