//! Fallback orchestration: the retry loop around one source unit.
//!
//! Strictly sequential per unit: each retry depends on the previous
//! attempt's classification. The policy is a pure table over
//! classifications, decoupled from any service's error-message format,
//! and every loop is bounded by the configured attempt ceiling.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AnalysisError;
use crate::pipeline::classify::{classify, ResponseClass};
use crate::pipeline::extract::extract_payload;
use crate::pipeline::prompts::{analyze_prompt_hash, format_analyze_prompt};
use crate::traits::generator::{GenerationRequest, Generator};
use crate::types::config::{ModelTiers, RetryPolicy};
use crate::types::finding::Provenance;
use crate::types::response::ShapeDescriptor;
use crate::types::unit::{SourceUnit, UnitKey};

/// Next step decided by the policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Use this attempt's result
    Accept,

    /// Re-invoke the same model with the stricter prompt variant
    RetrySameModel,

    /// Move one tier up the fallback ladder
    RetryFallbackModel,

    /// Stop; surface a terminal failure
    Fail,
}

/// Terminal failure for one unit. Never propagates past the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub key: UnitKey,
    pub kind: FailureKind,
    pub attempts: u32,
}

/// Why a unit reached terminal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// No strategy parsed, and the strict retry did not help
    Malformed,

    /// Every available tier truncated
    Truncated,

    /// The service rejected a configured model tier. Surfaced
    /// immediately so operators fix configuration instead of the
    /// pipeline wasting budget on a retry loop.
    FallbackUnavailable { tier: String, reason: String },

    /// Transport-level generator failure
    Service(String),

    /// The store rejected the unit's records even after aggressive
    /// sanitization
    ConstraintViolation(String),

    /// Storage-level failure
    Storage(String),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed"),
            Self::Truncated => write!(f, "truncated"),
            Self::FallbackUnavailable { tier, .. } => {
                write!(f, "fallback unavailable: {tier}")
            }
            Self::Service(msg) => write!(f, "service error: {msg}"),
            Self::ConstraintViolation(msg) => write!(f, "constraint violation: {msg}"),
            Self::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

/// An accepted result with its audit trail.
#[derive(Debug, Clone)]
pub struct AcceptedAnalysis {
    /// The structured payload (possibly an empty array)
    pub value: Value,

    /// How the result was produced
    pub provenance: Provenance,

    /// The accepting classification
    pub class: ResponseClass,
}

/// The policy table.
///
/// | classification             | action                              |
/// |----------------------------|-------------------------------------|
/// | extracted / empty / reject | accept                              |
/// | malformed                  | one strict same-model retry, else fail |
/// | truncated                  | next tier if one exists, else fail  |
pub fn next_action(
    class: ResponseClass,
    same_model_retries: u32,
    tier: usize,
    tiers: &ModelTiers,
) -> Action {
    match class {
        ResponseClass::Extracted | ResponseClass::CleanEmpty | ResponseClass::GenuineReject => {
            Action::Accept
        }
        ResponseClass::Malformed => {
            if same_model_retries == 0 {
                Action::RetrySameModel
            } else {
                Action::Fail
            }
        }
        ResponseClass::Truncated => {
            if tiers.model_for(tier + 1).is_some() {
                Action::RetryFallbackModel
            } else {
                Action::Fail
            }
        }
    }
}

/// Drive the extraction/classification/retry loop for one unit.
///
/// Issues at most `retry.max_attempts` service calls. `ServiceUnavailable`
/// from the generator is never retried; it surfaces as a
/// `FallbackUnavailable` terminal failure.
pub async fn analyze_unit<G: Generator + ?Sized>(
    unit: &SourceUnit,
    generator: &G,
    tiers: &ModelTiers,
    retry: &RetryPolicy,
) -> Result<AcceptedAnalysis, UnitFailure> {
    let shape = ShapeDescriptor::findings();
    let prompt_hash = analyze_prompt_hash();

    let mut tier = 0usize;
    let mut same_model_retries = 0u32;
    let mut strict = false;
    let mut attempts = 0u32;
    let mut last_class = ResponseClass::Malformed;

    while attempts < retry.max_attempts {
        // The ladder is validated against the policy before each call
        let model = match tiers.model_for(tier) {
            Some(m) => m.to_string(),
            None => break,
        };

        attempts += 1;
        let prompt = format_analyze_prompt(&unit.key, &unit.text, strict);
        let request = GenerationRequest::new(prompt, &model, shape.clone());

        let response = match generator.generate(&request).await {
            Ok(r) => r,
            Err(AnalysisError::ServiceUnavailable { tier: t, reason }) => {
                warn!(unit = %unit.key, tier = %t, %reason, "model tier rejected by service");
                return Err(UnitFailure {
                    key: unit.key.clone(),
                    kind: FailureKind::FallbackUnavailable { tier: t, reason },
                    attempts,
                });
            }
            Err(e) => {
                return Err(UnitFailure {
                    key: unit.key.clone(),
                    kind: FailureKind::Service(e.to_string()),
                    attempts,
                });
            }
        };

        let outcome = extract_payload(&response.text, &shape);
        let class = classify(outcome.as_ref(), &response);
        last_class = class;
        debug!(unit = %unit.key, attempt = attempts, %model, ?class, "attempt classified");

        match next_action(class, same_model_retries, tier, tiers) {
            Action::Accept => {
                // outcome is present for every accepting class: empty
                // classes only arise from a successful parse
                let extracted = match outcome {
                    Some(e) => e,
                    None => {
                        return Err(UnitFailure {
                            key: unit.key.clone(),
                            kind: FailureKind::Malformed,
                            attempts,
                        })
                    }
                };
                return Ok(AcceptedAnalysis {
                    value: extracted.value,
                    provenance: Provenance {
                        model,
                        strategy: extracted.strategy,
                        attempts,
                        prompt_hash: prompt_hash.clone(),
                    },
                    class,
                });
            }
            Action::RetrySameModel => {
                same_model_retries += 1;
                strict = retry.strict_reprompt;
            }
            Action::RetryFallbackModel => {
                tier += 1;
                same_model_retries = 0;
                strict = false;
            }
            Action::Fail => break,
        }
    }

    let kind = match last_class {
        ResponseClass::Truncated => FailureKind::Truncated,
        _ => FailureKind::Malformed,
    };
    Err(UnitFailure {
        key: unit.key.clone(),
        kind,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGenerator;
    use crate::types::response::RawResponse;
    use crate::types::unit::UnitKey;

    fn unit() -> SourceUnit {
        SourceUnit::new(UnitKey::new("Psalms", 18, 2), "The Lord is my rock")
    }

    const FINDING: &str = r#"[{"type":"metaphor","text":"my rock","explanation":"refuge"}]"#;
    const CUT: &str = r#"[{"type":"metaphor","text":"my ro"#;

    #[test]
    fn test_policy_table() {
        let tiers = ModelTiers::default();
        assert_eq!(
            next_action(ResponseClass::Extracted, 0, 0, &tiers),
            Action::Accept
        );
        assert_eq!(
            next_action(ResponseClass::CleanEmpty, 0, 0, &tiers),
            Action::Accept
        );
        assert_eq!(
            next_action(ResponseClass::GenuineReject, 0, 0, &tiers),
            Action::Accept
        );
        assert_eq!(
            next_action(ResponseClass::Malformed, 0, 0, &tiers),
            Action::RetrySameModel
        );
        assert_eq!(
            next_action(ResponseClass::Malformed, 1, 0, &tiers),
            Action::Fail
        );
        assert_eq!(
            next_action(ResponseClass::Truncated, 0, 0, &tiers),
            Action::RetryFallbackModel
        );
        assert_eq!(
            next_action(ResponseClass::Truncated, 0, 2, &tiers),
            Action::Fail
        );
    }

    #[tokio::test]
    async fn test_clean_response_accepted_first_attempt() {
        let generator = MockGenerator::new().with_response("my rock", RawResponse::normal(FINDING));

        let accepted = analyze_unit(
            &unit(),
            &generator,
            &ModelTiers::default(),
            &RetryPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(accepted.provenance.model, "standard");
        assert_eq!(accepted.provenance.attempts, 1);
        assert_eq!(accepted.class, ResponseClass::Extracted);
    }

    #[tokio::test]
    async fn test_truncation_escalates_to_fallback_tier() {
        let generator = MockGenerator::new().with_script(
            "my rock",
            vec![RawResponse::normal(CUT), RawResponse::normal(FINDING)],
        );

        let accepted = analyze_unit(
            &unit(),
            &generator,
            &ModelTiers::default(),
            &RetryPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(accepted.provenance.model, "large");
        assert_eq!(accepted.provenance.attempts, 2);

        let models: Vec<String> = generator.calls().iter().map(|c| c.model.clone()).collect();
        assert_eq!(models, vec!["standard", "large"]);
    }

    #[tokio::test]
    async fn test_malformed_retries_once_with_strict_prompt() {
        let generator = MockGenerator::new().with_script(
            "my rock",
            vec![
                RawResponse::normal("no structure here"),
                RawResponse::normal(FINDING),
            ],
        );

        let accepted = analyze_unit(
            &unit(),
            &generator,
            &ModelTiers::default(),
            &RetryPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(accepted.provenance.model, "standard");
        let calls = generator.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].prompt.contains("ONLY a JSON array"));
    }

    #[tokio::test]
    async fn test_persistent_malformed_is_terminal_after_one_retry() {
        let generator =
            MockGenerator::new().with_default_response(RawResponse::normal("nonsense prose"));

        let failure = analyze_unit(
            &unit(),
            &generator,
            &ModelTiers::default(),
            &RetryPolicy::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Malformed);
        assert_eq!(generator.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_bounded_retries_under_persistent_truncation() {
        let generator = MockGenerator::new().with_default_response(RawResponse::normal(CUT));
        let retry = RetryPolicy::default().with_max_attempts(3);

        let failure = analyze_unit(&unit(), &generator, &ModelTiers::default(), &retry)
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Truncated);
        // One call per tier, never exceeding the ceiling
        assert!(generator.calls().len() <= 3);
        let models: Vec<String> = generator.calls().iter().map(|c| c.model.clone()).collect();
        assert_eq!(models, vec!["standard", "large", "flagship"]);
    }

    #[tokio::test]
    async fn test_unavailable_fallback_is_terminal_not_retried() {
        let generator = MockGenerator::new()
            .with_script("my rock", vec![RawResponse::normal(CUT)])
            .with_unavailable_model("large", "model not found");

        let failure = analyze_unit(
            &unit(),
            &generator,
            &ModelTiers::default(),
            &RetryPolicy::default(),
        )
        .await
        .unwrap_err();

        match failure.kind {
            FailureKind::FallbackUnavailable { tier, .. } => assert_eq!(tier, "large"),
            other => panic!("expected FallbackUnavailable, got {other:?}"),
        }
        // Exactly one truncated call plus one rejected call, no loop
        assert_eq!(generator.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_after_prose_does_not_trigger_fallback() {
        let prose = "This verse is a genealogical record listing descendants by \
                     name and age; nothing in it is figurative, so my conclusion \
                     is that there are no findings to report.\n\n[]";
        let generator =
            MockGenerator::new().with_response("my rock", RawResponse::normal(prose));

        let accepted = analyze_unit(
            &unit(),
            &generator,
            &ModelTiers::default(),
            &RetryPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(accepted.class, ResponseClass::GenuineReject);
        assert_eq!(generator.calls().len(), 1);
    }
}
