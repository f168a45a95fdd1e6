//! Failure classification for extraction outcomes.
//!
//! The single most failure-prone judgment in the pipeline is the
//! empty-vs-failure distinction, so it is implemented as explicit,
//! independently testable predicates returned as data, never inferred
//! from whether an error was raised or from response length alone.

use serde_json::Value;

use crate::pipeline::extract::{find_balanced_span, Extracted};
use crate::types::response::RawResponse;

/// Classification of one extraction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// A non-empty payload was recovered from an intact response
    Extracted,

    /// Structure parsed and is legitimately empty; success, not failure
    CleanEmpty,

    /// The response argues the case in prose and concludes with an
    /// empty structure; success, not failure
    GenuineReject,

    /// No strategy parsed and nothing suggests truncation
    Malformed,

    /// The response was cut below expected completion
    Truncated,
}

impl ResponseClass {
    /// Classes the orchestrator accepts without retry.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Extracted | Self::CleanEmpty | Self::GenuineReject)
    }
}

/// Prose shorter than this before an empty structure is treated as
/// boilerplate rather than substantive reasoning.
const REASONING_PROSE_MIN_LEN: usize = 80;

/// Classify one extraction attempt.
///
/// Rules, in order:
/// - A successfully parsed empty structure from an intact span is
///   success, regardless of how much reasoning text precedes it and
///   regardless of the reported stop reason. The one exception is an
///   empty payload manufactured out of a span that never closed: that
///   is truncation wearing a disguise.
/// - A non-empty payload scraped out of a structurally truncated
///   response is still `Truncated`: later-chain strategies salvage
///   text, but a cut response must go to the fallback tier rather
///   than be stored as-is.
/// - Conversely, a non-empty payload from a span that did close is
///   `Extracted` even under a reported length-limit stop: the limit
///   fell in trailing prose, not in the structure. Structural evidence
///   outranks the stop reason in both directions.
/// - With no parse at all, truncation evidence (service stop reason or
///   structural state) separates `Truncated` from `Malformed`.
pub fn classify(outcome: Option<&Extracted>, response: &RawResponse) -> ResponseClass {
    match outcome {
        Some(extracted) if is_empty_payload(&extracted.value) => {
            // An empty payload counts as success only when the raw
            // text actually closed its structural span. Emptiness
            // manufactured by a repair strategy out of a cut-off
            // response is truncation, not a clean empty.
            if shows_truncation(&response.text) {
                ResponseClass::Truncated
            } else if has_reasoning_prose(&response.text) {
                ResponseClass::GenuineReject
            } else {
                ResponseClass::CleanEmpty
            }
        }
        Some(_) => {
            if shows_truncation(&response.text) {
                ResponseClass::Truncated
            } else {
                ResponseClass::Extracted
            }
        }
        None => {
            if response.stop_reason.is_length_limited() || shows_truncation(&response.text) {
                ResponseClass::Truncated
            } else {
                ResponseClass::Malformed
            }
        }
    }
}

/// Structural truncation evidence: the response opens a structural
/// span that never closes (unterminated string or bracket at
/// end-of-input). Independent of the service-reported stop reason: a
/// declared "normal" stop does not override what the text shows.
pub fn shows_truncation(raw: &str) -> bool {
    let trimmed = raw.trim_end();
    if !trimmed.contains(['[', '{']) {
        return false;
    }
    find_balanced_span(trimmed).is_none()
}

/// A parsed payload that carries no findings.
pub fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

/// Whether substantive prose precedes the structural span.
///
/// Only distinguishes `GenuineReject` from `CleanEmpty` for
/// observability; both are accepted identically.
fn has_reasoning_prose(raw: &str) -> bool {
    let prose_end = raw.find(['[', '{', '`']).unwrap_or(0);
    raw[..prose_end].trim().len() >= REASONING_PROSE_MIN_LEN
}
