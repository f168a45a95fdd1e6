//! Service boundary types: raw responses and expected-shape descriptors.
//!
//! The core never assumes the response text is well-formed; the shape
//! descriptor is the only contract the extractor checks against.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why the generative service stopped producing output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Service reports normal completion
    Normal,

    /// Service hit its output length limit
    LengthLimit,

    /// Anything else the service reported
    Other(String),
}

impl StopReason {
    /// True when the service itself signals length-limit termination.
    ///
    /// Note that truncation can also be inferred structurally even when
    /// the service declares a normal stop; see the classifier.
    pub fn is_length_limited(&self) -> bool {
        matches!(self, Self::LengthLimit)
    }
}

/// Token accounting reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// One raw response from the generative service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    /// Free-form response text, possibly containing a structured payload
    pub text: String,

    /// Service-reported stop reason
    pub stop_reason: StopReason,

    /// Service-reported token usage
    pub usage: TokenUsage,
}

impl RawResponse {
    /// A normally terminated response (test and mock convenience).
    pub fn normal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stop_reason: StopReason::Normal,
            usage: TokenUsage::default(),
        }
    }

    /// A response cut off at the service's length limit.
    pub fn length_limited(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stop_reason: StopReason::LengthLimit,
            usage: TokenUsage::default(),
        }
    }
}

/// Top-level structural kind the extractor expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    /// A JSON array whose elements are objects
    ArrayOfObjects,

    /// A single JSON object
    SingleObject,
}

/// Explicit schema descriptor checked before a payload is accepted.
///
/// Replaces ad hoc duck-typed field access: required keys are verified
/// on every object before the extractor reports success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    pub kind: ShapeKind,

    /// Keys every object must carry
    #[serde(default)]
    pub required_keys: Vec<String>,
}

impl ShapeDescriptor {
    pub fn new(kind: ShapeKind) -> Self {
        Self {
            kind,
            required_keys: Vec::new(),
        }
    }

    /// Require keys on every object in the payload.
    pub fn with_required_keys(
        mut self,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.required_keys = keys.into_iter().map(|k| k.into()).collect();
        self
    }

    /// The shape expected from the finding-analysis prompt.
    pub fn findings() -> Self {
        Self::new(ShapeKind::ArrayOfObjects).with_required_keys(["type", "text"])
    }

    /// The shape expected from the validation prompt.
    pub fn verdicts() -> Self {
        Self::new(ShapeKind::ArrayOfObjects).with_required_keys(["index", "verdict"])
    }

    /// Check a parsed value against this descriptor.
    ///
    /// An empty array satisfies an array shape: emptiness is a
    /// classification concern, not a shape violation.
    pub fn matches(&self, value: &Value) -> bool {
        match self.kind {
            ShapeKind::ArrayOfObjects => match value.as_array() {
                Some(items) => items.iter().all(|item| self.object_matches(item)),
                None => false,
            },
            ShapeKind::SingleObject => self.object_matches(value),
        }
    }

    fn object_matches(&self, value: &Value) -> bool {
        match value.as_object() {
            Some(map) => self.required_keys.iter().all(|k| map.contains_key(k)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_array_matches_array_shape() {
        let shape = ShapeDescriptor::findings();
        assert!(shape.matches(&json!([])));
    }

    #[test]
    fn test_required_keys_enforced() {
        let shape = ShapeDescriptor::findings();
        assert!(shape.matches(&json!([{"type": "metaphor", "text": "x"}])));
        assert!(!shape.matches(&json!([{"type": "metaphor"}])));
        assert!(!shape.matches(&json!([1, 2, 3])));
        assert!(!shape.matches(&json!({"type": "metaphor", "text": "x"})));
    }

    #[test]
    fn test_single_object_shape() {
        let shape = ShapeDescriptor::new(ShapeKind::SingleObject);
        assert!(shape.matches(&json!({"anything": 1})));
        assert!(!shape.matches(&json!([])));
    }
}
