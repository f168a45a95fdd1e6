//! Generator trait: the generative-text service boundary.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::response::{RawResponse, ShapeDescriptor};

/// One request to the generative service.
///
/// The model tier is an explicit parameter, never ambient state, so
/// provenance can be recorded per attempt.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Fully formatted prompt text
    pub prompt: String,

    /// Model tier identifier to invoke
    pub model: String,

    /// Shape the caller expects to recover from the response
    pub shape: ShapeDescriptor,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>, shape: ShapeDescriptor) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            shape,
        }
    }
}

/// Generative service boundary.
///
/// Implementations wrap a specific provider. They must surface a
/// rejected model name as [`crate::AnalysisError::ServiceUnavailable`]
/// so the orchestrator can distinguish configuration errors from
/// truncation; the caller never assumes the response text is
/// well-formed.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Issue one generation call and return the raw response.
    async fn generate(&self, request: &GenerationRequest) -> Result<RawResponse>;
}
