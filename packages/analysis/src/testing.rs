//! Test doubles for the analysis pipeline.
//!
//! `MockGenerator` matches prompts by substring and replays canned
//! responses, recording every call so tests can assert on model
//! selection and reprompt wording.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{AnalysisError, Result};
use crate::traits::generator::{GenerationRequest, Generator};
use crate::types::response::RawResponse;

/// One recorded generation call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub prompt: String,
}

/// Scripted generator for tests.
///
/// Lookup order per call: a script whose needle matches the prompt and
/// still has queued responses, then a fixed response whose needle
/// matches, then the default (`[]`).
#[derive(Clone, Default)]
pub struct MockGenerator {
    responses: Arc<RwLock<Vec<(String, RawResponse)>>>,
    scripts: Arc<RwLock<Vec<(String, VecDeque<RawResponse>)>>>,
    default_response: Arc<RwLock<Option<RawResponse>>>,
    unavailable: Arc<RwLock<Vec<(String, String)>>>,
    calls: Arc<RwLock<Vec<RecordedCall>>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `response` whenever the prompt contains `needle`.
    pub fn with_response(self, needle: impl Into<String>, response: RawResponse) -> Self {
        self.responses
            .write()
            .unwrap()
            .push((needle.into(), response));
        self
    }

    /// Reply with the queued responses in order, one per matching call.
    /// Once the queue drains, matching falls through to fixed responses
    /// and the default.
    pub fn with_script(self, needle: impl Into<String>, responses: Vec<RawResponse>) -> Self {
        self.scripts
            .write()
            .unwrap()
            .push((needle.into(), responses.into()));
        self
    }

    /// Replace the fallthrough response (normally an empty array).
    pub fn with_default_response(self, response: RawResponse) -> Self {
        *self.default_response.write().unwrap() = Some(response);
        self
    }

    /// Make a model identifier fail with `ServiceUnavailable`.
    pub fn with_unavailable_model(
        self,
        model: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.unavailable
            .write()
            .unwrap()
            .push((model.into(), reason.into()));
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<RawResponse> {
        // Record before any failure so tests can see rejected calls
        self.calls.write().unwrap().push(RecordedCall {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
        });

        if let Some((tier, reason)) = self
            .unavailable
            .read()
            .unwrap()
            .iter()
            .find(|(model, _)| model == &request.model)
        {
            return Err(AnalysisError::ServiceUnavailable {
                tier: tier.clone(),
                reason: reason.clone(),
            });
        }

        {
            let mut scripts = self.scripts.write().unwrap();
            for (needle, queue) in scripts.iter_mut() {
                if request.prompt.contains(needle.as_str()) {
                    if let Some(response) = queue.pop_front() {
                        return Ok(response);
                    }
                }
            }
        }

        if let Some((_, response)) = self
            .responses
            .read()
            .unwrap()
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle.as_str()))
        {
            return Ok(response.clone());
        }

        Ok(self
            .default_response
            .read()
            .unwrap()
            .clone()
            .unwrap_or_else(|| RawResponse::normal("[]")))
    }
}
