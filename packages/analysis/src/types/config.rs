//! Configuration types for the analysis pipeline.

use serde::{Deserialize, Serialize};

/// Model tiers for the fallback ladder.
///
/// Tiers are explicit parameters threaded through every call; no
/// ambient "current model" state exists anywhere in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTiers {
    /// First-choice model for every unit
    pub primary: String,

    /// Higher-capacity model used when the primary truncates
    pub fallback: String,

    /// Third tier used when the fallback also truncates
    pub escalation: Option<String>,
}

impl Default for ModelTiers {
    fn default() -> Self {
        Self {
            primary: "standard".to_string(),
            fallback: "large".to_string(),
            escalation: Some("flagship".to_string()),
        }
    }
}

impl ModelTiers {
    /// Model name for a 0-based tier index, if that tier exists.
    pub fn model_for(&self, tier: usize) -> Option<&str> {
        match tier {
            0 => Some(&self.primary),
            1 => Some(&self.fallback),
            2 => self.escalation.as_deref(),
            _ => None,
        }
    }
}

/// Structured retry policy keyed by failure classification.
///
/// Decoupled from any specific service's error-message format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Hard ceiling on service calls per unit (termination guarantee)
    pub max_attempts: u32,

    /// Use the stricter prompt variant on a same-model retry
    pub strict_reprompt: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            strict_reprompt: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }
}

/// Configuration for an analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Model ladder
    pub tiers: ModelTiers,

    /// Retry policy
    pub retry: RetryPolicy,

    /// Concurrent workers across units (1..=12)
    pub concurrency: usize,

    /// Fraction of validated findings below which a group is
    /// considered recovery-eligible
    pub completeness_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tiers: ModelTiers::default(),
            retry: RetryPolicy::default(),
            concurrency: 4,
            completeness_threshold: 0.95,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set worker concurrency, clamped to the supported range.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, 12);
        self
    }

    pub fn with_tiers(mut self, tiers: ModelTiers) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_completeness_threshold(mut self, threshold: f64) -> Self {
        self.completeness_threshold = threshold.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ladder() {
        let tiers = ModelTiers::default();
        assert_eq!(tiers.model_for(0), Some("standard"));
        assert_eq!(tiers.model_for(1), Some("large"));
        assert_eq!(tiers.model_for(2), Some("flagship"));
        assert_eq!(tiers.model_for(3), None);
    }

    #[test]
    fn test_concurrency_clamped() {
        assert_eq!(PipelineConfig::new().with_concurrency(0).concurrency, 1);
        assert_eq!(PipelineConfig::new().with_concurrency(64).concurrency, 12);
    }
}
