//! Typed errors for the analysis library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

/// Errors that can occur during analysis operations.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// No extraction strategy produced a valid structure
    #[error("no extraction strategy matched response ({response_len} bytes)")]
    ExtractionFailed { response_len: usize },

    /// Response was cut off before logical completion
    #[error("response truncated (stop reason: {stop_reason})")]
    Truncated { stop_reason: String },

    /// Model tier rejected by the service. A configuration error,
    /// distinct from transient failure: never retried automatically.
    #[error("model tier unavailable: {tier}: {reason}")]
    ServiceUnavailable { tier: String, reason: String },

    /// Store rejected a record that was already sanitized.
    /// Rare; logged as a data-quality signal.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Post-merge invariant check failed. Fatal: the merge
    /// transaction is rolled back entirely.
    #[error("consolidation integrity error: {0}")]
    ConsolidationIntegrity(#[from] IntegrityError),

    /// Generative service transport or protocol failure
    #[error("generator error: {0}")]
    Generator(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {reason}")]
    Config { reason: String },
}

impl AnalysisError {
    /// Wrap an arbitrary storage backend error.
    pub fn storage(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Storage(err.into())
    }

    /// Wrap an arbitrary generator backend error.
    pub fn generator(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Generator(err.into())
    }
}

/// Violations found by the post-merge integrity check.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// Analysis records whose source unit does not exist
    #[error("{count} analysis records reference missing source units")]
    OrphanedRecords { count: u64 },

    /// Duplicate identifiers within one table
    #[error("{count} duplicate identifiers in {table}")]
    DuplicateIds { table: String, count: u64 },

    /// Identifier mapping was not injective
    #[error("identifier remap collision for old id {old_id}")]
    RemapCollision { old_id: i64 },
}

/// Result type alias for analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;
