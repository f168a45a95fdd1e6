//! Figurative Language Analysis Library
//!
//! A resilient pipeline for extracting structured verse-level analysis
//! from unreliable generative-text responses, with layered recovery at
//! every stage.
//!
//! # Design Philosophy
//!
//! **"Never trust the response, always bound the retries"**
//!
//! - Multi-strategy extraction before any retry is considered
//! - Classification decides policy, not error-message pattern matching
//! - Fallback tiers are an explicit ladder, never ambient state
//! - Content fingerprints (not identifiers) decide duplication
//! - Every loop is bounded; one unit's failure never stops a run
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use analysis::{process_units, MemoryStore, PipelineConfig};
//! use analysis::testing::MockGenerator;
//!
//! let store = Arc::new(MemoryStore::new());
//! let generator = Arc::new(MockGenerator::new());
//! let config = PipelineConfig::default();
//!
//! let summary = process_units(units, &config, generator, store).await?;
//! assert!(summary.is_success());
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (Generator, stores)
//! - [`types`] - Domain data types
//! - [`pipeline`] - Extraction, classification, orchestration, reconciliation
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`maintenance`] - Consolidation and recovery engines
//! - [`testing`] - Mock implementations for testing

pub mod error;
pub mod maintenance;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{AnalysisError, IntegrityError, Result};
pub use traits::{
    generator::{GenerationRequest, Generator},
    store::{
        AnalysisStore, Completeness, IntegrityReport, MergeStore, UnitStore, ValidationStore,
        ValidationUpdate,
    },
};
pub use types::{
    config::{ModelTiers, PipelineConfig, RetryPolicy},
    finding::{Finding, FindingKinds, Presence, Provenance, ValidationStatus},
    response::{RawResponse, ShapeDescriptor, ShapeKind, StopReason, TokenUsage},
    unit::{GroupKey, SourceUnit, UnitKey},
};

pub use stores::MemoryStore;
#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

// Re-export pipeline components
pub use pipeline::{
    // Core functions
    analyze_unit, classify, extract_payload, process_units, validate_findings,
    // Policy and outcome types
    AcceptedAnalysis, Action, Extracted, FailureKind, ResponseClass, RunSummary, UnitFailure,
};

// Re-export maintenance engines
pub use maintenance::{
    auto_detect_and_recover, consolidate, health_check, recover_group, GroupHealth,
    MaintenanceMode, MergeReport, RecoveryReport,
};
