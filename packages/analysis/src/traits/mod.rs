//! Core trait abstractions.

pub mod generator;
pub mod store;

pub use generator::{GenerationRequest, Generator};
pub use store::{
    AnalysisStore, Completeness, IntegrityReport, MergeStore, UnitStore, ValidationStore,
    ValidationUpdate,
};
