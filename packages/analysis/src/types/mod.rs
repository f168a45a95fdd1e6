//! Domain data types.

pub mod config;
pub mod finding;
pub mod response;
pub mod unit;

pub use config::{ModelTiers, PipelineConfig, RetryPolicy};
pub use finding::{Finding, FindingKinds, Presence, Provenance, ValidationStatus};
pub use response::{RawResponse, ShapeDescriptor, ShapeKind, StopReason, TokenUsage};
pub use unit::{GroupKey, SourceUnit, UnitKey};
