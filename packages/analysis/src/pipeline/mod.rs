//! The analysis pipeline.
//!
//! Data flow: raw service response → extractor → classifier →
//! orchestrator (retry loop) → accepted payload → reconciler →
//! canonical store.

pub mod classify;
pub mod extract;
pub mod orchestrate;
pub mod prompts;
pub mod reconcile;
pub mod runner;
pub mod validate;

pub use classify::{classify, is_empty_payload, shows_truncation, ResponseClass};
pub use extract::{extract_payload, Extracted};
pub use orchestrate::{
    analyze_unit, next_action, AcceptedAnalysis, Action, FailureKind, UnitFailure,
};
pub use prompts::{
    analyze_prompt_hash, format_analyze_prompt, format_validate_prompt, ANALYZE_PROMPT,
    STRICT_ANALYZE_PROMPT, VALIDATE_PROMPT,
};
pub use reconcile::{findings_from_payload, reconcile_unit};
pub use runner::{process_units, RunSummary};
pub use validate::validate_findings;
