//! Offline maintenance: consolidation and recovery.
//!
//! These passes assume exclusive access to the stores involved; run
//! them only when no analysis workers are active.

pub mod consolidate;
pub mod recover;

pub use consolidate::{consolidate, MergeReport};
pub use recover::{
    auto_detect_and_recover, health_check, recover_group, GroupHealth, RecoveryReport,
};

use crate::types::unit::GroupKey;

/// What a maintenance invocation should do.
#[derive(Debug, Clone, PartialEq)]
pub enum MaintenanceMode {
    /// Report per-group validation completeness, worst first
    HealthCheck,

    /// Recover every group below the completeness threshold
    AutoDetectAndRecover,

    /// Recover one named group
    RecoverGroup(GroupKey),
}
