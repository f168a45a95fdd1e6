//! Run driver: bounded-concurrency processing across source units.
//!
//! Within one unit the loop is strictly sequential; across units,
//! processing is embarrassingly parallel. Each worker's store write is
//! one independent transaction scoped to its own unit's records, so no
//! cross-worker locking exists. A terminal failure on one unit never
//! affects the others.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::{AnalysisError, Result};
use crate::pipeline::classify::ResponseClass;
use crate::pipeline::orchestrate::{analyze_unit, FailureKind, UnitFailure};
use crate::pipeline::reconcile::reconcile_unit;
use crate::traits::generator::Generator;
use crate::traits::store::UnitStore;
use crate::types::config::PipelineConfig;
use crate::types::unit::{SourceUnit, UnitKey};

/// Summary of one analysis run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Units processed
    pub units_processed: usize,

    /// Units accepted with at least one finding
    pub units_with_findings: usize,

    /// Units accepted with a legitimately empty result
    pub units_empty: usize,

    /// Findings written to the store
    pub findings_written: usize,

    /// Units that reached terminal failure, with the failure kind
    pub failed_units: Vec<(UnitKey, FailureKind)>,
}

impl RunSummary {
    /// True when no unit reached terminal failure.
    ///
    /// The run's exit status should reflect this.
    pub fn is_success(&self) -> bool {
        self.failed_units.is_empty()
    }
}

/// Per-unit outcome collected by the run driver.
enum UnitOutcome {
    Findings(usize),
    Empty,
    Failed(UnitFailure),
}

/// Process a batch of units against the canonical store.
///
/// Concurrency is bounded by `config.concurrency`; each unit
/// independently drives its own extraction/classification/retry loop.
pub async fn process_units<G, S>(
    units: Vec<SourceUnit>,
    config: &PipelineConfig,
    generator: Arc<G>,
    store: Arc<S>,
) -> Result<RunSummary>
where
    G: Generator + 'static,
    S: UnitStore + 'static,
{
    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut handles = Vec::with_capacity(units.len());

    info!(
        units = units.len(),
        concurrency = config.concurrency,
        "starting analysis run"
    );

    for unit in units {
        let semaphore = Arc::clone(&semaphore);
        let generator = Arc::clone(&generator);
        let store = Arc::clone(&store);
        let config = config.clone();

        handles.push(tokio::spawn(async move {
            // Only fails if the semaphore is closed, which this driver
            // never does; a worker-pool condition, not a storage one
            let _permit = semaphore.acquire().await.map_err(|e| AnalysisError::Config {
                reason: format!("worker pool closed: {e}"),
            })?;
            let outcome = process_one(unit, &config, generator.as_ref(), store.as_ref()).await?;
            Ok::<UnitOutcome, AnalysisError>(outcome)
        }));
    }

    let mut summary = RunSummary::default();
    for joined in futures::future::join_all(handles).await {
        let outcome = joined.map_err(|e| AnalysisError::Config {
            reason: format!("analysis worker terminated abnormally: {e}"),
        })??;
        summary.units_processed += 1;
        match outcome {
            UnitOutcome::Findings(count) => {
                summary.units_with_findings += 1;
                summary.findings_written += count;
            }
            UnitOutcome::Empty => summary.units_empty += 1,
            UnitOutcome::Failed(failure) => {
                summary.failed_units.push((failure.key, failure.kind));
            }
        }
    }

    info!(
        processed = summary.units_processed,
        with_findings = summary.units_with_findings,
        empty = summary.units_empty,
        findings = summary.findings_written,
        failed = summary.failed_units.len(),
        "analysis run complete"
    );
    for (key, kind) in &summary.failed_units {
        warn!(unit = %key, failure = %kind, "unit reached terminal failure");
    }

    Ok(summary)
}

/// Drive one unit end to end: persist the unit, run the retry loop,
/// reconcile the accepted result.
async fn process_one<G: Generator, S: UnitStore>(
    mut unit: SourceUnit,
    config: &PipelineConfig,
    generator: &G,
    store: &S,
) -> Result<UnitOutcome> {
    unit.id = store.insert_source_unit(&unit.key, &unit.text).await?;

    let accepted = match analyze_unit(&unit, generator, &config.tiers, &config.retry).await {
        Ok(accepted) => accepted,
        Err(failure) => return Ok(UnitOutcome::Failed(failure)),
    };

    if matches!(
        accepted.class,
        ResponseClass::CleanEmpty | ResponseClass::GenuineReject
    ) {
        return Ok(UnitOutcome::Empty);
    }

    match reconcile_unit(store, &unit, &accepted).await {
        Ok(0) => Ok(UnitOutcome::Empty),
        Ok(count) => Ok(UnitOutcome::Findings(count)),
        Err(failure) => Ok(UnitOutcome::Failed(failure)),
    }
}
