//! Integration tests for the full analysis run.
//!
//! These tests drive `process_units` end to end:
//! 1. Persist source units
//! 2. Run the extraction/classification/retry loop per unit
//! 3. Reconcile accepted payloads into the store
//! 4. Collect the run summary

use std::sync::Arc;

use analysis::testing::MockGenerator;
use analysis::types::response::RawResponse;
use analysis::{
    process_units, FailureKind, MemoryStore, PipelineConfig, SourceUnit, UnitKey, UnitStore,
};

fn unit(book: &str, chapter: u32, verse: u32, text: &str) -> SourceUnit {
    SourceUnit::new(UnitKey::new(book, chapter, verse), text)
}

const ROCK_FINDING: &str =
    r#"[{"type":"metaphor","text":"my rock","explanation":"God as a place of refuge"}]"#;
const EAGLE_FINDING: &str =
    r#"[{"type":"simile","text":"wings like eagles","explanation":"renewal compared to flight"}]"#;
const EAGLE_CUT: &str = r#"[{"type":"simile","text":"wings like ea"#;

#[tokio::test]
async fn test_mixed_batch_with_fallback_recovery() {
    // One clean unit; one that truncates on the primary tier and
    // succeeds on the fallback
    let generator = Arc::new(
        MockGenerator::new()
            .with_response("my rock", RawResponse::normal(ROCK_FINDING))
            .with_script(
                "wings like eagles",
                vec![
                    RawResponse::length_limited(EAGLE_CUT),
                    RawResponse::normal(EAGLE_FINDING),
                ],
            ),
    );
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig::default();

    let units = vec![
        unit("Psalms", 18, 2, "The Lord is my rock"),
        unit("Isaiah", 40, 31, "they shall mount up with wings like eagles"),
    ];

    let summary = process_units(units, &config, Arc::clone(&generator), Arc::clone(&store))
        .await
        .unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.units_processed, 2);
    assert_eq!(summary.units_with_findings, 2);
    assert_eq!(summary.findings_written, 2);
    assert_eq!(store.count_findings().await.unwrap(), 2);

    // The recovered unit carries its full audit trail
    let eagle_unit = store
        .get_source_unit(&UnitKey::new("Isaiah", 40, 31))
        .await
        .unwrap()
        .unwrap();
    let findings = store.findings_for_unit(eagle_unit.id).await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].provenance.model, "large");
    assert_eq!(findings[0].provenance.attempts, 2);
    assert!(findings[0].kinds.simile.is_yes());

    let rock_unit = store
        .get_source_unit(&UnitKey::new("Psalms", 18, 2))
        .await
        .unwrap()
        .unwrap();
    let findings = store.findings_for_unit(rock_unit.id).await.unwrap();
    assert_eq!(findings[0].provenance.model, "standard");
    assert_eq!(findings[0].provenance.attempts, 1);
}

#[tokio::test]
async fn test_one_failure_never_stops_the_run() {
    // The eagle unit truncates on every tier; the rock unit is clean
    let generator = Arc::new(
        MockGenerator::new()
            .with_response("my rock", RawResponse::normal(ROCK_FINDING))
            .with_response("wings like eagles", RawResponse::normal(EAGLE_CUT)),
    );
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig::default();

    let units = vec![
        unit("Psalms", 18, 2, "The Lord is my rock"),
        unit("Isaiah", 40, 31, "they shall mount up with wings like eagles"),
    ];

    let summary = process_units(units, &config, Arc::clone(&generator), Arc::clone(&store))
        .await
        .unwrap();

    assert!(!summary.is_success());
    assert_eq!(summary.units_processed, 2);
    assert_eq!(summary.units_with_findings, 1);
    assert_eq!(summary.failed_units.len(), 1);
    assert_eq!(summary.failed_units[0].0, UnitKey::new("Isaiah", 40, 31));
    assert_eq!(summary.failed_units[0].1, FailureKind::Truncated);

    // The failed unit's row exists, but no partial findings do
    let eagle_unit = store
        .get_source_unit(&UnitKey::new("Isaiah", 40, 31))
        .await
        .unwrap()
        .unwrap();
    assert!(store.findings_for_unit(eagle_unit.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let generator =
        Arc::new(MockGenerator::new().with_default_response(RawResponse::normal(EAGLE_CUT)));
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig::default();

    let units = vec![unit("Isaiah", 40, 31, "wings like eagles")];
    let summary = process_units(units, &config, Arc::clone(&generator), store)
        .await
        .unwrap();

    assert_eq!(summary.failed_units.len(), 1);
    assert!(generator.calls().len() as u32 <= config.retry.max_attempts);
}

#[tokio::test]
async fn test_empty_and_reject_responses_are_accepted() {
    let reject_prose = "This verse is a genealogical record, listing descendants by name; \
                        after reading it closely my conclusion is that nothing in it is \
                        figurative, so there are no findings to report.\n\n[]";
    let generator = Arc::new(
        MockGenerator::new()
            .with_response("begat", RawResponse::normal(reject_prose))
            .with_response("numbered the people", RawResponse::normal("[]")),
    );
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig::default();

    let units = vec![
        unit("Genesis", 5, 6, "And Seth lived an hundred and five years, and begat Enos"),
        unit("Numbers", 1, 19, "so he numbered the people in the wilderness"),
    ];

    let summary = process_units(units, &config, Arc::clone(&generator), Arc::clone(&store))
        .await
        .unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.units_empty, 2);
    assert_eq!(summary.findings_written, 0);
    // Accepted empties consume exactly one attempt each
    assert_eq!(generator.calls().len(), 2);
    // Units persist even when no findings do
    assert_eq!(store.count_units().await.unwrap(), 2);
}

#[tokio::test]
async fn test_unavailable_fallback_surfaces_as_terminal_failure() {
    let generator = Arc::new(
        MockGenerator::new()
            .with_response("wings like eagles", RawResponse::normal(EAGLE_CUT))
            .with_unavailable_model("large", "model not found"),
    );
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig::default();

    let units = vec![unit("Isaiah", 40, 31, "wings like eagles")];
    let summary = process_units(units, &config, Arc::clone(&generator), store)
        .await
        .unwrap();

    match &summary.failed_units[0].1 {
        FailureKind::FallbackUnavailable { tier, .. } => assert_eq!(tier, "large"),
        other => panic!("expected FallbackUnavailable, got {other:?}"),
    }
    // One truncated attempt plus the rejected fallback call, no loop
    assert_eq!(generator.calls().len(), 2);
}

#[tokio::test]
async fn test_larger_batch_under_bounded_concurrency() {
    let generator = Arc::new(
        MockGenerator::new().with_default_response(RawResponse::normal(ROCK_FINDING)),
    );
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig::default().with_concurrency(2);

    let units: Vec<SourceUnit> = (1..=20)
        .map(|v| unit("Psalms", 18, v, "The Lord is my rock"))
        .collect();

    let summary = process_units(units, &config, generator, Arc::clone(&store))
        .await
        .unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.units_processed, 20);
    assert_eq!(store.count_units().await.unwrap(), 20);
    assert_eq!(store.count_findings().await.unwrap(), 20);
}
