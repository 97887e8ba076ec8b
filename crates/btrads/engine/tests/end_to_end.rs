//! Full traversals of the reference graph

use btrads_engine::*;
use btrads_types::*;
use chrono::NaiveDate;
use std::sync::Arc;

fn engine_with(extractor: StaticExtractor, config: EngineConfig) -> (CaseOrchestrator, Arc<InMemoryCaseStore>) {
    let store = Arc::new(InMemoryCaseStore::new());
    let registry = ExtractorRegistry::new().with_all(EXTRACTOR_REFS, Arc::new(extractor));
    let orchestrator = CaseOrchestrator::builder(Arc::new(reference_graph().unwrap()), registry)
        .with_config(config)
        .with_sink(store.clone())
        .build()
        .unwrap();
    (orchestrator, store)
}

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.extraction.retry_backoff_ms = 1;
    config
}

/// Unsure answers on every rule-backed node, so the rules decide
fn defer_to_rules(extractor: StaticExtractor) -> StaticExtractor {
    [IMAGING_ASSESSMENT, TIME_SINCE_XRT, WHAT_IS_WORSE, HOW_MUCH_WORSE]
        .into_iter()
        .fold(extractor, |e, node| e.answer(node, ExtractedValue::Unknown, 0.5))
}

fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

#[tokio::test]
async fn improved_without_medications_is_1a() {
    let extractor = StaticExtractor::new("scripted")
        .answer(SUITABLE_PRIOR, ExtractedValue::Flag(true), 0.9)
        .answer(IMAGING_ASSESSMENT, ExtractedValue::category("improved"), 0.8)
        .answer(
            MEDICATIONS,
            ExtractedValue::Medication(MedicationStatus::new(SteroidStatus::None, AvastinStatus::None)),
            0.85,
        );
    let (orchestrator, store) = engine_with(extractor, fast_config());
    let patient = PatientRecord::new("p-001")
        .with_change_pct(-48.0, -25.0)
        .with_ground_truth(BtradsScore::Bt1a);

    let result = orchestrator.run(&patient).await;

    assert_eq!(result.score, BtradsScore::Bt1a);
    assert_eq!(result.status, CaseStatus::Completed);
    assert_eq!(result.terminal_node, NodeId::new(OUTCOME_BT_1A));
    assert_eq!(
        result.decisions(),
        vec![
            (&NodeId::new(SUITABLE_PRIOR), "yes"),
            (&NodeId::new(IMAGING_ASSESSMENT), "improved"),
            (&NodeId::new(MEDICATIONS), "neither"),
        ]
    );
    assert_eq!(result.path.len(), 4);
    assert_eq!(result.path.last().unwrap().decision, None);

    // imaging decided by rule at fixed confidence
    let imaging = &result.path[1];
    assert_eq!(imaging.confidence, Some(0.95));
    assert!((result.confidence_score - (0.9 + 0.95 + 0.85) / 3.0).abs() < 1e-9);
    assert!(result.reasoning.contains("FLAIR Decreased -48.0% and ENH Decreased -25.0%"));
    assert_eq!(result.reasoning.matches(" → ").count(), 2);

    assert_eq!(result.derived_score, Some(BtradsScore::Bt1a));
    assert_eq!(result.matches_ground_truth(), Some(true));
    assert!(result.warnings.is_empty());
    assert!(!result.is_degraded());

    let events = store.events_for(&result.case_id);
    assert_eq!(events.len(), 3);
    assert_eq!(store.result_for(&result.case_id), Some(result));
}

#[tokio::test]
async fn all_extractors_failing_still_scores() {
    let extractor = StaticExtractor::new("broken")
        .fail_unscripted(ExtractorError::Unavailable("model offline".into()));
    let (orchestrator, _) = engine_with(extractor, fast_config());

    let result = orchestrator.run(&PatientRecord::new("p-002")).await;

    // prior → default imaging → default BT-2
    assert_eq!(result.score, BtradsScore::Bt2);
    assert_eq!(result.status, CaseStatus::Completed);
    assert_eq!(result.confidence_score, 0.0);
    assert_eq!(result.annotations.len(), 2);
    for annotation in &result.annotations {
        assert_eq!(annotation.info.clinical_impact, "Cannot proceed with this BT-RADS node");
    }
    assert!(result.is_degraded());
}

#[tokio::test]
async fn failed_extraction_ignores_a_decisive_rule() {
    let extractor = StaticExtractor::new("broken")
        .fail_unscripted(ExtractorError::Unavailable("model offline".into()));
    let (orchestrator, _) = engine_with(extractor, fast_config());
    // volumes alone would make imaging "improved"
    let patient = PatientRecord::new("p-010").with_change_pct(-48.0, -25.0);

    let result = orchestrator.run(&patient).await;

    assert_eq!(result.score, BtradsScore::Bt2);
    assert_eq!(result.terminal_node, NodeId::new(OUTCOME_BT_2));
    assert_eq!(result.path[1].node_id, NodeId::new(IMAGING_ASSESSMENT));
    assert_eq!(result.path[1].decision.as_deref(), Some("unknown"));
    assert_eq!(result.path[1].confidence, Some(0.0));
    assert_eq!(result.confidence_score, 0.0);
    assert_eq!(result.annotations.len(), 2);
}

#[tokio::test]
async fn retryable_failures_are_retried() {
    let extractor = Arc::new(
        StaticExtractor::new("flaky")
            .flaky(
                SUITABLE_PRIOR,
                2,
                ExtractorError::Timeout { after_ms: 10 },
                ExtractedValue::Flag(false),
                0.9,
            ),
    );
    let registry = ExtractorRegistry::new().with_all(EXTRACTOR_REFS, extractor.clone());
    let orchestrator = CaseOrchestrator::builder(Arc::new(reference_graph().unwrap()), registry)
        .with_config(fast_config())
        .build()
        .unwrap();

    let result = orchestrator.run(&PatientRecord::new("p-003")).await;

    assert_eq!(result.score, BtradsScore::Bt0);
    assert_eq!(extractor.calls(&NodeId::new(SUITABLE_PRIOR)), 3);
}

#[tokio::test]
async fn retries_stop_at_max_attempts() {
    let extractor = Arc::new(
        StaticExtractor::new("flaky")
            .flaky(
                SUITABLE_PRIOR,
                5,
                ExtractorError::Malformed("not json".into()),
                ExtractedValue::Flag(false),
                0.9,
            ),
    );
    let registry = ExtractorRegistry::new().with_all(EXTRACTOR_REFS, extractor.clone());
    let orchestrator = CaseOrchestrator::builder(Arc::new(reference_graph().unwrap()), registry)
        .with_config(fast_config())
        .build()
        .unwrap();

    let result = orchestrator.run(&PatientRecord::new("p-004")).await;

    assert_eq!(extractor.calls(&NodeId::new(SUITABLE_PRIOR)), 3);
    assert_eq!(result.path[0].decision.as_deref(), Some("unknown"));
}

#[tokio::test]
async fn slow_extractor_times_out() {
    let extractor = StaticExtractor::new("slow")
        .answer(SUITABLE_PRIOR, ExtractedValue::Flag(false), 0.9)
        .with_delay(std::time::Duration::from_millis(200));
    let mut config = fast_config();
    config.extraction.timeout_ms = 10;
    config.extraction.max_attempts = 1;
    let (orchestrator, _) = engine_with(extractor, config);

    let result = orchestrator.run(&PatientRecord::new("p-005")).await;

    // timeout on prior → imaging default; imaging also times out → BT-2
    assert_eq!(result.score, BtradsScore::Bt2);
    assert!(result.annotations[0].info.reason.contains("timed out"));
}

#[tokio::test]
async fn worsening_within_radiation_window_is_3a() {
    let extractor = defer_to_rules(
        StaticExtractor::new("scripted").answer(SUITABLE_PRIOR, ExtractedValue::Flag(true), 0.9),
    );
    let (orchestrator, _) = engine_with(extractor, fast_config());
    let patient = PatientRecord::new("p-006")
        .with_dates(date(2024, 1, 1), date(2024, 3, 1), date(2024, 1, 15))
        .with_flair_volumes(10.0, 14.0)
        .with_enhancement_volumes(2.0, 3.0);

    let result = orchestrator.run(&patient).await;

    assert_eq!(result.days_since_radiation, Some(46));
    assert_eq!(result.score, BtradsScore::Bt3a);
    assert_eq!(result.derived_score, Some(BtradsScore::Bt3a));
}

#[tokio::test]
async fn major_worsening_beyond_window_is_4() {
    let extractor = defer_to_rules(
        StaticExtractor::new("scripted").answer(SUITABLE_PRIOR, ExtractedValue::Flag(true), 0.9),
    );
    let (orchestrator, _) = engine_with(extractor, fast_config());
    let patient = PatientRecord::new("p-007")
        .with_dates(date(2023, 6, 1), date(2024, 3, 1), date(2023, 1, 10))
        .with_flair_volumes(10.0, 15.0)
        .with_enhancement_volumes(2.0, 3.5);

    let result = orchestrator.run(&patient).await;

    assert_eq!(result.score, BtradsScore::Bt4);
    let keys: Vec<&str> = result.decisions().into_iter().map(|(_, k)| k).collect();
    assert_eq!(keys, ["yes", "worse", "beyond_90_days", "flair_and_enh", "major"]);
    assert!(result.path.iter().skip(1).all(|s| s.decision.is_none() || s.confidence == Some(0.95)));
}

#[tokio::test]
async fn minor_worsening_without_progression_is_3c() {
    let extractor = defer_to_rules(
        StaticExtractor::new("scripted")
            .answer(SUITABLE_PRIOR, ExtractedValue::Flag(true), 0.9)
            .answer(PROGRESSIVE, ExtractedValue::Flag(false), 0.8),
    );
    let (orchestrator, _) = engine_with(extractor, fast_config());
    let patient = PatientRecord::new("p-008")
        .with_dates(date(2023, 6, 1), date(2024, 3, 1), date(2023, 1, 10))
        .with_change_pct(25.0, 20.0);

    let result = orchestrator.run(&patient).await;

    assert_eq!(result.score, BtradsScore::Bt3c);
    assert_eq!(result.derived_score, Some(BtradsScore::Bt3c));
}

#[tokio::test]
async fn keyword_extractor_drives_a_case() {
    let registry = ExtractorRegistry::new().with_all(EXTRACTOR_REFS, Arc::new(KeywordExtractor::new()));
    let orchestrator = CaseOrchestrator::builder(Arc::new(reference_graph().unwrap()), registry)
        .with_config(fast_config())
        .build()
        .unwrap();
    let patient = PatientRecord::new("p-009")
        .with_note("MRI compared to prior study. Patient continuing Avastin, first study after start.")
        .with_change_pct(-35.0, -40.0);

    let result = orchestrator.run(&patient).await;

    assert_eq!(result.score, BtradsScore::Bt1b);
    assert!(result.medication_effects.is_some());
    assert!(result.volume_assessment.is_some());
}

#[tokio::test(start_paused = true)]
async fn batch_never_waits_for_a_validator() {
    let extractor = StaticExtractor::new("scripted")
        .answer(SUITABLE_PRIOR, ExtractedValue::Flag(true), 0.9)
        .answer(IMAGING_ASSESSMENT, ExtractedValue::category("unchanged"), 0.9);
    let mut config = fast_config();
    config.validation.mode = GateMode::manual();
    config.validation.timeout_secs = None;
    let (orchestrator, _) = engine_with(extractor, config);
    let runner = BatchRunner::new(Arc::new(orchestrator));
    let records = vec![PatientRecord::new("p-011"), PatientRecord::new("p-012")];

    let report = tokio::time::timeout(std::time::Duration::from_secs(300), runner.run(records))
        .await
        .expect("batch blocked on the validation gate");

    assert_eq!(report.summary.completed, 2);
    assert!(report.results.iter().all(|r| r.score == BtradsScore::Bt2));
    assert!(report.results.iter().all(|r| r.total_validations == 0));
}
