//! End-to-end orchestration tests.
//!
//! Cover the pipeline guarantees: partial failure containment, timeout
//! handling on the forecast collaborator, deterministic aggregation order,
//! the all-keyword and fallback routing paths, and report publication.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use plantmind::collaborators::{
    AdvisoryWriter, ForecastModel, LinearForecast, MemorySink, NullAdvisory,
};
use plantmind::config::{FallbackPolicy, PlantConfig};
use plantmind::pipeline::{UnitOutcome, UnitResult};
use plantmind::{
    AnalysisRequest, DecisionError, DecisionUnit, Orchestrator, PipelineState, PlantSnapshot,
};

/// Forecast collaborator that always fails.
struct BrokenForecast;

#[async_trait]
impl ForecastModel for BrokenForecast {
    async fn forecast(
        &self,
        _history: &[f64],
        _current: f64,
        _horizon_hours: u32,
    ) -> Result<f64, DecisionError> {
        Err(DecisionError::ExternalFailure(
            "model server unreachable".to_string(),
        ))
    }
}

/// Advisory writer that always fails; a failing advisory must never fail
/// the run.
struct BrokenAdvisory;

#[async_trait]
impl AdvisoryWriter for BrokenAdvisory {
    async fn explain(&self, _context: &str) -> Result<String, DecisionError> {
        Err(DecisionError::ExternalFailure("no tokens left".to_string()))
    }
}

fn orchestrator_with(
    forecast: Arc<dyn ForecastModel>,
    sink: Arc<MemorySink>,
) -> Orchestrator {
    Orchestrator::with_defaults(forecast, Arc::new(NullAdvisory), sink)
}

#[tokio::test]
async fn test_forecast_timeout_is_contained_as_partial_failure() {
    let sink = Arc::new(MemorySink::default());
    // Forecast takes 300 ms against a 20 ms budget.
    let orch = orchestrator_with(Arc::new(LinearForecast::with_delay(300)), Arc::clone(&sink))
        .with_external_timeout(Duration::from_millis(20));

    let result = orch
        .run(AnalysisRequest::new("it-timeout", "full analysis"))
        .await;

    assert_eq!(result.state, PipelineState::Completed);
    assert!(result.partial);
    assert_eq!(result.units.len(), DecisionUnit::ALL.len());

    // Toxicity failed with the timeout marker; the other units delivered.
    for u in &result.units {
        match u.unit {
            DecisionUnit::Toxicity => assert!(matches!(
                &u.outcome,
                UnitOutcome::Failed(DecisionError::ExternalTimeout { .. })
            )),
            _ => assert!(u.outcome.is_success(), "{} must succeed", u.unit),
        }
    }

    // The report still went out, flagged partial.
    let published = sink.published();
    assert_eq!(published.len(), 1);
    assert!(published[0].partial);
    assert!(published[0].body.contains("external_timeout"));
}

#[tokio::test]
async fn test_forecast_failure_is_contained_as_partial_failure() {
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator_with(Arc::new(BrokenForecast), Arc::clone(&sink));

    let result = orch
        .run(AnalysisRequest::new("it-broken", "toxicity forecast and mbr check"))
        .await;

    assert!(result.is_completed());
    assert!(result.partial);
    let toxicity = &result.units[0];
    assert_eq!(toxicity.unit, DecisionUnit::Toxicity);
    assert!(matches!(
        &toxicity.outcome,
        UnitOutcome::Failed(DecisionError::ExternalFailure(_))
    ));
    let mbr = &result.units[1];
    assert_eq!(mbr.unit, DecisionUnit::Mbr);
    assert!(mbr.outcome.is_success());
}

#[tokio::test]
async fn test_aggregation_order_is_reproducible() {
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator_with(Arc::new(LinearForecast::default()), Arc::clone(&sink));

    for i in 0..5 {
        let result = orch
            .run(AnalysisRequest::new(format!("it-order-{i}"), "full analysis"))
            .await;
        let order: Vec<_> = result.units.iter().map(|u| u.unit).collect();
        assert_eq!(order, DecisionUnit::ALL.to_vec(), "run {i}");
    }

    for report in sink.published() {
        assert_eq!(report.unit_order, DecisionUnit::ALL.to_vec());
    }
}

#[tokio::test]
async fn test_unclassified_fallback_runs_all_units() {
    let mut cfg = PlantConfig::default();
    cfg.pipeline.fallback = FallbackPolicy::AllUnits;

    let sink = Arc::new(MemorySink::default());
    let orch = match Orchestrator::from_config(
        &cfg,
        Arc::new(LinearForecast::default()),
        Arc::new(NullAdvisory),
        sink.clone(),
    ) {
        Ok(o) => o,
        Err(e) => panic!("orchestrator must start: {e}"),
    };

    let result = orch
        .run(AnalysisRequest::new("it-fallback", "hello there"))
        .await;
    assert!(result.is_completed());
    assert_eq!(result.units.len(), DecisionUnit::ALL.len());
}

#[tokio::test]
async fn test_failed_advisory_never_fails_the_run() {
    let sink = Arc::new(MemorySink::default());
    let orch = Orchestrator::with_defaults(
        Arc::new(LinearForecast::default()),
        Arc::new(BrokenAdvisory),
        sink.clone(),
    );

    let result = orch
        .run(AnalysisRequest::new("it-advisory", "membrane check"))
        .await;
    assert!(result.is_completed());
    assert!(!result.partial);
    assert!(result.advisory.is_none());
}

#[tokio::test]
async fn test_out_of_range_snapshot_fails_only_affected_units() {
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator_with(Arc::new(LinearForecast::default()), Arc::clone(&sink));

    // TMP sensor reads an impossible value; toxicity and efficiency are fine.
    let snapshot = PlantSnapshot {
        membrane_pressure_kpa: 250.0,
        ..PlantSnapshot::nominal()
    };
    let result = orch
        .run(
            AnalysisRequest::new("it-oor", "full analysis").with_snapshot(snapshot),
        )
        .await;

    assert!(result.is_completed());
    assert!(result.partial);
    for u in &result.units {
        match u.unit {
            DecisionUnit::Mbr => assert!(matches!(
                &u.outcome,
                UnitOutcome::Failed(DecisionError::OutOfRangeReading { .. })
            )),
            _ => assert!(u.outcome.is_success(), "{} must succeed", u.unit),
        }
    }
}

#[tokio::test]
async fn test_concurrent_requests_share_one_orchestrator() {
    let sink = Arc::new(MemorySink::default());
    let orch = Arc::new(orchestrator_with(
        Arc::new(LinearForecast::default()),
        Arc::clone(&sink),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let orch = Arc::clone(&orch);
        handles.push(tokio::spawn(async move {
            orch.run(AnalysisRequest::new(format!("it-conc-{i}"), "full analysis"))
                .await
        }));
    }
    for handle in handles {
        let result = match handle.await {
            Ok(r) => r,
            Err(e) => panic!("task failed: {e}"),
        };
        assert!(result.is_completed());
        assert!(!result.partial);
    }
    assert_eq!(sink.published().len(), 8);
}

#[tokio::test]
async fn test_toxicity_unit_classifies_the_forecast_not_the_current_value() {
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator_with(Arc::new(LinearForecast::default()), Arc::clone(&sink));

    // Current toxicity is low, but the history climbs 0.1/step so the
    // 24-hour forecast lands in the high band.
    let request = AnalysisRequest::new("it-trend", "predict toxicity")
        .with_history(vec![0.6, 0.7, 0.8, 0.9, 1.0])
        .with_snapshot(PlantSnapshot {
            toxicity_index: 1.0,
            ..PlantSnapshot::nominal()
        });

    let result = orch.run(request).await;
    assert!(result.is_completed());
    match &result.units[0].outcome {
        UnitOutcome::Succeeded(UnitResult::Toxicity { predicted, risk }) => {
            assert!((predicted - 3.4).abs() < 1e-9, "predicted {predicted}");
            assert_eq!(*risk, plantmind::RiskLevel::High);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
