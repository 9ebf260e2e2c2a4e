//! Orchestration pipeline with structured tracing.
//!
//! ## Responsibility
//! Drive one request through
//! `Received → Routed → PerUnitProcessing(n) → Aggregated → Completed`,
//! with a terminal `Failed` reachable only when routing yields nothing and
//! no fallback policy applies. Selected units fan out concurrently (they
//! share no mutable state and are pure given the snapshot); a single unit's
//! failure is downgraded to a partial-result marker and the run continues.
//! Aggregation always follows the selection's declared order regardless of
//! completion order.
//!
//! ## Span Fields (every unit)
//!
//! | Field | Description |
//! |-------|-------------|
//! | `request_id` | Request this unit run belongs to |
//! | `unit` | Decision unit name |
//! | `duration_ms` | Recorded after processing completes |
//! | `outcome` | `"ok"`, `"err"`, or `"skipped"` |
//! | `error_kind` | Recorded only on error — the taxonomy label |
//!
//! ## Sensitive Fields — NEVER Logged
//!
//! - Operator request text (`request.text`)
//! - Advisory prose returned by the LLM collaborator

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument, Span};

use crate::classifier::{ReadingCategory, RiskClassifier, RiskLevel};
use crate::collaborators::{AdvisoryWriter, ForecastModel, ReportSink};
use crate::config::{ConfigError, FallbackPolicy, PlantConfig};
use crate::diagnostic::{DiagnosticEvaluator, DiagnosticReport};
use crate::metrics;
use crate::router::{DecisionUnit, IntentRouter, IntentSelection, MatchKind};
use crate::strategy::{ControlStrategyEngine, Subsystem, SubsystemCommand};
use crate::{AnalysisRequest, DecisionError, PlantSnapshot, RequestId};

/// Pipeline progression for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Request accepted, not yet routed.
    Received,
    /// Intent selection produced.
    Routed,
    /// `n` units dispatched and in flight.
    PerUnitProcessing(usize),
    /// All unit outcomes collected in selection order.
    Aggregated,
    /// Terminal: results handed outward (possibly with partial failures).
    Completed,
    /// Terminal: no unit could be dispatched.
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Received => f.write_str("received"),
            Self::Routed => f.write_str("routed"),
            Self::PerUnitProcessing(n) => write!(f, "processing({n})"),
            Self::Aggregated => f.write_str("aggregated"),
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Successful payload of one decision unit.
#[derive(Debug, Clone)]
pub enum UnitResult {
    /// Forecast-then-classify output of the toxicity unit.
    Toxicity {
        /// Predicted toxicity index at the requested horizon.
        predicted: f64,
        /// Risk classification of the prediction.
        risk: RiskLevel,
    },
    /// A setpoint command from one of the control units.
    Command(SubsystemCommand),
    /// The composite health report from the diagnostic unit.
    Diagnostic(DiagnosticReport),
}

/// Terminal outcome of one dispatched unit.
#[derive(Debug, Clone)]
pub enum UnitOutcome {
    /// The unit produced its result.
    Succeeded(UnitResult),
    /// The unit failed; the error kind is reported, the run continues.
    Failed(DecisionError),
    /// Cancellation stopped the unit before it was dispatched.
    Skipped,
}

impl UnitOutcome {
    /// True for [`UnitOutcome::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// One unit's entry in the aggregated result, in selection order.
#[derive(Debug, Clone)]
pub struct UnitReport {
    /// The decision unit that ran (or was skipped).
    pub unit: DecisionUnit,
    /// Its terminal outcome.
    pub outcome: UnitOutcome,
}

/// Aggregated outcome of one orchestration pass.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// The request this result answers.
    pub request_id: RequestId,
    /// Terminal state: [`PipelineState::Completed`] or
    /// [`PipelineState::Failed`].
    pub state: PipelineState,
    /// True when at least one unit failed or was skipped.
    pub partial: bool,
    /// Set only in the `Failed` state.
    pub failure: Option<DecisionError>,
    /// Per-unit reports in selection order.
    pub units: Vec<UnitReport>,
    /// Snapshot the decisions were computed from.
    pub snapshot: PlantSnapshot,
    /// Advisory prose from the LLM collaborator, when it answered in time.
    pub advisory: Option<String>,
    /// Where the report sink published, when it did.
    pub report_location: Option<String>,
    /// Completion timestamp, UTC.
    pub completed_at: DateTime<Utc>,
}

impl PipelineResult {
    /// True when the pipeline reached `Completed` (partial or not).
    pub fn is_completed(&self) -> bool {
        self.state == PipelineState::Completed
    }

    /// The setpoint commands that were produced, in selection order.
    pub fn commands(&self) -> Vec<&SubsystemCommand> {
        self.units
            .iter()
            .filter_map(|u| match &u.outcome {
                UnitOutcome::Succeeded(UnitResult::Command(cmd)) => Some(cmd),
                _ => None,
            })
            .collect()
    }
}

/// The orchestrator: router, decision core, and collaborator seams.
///
/// All tables are immutable after construction, so one orchestrator may
/// serve many concurrent requests without locking. Collaborator calls are
/// bounded by `external_timeout`; a timeout marks the affected unit as a
/// partial failure and is never retried here.
pub struct Orchestrator {
    classifier: Arc<RiskClassifier>,
    engine: Arc<ControlStrategyEngine>,
    evaluator: Arc<DiagnosticEvaluator>,
    router: IntentRouter,
    forecast: Arc<dyn ForecastModel>,
    advisory: Arc<dyn AdvisoryWriter>,
    sink: Arc<dyn ReportSink>,
    external_timeout: Duration,
    fallback: FallbackPolicy,
}

impl Orchestrator {
    /// Build an orchestrator from a validated [`PlantConfig`] and the three
    /// collaborator implementations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any table fails its construction-time
    /// validation; the orchestrator refuses to start rather than produce
    /// undefined setpoints at runtime.
    pub fn from_config(
        cfg: &PlantConfig,
        forecast: Arc<dyn ForecastModel>,
        advisory: Arc<dyn AdvisoryWriter>,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self, ConfigError> {
        let evaluator = DiagnosticEvaluator::new(cfg.diagnostics.weights).map_err(|e| {
            ConfigError::InvalidField {
                field: "diagnostics.weights".to_string(),
                value: String::new(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            classifier: Arc::new(RiskClassifier::from_config(&cfg.classifier)?),
            engine: Arc::new(ControlStrategyEngine::from_config(&cfg.strategy)?),
            evaluator: Arc::new(evaluator),
            router: IntentRouter::from_config(&cfg.router)?,
            forecast,
            advisory,
            sink,
            external_timeout: Duration::from_millis(cfg.pipeline.external_timeout_ms),
            fallback: cfg.pipeline.fallback,
        })
    }

    /// Orchestrator over the default plant tables.
    pub fn with_defaults(
        forecast: Arc<dyn ForecastModel>,
        advisory: Arc<dyn AdvisoryWriter>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        match Self::from_config(&PlantConfig::default(), forecast, advisory, sink) {
            Ok(orchestrator) => orchestrator,
            Err(_) => unreachable!("default plant config is well-formed"),
        }
    }

    /// Override the external-collaborator time budget.
    pub fn with_external_timeout(mut self, timeout: Duration) -> Self {
        self.external_timeout = timeout;
        self
    }

    /// Process one request to completion.
    pub async fn run(&self, request: AnalysisRequest) -> PipelineResult {
        self.run_with_cancel(request, Arc::new(AtomicBool::new(false)))
            .await
    }

    /// Process one request, honoring a cancellation flag.
    ///
    /// Once the flag is set no further unit is dispatched; units already
    /// in flight finish (pure computations are cheap and side-effect-free)
    /// and undispatched units are recorded as skipped.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub async fn run_with_cancel(
        &self,
        request: AnalysisRequest,
        cancel: Arc<AtomicBool>,
    ) -> PipelineResult {
        let request_id = request.id.clone();
        info!(
            target: "plantmind::pipeline",
            request_id = %request_id,
            state = %PipelineState::Received,
            "request received"
        );

        // Received → Routed
        let selection = self.router.route(&request.text);
        let selection = if selection.is_unclassified() {
            match self.fallback {
                FallbackPolicy::AllUnits => {
                    info!(
                        target: "plantmind::pipeline",
                        request_id = %request_id,
                        "request unclassified, fallback to all units"
                    );
                    IntentSelection::all_units(MatchKind::Fallback)
                }
                FallbackPolicy::Reject => {
                    warn!(
                        target: "plantmind::pipeline",
                        request_id = %request_id,
                        "request unclassified, no fallback configured"
                    );
                    metrics::inc_pipeline_outcome("failed");
                    return PipelineResult {
                        request_id,
                        state: PipelineState::Failed,
                        partial: false,
                        failure: Some(DecisionError::RoutingUnclassified),
                        units: Vec::new(),
                        snapshot: request.snapshot,
                        advisory: None,
                        report_location: None,
                        completed_at: Utc::now(),
                    };
                }
            }
        } else {
            selection
        };

        debug!(
            target: "plantmind::pipeline",
            request_id = %request_id,
            state = %PipelineState::Routed,
            "state transition"
        );

        // Routed → PerUnitProcessing(n)
        let n = selection.len();
        info!(
            target: "plantmind::pipeline",
            request_id = %request_id,
            state = %PipelineState::PerUnitProcessing(n),
            "dispatching units"
        );

        let mut outcomes: Vec<Option<UnitOutcome>> = vec![None; n];
        let mut set: JoinSet<(usize, UnitOutcome)> = JoinSet::new();

        for (idx, m) in selection.matches().iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                outcomes[idx] = Some(UnitOutcome::Skipped);
                continue;
            }

            let span = tracing::info_span!(
                "pipeline.unit",
                request_id = %request_id,
                unit = %m.unit,
                duration_ms = tracing::field::Empty,
                outcome = tracing::field::Empty,
                error_kind = tracing::field::Empty,
            );

            let unit = m.unit;
            let classifier = Arc::clone(&self.classifier);
            let engine = Arc::clone(&self.engine);
            let evaluator = Arc::clone(&self.evaluator);
            let forecast = Arc::clone(&self.forecast);
            let snapshot = request.snapshot.clone();
            let history = request.toxicity_history.clone();
            let horizon = request.forecast_horizon_hours;
            let timeout = self.external_timeout;

            set.spawn(
                async move {
                    let outcome = run_unit(
                        unit, &classifier, &engine, &evaluator, &*forecast, &snapshot,
                        &history, horizon, timeout,
                    )
                    .await;
                    (idx, outcome)
                }
                .instrument(span),
            );
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => {
                    warn!(
                        target: "plantmind::pipeline",
                        request_id = %request_id,
                        error = %e,
                        "unit task aborted"
                    );
                }
            }
        }

        // PerUnitProcessing → Aggregated, strictly in selection order.
        let units: Vec<UnitReport> = selection
            .units()
            .zip(outcomes)
            .map(|(unit, outcome)| UnitReport {
                unit,
                outcome: outcome.unwrap_or_else(|| {
                    UnitOutcome::Failed(DecisionError::ExternalFailure(
                        "unit task aborted".to_string(),
                    ))
                }),
            })
            .collect();

        let partial = units.iter().any(|u| !u.outcome.is_success());
        debug!(
            target: "plantmind::pipeline",
            request_id = %request_id,
            state = %PipelineState::Aggregated,
            partial,
            "state transition"
        );

        // Advisory prose is a side channel: a slow or failing writer never
        // fails the run and its output never feeds a control decision.
        let advisory = self.fetch_advisory(&request_id, &units).await;

        let mut result = PipelineResult {
            request_id: request_id.clone(),
            state: PipelineState::Completed,
            partial,
            failure: None,
            units,
            snapshot: request.snapshot,
            advisory,
            report_location: None,
            completed_at: Utc::now(),
        };

        match tokio::time::timeout(self.external_timeout, self.sink.publish(&result)).await {
            Ok(Ok(location)) => result.report_location = Some(location),
            Ok(Err(e)) => warn!(
                target: "plantmind::pipeline",
                request_id = %request_id,
                error = %e,
                "report sink failed"
            ),
            Err(_) => warn!(
                target: "plantmind::pipeline",
                request_id = %request_id,
                "report sink timed out"
            ),
        }

        metrics::inc_pipeline_outcome(if partial { "completed_partial" } else { "completed" });
        info!(
            target: "plantmind::pipeline",
            request_id = %request_id,
            partial,
            units = result.units.len(),
            "request completed"
        );

        result
    }

    async fn fetch_advisory(
        &self,
        request_id: &RequestId,
        units: &[UnitReport],
    ) -> Option<String> {
        let context = advisory_context(units);
        match tokio::time::timeout(self.external_timeout, self.advisory.explain(&context)).await
        {
            Ok(Ok(text)) if !text.is_empty() => Some(text),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!(
                    target: "plantmind::pipeline",
                    request_id = %request_id,
                    error = %e,
                    "advisory writer failed"
                );
                None
            }
            Err(_) => {
                warn!(
                    target: "plantmind::pipeline",
                    request_id = %request_id,
                    "advisory writer timed out"
                );
                None
            }
        }
    }
}

/// Structured summary handed to the advisory writer.
///
/// Outcome labels only — never the operator's raw text.
fn advisory_context(units: &[UnitReport]) -> String {
    let mut out = String::from("unit outcomes:");
    for u in units {
        let label = match &u.outcome {
            UnitOutcome::Succeeded(_) => "ok".to_string(),
            UnitOutcome::Failed(e) => format!("failed ({})", e.kind()),
            UnitOutcome::Skipped => "skipped".to_string(),
        };
        out.push_str(&format!(" {}={label}", u.unit));
    }
    out
}

/// Execute one decision unit against the snapshot.
///
/// Pure except for the toxicity unit's forecast call, which is bounded by
/// `timeout` and marks the unit as a partial failure on elapse — retry
/// policy, if any, belongs to the collaborator boundary.
#[allow(clippy::too_many_arguments)]
async fn run_unit(
    unit: DecisionUnit,
    classifier: &RiskClassifier,
    engine: &ControlStrategyEngine,
    evaluator: &DiagnosticEvaluator,
    forecast: &dyn ForecastModel,
    snapshot: &PlantSnapshot,
    history: &[f64],
    horizon: u32,
    timeout: Duration,
) -> UnitOutcome {
    let start = Instant::now();
    metrics::inc_unit_request(unit.as_str());

    let result = match unit {
        DecisionUnit::Toxicity => {
            match tokio::time::timeout(
                timeout,
                forecast.forecast(history, snapshot.toxicity_index, horizon),
            )
            .await
            {
                Err(_) => Err(DecisionError::ExternalTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                }),
                Ok(Err(e)) => Err(e),
                Ok(Ok(predicted)) => classifier
                    .classify(ReadingCategory::Toxicity, predicted)
                    .map(|risk| UnitResult::Toxicity { predicted, risk }),
            }
        }
        DecisionUnit::Adsorption => classifier
            .classify(ReadingCategory::Toxicity, snapshot.toxicity_index)
            .and_then(|risk| engine.decide(Subsystem::Adsorption, risk, snapshot))
            .map(UnitResult::Command),
        DecisionUnit::Mbr => classifier
            .classify(ReadingCategory::MembranePressure, snapshot.membrane_pressure_kpa)
            .and_then(|risk| engine.decide(Subsystem::Mbr, risk, snapshot))
            .map(UnitResult::Command),
        DecisionUnit::Regeneration => classifier
            .classify(
                ReadingCategory::AdsorptionEfficiency,
                snapshot.adsorption_efficiency_pct,
            )
            .and_then(|risk| engine.decide(Subsystem::Furnace, risk, snapshot))
            .map(UnitResult::Command),
        DecisionUnit::Diagnostic => {
            // Best-effort command derivation; a subsystem whose reading is
            // out of range simply contributes no command to the evaluation.
            let commands: Vec<SubsystemCommand> = Subsystem::ALL
                .iter()
                .filter_map(|sub| {
                    let category = match sub {
                        Subsystem::Adsorption => ReadingCategory::Toxicity,
                        Subsystem::Mbr => ReadingCategory::MembranePressure,
                        Subsystem::Furnace => ReadingCategory::AdsorptionEfficiency,
                    };
                    let value = match category {
                        ReadingCategory::Toxicity => snapshot.toxicity_index,
                        ReadingCategory::MembranePressure => snapshot.membrane_pressure_kpa,
                        ReadingCategory::AdsorptionEfficiency => {
                            snapshot.adsorption_efficiency_pct
                        }
                    };
                    classifier
                        .classify(category, value)
                        .and_then(|risk| engine.decide(*sub, risk, snapshot))
                        .ok()
                })
                .collect();
            Ok(UnitResult::Diagnostic(
                evaluator.evaluate(Some(snapshot), &commands),
            ))
        }
    };

    let elapsed = start.elapsed();
    metrics::observe_unit_duration(unit.as_str(), elapsed);
    Span::current().record("duration_ms", elapsed.as_millis() as u64);

    match result {
        Ok(r) => {
            Span::current().record("outcome", "ok");
            UnitOutcome::Succeeded(r)
        }
        Err(e) => {
            Span::current().record("outcome", "err");
            Span::current().record("error_kind", e.kind());
            metrics::inc_unit_failure(unit.as_str(), e.kind());
            warn!(
                target: "plantmind::pipeline",
                unit = %unit,
                error = %e,
                "unit failed"
            );
            UnitOutcome::Failed(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{LinearForecast, MemorySink, NullAdvisory};

    fn orchestrator(sink: Arc<MemorySink>) -> Orchestrator {
        Orchestrator::with_defaults(
            Arc::new(LinearForecast::default()),
            Arc::new(NullAdvisory),
            sink,
        )
    }

    #[tokio::test]
    async fn test_single_unit_request_completes() {
        let sink = Arc::new(MemorySink::default());
        let orch = orchestrator(Arc::clone(&sink));
        let result = orch
            .run(AnalysisRequest::new("req-1", "membrane flux check"))
            .await;
        assert!(result.is_completed());
        assert!(!result.partial);
        assert_eq!(result.units.len(), 1);
        assert_eq!(result.units[0].unit, DecisionUnit::Mbr);
    }

    #[tokio::test]
    async fn test_unclassified_without_fallback_fails() {
        let sink = Arc::new(MemorySink::default());
        let orch = orchestrator(Arc::clone(&sink));
        let result = orch
            .run(AnalysisRequest::new("req-2", "what is for lunch"))
            .await;
        assert_eq!(result.state, PipelineState::Failed);
        assert_eq!(result.failure, Some(DecisionError::RoutingUnclassified));
        // A failed pipeline publishes nothing.
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn test_full_analysis_aggregates_in_declared_order() {
        let sink = Arc::new(MemorySink::default());
        let orch = orchestrator(Arc::clone(&sink));
        let result = orch
            .run(AnalysisRequest::new("req-3", "full analysis please"))
            .await;
        assert!(result.is_completed());
        let order: Vec<_> = result.units.iter().map(|u| u.unit).collect();
        assert_eq!(order, DecisionUnit::ALL.to_vec());
        assert_eq!(sink.published().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch_skips_all_units() {
        let sink = Arc::new(MemorySink::default());
        let orch = orchestrator(Arc::clone(&sink));
        let cancel = Arc::new(AtomicBool::new(true));
        let result = orch
            .run_with_cancel(AnalysisRequest::new("req-4", "full analysis"), cancel)
            .await;
        assert!(result.is_completed());
        assert!(result.partial);
        assert!(result
            .units
            .iter()
            .all(|u| matches!(u.outcome, UnitOutcome::Skipped)));
    }

    #[tokio::test]
    async fn test_pipeline_result_exposes_commands_in_order() {
        let sink = Arc::new(MemorySink::default());
        let orch = orchestrator(Arc::clone(&sink));
        let result = orch
            .run(AnalysisRequest::new(
                "req-5",
                "turntable frequency and regeneration furnace",
            ))
            .await;
        let commands = result.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].subsystem(), Subsystem::Adsorption);
        assert_eq!(commands[1].subsystem(), Subsystem::Furnace);
    }
}
