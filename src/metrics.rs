//! Prometheus metrics for the decision pipeline.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup **before** running any
//! request. The helper functions (`inc_unit_request`, …) are no-ops if
//! `init_metrics` was never called, so the pipeline is always safe to run —
//! observability simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `plantmind_unit_requests_total` | Counter | `unit` |
//! | `plantmind_unit_failures_total` | Counter | `unit`, `err_kind` |
//! | `plantmind_unit_duration_seconds` | Histogram | `unit` |
//! | `plantmind_pipeline_outcomes_total` | Counter | `outcome` |

use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

use crate::DecisionError;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the pipeline, bundled together so they can be
/// stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Unit invocations per decision unit.
    pub unit_requests: CounterVec,
    /// Unit failures by unit and error kind.
    pub unit_failures: CounterVec,
    /// Unit processing latency histogram.
    pub unit_duration: HistogramVec,
    /// Pipeline outcomes (completed / completed_partial / failed).
    pub pipeline_outcomes: CounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private
/// registry.
///
/// Must be called once at process startup before any request runs.
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`DecisionError::ExternalFailure`] if metric construction or
/// registry registration fails (e.g., duplicate descriptor names).
pub fn init_metrics() -> Result<(), DecisionError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let unit_requests = CounterVec::new(
        Opts::new("plantmind_unit_requests_total", "Unit invocations"),
        &["unit"],
    )
    .map_err(|e| DecisionError::ExternalFailure(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(unit_requests.clone()))
        .map_err(|e| DecisionError::ExternalFailure(format!("metrics registration failed: {e}")))?;

    let unit_failures = CounterVec::new(
        Opts::new(
            "plantmind_unit_failures_total",
            "Unit failures by unit and error kind",
        ),
        &["unit", "err_kind"],
    )
    .map_err(|e| DecisionError::ExternalFailure(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(unit_failures.clone()))
        .map_err(|e| DecisionError::ExternalFailure(format!("metrics registration failed: {e}")))?;

    let unit_duration = HistogramVec::new(
        HistogramOpts::new(
            "plantmind_unit_duration_seconds",
            "Processing duration per unit",
        ),
        &["unit"],
    )
    .map_err(|e| DecisionError::ExternalFailure(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(unit_duration.clone()))
        .map_err(|e| DecisionError::ExternalFailure(format!("metrics registration failed: {e}")))?;

    let pipeline_outcomes = CounterVec::new(
        Opts::new(
            "plantmind_pipeline_outcomes_total",
            "Pipeline terminal outcomes",
        ),
        &["outcome"],
    )
    .map_err(|e| DecisionError::ExternalFailure(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(pipeline_outcomes.clone()))
        .map_err(|e| DecisionError::ExternalFailure(format!("metrics registration failed: {e}")))?;

    let _ = METRICS.set(Metrics {
        registry,
        unit_requests,
        unit_failures,
        unit_duration,
        pipeline_outcomes,
    });

    Ok(())
}

// ── Recording helpers (no-ops before init) ─────────────────────────────────

/// Count one invocation of a decision unit.
pub fn inc_unit_request(unit: &str) {
    if let Some(m) = METRICS.get() {
        m.unit_requests.with_label_values(&[unit]).inc();
    }
}

/// Count one unit failure with its taxonomy label.
pub fn inc_unit_failure(unit: &str, err_kind: &str) {
    if let Some(m) = METRICS.get() {
        m.unit_failures.with_label_values(&[unit, err_kind]).inc();
    }
}

/// Record one unit's processing latency.
pub fn observe_unit_duration(unit: &str, duration: Duration) {
    if let Some(m) = METRICS.get() {
        m.unit_duration
            .with_label_values(&[unit])
            .observe(duration.as_secs_f64());
    }
}

/// Count one pipeline terminal outcome
/// (`completed`, `completed_partial`, `failed`).
pub fn inc_pipeline_outcome(outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.pipeline_outcomes.with_label_values(&[outcome]).inc();
    }
}

/// Render all metrics in the Prometheus text exposition format.
///
/// Returns an empty string before [`init_metrics`] has run.
pub fn gather() -> String {
    let Some(m) = METRICS.get() else {
        return String::new();
    };
    let encoder = TextEncoder::new();
    let families = m.registry.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_are_noops_before_init() {
        // Must not panic even when init_metrics has not run in this order.
        inc_unit_request("mbr");
        inc_unit_failure("mbr", "external_timeout");
        observe_unit_duration("mbr", Duration::from_millis(3));
        inc_pipeline_outcome("completed");
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_gather_contains_registered_families_after_use() {
        let _ = init_metrics();
        inc_unit_request("toxicity");
        inc_pipeline_outcome("completed");
        let text = gather();
        assert!(text.contains("plantmind_unit_requests_total"));
        assert!(text.contains("plantmind_pipeline_outcomes_total"));
    }
}
