//! # plantmind
//!
//! A deterministic decision orchestrator for wastewater-treatment plant
//! control over Tokio.
//!
//! ## Architecture
//!
//! An operator request flows through a router and a fan-out of decision
//! units, each pure given a snapshot of current process measurements:
//! ```text
//! AnalysisRequest → IntentRouter → [Toxicity | Adsorption | Mbr | Regeneration | Diagnostic]
//!                                → aggregate (selection order) → ReportSink
//! ```
//!
//! The decision core is deterministic: risk classification, strategy-table
//! lookup, and diagnostic scoring never depend on an external service.
//! External collaborators (toxicity forecast, advisory prose, report
//! persistence) live behind traits in [`collaborators`] and are always
//! timeout-bounded.

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::classifier::ReadingCategory;

pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod diagnostic;
pub mod metrics;
pub mod pipeline;
pub mod router;
pub mod strategy;

// Re-exports for convenience
pub use classifier::{RiskClassifier, RiskLevel};
pub use collaborators::{AdvisoryWriter, ForecastModel, ReportSink};
pub use diagnostic::{DiagnosticEvaluator, DiagnosticReport};
pub use pipeline::{Orchestrator, PipelineResult, PipelineState};
pub use router::{DecisionUnit, IntentRouter, IntentSelection};
pub use strategy::{ControlStrategyEngine, Subsystem, SubsystemCommand};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
/// - anything else (including unset) — human-readable pretty output
///   for local development
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`DecisionError::ExternalFailure`] if the global subscriber has
/// already been set (e.g. by a previous call or a test harness).
pub fn init_tracing() -> Result<(), DecisionError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| DecisionError::ExternalFailure(format!("tracing init failed: {e}")))
}

/// Errors produced by the decision core.
///
/// Every failure surface in the router, classifier, strategy engine,
/// diagnostic evaluator, and pipeline maps to a variant here. Per-unit
/// failures inside the pipeline are caught and downgraded to partial-result
/// markers carrying one of these values; they never abort a whole run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecisionError {
    /// The reading category string is not one the classifier recognizes.
    #[error("unrecognized reading category: {0}")]
    InvalidCategory(String),

    /// A measurement value was NaN or ±infinity.
    #[error("non-finite {category} reading: {value}")]
    NonFiniteInput {
        /// The reading category the bad value arrived under.
        category: String,
        /// The offending value.
        value: f64,
    },

    /// An auxiliary reading lies outside its declared valid domain.
    ///
    /// The engine refuses to clamp silently; the caller decides whether the
    /// sensor is broken or the domain table is stale.
    #[error("{category} reading {value} outside valid domain [{min}, {max}]")]
    OutOfRangeReading {
        /// The reading category.
        category: String,
        /// The offending value.
        value: f64,
        /// Lower bound of the valid domain (inclusive).
        min: f64,
        /// Upper bound of the valid domain (inclusive).
        max: f64,
    },

    /// The subsystem identifier is not registered with the strategy engine.
    #[error("unregistered subsystem: {0}")]
    UnknownSubsystem(String),

    /// Diagnostic weights do not sum to 1.0.
    ///
    /// Returned at construction time so that misconfiguration surfaces
    /// immediately rather than at the first evaluation.
    #[error("diagnostic weights sum to {sum}, expected 1.0")]
    InvalidWeights {
        /// The actual weight sum found.
        sum: f64,
    },

    /// The request matched no decision unit and no fallback policy applies.
    #[error("request did not match any decision unit")]
    RoutingUnclassified,

    /// An external collaborator did not answer within its time budget.
    #[error("external collaborator timed out after {timeout_ms} ms")]
    ExternalTimeout {
        /// The budget that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// An external collaborator answered with an error.
    #[error("external collaborator failed: {0}")]
    ExternalFailure(String),
}

impl DecisionError {
    /// Short stable label for metrics and span fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCategory(_) => "invalid_category",
            Self::NonFiniteInput { .. } => "non_finite_input",
            Self::OutOfRangeReading { .. } => "out_of_range_reading",
            Self::UnknownSubsystem(_) => "unknown_subsystem",
            Self::InvalidWeights { .. } => "invalid_weights",
            Self::RoutingUnclassified => "routing_unclassified",
            Self::ExternalTimeout { .. } => "external_timeout",
            Self::ExternalFailure(_) => "external_failure",
        }
    }
}

/// Unique request identifier for trace correlation and report naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(
    /// The raw string ID, typically an operator token or counter.
    pub String,
);

impl RequestId {
    /// Create a new [`RequestId`] from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the request ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single named process measurement.
///
/// Immutable once captured; produced by the data-acquisition collaborator
/// and consumed within one orchestration pass.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Reading {
    /// The measurement category this value belongs to.
    pub category: ReadingCategory,
    /// The measured value.
    pub value: f64,
    /// Engineering unit string (e.g. `"kPa"`, `"%"`).
    pub unit: &'static str,
    /// Capture timestamp, UTC.
    pub captured_at: DateTime<Utc>,
}

/// Snapshot of current process measurements for one request.
///
/// Every decision unit is a pure function of this snapshot (plus the
/// forecast collaborator for the toxicity unit), so units may run
/// concurrently without shared mutable state.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PlantSnapshot {
    /// Influent toxicity index (dimensionless, valid 0–10).
    pub toxicity_index: f64,
    /// Transmembrane pressure across the MBR unit, kPa (valid 0–100).
    pub membrane_pressure_kpa: f64,
    /// Activated-carbon adsorption efficiency, percent (valid 0–100).
    pub adsorption_efficiency_pct: f64,
    /// Current aeration rate at the MBR unit, m³/h.
    pub aeration_m3_h: f64,
    /// Current turntable drive frequency, Hz.
    pub turntable_frequency_hz: f64,
    /// Capture timestamp, UTC.
    pub captured_at: DateTime<Utc>,
}

impl PlantSnapshot {
    /// Snapshot at the plant's nominal operating point.
    ///
    /// Matches the commissioning defaults: toxicity 2.0, TMP 20 kPa,
    /// adsorption efficiency 85 %, aeration 50 m³/h, turntable 25 Hz.
    pub fn nominal() -> Self {
        Self {
            toxicity_index: 2.0,
            membrane_pressure_kpa: 20.0,
            adsorption_efficiency_pct: 85.0,
            aeration_m3_h: 50.0,
            turntable_frequency_hz: 25.0,
            captured_at: Utc::now(),
        }
    }

    /// Extract the [`Reading`] value object for one category.
    pub fn reading(&self, category: ReadingCategory) -> Reading {
        let (value, unit) = match category {
            ReadingCategory::Toxicity => (self.toxicity_index, ""),
            ReadingCategory::MembranePressure => (self.membrane_pressure_kpa, "kPa"),
            ReadingCategory::AdsorptionEfficiency => (self.adsorption_efficiency_pct, "%"),
        };
        Reading {
            category,
            value,
            unit,
            captured_at: self.captured_at,
        }
    }
}

/// An operator request submitted to the orchestrator.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Unique identifier for this request, used for trace correlation.
    pub id: RequestId,
    /// The raw free-text request (never logged).
    pub text: String,
    /// Current process measurements.
    pub snapshot: PlantSnapshot,
    /// Recent toxicity history fed to the forecast collaborator,
    /// oldest first.
    pub toxicity_history: Vec<f64>,
    /// Forecast horizon in hours.
    pub forecast_horizon_hours: u32,
}

impl AnalysisRequest {
    /// Build a request around the nominal snapshot with an empty history.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(id),
            text: text.into(),
            snapshot: PlantSnapshot::nominal(),
            toxicity_history: Vec::new(),
            forecast_horizon_hours: 24,
        }
    }

    /// Replace the snapshot.
    pub fn with_snapshot(mut self, snapshot: PlantSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Replace the toxicity history.
    pub fn with_history(mut self, history: Vec<f64>) -> Self {
        self.toxicity_history = history;
        self
    }
}
