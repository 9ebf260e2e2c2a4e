//! Composite plant-health evaluation.
//!
//! ## Responsibility
//! Fold the current snapshot and the subsystem commands into one
//! [`DiagnosticReport`]: a weighted 0–100 composite score plus a
//! per-subsystem status with issues and recommendations. Sub-scores start
//! at 100 and lose points with distance from the nominal band, following
//! the plant's commissioning rules.
//!
//! Deterministic and total: any well-formed input produces a report, and an
//! empty input produces a report with a `NoData` sentinel per subsystem
//! rather than an error.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::DiagnosticWeights;
use crate::strategy::{FurnaceMode, SubsystemCommand};
use crate::{DecisionError, PlantSnapshot};

/// Discrete health grade derived from a 0–100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    /// Score ≥ 90: all indicators nominal.
    Excellent,
    /// Score ≥ 75: no significant issues.
    Good,
    /// Score ≥ 60: issues worth watching.
    Attention,
    /// Score ≥ 40: clear problems, action needed.
    Warning,
    /// Score < 40: immediate action needed.
    Critical,
    /// No measurements were available for this subsystem.
    NoData,
}

impl HealthLevel {
    /// Grade a 0–100 score.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Excellent
        } else if score >= 75.0 {
            Self::Good
        } else if score >= 60.0 {
            Self::Attention
        } else if score >= 40.0 {
            Self::Warning
        } else {
            Self::Critical
        }
    }
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Attention => "attention",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::NoData => "no data",
        };
        f.write_str(s)
    }
}

/// Health status of one monitored subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct SubsystemStatus {
    /// Subsystem display name.
    pub name: &'static str,
    /// Health grade.
    pub health: HealthLevel,
    /// Sub-score, 0–100 (0 when no data).
    pub score: f64,
    /// Problems found, empty when nominal.
    pub issues: Vec<String>,
    /// Operator recommendations, empty when nominal.
    pub recommendations: Vec<String>,
}

/// Composite diagnostic over all monitored subsystems.
///
/// Derived, never persisted by the core; recomputed on every invocation.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    /// Weighted composite score, 0–100.
    pub overall_score: f64,
    /// Grade of the composite score.
    pub overall_health: HealthLevel,
    /// Per-subsystem status, in declaration order.
    pub subsystems: Vec<SubsystemStatus>,
    /// Evaluation timestamp, UTC.
    pub generated_at: DateTime<Utc>,
}

/// Weighted health evaluator.
///
/// Weights are fixed at construction and validated to sum to 1.0; the
/// evaluator refuses to start otherwise.
#[derive(Debug, Clone)]
pub struct DiagnosticEvaluator {
    weights: DiagnosticWeights,
}

impl DiagnosticEvaluator {
    /// Build an evaluator over the given weights.
    ///
    /// # Errors
    ///
    /// [`DecisionError::InvalidWeights`] when the weights do not sum to 1.0
    /// (within 1e-6) or any weight is negative or non-finite.
    pub fn new(weights: DiagnosticWeights) -> Result<Self, DecisionError> {
        let parts = [
            weights.toxicity,
            weights.adsorption,
            weights.mbr,
            weights.regeneration,
        ];
        let sum: f64 = parts.iter().sum();
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) || (sum - 1.0).abs() > 1e-6 {
            return Err(DecisionError::InvalidWeights { sum });
        }
        Ok(Self { weights })
    }

    /// Evaluator over the plant's default weights
    /// (toxicity 0.25, adsorption 0.25, MBR 0.30, regeneration 0.20).
    pub fn with_defaults() -> Self {
        match Self::new(DiagnosticWeights::default()) {
            Ok(evaluator) => evaluator,
            Err(_) => unreachable!("default diagnostic weights sum to 1.0"),
        }
    }

    /// Evaluate plant health from the snapshot and the computed commands.
    ///
    /// `None` means no measurements were captured this pass; the report
    /// then carries the `NoData` sentinel for every subsystem instead of
    /// failing.
    pub fn evaluate(
        &self,
        snapshot: Option<&PlantSnapshot>,
        commands: &[SubsystemCommand],
    ) -> DiagnosticReport {
        let Some(snap) = snapshot else {
            return self.no_data_report();
        };

        let toxicity = score_toxicity(snap);
        let adsorption = score_adsorption(snap, commands);
        let mbr = score_mbr(snap, commands);
        let regeneration = score_regeneration(snap, commands);

        let overall_score = toxicity.score * self.weights.toxicity
            + adsorption.score * self.weights.adsorption
            + mbr.score * self.weights.mbr
            + regeneration.score * self.weights.regeneration;

        DiagnosticReport {
            overall_score,
            overall_health: HealthLevel::from_score(overall_score),
            subsystems: vec![toxicity, adsorption, mbr, regeneration],
            generated_at: Utc::now(),
        }
    }

    fn no_data_report(&self) -> DiagnosticReport {
        let subsystems = SUBSYSTEM_NAMES
            .iter()
            .map(|&name| SubsystemStatus {
                name,
                health: HealthLevel::NoData,
                score: 0.0,
                issues: vec!["no measurements captured".to_string()],
                recommendations: Vec::new(),
            })
            .collect();
        DiagnosticReport {
            overall_score: 0.0,
            overall_health: HealthLevel::NoData,
            subsystems,
            generated_at: Utc::now(),
        }
    }
}

impl Default for DiagnosticEvaluator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

const SUBSYSTEM_NAMES: [&str; 4] = [
    "toxicity forecast",
    "adsorption bank",
    "membrane bioreactor",
    "regeneration",
];

fn score_toxicity(snap: &PlantSnapshot) -> SubsystemStatus {
    let mut score: f64 = 100.0;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    let toxicity = snap.toxicity_index;
    if toxicity >= 3.0 {
        score -= 25.0;
        issues.push("influent toxicity in the alarm band".to_string());
        recommendations.push("engage the standby adsorption line".to_string());
    } else if toxicity >= 1.5 {
        score -= 10.0;
        issues.push("influent toxicity above nominal".to_string());
    }
    if toxicity > 5.0 {
        score -= 15.0;
        issues.push("influent toxicity unusually high".to_string());
        recommendations.push("check the influent source and strengthen pretreatment".to_string());
    }

    status(SUBSYSTEM_NAMES[0], score, issues, recommendations)
}

fn score_adsorption(snap: &PlantSnapshot, commands: &[SubsystemCommand]) -> SubsystemStatus {
    let mut score: f64 = 100.0;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    let cmd = commands.iter().find_map(|c| match c {
        SubsystemCommand::Adsorption {
            frequency_hz,
            standby_triggered,
            expected_removal_pct,
            ..
        } => Some((*frequency_hz, *standby_triggered, *expected_removal_pct)),
        _ => None,
    });

    let (frequency, standby, removal) = match cmd {
        Some(v) => v,
        // Without a command, judge from the running frequency alone.
        None => (snap.turntable_frequency_hz, false, 75.0),
    };

    if removal < 50.0 {
        score -= 30.0;
        issues.push("toxicity removal rate low".to_string());
        recommendations.push("check carbon adsorption capacity".to_string());
    } else if removal < 70.0 {
        score -= 15.0;
        issues.push("toxicity removal rate below target".to_string());
    }
    if frequency > 45.0 {
        score -= 10.0;
        issues.push("drive frequency near the ceiling".to_string());
        recommendations.push("watch drive energy consumption".to_string());
    }
    if standby {
        score -= 15.0;
        issues.push("standby line engaged".to_string());
        recommendations.push("inspect the regular lines for capacity loss".to_string());
    }

    status(SUBSYSTEM_NAMES[1], score, issues, recommendations)
}

fn score_mbr(snap: &PlantSnapshot, commands: &[SubsystemCommand]) -> SubsystemStatus {
    let mut score: f64 = 100.0;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    let tmp = snap.membrane_pressure_kpa;
    if tmp > 40.0 {
        score -= 35.0;
        issues.push("TMP far past the alarm bound".to_string());
        recommendations.push("start chemical cleaning now".to_string());
    } else if tmp > 30.0 {
        score -= 20.0;
        issues.push("TMP past the backwash bound".to_string());
        recommendations.push("run reinforced backwash".to_string());
    } else if tmp > 25.0 {
        score -= 10.0;
        issues.push("TMP approaching the backwash bound".to_string());
    }

    for c in commands {
        if let SubsystemCommand::Mbr {
            flux_lmh,
            backwash,
            chemical_clean,
            ..
        } = c
        {
            if *flux_lmh < 10.0 {
                score -= 25.0;
                issues.push("permeate flux severely reduced".to_string());
            } else if *flux_lmh < 15.0 {
                score -= 15.0;
                issues.push("permeate flux reduced".to_string());
            }
            if *chemical_clean {
                score -= 30.0;
                issues.push("membrane fouling critical".to_string());
            } else if *backwash {
                score -= 15.0;
                issues.push("membrane fouling present".to_string());
            }
        }
    }

    status(SUBSYSTEM_NAMES[2], score, issues, recommendations)
}

fn score_regeneration(snap: &PlantSnapshot, commands: &[SubsystemCommand]) -> SubsystemStatus {
    let mut score: f64 = 100.0;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    let efficiency = snap.adsorption_efficiency_pct;
    if efficiency < 60.0 {
        score -= 30.0;
        issues.push("adsorption efficiency severely degraded".to_string());
        recommendations.push("schedule regeneration immediately".to_string());
    } else if efficiency < 80.0 {
        score -= 15.0;
        issues.push("adsorption efficiency degraded".to_string());
    }

    let heating = commands.iter().any(|c| {
        matches!(
            c,
            SubsystemCommand::Furnace {
                mode: FurnaceMode::ActiveHeating,
                ..
            }
        )
    });
    if heating {
        score -= 10.0;
        issues.push("regeneration in progress".to_string());
        recommendations.push("plan the carbon change-over window".to_string());
    }

    status(SUBSYSTEM_NAMES[3], score, issues, recommendations)
}

fn status(
    name: &'static str,
    score: f64,
    issues: Vec<String>,
    recommendations: Vec<String>,
) -> SubsystemStatus {
    let clamped = score.max(0.0);
    SubsystemStatus {
        name,
        health: HealthLevel::from_score(clamped),
        score: clamped,
        issues,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RiskLevel;
    use crate::strategy::{ControlStrategyEngine, Subsystem};

    fn snapshot(toxicity: f64, tmp: f64, efficiency: f64) -> PlantSnapshot {
        PlantSnapshot {
            toxicity_index: toxicity,
            membrane_pressure_kpa: tmp,
            adsorption_efficiency_pct: efficiency,
            ..PlantSnapshot::nominal()
        }
    }

    fn commands_for(snap: &PlantSnapshot) -> Vec<SubsystemCommand> {
        let engine = ControlStrategyEngine::with_defaults();
        Subsystem::ALL
            .iter()
            .filter_map(|s| engine.decide(*s, RiskLevel::Medium, snap).ok())
            .collect()
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let bad = DiagnosticWeights {
            toxicity: 0.5,
            adsorption: 0.5,
            mbr: 0.5,
            regeneration: 0.5,
        };
        let err = DiagnosticEvaluator::new(bad);
        assert!(matches!(
            err,
            Err(DecisionError::InvalidWeights { sum }) if (sum - 2.0).abs() < 1e-9
        ));
    }

    #[test]
    fn test_negative_weight_is_rejected() {
        let bad = DiagnosticWeights {
            toxicity: -0.25,
            adsorption: 0.5,
            mbr: 0.5,
            regeneration: 0.25,
        };
        assert!(DiagnosticEvaluator::new(bad).is_err());
    }

    #[test]
    fn test_nominal_plant_scores_excellent() {
        let evaluator = DiagnosticEvaluator::with_defaults();
        let snap = snapshot(1.0, 18.0, 90.0);
        let report = evaluator.evaluate(Some(&snap), &commands_for(&snap));
        assert_eq!(report.overall_health, HealthLevel::Excellent);
        assert!(report.overall_score >= 90.0);
        assert_eq!(report.subsystems.len(), 4);
    }

    #[test]
    fn test_degraded_plant_scores_lower() {
        let evaluator = DiagnosticEvaluator::with_defaults();
        let good = snapshot(1.0, 18.0, 90.0);
        let bad = snapshot(4.0, 42.0, 55.0);
        let good_report = evaluator.evaluate(Some(&good), &commands_for(&good));
        let bad_report = evaluator.evaluate(Some(&bad), &commands_for(&bad));
        assert!(bad_report.overall_score < good_report.overall_score);
        assert!(bad_report
            .subsystems
            .iter()
            .any(|s| !s.issues.is_empty()));
    }

    #[test]
    fn test_empty_input_yields_no_data_sentinel() {
        let evaluator = DiagnosticEvaluator::with_defaults();
        let report = evaluator.evaluate(None, &[]);
        assert_eq!(report.overall_health, HealthLevel::NoData);
        assert_eq!(report.subsystems.len(), 4);
        for s in &report.subsystems {
            assert_eq!(s.health, HealthLevel::NoData);
            assert_eq!(s.score, 0.0);
        }
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let evaluator = DiagnosticEvaluator::with_defaults();
        let snap = snapshot(2.4, 33.0, 68.0);
        let commands = commands_for(&snap);
        let a = evaluator.evaluate(Some(&snap), &commands);
        let b = evaluator.evaluate(Some(&snap), &commands);
        assert_eq!(a.overall_score, b.overall_score);
        assert_eq!(a.overall_health, b.overall_health);
    }

    #[test]
    fn test_score_grades_match_bands() {
        assert_eq!(HealthLevel::from_score(95.0), HealthLevel::Excellent);
        assert_eq!(HealthLevel::from_score(90.0), HealthLevel::Excellent);
        assert_eq!(HealthLevel::from_score(80.0), HealthLevel::Good);
        assert_eq!(HealthLevel::from_score(65.0), HealthLevel::Attention);
        assert_eq!(HealthLevel::from_score(45.0), HealthLevel::Warning);
        assert_eq!(HealthLevel::from_score(10.0), HealthLevel::Critical);
    }

    #[test]
    fn test_sub_scores_never_go_negative() {
        let evaluator = DiagnosticEvaluator::with_defaults();
        let snap = snapshot(9.0, 95.0, 5.0);
        let report = evaluator.evaluate(Some(&snap), &commands_for(&snap));
        for s in &report.subsystems {
            assert!(s.score >= 0.0);
        }
    }
}
