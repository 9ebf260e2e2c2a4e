//! Control-policy acceptance scenarios.
//!
//! These pin the commissioned setpoint tables end-to-end: classifier →
//! strategy engine → (for the last scenario) the published report file.

use std::sync::Arc;

use plantmind::classifier::{ReadingCategory, RiskClassifier, RiskLevel};
use plantmind::collaborators::{LinearForecast, MarkdownFileSink, NullAdvisory};
use plantmind::strategy::{
    AdsorptionMode, ControlStrategyEngine, FurnaceMode, Subsystem, SubsystemCommand,
};
use plantmind::{AnalysisRequest, Orchestrator, PlantSnapshot};

fn snapshot(toxicity: f64, tmp: f64, efficiency: f64) -> PlantSnapshot {
    PlantSnapshot {
        toxicity_index: toxicity,
        membrane_pressure_kpa: tmp,
        adsorption_efficiency_pct: efficiency,
        ..PlantSnapshot::nominal()
    }
}

fn decide(subsystem: Subsystem, snap: &PlantSnapshot) -> SubsystemCommand {
    let classifier = RiskClassifier::with_defaults();
    let engine = ControlStrategyEngine::with_defaults();
    let category = match subsystem {
        Subsystem::Adsorption => ReadingCategory::Toxicity,
        Subsystem::Mbr => ReadingCategory::MembranePressure,
        Subsystem::Furnace => ReadingCategory::AdsorptionEfficiency,
    };
    let value = match category {
        ReadingCategory::Toxicity => snap.toxicity_index,
        ReadingCategory::MembranePressure => snap.membrane_pressure_kpa,
        ReadingCategory::AdsorptionEfficiency => snap.adsorption_efficiency_pct,
    };
    let risk = match classifier.classify(category, value) {
        Ok(r) => r,
        Err(e) => panic!("classification failed: {e}"),
    };
    match engine.decide(subsystem, risk, snap) {
        Ok(cmd) => cmd,
        Err(e) => panic!("decide failed: {e}"),
    }
}

#[test]
fn scenario_toxicity_0_9_low_risk_two_reactors() {
    let classifier = RiskClassifier::with_defaults();
    assert_eq!(
        classifier.classify(ReadingCategory::Toxicity, 0.9),
        Ok(RiskLevel::Low)
    );

    match decide(Subsystem::Adsorption, &snapshot(0.9, 20.0, 85.0)) {
        SubsystemCommand::Adsorption {
            frequency_hz,
            active_reactors,
            mode,
            ..
        } => {
            assert_eq!(active_reactors, 2);
            assert!((5.0..=15.0).contains(&frequency_hz), "freq {frequency_hz}");
            assert_eq!(mode, AdsorptionMode::EnergySaving);
        }
        other => panic!("wrong command: {other:?}"),
    }
}

#[test]
fn scenario_toxicity_3_5_high_risk_three_reactors() {
    let classifier = RiskClassifier::with_defaults();
    assert_eq!(
        classifier.classify(ReadingCategory::Toxicity, 3.5),
        Ok(RiskLevel::High)
    );

    match decide(Subsystem::Adsorption, &snapshot(3.5, 20.0, 85.0)) {
        SubsystemCommand::Adsorption {
            frequency_hz,
            active_reactors,
            standby_triggered,
            ..
        } => {
            assert_eq!(active_reactors, 3);
            assert!(standby_triggered);
            assert!((35.0..=50.0).contains(&frequency_hz), "freq {frequency_hz}");
        }
        other => panic!("wrong command: {other:?}"),
    }
}

#[test]
fn scenario_tmp_32_kpa_triggers_backwash() {
    match decide(Subsystem::Mbr, &snapshot(2.0, 32.0, 85.0)) {
        SubsystemCommand::Mbr {
            aeration_m3_h,
            flux_lmh,
            backwash,
            chemical_clean,
            ..
        } => {
            assert!(backwash);
            assert!(!chemical_clean);
            assert_eq!(aeration_m3_h, 70.0);
            assert_eq!(flux_lmh, 15.0);
        }
        other => panic!("wrong command: {other:?}"),
    }
}

#[test]
fn scenario_efficiency_65_pct_heats_the_furnace() {
    match decide(Subsystem::Furnace, &snapshot(2.0, 20.0, 65.0)) {
        SubsystemCommand::Furnace {
            mode,
            temperature_c,
            feed_rate_kg_h,
        } => {
            assert_eq!(mode, FurnaceMode::ActiveHeating);
            assert_eq!(temperature_c, 800.0);
            assert_eq!(feed_rate_kg_h, 30.0);
        }
        other => panic!("wrong command: {other:?}"),
    }
}

#[test]
fn scenario_efficiency_85_pct_keeps_the_furnace_cold() {
    match decide(Subsystem::Furnace, &snapshot(2.0, 20.0, 85.0)) {
        SubsystemCommand::Furnace {
            mode,
            temperature_c,
            feed_rate_kg_h,
        } => {
            assert_eq!(mode, FurnaceMode::Standby);
            assert_eq!(temperature_c, 0.0);
            assert_eq!(feed_rate_kg_h, 0.0);
        }
        other => panic!("wrong command: {other:?}"),
    }
}

#[tokio::test]
async fn scenario_report_file_names_every_unit_outcome() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => panic!("tempdir failed: {e}"),
    };
    let orch = Orchestrator::with_defaults(
        Arc::new(LinearForecast::default()),
        Arc::new(NullAdvisory),
        Arc::new(MarkdownFileSink::new(dir.path())),
    );

    let result = orch
        .run(
            AnalysisRequest::new("scn-report", "full analysis")
                .with_snapshot(snapshot(3.5, 32.0, 65.0)),
        )
        .await;

    assert!(result.is_completed());
    let location = match &result.report_location {
        Some(l) => l.clone(),
        None => panic!("report must be published"),
    };
    let body = match std::fs::read_to_string(&location) {
        Ok(b) => b,
        Err(e) => panic!("report file unreadable: {e}"),
    };

    // Every selected unit appears by name with an explicit status.
    for unit in ["toxicity", "adsorption", "mbr", "regeneration", "diagnostic"] {
        assert!(body.contains(unit), "report must mention {unit}");
    }
    assert!(body.contains("status: ok"));
    // The stressed snapshot drives the commissioned setpoints into the file.
    assert!(body.contains("active reactors: 3"));
    assert!(body.contains("backwash: yes"));
    assert!(body.contains("800 °C"));
}
