//! Declarative plant configuration.
//!
//! ## Responsibility
//! Define, default, and document every table the decision core runs on:
//! classifier thresholds, strategy setpoint tables, diagnostic weights,
//! router trigger vocabulary, and pipeline settings. Defaults equal the
//! plant's design constants, so an empty TOML file yields the commissioned
//! behavior.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `PlantConfig`
//! - Validated: all semantic constraints are checked before a config is used
//! - Immutable in use: a loaded config lives behind `Arc` and is never
//!   mutated; replacing tables means loading and validating a whole new one
//!
//! ## NOT Responsible For
//! - Building the runtime engines from config (each component's
//!   `from_config` does that)
//! - File watching or hot reload (a replacement config is swapped in whole
//!   by the embedding process)

pub mod loader;
pub mod validation;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::classifier::RiskLevel;
use crate::strategy::{AdsorptionMode, FoulingStatus};

pub use validation::ConfigError;

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for one plant deployment.
///
/// Deserialized from a TOML file and validated before use. Every field has
/// a documented default equal to the plant's design constants.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct PlantConfig {
    /// Plant identity metadata.
    pub plant: PlantSection,
    /// Risk-classifier band thresholds.
    pub classifier: ClassifierConfig,
    /// Per-subsystem strategy tables.
    pub strategy: StrategyConfig,
    /// Diagnostic scoring weights.
    pub diagnostics: DiagnosticConfig,
    /// Intent-router trigger vocabulary.
    pub router: RouterConfig,
    /// Pipeline timing and fallback policy.
    pub pipeline: PipelineSettings,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            plant: PlantSection::default(),
            classifier: ClassifierConfig::default(),
            strategy: StrategyConfig::default(),
            diagnostics: DiagnosticConfig::default(),
            router: RouterConfig::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

/// Plant identity metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct PlantSection {
    /// Human-readable plant name.
    pub name: String,
    /// Configuration revision tag.
    pub version: String,
    /// Optional free-form description.
    pub description: Option<String>,
}

impl Default for PlantSection {
    fn default() -> Self {
        Self {
            name: "pilot".to_string(),
            version: "1.0".to_string(),
            description: None,
        }
    }
}

// ── Classifier ───────────────────────────────────────────────────────────

/// Two split points partitioning a reading's domain into three half-open
/// bands. A value exactly on a split point belongs to the band above it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct BandThresholds {
    /// First split point.
    pub lower: f64,
    /// Second split point; must exceed `lower`.
    pub upper: f64,
}

/// Band thresholds per reading category.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Toxicity index split points (low/medium/high risk).
    pub toxicity: BandThresholds,
    /// Transmembrane pressure split points, kPa.
    pub membrane_pressure: BandThresholds,
    /// Adsorption efficiency split points, percent. Severity runs
    /// downward: the band below `lower` is the alarm band.
    pub adsorption_efficiency: BandThresholds,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            toxicity: BandThresholds {
                lower: 1.5,
                upper: 3.0,
            },
            membrane_pressure: BandThresholds {
                lower: 20.0,
                upper: 30.0,
            },
            adsorption_efficiency: BandThresholds {
                lower: 70.0,
                upper: 85.0,
            },
        }
    }
}

// ── Strategy tables ──────────────────────────────────────────────────────

/// Per-subsystem strategy tables.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct StrategyConfig {
    /// Adsorption reactor bank table.
    pub adsorption: AdsorptionTableConfig,
    /// Membrane bioreactor table.
    pub mbr: MbrTableConfig,
    /// Regeneration furnace step rule.
    pub furnace: FurnaceConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            adsorption: AdsorptionTableConfig::default(),
            mbr: MbrTableConfig::default(),
            furnace: FurnaceConfig::default(),
        }
    }
}

/// Adsorption reactor bank: one band per risk level.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct AdsorptionTableConfig {
    /// Risk-level bands; validation requires exactly one per level.
    pub bands: Vec<AdsorptionBandConfig>,
}

impl Default for AdsorptionTableConfig {
    fn default() -> Self {
        Self {
            bands: vec![
                AdsorptionBandConfig {
                    risk: RiskLevel::Low,
                    freq_min_hz: 5.0,
                    freq_max_hz: 15.0,
                    active_reactors: 2,
                    standby: false,
                    mode: AdsorptionMode::EnergySaving,
                    interp_from: 0.0,
                    interp_to: 1.5,
                },
                AdsorptionBandConfig {
                    risk: RiskLevel::Medium,
                    freq_min_hz: 15.0,
                    freq_max_hz: 35.0,
                    active_reactors: 2,
                    standby: false,
                    mode: AdsorptionMode::Standard,
                    interp_from: 1.5,
                    interp_to: 3.0,
                },
                AdsorptionBandConfig {
                    risk: RiskLevel::High,
                    freq_min_hz: 35.0,
                    freq_max_hz: 50.0,
                    active_reactors: 3,
                    standby: true,
                    mode: AdsorptionMode::FullCapacity,
                    // Readings past 5.0 saturate at the top frequency.
                    interp_from: 3.0,
                    interp_to: 5.0,
                },
            ],
        }
    }
}

/// One adsorption band.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AdsorptionBandConfig {
    /// Risk level this band answers.
    pub risk: RiskLevel,
    /// Frequency range floor, Hz.
    pub freq_min_hz: f64,
    /// Frequency range ceiling, Hz.
    pub freq_max_hz: f64,
    /// Reactor lines to run.
    pub active_reactors: u8,
    /// Whether the standby line is engaged in this band.
    pub standby: bool,
    /// Operating mode label.
    pub mode: AdsorptionMode,
    /// Source-reading anchor where interpolation starts (frequency floor).
    pub interp_from: f64,
    /// Source-reading anchor where interpolation ends (frequency ceiling).
    pub interp_to: f64,
}

/// Membrane bioreactor: stepwise TMP bands.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct MbrTableConfig {
    /// TMP bands in ascending order; only the last may be unbounded.
    pub bands: Vec<MbrBandConfig>,
}

impl Default for MbrTableConfig {
    fn default() -> Self {
        Self {
            bands: vec![
                MbrBandConfig {
                    upper_kpa: Some(20.0),
                    aeration_m3_h: 50.0,
                    flux_lmh: 20.0,
                    backwash: false,
                    chemical_clean: false,
                    fouling: FoulingStatus::Normal,
                    alarm_level: 1,
                },
                MbrBandConfig {
                    upper_kpa: Some(30.0),
                    aeration_m3_h: 55.0,
                    flux_lmh: 18.0,
                    backwash: false,
                    chemical_clean: false,
                    fouling: FoulingStatus::Elevated,
                    alarm_level: 1,
                },
                MbrBandConfig {
                    upper_kpa: Some(40.0),
                    aeration_m3_h: 70.0,
                    flux_lmh: 15.0,
                    backwash: true,
                    chemical_clean: false,
                    fouling: FoulingStatus::Fouled,
                    alarm_level: 2,
                },
                MbrBandConfig {
                    upper_kpa: None,
                    aeration_m3_h: 70.0,
                    flux_lmh: 15.0,
                    backwash: true,
                    chemical_clean: true,
                    fouling: FoulingStatus::Critical,
                    alarm_level: 3,
                },
            ],
        }
    }
}

/// One MBR band: everything below `upper_kpa`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct MbrBandConfig {
    /// Exclusive upper TMP bound, kPa; `None` marks the unbounded top band.
    pub upper_kpa: Option<f64>,
    /// Aeration rate setpoint, m³/h.
    pub aeration_m3_h: f64,
    /// Permeate flux target, LMH.
    pub flux_lmh: f64,
    /// Backwash trigger flag.
    pub backwash: bool,
    /// Chemical-clean request flag.
    pub chemical_clean: bool,
    /// Fouling label attached to commands from this band.
    pub fouling: FoulingStatus,
    /// Alarm level (1–3).
    pub alarm_level: u8,
}

/// Regeneration furnace step rule.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct FurnaceConfig {
    /// Adsorption-efficiency threshold, percent. Below it the furnace
    /// heats; at or above it the furnace idles.
    pub efficiency_threshold_pct: f64,
    /// Furnace temperature when heating, °C.
    pub active_temperature_c: f64,
    /// Carbon feed rate when heating, kg/h.
    pub active_feed_rate_kg_h: f64,
}

impl Default for FurnaceConfig {
    fn default() -> Self {
        Self {
            efficiency_threshold_pct: 70.0,
            active_temperature_c: 800.0,
            active_feed_rate_kg_h: 30.0,
        }
    }
}

// ── Diagnostics ──────────────────────────────────────────────────────────

/// Diagnostic scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct DiagnosticConfig {
    /// Per-subsystem composite weights; must sum to 1.0.
    pub weights: DiagnosticWeights,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            weights: DiagnosticWeights::default(),
        }
    }
}

/// Per-subsystem weights of the composite health score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct DiagnosticWeights {
    /// Toxicity forecast subsystem weight.
    pub toxicity: f64,
    /// Adsorption bank subsystem weight.
    pub adsorption: f64,
    /// Membrane bioreactor subsystem weight.
    pub mbr: f64,
    /// Regeneration subsystem weight.
    pub regeneration: f64,
}

impl Default for DiagnosticWeights {
    fn default() -> Self {
        Self {
            toxicity: 0.25,
            adsorption: 0.25,
            mbr: 0.30,
            regeneration: 0.20,
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────────

/// Intent-router trigger vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    /// Keywords that select every unit regardless of other triggers.
    pub all_keywords: Vec<String>,
    /// Per-unit trigger token sets.
    pub triggers: TriggerSets,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            all_keywords: strings(&[
                "all",
                "full",
                "complete",
                "comprehensive",
                "overall",
                "entire",
                "everything",
            ]),
            triggers: TriggerSets::default(),
        }
    }
}

/// Trigger token sets per decision unit.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct TriggerSets {
    /// Toxicity-unit triggers.
    pub toxicity: Vec<String>,
    /// Adsorption-unit triggers.
    pub adsorption: Vec<String>,
    /// MBR-unit triggers.
    pub mbr: Vec<String>,
    /// Regeneration-unit triggers.
    pub regeneration: Vec<String>,
    /// Diagnostic-unit triggers.
    pub diagnostic: Vec<String>,
}

impl Default for TriggerSets {
    fn default() -> Self {
        Self {
            toxicity: strings(&[
                "toxicity",
                "toxic",
                "inhibition",
                "predict",
                "forecast",
                "influent",
            ]),
            adsorption: strings(&[
                "turntable",
                "adsorption",
                "frequency",
                "rotation",
                "reactor",
                "carbon",
                "disc",
            ]),
            mbr: strings(&[
                "mbr",
                "membrane",
                "flux",
                "tmp",
                "transmembrane",
                "backwash",
                "fouling",
                "aeration",
                "pressure",
            ]),
            regeneration: strings(&[
                "regeneration",
                "regenerate",
                "furnace",
                "saturated",
                "reactivation",
                "heating",
            ]),
            diagnostic: strings(&[
                "diagnostic",
                "diagnosis",
                "diagnose",
                "health",
                "status",
                "evaluate",
                "assessment",
                "inspect",
            ]),
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// What to do when a request matches no unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Fail the pipeline (the caller sees `RoutingUnclassified`).
    Reject,
    /// Run every registered unit.
    AllUnits,
}

/// Pipeline timing and fallback policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Time budget for each external collaborator call, milliseconds.
    pub external_timeout_ms: u64,
    /// Policy for unclassified requests.
    pub fallback: FallbackPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            external_timeout_ms: 5000,
            fallback: FallbackPolicy::Reject,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validation::validate;

    #[test]
    fn test_default_config_passes_validation() {
        let cfg = PlantConfig::default();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = DiagnosticWeights::default();
        let sum = w.toxicity + w.adsorption + w.mbr + w.regeneration;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_toml_yields_design_defaults() {
        let cfg: PlantConfig = match toml::from_str("") {
            Ok(c) => c,
            Err(e) => panic!("empty TOML must parse: {e}"),
        };
        assert_eq!(cfg, PlantConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides_one_table() {
        let toml_src = r#"
            [furnace_unused]
        "#;
        // Unknown tables are tolerated by serde's default behavior only when
        // not denied; this config uses permissive parsing.
        let cfg: Result<PlantConfig, _> = toml::from_str(toml_src);
        assert!(cfg.is_ok());

        let toml_src = r#"
            [strategy.furnace]
            efficiency_threshold_pct = 65.0
            active_temperature_c = 780.0
            active_feed_rate_kg_h = 28.0
        "#;
        let cfg: PlantConfig = match toml::from_str(toml_src) {
            Ok(c) => c,
            Err(e) => panic!("partial TOML must parse: {e}"),
        };
        assert_eq!(cfg.strategy.furnace.efficiency_threshold_pct, 65.0);
        // Untouched tables keep their defaults.
        assert_eq!(cfg.classifier, ClassifierConfig::default());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let cfg = PlantConfig::default();
        let serialized = match toml::to_string(&cfg) {
            Ok(s) => s,
            Err(e) => panic!("serialize failed: {e}"),
        };
        let parsed: PlantConfig = match toml::from_str(&serialized) {
            Ok(c) => c,
            Err(e) => panic!("reparse failed: {e}"),
        };
        assert_eq!(parsed, cfg);
    }
}
