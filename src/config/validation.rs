//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`PlantConfig`] that cannot be
//! expressed through the type system alone: band partitions with no gaps or
//! overlaps, weight sums, setpoint ranges.
//!
//! ## Guarantees
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//! - A config that passes here is safe to hand to every `from_config`
//!   constructor; malformed tables are fatal at startup, never at runtime
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use crate::classifier::RiskLevel;
use crate::config::PlantConfig;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "strategy.furnace.active_temperature_c").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A required environment variable is not set.
    #[error("environment variable {var} is not set")]
    MissingEnv {
        /// The variable name.
        var: String,
    },
}

/// Validate all semantic constraints on a [`PlantConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Errors
///
/// `Err(Vec<ConfigError>)` with every violation found.
pub fn validate(config: &PlantConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Classifier thresholds ────────────────────────────────────────
    for (field, t) in [
        ("classifier.toxicity", &config.classifier.toxicity),
        (
            "classifier.membrane_pressure",
            &config.classifier.membrane_pressure,
        ),
        (
            "classifier.adsorption_efficiency",
            &config.classifier.adsorption_efficiency,
        ),
    ] {
        if !t.lower.is_finite() || !t.upper.is_finite() || t.lower >= t.upper {
            errors.push(ConfigError::InvalidField {
                field: field.to_string(),
                value: format!("[{}, {}]", t.lower, t.upper),
                reason: "thresholds must be finite and strictly increasing".to_string(),
            });
        }
    }

    // ── Adsorption bands ─────────────────────────────────────────────
    for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
        let count = config
            .strategy
            .adsorption
            .bands
            .iter()
            .filter(|b| b.risk == level)
            .count();
        if count != 1 {
            errors.push(ConfigError::InvalidField {
                field: "strategy.adsorption.bands".to_string(),
                value: format!("{count} bands for {level}"),
                reason: "each risk level needs exactly one band (no gaps, no overlaps)"
                    .to_string(),
            });
        }
    }
    for (i, band) in config.strategy.adsorption.bands.iter().enumerate() {
        if !(0.0..=50.0).contains(&band.freq_min_hz)
            || !(0.0..=50.0).contains(&band.freq_max_hz)
            || band.freq_min_hz > band.freq_max_hz
        {
            errors.push(ConfigError::InvalidField {
                field: format!("strategy.adsorption.bands[{i}]"),
                value: format!("[{}, {}] Hz", band.freq_min_hz, band.freq_max_hz),
                reason: "frequency range must be ordered and within 0-50 Hz".to_string(),
            });
        }
        if !band.interp_from.is_finite()
            || !band.interp_to.is_finite()
            || band.interp_from >= band.interp_to
        {
            errors.push(ConfigError::InvalidField {
                field: format!("strategy.adsorption.bands[{i}].interp_from"),
                value: format!("[{}, {}]", band.interp_from, band.interp_to),
                reason: "interpolation anchors must be finite and strictly increasing"
                    .to_string(),
            });
        }
        if band.active_reactors == 0 || band.active_reactors > 3 {
            errors.push(ConfigError::InvalidField {
                field: format!("strategy.adsorption.bands[{i}].active_reactors"),
                value: band.active_reactors.to_string(),
                reason: "plant has 3 lines (2 regular + 1 standby)".to_string(),
            });
        }
    }
    // Interpolation anchors must meet the classifier's band edges, so the
    // frequency profile cannot jump where the risk level changes.
    let tox = &config.classifier.toxicity;
    let anchors: Vec<(RiskLevel, f64, f64)> = vec![
        (RiskLevel::Low, f64::NEG_INFINITY, tox.lower),
        (RiskLevel::Medium, tox.lower, tox.upper),
        (RiskLevel::High, tox.upper, f64::INFINITY),
    ];
    for (level, lo, hi) in anchors {
        if let Some(band) = config
            .strategy
            .adsorption
            .bands
            .iter()
            .find(|b| b.risk == level)
        {
            let from_ok = lo == f64::NEG_INFINITY || (band.interp_from - lo).abs() < 1e-9;
            let to_ok = hi == f64::INFINITY || (band.interp_to - hi).abs() < 1e-9;
            if !from_ok || !to_ok {
                errors.push(ConfigError::InvalidField {
                    field: "strategy.adsorption.bands".to_string(),
                    value: format!(
                        "{level}: anchors [{}, {}]",
                        band.interp_from, band.interp_to
                    ),
                    reason: "interpolation anchors must align with the classifier thresholds"
                        .to_string(),
                });
            }
        }
    }

    // ── MBR bands ────────────────────────────────────────────────────
    if config.strategy.mbr.bands.is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "strategy.mbr.bands".to_string(),
            value: "[]".to_string(),
            reason: "at least one band is required".to_string(),
        });
    }
    let mut prev_upper = f64::NEG_INFINITY;
    let last_idx = config.strategy.mbr.bands.len().saturating_sub(1);
    for (i, band) in config.strategy.mbr.bands.iter().enumerate() {
        match band.upper_kpa {
            Some(upper) => {
                if i == last_idx {
                    errors.push(ConfigError::InvalidField {
                        field: format!("strategy.mbr.bands[{i}].upper_kpa"),
                        value: format!("{upper}"),
                        reason: "the last band must be unbounded (no gap above it)".to_string(),
                    });
                } else if !upper.is_finite() || upper <= prev_upper {
                    errors.push(ConfigError::InvalidField {
                        field: format!("strategy.mbr.bands[{i}].upper_kpa"),
                        value: format!("{upper}"),
                        reason: "bounds must be finite and strictly increasing".to_string(),
                    });
                }
                prev_upper = upper;
            }
            None if i != last_idx => {
                errors.push(ConfigError::InvalidField {
                    field: format!("strategy.mbr.bands[{i}].upper_kpa"),
                    value: "none".to_string(),
                    reason: "only the last band may be unbounded (no overlap)".to_string(),
                });
            }
            None => {}
        }
        if !(0.0..=200.0).contains(&band.aeration_m3_h) {
            errors.push(ConfigError::InvalidField {
                field: format!("strategy.mbr.bands[{i}].aeration_m3_h"),
                value: band.aeration_m3_h.to_string(),
                reason: "aeration must be within 0-200 m³/h".to_string(),
            });
        }
        if !(0.0..=50.0).contains(&band.flux_lmh) {
            errors.push(ConfigError::InvalidField {
                field: format!("strategy.mbr.bands[{i}].flux_lmh"),
                value: band.flux_lmh.to_string(),
                reason: "flux must be within 0-50 LMH".to_string(),
            });
        }
        if band.alarm_level == 0 || band.alarm_level > 3 {
            errors.push(ConfigError::InvalidField {
                field: format!("strategy.mbr.bands[{i}].alarm_level"),
                value: band.alarm_level.to_string(),
                reason: "alarm level must be 1-3".to_string(),
            });
        }
    }

    // ── Furnace ──────────────────────────────────────────────────────
    let furnace = &config.strategy.furnace;
    if !(0.0..100.0).contains(&furnace.efficiency_threshold_pct)
        || furnace.efficiency_threshold_pct == 0.0
    {
        errors.push(ConfigError::InvalidField {
            field: "strategy.furnace.efficiency_threshold_pct".to_string(),
            value: furnace.efficiency_threshold_pct.to_string(),
            reason: "threshold must be within (0, 100) %".to_string(),
        });
    }
    if !(0.0..=1000.0).contains(&furnace.active_temperature_c) {
        errors.push(ConfigError::InvalidField {
            field: "strategy.furnace.active_temperature_c".to_string(),
            value: furnace.active_temperature_c.to_string(),
            reason: "kiln rating is 1000 °C".to_string(),
        });
    }
    if !(0.0..=100.0).contains(&furnace.active_feed_rate_kg_h) {
        errors.push(ConfigError::InvalidField {
            field: "strategy.furnace.active_feed_rate_kg_h".to_string(),
            value: furnace.active_feed_rate_kg_h.to_string(),
            reason: "feed rate must be within 0-100 kg/h".to_string(),
        });
    }

    // ── Diagnostic weights ───────────────────────────────────────────
    let w = &config.diagnostics.weights;
    let parts = [
        ("diagnostics.weights.toxicity", w.toxicity),
        ("diagnostics.weights.adsorption", w.adsorption),
        ("diagnostics.weights.mbr", w.mbr),
        ("diagnostics.weights.regeneration", w.regeneration),
    ];
    for (field, value) in parts {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            errors.push(ConfigError::InvalidField {
                field: field.to_string(),
                value: value.to_string(),
                reason: "each weight must be within 0.0-1.0".to_string(),
            });
        }
    }
    let sum: f64 = parts.iter().map(|(_, v)| v).sum();
    if (sum - 1.0).abs() > 1e-6 {
        errors.push(ConfigError::InvalidField {
            field: "diagnostics.weights".to_string(),
            value: format!("sum = {sum}"),
            reason: "weights must sum to 1.0".to_string(),
        });
    }

    // ── Router vocabulary ────────────────────────────────────────────
    let sets = [
        ("router.triggers.toxicity", &config.router.triggers.toxicity),
        (
            "router.triggers.adsorption",
            &config.router.triggers.adsorption,
        ),
        ("router.triggers.mbr", &config.router.triggers.mbr),
        (
            "router.triggers.regeneration",
            &config.router.triggers.regeneration,
        ),
        (
            "router.triggers.diagnostic",
            &config.router.triggers.diagnostic,
        ),
        ("router.all_keywords", &config.router.all_keywords),
    ];
    for (field, tokens) in sets {
        if tokens.is_empty() || tokens.iter().any(|t| t.trim().is_empty()) {
            errors.push(ConfigError::InvalidField {
                field: field.to_string(),
                value: format!("{tokens:?}"),
                reason: "token set must be non-empty with no blank tokens".to_string(),
            });
        }
    }

    // ── Pipeline settings ────────────────────────────────────────────
    if config.pipeline.external_timeout_ms == 0 {
        errors.push(ConfigError::InvalidField {
            field: "pipeline.external_timeout_ms".to_string(),
            value: "0".to_string(),
            reason: "timeout must be at least 1 ms".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BandThresholds, PlantConfig};

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&PlantConfig::default()).is_ok());
    }

    #[test]
    fn test_band_gap_is_fatal() {
        let mut cfg = PlantConfig::default();
        // Removing the medium band leaves a gap in the risk domain.
        cfg.strategy.adsorption.bands.remove(1);
        let errors = match validate(&cfg) {
            Err(e) => e,
            Ok(()) => panic!("gap must fail validation"),
        };
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("exactly one band")));
    }

    #[test]
    fn test_band_overlap_is_fatal() {
        let mut cfg = PlantConfig::default();
        let dup = cfg.strategy.adsorption.bands[0].clone();
        cfg.strategy.adsorption.bands.push(dup);
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_weights_not_summing_to_one_is_fatal() {
        let mut cfg = PlantConfig::default();
        cfg.diagnostics.weights.mbr = 0.9;
        let errors = match validate(&cfg) {
            Err(e) => e,
            Ok(()) => panic!("bad weights must fail validation"),
        };
        assert!(errors.iter().any(|e| e.to_string().contains("sum")));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut cfg = PlantConfig::default();
        cfg.classifier.toxicity = BandThresholds {
            lower: 5.0,
            upper: 1.0,
        };
        cfg.diagnostics.weights.mbr = 0.9;
        cfg.pipeline.external_timeout_ms = 0;
        let errors = match validate(&cfg) {
            Err(e) => e,
            Ok(()) => panic!("must fail validation"),
        };
        assert!(errors.len() >= 3, "got {} errors", errors.len());
    }

    #[test]
    fn test_misaligned_interpolation_anchor_is_fatal() {
        let mut cfg = PlantConfig::default();
        cfg.strategy.adsorption.bands[1].interp_to = 2.5;
        let errors = match validate(&cfg) {
            Err(e) => e,
            Ok(()) => panic!("misaligned anchors must fail validation"),
        };
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("classifier thresholds")));
    }

    #[test]
    fn test_intermediate_unbounded_mbr_band_is_fatal() {
        let mut cfg = PlantConfig::default();
        cfg.strategy.mbr.bands[1].upper_kpa = None;
        assert!(validate(&cfg).is_err());
    }
}
