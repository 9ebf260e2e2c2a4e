//! Risk classification over ordered threshold bands.
//!
//! ## Responsibility
//! Map a numeric process reading to a discrete [`RiskLevel`] using the
//! per-category band table. Bands are half-open `[low, high)`; the bottom
//! band is unbounded below and the top band unbounded above, so every finite
//! value classifies to exactly one level (total and exclusive). A value
//! sitting exactly on a threshold belongs to the band ABOVE it, in every
//! category.
//!
//! ## NOT Responsible For
//! - Choosing setpoints from a level (that belongs to `strategy`)
//! - Validating the threshold table file (that belongs to `config`)

use serde::{Deserialize, Serialize};

use crate::config::{BandThresholds, ClassifierConfig, ConfigError};
use crate::{DecisionError, Reading};

/// Ordered discrete risk classification of a measurement.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Measurement within the comfortable operating range.
    Low,
    /// Measurement elevated; standard countermeasures apply.
    Medium,
    /// Measurement past the alarm threshold; full countermeasures apply.
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// Recognized measurement categories, each owning its own band table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum ReadingCategory {
    /// Influent toxicity index, dimensionless.
    Toxicity,
    /// Transmembrane pressure, kPa.
    MembranePressure,
    /// Activated-carbon adsorption efficiency, percent.
    AdsorptionEfficiency,
}

impl ReadingCategory {
    /// Canonical kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Toxicity => "toxicity",
            Self::MembranePressure => "membrane-pressure",
            Self::AdsorptionEfficiency => "adsorption-efficiency",
        }
    }

    /// All categories in declaration order.
    pub const ALL: [ReadingCategory; 3] = [
        ReadingCategory::Toxicity,
        ReadingCategory::MembranePressure,
        ReadingCategory::AdsorptionEfficiency,
    ];
}

impl std::fmt::Display for ReadingCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReadingCategory {
    type Err = DecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "toxicity" => Ok(Self::Toxicity),
            "membrane-pressure" => Ok(Self::MembranePressure),
            "adsorption-efficiency" => Ok(Self::AdsorptionEfficiency),
            other => Err(DecisionError::InvalidCategory(other.to_string())),
        }
    }
}

/// Threshold-band classifier over the recognized reading categories.
///
/// The two split points per category partition the real line into three
/// half-open bands. For toxicity and membrane pressure a higher value band
/// means higher risk; for adsorption efficiency the severity runs the other
/// way (low efficiency is the alarm condition, and the 70 % split point is
/// the regeneration threshold).
///
/// Immutable after construction; replacing thresholds means building a new
/// classifier from a new validated config.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    toxicity: BandThresholds,
    membrane_pressure: BandThresholds,
    adsorption_efficiency: BandThresholds,
}

impl RiskClassifier {
    /// Build a classifier from a validated [`ClassifierConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] if a threshold pair is
    /// non-finite or not strictly increasing. The engine must refuse to
    /// start on a malformed table rather than classify undefined bands.
    pub fn from_config(cfg: &ClassifierConfig) -> Result<Self, ConfigError> {
        for (name, t) in [
            ("classifier.toxicity", &cfg.toxicity),
            ("classifier.membrane_pressure", &cfg.membrane_pressure),
            ("classifier.adsorption_efficiency", &cfg.adsorption_efficiency),
        ] {
            if !t.lower.is_finite() || !t.upper.is_finite() || t.lower >= t.upper {
                return Err(ConfigError::InvalidField {
                    field: name.to_string(),
                    value: format!("[{}, {}]", t.lower, t.upper),
                    reason: "thresholds must be finite and strictly increasing".to_string(),
                });
            }
        }
        Ok(Self {
            toxicity: cfg.toxicity,
            membrane_pressure: cfg.membrane_pressure,
            adsorption_efficiency: cfg.adsorption_efficiency,
        })
    }

    /// Classifier over the plant's design thresholds
    /// (toxicity 1.5/3.0, TMP 20/30 kPa, efficiency 70/85 %).
    pub fn with_defaults() -> Self {
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

    /// Classify a reading value into its [`RiskLevel`].
    ///
    /// Total over all finite values: exactly one level is returned, and a
    /// value exactly on a threshold resolves to the band above it.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError::NonFiniteInput`] for NaN or ±infinity.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn classify(
        &self,
        category: ReadingCategory,
        value: f64,
    ) -> Result<RiskLevel, DecisionError> {
        if !value.is_finite() {
            return Err(DecisionError::NonFiniteInput {
                category: category.as_str().to_string(),
                value,
            });
        }

        let (t, inverted) = match category {
            ReadingCategory::Toxicity => (&self.toxicity, false),
            ReadingCategory::MembranePressure => (&self.membrane_pressure, false),
            // Low efficiency is the alarm condition.
            ReadingCategory::AdsorptionEfficiency => (&self.adsorption_efficiency, true),
        };

        let band = if value < t.lower {
            0
        } else if value < t.upper {
            1
        } else {
            2
        };

        let level = match (band, inverted) {
            (0, false) | (2, true) => RiskLevel::Low,
            (1, _) => RiskLevel::Medium,
            _ => RiskLevel::High,
        };
        Ok(level)
    }

    /// Classify via a category name string, for callers at the text boundary.
    ///
    /// # Errors
    ///
    /// [`DecisionError::InvalidCategory`] when the name is unrecognized,
    /// plus everything [`Self::classify`] can return.
    pub fn classify_str(&self, category: &str, value: f64) -> Result<RiskLevel, DecisionError> {
        let cat: ReadingCategory = category.parse()?;
        self.classify(cat, value)
    }

    /// Classify a captured [`Reading`] value object.
    ///
    /// # Errors
    ///
    /// See [`Self::classify`].
    pub fn classify_reading(&self, reading: &Reading) -> Result<RiskLevel, DecisionError> {
        self.classify(reading.category, reading.value)
    }

    /// The split points for one category, `(lower, upper)`.
    pub fn thresholds(&self, category: ReadingCategory) -> (f64, f64) {
        let t = match category {
            ReadingCategory::Toxicity => &self.toxicity,
            ReadingCategory::MembranePressure => &self.membrane_pressure,
            ReadingCategory::AdsorptionEfficiency => &self.adsorption_efficiency,
        };
        (t.lower, t.upper)
    }
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toxicity_bands_partition_the_line() {
        let c = RiskClassifier::with_defaults();
        assert_eq!(c.classify(ReadingCategory::Toxicity, 0.9), Ok(RiskLevel::Low));
        assert_eq!(c.classify(ReadingCategory::Toxicity, 2.0), Ok(RiskLevel::Medium));
        assert_eq!(c.classify(ReadingCategory::Toxicity, 3.5), Ok(RiskLevel::High));
        // Bottom band is unbounded below, top unbounded above.
        assert_eq!(c.classify(ReadingCategory::Toxicity, -100.0), Ok(RiskLevel::Low));
        assert_eq!(c.classify(ReadingCategory::Toxicity, 1.0e9), Ok(RiskLevel::High));
    }

    #[test]
    fn test_boundary_resolves_to_higher_band() {
        let c = RiskClassifier::with_defaults();
        assert_eq!(c.classify(ReadingCategory::Toxicity, 1.5), Ok(RiskLevel::Medium));
        assert_eq!(c.classify(ReadingCategory::Toxicity, 3.0), Ok(RiskLevel::High));
        assert_eq!(
            c.classify(ReadingCategory::MembranePressure, 20.0),
            Ok(RiskLevel::Medium)
        );
        assert_eq!(
            c.classify(ReadingCategory::MembranePressure, 30.0),
            Ok(RiskLevel::High)
        );
        // Efficiency severity is inverted: exactly 70 % sits in the band
        // above the regeneration threshold, so it is NOT the alarm level.
        assert_eq!(
            c.classify(ReadingCategory::AdsorptionEfficiency, 70.0),
            Ok(RiskLevel::Medium)
        );
        assert_eq!(
            c.classify(ReadingCategory::AdsorptionEfficiency, 85.0),
            Ok(RiskLevel::Low)
        );
    }

    #[test]
    fn test_efficiency_severity_is_inverted() {
        let c = RiskClassifier::with_defaults();
        assert_eq!(
            c.classify(ReadingCategory::AdsorptionEfficiency, 65.0),
            Ok(RiskLevel::High)
        );
        assert_eq!(
            c.classify(ReadingCategory::AdsorptionEfficiency, 95.0),
            Ok(RiskLevel::Low)
        );
    }

    #[test]
    fn test_classify_is_total_and_exclusive_over_sampled_domain() {
        let c = RiskClassifier::with_defaults();
        for cat in ReadingCategory::ALL {
            let mut v = -5.0;
            while v < 105.0 {
                let level = c.classify(cat, v);
                assert!(level.is_ok(), "{cat} value {v} must classify");
                v += 0.25;
            }
        }
    }

    #[test]
    fn test_non_finite_input_is_rejected() {
        let c = RiskClassifier::with_defaults();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = c.classify(ReadingCategory::Toxicity, bad);
            assert!(matches!(
                err,
                Err(DecisionError::NonFiniteInput { .. })
            ));
        }
    }

    #[test]
    fn test_unknown_category_string_is_rejected() {
        let c = RiskClassifier::with_defaults();
        let err = c.classify_str("turbidity", 1.0);
        assert_eq!(
            err,
            Err(DecisionError::InvalidCategory("turbidity".to_string()))
        );
    }

    #[test]
    fn test_category_string_parsing_is_case_tolerant() {
        let c = RiskClassifier::with_defaults();
        assert_eq!(
            c.classify_str("  Membrane-Pressure ", 32.0),
            Ok(RiskLevel::High)
        );
    }

    #[test]
    fn test_classify_is_idempotent() {
        let c = RiskClassifier::with_defaults();
        let a = c.classify(ReadingCategory::Toxicity, 2.2);
        let b = c.classify(ReadingCategory::Toxicity, 2.2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_config_rejects_inverted_thresholds() {
        let mut cfg = ClassifierConfig::default();
        cfg.toxicity = BandThresholds {
            lower: 3.0,
            upper: 1.5,
        };
        assert!(RiskClassifier::from_config(&cfg).is_err());
    }
}
