//! Control-strategy tables mapping risk levels and raw readings to
//! actuator setpoint commands.
//!
//! ## Responsibility
//! One strategy table per controlled subsystem:
//! - adsorption reactor bank (turntable lines): risk-level bands with
//!   within-band frequency interpolation
//! - membrane bioreactor: stepwise bands keyed on transmembrane pressure,
//!   with an unconditional backwash override past the top boundary
//! - regeneration furnace: a binary step on adsorption efficiency
//!
//! `decide` is pure given the table and its inputs. A command is either
//! fully populated from one band or not emitted at all.
//!
//! ## NOT Responsible For
//! - Mapping raw values to risk levels (that belongs to `classifier`)
//! - Sending commands to the PLC gateway (external collaborator; the
//!   serialized field names of [`SubsystemCommand`] are its wire contract)

use serde::{Deserialize, Serialize};

use crate::classifier::RiskLevel;
use crate::config::{ConfigError, StrategyConfig};
use crate::{DecisionError, PlantSnapshot};

/// Rotation speed per drive hertz for the 4-pole turntable motors.
const RPM_PER_HZ: f64 = 30.0;

/// Controlled subsystems registered with the strategy engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum Subsystem {
    /// Activated-carbon turntable adsorption lines.
    Adsorption,
    /// Membrane bioreactor.
    Mbr,
    /// Activated-carbon regeneration furnace.
    Furnace,
}

impl Subsystem {
    /// Canonical kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Adsorption => "adsorption",
            Self::Mbr => "mbr",
            Self::Furnace => "furnace",
        }
    }

    /// All subsystems in declaration order.
    pub const ALL: [Subsystem; 3] = [Subsystem::Adsorption, Subsystem::Mbr, Subsystem::Furnace];
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Subsystem {
    type Err = DecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adsorption" => Ok(Self::Adsorption),
            "mbr" => Ok(Self::Mbr),
            "furnace" => Ok(Self::Furnace),
            other => Err(DecisionError::UnknownSubsystem(other.to_string())),
        }
    }
}

/// Operating mode label for the adsorption reactor bank.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AdsorptionMode {
    /// Low-toxicity operation, minimum drive power.
    EnergySaving,
    /// Standard two-line operation.
    Standard,
    /// High-toxicity operation with the standby line engaged.
    FullCapacity,
}

/// Membrane fouling classification attached to an MBR command.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FoulingStatus {
    /// TMP inside the design envelope.
    Normal,
    /// TMP above nominal; aeration raised.
    Elevated,
    /// TMP past the backwash boundary.
    Fouled,
    /// TMP past the chemical-clean boundary.
    Critical,
}

/// Regeneration furnace operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FurnaceMode {
    /// Furnace cold, no carbon feed.
    Standby,
    /// Furnace heating, carbon feed running.
    ActiveHeating,
}

/// A fully-populated actuator setpoint command for one subsystem.
///
/// The serialized field names and units are the exact contract the
/// actuator/PLC gateway accepts; the core never emits a partially
/// populated variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subsystem", rename_all = "kebab-case")]
pub enum SubsystemCommand {
    /// Turntable adsorption line setpoints.
    Adsorption {
        /// Drive frequency setpoint for the running lines, Hz.
        frequency_hz: f64,
        /// Disc rotation speed at that frequency, rpm.
        rotation_rpm: f64,
        /// Number of reactor lines to run (2 regular, 3 with standby).
        active_reactors: u8,
        /// Whether the standby line is engaged.
        standby_triggered: bool,
        /// Predicted toxicity removal at these setpoints, percent.
        expected_removal_pct: f64,
        /// Operating mode label.
        mode: AdsorptionMode,
        /// Alarm level (1 routine, 2 high-drive, 3 standby engaged).
        alarm_level: u8,
    },
    /// Membrane bioreactor setpoints.
    Mbr {
        /// Aeration rate setpoint, m³/h.
        aeration_m3_h: f64,
        /// Permeate flux target, LMH.
        flux_lmh: f64,
        /// Backwash trigger flag.
        backwash: bool,
        /// Chemical-clean request flag.
        chemical_clean: bool,
        /// Fouling classification driving these setpoints.
        fouling: FoulingStatus,
        /// Alarm level (1 routine, 2 backwash, 3 chemical clean).
        alarm_level: u8,
    },
    /// Regeneration furnace setpoints.
    Furnace {
        /// Operating mode.
        mode: FurnaceMode,
        /// Furnace temperature setpoint, °C (0 when standby).
        temperature_c: f64,
        /// Carbon feed rate, kg/h (0 when standby).
        feed_rate_kg_h: f64,
    },
}

impl SubsystemCommand {
    /// The subsystem this command targets.
    pub fn subsystem(&self) -> Subsystem {
        match self {
            Self::Adsorption { .. } => Subsystem::Adsorption,
            Self::Mbr { .. } => Subsystem::Mbr,
            Self::Furnace { .. } => Subsystem::Furnace,
        }
    }
}

// ── Internal table rows ────────────────────────────────────────────────────

/// One adsorption band: a risk level plus its frequency range and the
/// source-reading anchors used for within-band interpolation.
#[derive(Debug, Clone)]
struct AdsorptionBand {
    risk: RiskLevel,
    freq_min_hz: f64,
    freq_max_hz: f64,
    active_reactors: u8,
    standby: bool,
    mode: AdsorptionMode,
    interp_from: f64,
    interp_to: f64,
}

/// One MBR band: everything below `upper_kpa` (None = unbounded top band).
#[derive(Debug, Clone)]
struct MbrBand {
    upper_kpa: Option<f64>,
    aeration_m3_h: f64,
    flux_lmh: f64,
    backwash: bool,
    chemical_clean: bool,
    fouling: FoulingStatus,
    alarm_level: u8,
}

/// Strategy-table engine over the three controlled subsystems.
///
/// Tables are immutable after construction; a config change means building
/// a whole new engine from a new validated config. `decide` has no side
/// effects and is safe to call concurrently.
#[derive(Debug, Clone)]
pub struct ControlStrategyEngine {
    adsorption: Vec<AdsorptionBand>,
    mbr: Vec<MbrBand>,
    furnace_threshold_pct: f64,
    furnace_temperature_c: f64,
    furnace_feed_rate_kg_h: f64,
}

impl ControlStrategyEngine {
    /// Build an engine from a validated [`StrategyConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when a band table does not
    /// partition its domain (missing or duplicated risk level, unordered
    /// TMP bounds, more than one unbounded band). The engine refuses to
    /// start rather than produce undefined setpoints later.
    pub fn from_config(cfg: &StrategyConfig) -> Result<Self, ConfigError> {
        let mut adsorption = Vec::with_capacity(cfg.adsorption.bands.len());
        for band in &cfg.adsorption.bands {
            adsorption.push(AdsorptionBand {
                risk: band.risk,
                freq_min_hz: band.freq_min_hz,
                freq_max_hz: band.freq_max_hz,
                active_reactors: band.active_reactors,
                standby: band.standby,
                mode: band.mode,
                interp_from: band.interp_from,
                interp_to: band.interp_to,
            });
        }
        for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
            let count = adsorption.iter().filter(|b| b.risk == level).count();
            if count != 1 {
                return Err(ConfigError::InvalidField {
                    field: "strategy.adsorption.bands".to_string(),
                    value: format!("{count} bands for {level}"),
                    reason: "each risk level needs exactly one band".to_string(),
                });
            }
        }

        let mut mbr = Vec::with_capacity(cfg.mbr.bands.len());
        let mut prev_upper = f64::NEG_INFINITY;
        for (i, band) in cfg.mbr.bands.iter().enumerate() {
            let is_last = i + 1 == cfg.mbr.bands.len();
            match band.upper_kpa {
                Some(upper) => {
                    if is_last || upper <= prev_upper || !upper.is_finite() {
                        return Err(ConfigError::InvalidField {
                            field: format!("strategy.mbr.bands[{i}].upper_kpa"),
                            value: format!("{upper}"),
                            reason: "bounds must be finite, strictly increasing, and only the last band unbounded"
                                .to_string(),
                        });
                    }
                    prev_upper = upper;
                }
                None if !is_last => {
                    return Err(ConfigError::InvalidField {
                        field: format!("strategy.mbr.bands[{i}].upper_kpa"),
                        value: "none".to_string(),
                        reason: "only the last band may be unbounded".to_string(),
                    });
                }
                None => {}
            }
            mbr.push(MbrBand {
                upper_kpa: band.upper_kpa,
                aeration_m3_h: band.aeration_m3_h,
                flux_lmh: band.flux_lmh,
                backwash: band.backwash,
                chemical_clean: band.chemical_clean,
                fouling: band.fouling,
                alarm_level: band.alarm_level,
            });
        }
        if mbr.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "strategy.mbr.bands".to_string(),
                value: "[]".to_string(),
                reason: "at least one band is required".to_string(),
            });
        }

        Ok(Self {
            adsorption,
            mbr,
            furnace_threshold_pct: cfg.furnace.efficiency_threshold_pct,
            furnace_temperature_c: cfg.furnace.active_temperature_c,
            furnace_feed_rate_kg_h: cfg.furnace.active_feed_rate_kg_h,
        })
    }

    /// Engine over the plant's design strategy tables.
    pub fn with_defaults() -> Self {
        // with_defaults cannot fail: the default config is the validated
        // design table.
        match Self::from_config(&StrategyConfig::default()) {
            Ok(engine) => engine,
            Err(_) => unreachable!("default strategy tables are well-formed"),
        }
    }

    /// Compute the setpoint command for one subsystem.
    ///
    /// `risk` is the classifier output for the subsystem's primary reading;
    /// the MBR and furnace tables are keyed directly on their raw readings
    /// in `snapshot` and use `risk` only as corroborating context. Pure:
    /// identical inputs against an unmodified table produce identical
    /// commands.
    ///
    /// # Errors
    ///
    /// [`DecisionError::OutOfRangeReading`] when the governing reading lies
    /// outside its declared domain (the engine never clamps silently);
    /// [`DecisionError::NonFiniteInput`] for NaN/±infinity.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn decide(
        &self,
        subsystem: Subsystem,
        risk: RiskLevel,
        snapshot: &PlantSnapshot,
    ) -> Result<SubsystemCommand, DecisionError> {
        match subsystem {
            Subsystem::Adsorption => self.decide_adsorption(risk, snapshot.toxicity_index),
            Subsystem::Mbr => self.decide_mbr(snapshot.membrane_pressure_kpa),
            Subsystem::Furnace => self.decide_furnace(snapshot.adsorption_efficiency_pct),
        }
    }

    /// Resolve a subsystem by name, then decide.
    ///
    /// # Errors
    ///
    /// [`DecisionError::UnknownSubsystem`] for an unregistered identifier,
    /// plus everything [`Self::decide`] can return.
    pub fn decide_str(
        &self,
        subsystem: &str,
        risk: RiskLevel,
        snapshot: &PlantSnapshot,
    ) -> Result<SubsystemCommand, DecisionError> {
        let sub: Subsystem = subsystem.parse()?;
        self.decide(sub, risk, snapshot)
    }

    fn decide_adsorption(
        &self,
        risk: RiskLevel,
        toxicity: f64,
    ) -> Result<SubsystemCommand, DecisionError> {
        check_domain("toxicity", toxicity, 0.0, 10.0)?;

        let band = self
            .adsorption
            .iter()
            .find(|b| b.risk == risk)
            .ok_or_else(|| DecisionError::UnknownSubsystem("adsorption".to_string()))?;

        // Frequency follows the normalized position of the raw reading
        // inside its source band, so two inputs at the same risk level but
        // different raw values get proportionally different setpoints and
        // the profile stays continuous across band transitions.
        let span = band.interp_to - band.interp_from;
        let t = ((toxicity - band.interp_from) / span).clamp(0.0, 1.0);
        let frequency_hz = band.freq_min_hz + t * (band.freq_max_hz - band.freq_min_hz);
        let rotation_rpm = frequency_hz * RPM_PER_HZ;

        let alarm_level = if band.standby {
            3
        } else if frequency_hz > 35.0 {
            2
        } else {
            1
        };

        Ok(SubsystemCommand::Adsorption {
            frequency_hz,
            rotation_rpm,
            active_reactors: band.active_reactors,
            standby_triggered: band.standby,
            expected_removal_pct: expected_removal_pct(frequency_hz, toxicity),
            mode: band.mode,
            alarm_level,
        })
    }

    fn decide_mbr(&self, tmp_kpa: f64) -> Result<SubsystemCommand, DecisionError> {
        check_domain("membrane-pressure", tmp_kpa, 0.0, 100.0)?;

        // First band whose upper bound the reading is below; the last band
        // is unbounded, so the search is total. A value exactly on a bound
        // falls through to the band above it.
        let band = self
            .mbr
            .iter()
            .find(|b| match b.upper_kpa {
                Some(upper) => tmp_kpa < upper,
                None => true,
            })
            .unwrap_or_else(|| &self.mbr[self.mbr.len() - 1]);

        Ok(SubsystemCommand::Mbr {
            aeration_m3_h: band.aeration_m3_h,
            flux_lmh: band.flux_lmh,
            backwash: band.backwash,
            chemical_clean: band.chemical_clean,
            fouling: band.fouling,
            alarm_level: band.alarm_level,
        })
    }

    fn decide_furnace(&self, efficiency_pct: f64) -> Result<SubsystemCommand, DecisionError> {
        check_domain("adsorption-efficiency", efficiency_pct, 0.0, 100.0)?;

        // Step function, no interpolation: below the threshold the furnace
        // heats, at or above it the furnace idles.
        if efficiency_pct < self.furnace_threshold_pct {
            Ok(SubsystemCommand::Furnace {
                mode: FurnaceMode::ActiveHeating,
                temperature_c: self.furnace_temperature_c,
                feed_rate_kg_h: self.furnace_feed_rate_kg_h,
            })
        } else {
            Ok(SubsystemCommand::Furnace {
                mode: FurnaceMode::Standby,
                temperature_c: 0.0,
                feed_rate_kg_h: 0.0,
            })
        }
    }
}

impl Default for ControlStrategyEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Reject a reading outside its declared domain or non-finite.
fn check_domain(
    category: &str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), DecisionError> {
    if !value.is_finite() {
        return Err(DecisionError::NonFiniteInput {
            category: category.to_string(),
            value,
        });
    }
    if value < min || value > max {
        return Err(DecisionError::OutOfRangeReading {
            category: category.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Predicted toxicity removal from first-order adsorption kinetics.
///
/// `η = 1 − exp(−k·HRT)` with the mass-transfer coefficient rising with
/// disc speed, derated 10 % above toxicity 3.0, clamped to the 30–95 %
/// envelope observed at commissioning.
fn expected_removal_pct(frequency_hz: f64, toxicity: f64) -> f64 {
    let k_base = 0.05;
    let rpm = frequency_hz * RPM_PER_HZ;
    let k = k_base * (1.0 + rpm / 1000.0);
    let hrt_hours = 15.0 / 60.0;
    let mut rate = (1.0 - (-k * hrt_hours * 60.0).exp()) * 100.0;
    if toxicity > 3.0 {
        rate *= 0.9;
    }
    rate.clamp(30.0, 95.0)
}
