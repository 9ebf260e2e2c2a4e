//! Deterministic intent routing over a declarative trigger-token table.
//!
//! ## Responsibility
//! Classify an operator request into the decision units that should run.
//! Every category is evaluated against the request (union semantics, not
//! first-match) and the returned selection preserves the declared category
//! order, so downstream report layout is reproducible. An "all" keyword
//! dominates and selects every registered unit. Zero matches yield a
//! distinguished unclassified selection, never an error — the caller
//! decides whether that is fatal.
//!
//! Matching is case- and whitespace-normalization-tolerant: the request is
//! lowercased and split on non-alphanumeric boundaries before token lookup.

use serde::Serialize;

use crate::config::{ConfigError, RouterConfig};

/// Decision units the router can select, in declaration order.
///
/// Declaration order is the aggregation order of every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionUnit {
    /// Toxicity forecast and risk classification.
    Toxicity,
    /// Adsorption reactor bank control.
    Adsorption,
    /// Membrane bioreactor control.
    Mbr,
    /// Carbon regeneration control.
    Regeneration,
    /// Composite plant diagnostics.
    Diagnostic,
}

impl DecisionUnit {
    /// Canonical kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Toxicity => "toxicity",
            Self::Adsorption => "adsorption",
            Self::Mbr => "mbr",
            Self::Regeneration => "regeneration",
            Self::Diagnostic => "diagnostic",
        }
    }

    /// All units in declaration order.
    pub const ALL: [DecisionUnit; 5] = [
        DecisionUnit::Toxicity,
        DecisionUnit::Adsorption,
        DecisionUnit::Mbr,
        DecisionUnit::Regeneration,
        DecisionUnit::Diagnostic,
    ];
}

impl std::fmt::Display for DecisionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a unit came to be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// A category trigger token appeared in the request.
    Trigger,
    /// An all-keyword dominated the selection.
    AllKeyword,
    /// The pipeline's fallback policy supplied the unit.
    Fallback,
}

/// One selected unit with its match provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnitMatch {
    /// The selected decision unit.
    pub unit: DecisionUnit,
    /// Why it was selected.
    pub kind: MatchKind,
}

/// Ordered set of decision units selected for one request.
///
/// Created per request, consumed once by the pipeline, discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentSelection {
    matches: Vec<UnitMatch>,
}

impl IntentSelection {
    /// The unclassified selection (no unit matched).
    pub fn unclassified() -> Self {
        Self { matches: Vec::new() }
    }

    /// Selection of every registered unit with the given provenance.
    pub fn all_units(kind: MatchKind) -> Self {
        Self {
            matches: DecisionUnit::ALL
                .iter()
                .map(|&unit| UnitMatch { unit, kind })
                .collect(),
        }
    }

    /// True when no unit matched.
    pub fn is_unclassified(&self) -> bool {
        self.matches.is_empty()
    }

    /// Selected units with provenance, in declared category order.
    pub fn matches(&self) -> &[UnitMatch] {
        &self.matches
    }

    /// Selected units in declared category order.
    pub fn units(&self) -> impl Iterator<Item = DecisionUnit> + '_ {
        self.matches.iter().map(|m| m.unit)
    }

    /// Number of selected units.
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// True when the selection is empty.
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Keyword router over per-unit trigger-token sets.
///
/// Token tables are immutable after construction; swapping triggers means
/// building a new router from a new validated config.
#[derive(Debug, Clone)]
pub struct IntentRouter {
    // One token set per unit, kept in DecisionUnit::ALL order.
    triggers: [Vec<String>; 5],
    all_keywords: Vec<String>,
}

impl IntentRouter {
    /// Build a router from a validated [`RouterConfig`].
    ///
    /// Tokens are normalized to lowercase at load time.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidField`] when any trigger set or the
    /// all-keyword set is empty or contains a blank token.
    pub fn from_config(cfg: &RouterConfig) -> Result<Self, ConfigError> {
        let sets = [
            ("router.triggers.toxicity", &cfg.triggers.toxicity),
            ("router.triggers.adsorption", &cfg.triggers.adsorption),
            ("router.triggers.mbr", &cfg.triggers.mbr),
            ("router.triggers.regeneration", &cfg.triggers.regeneration),
            ("router.triggers.diagnostic", &cfg.triggers.diagnostic),
            ("router.all_keywords", &cfg.all_keywords),
        ];
        for (field, tokens) in &sets {
            if tokens.is_empty() || tokens.iter().any(|t| t.trim().is_empty()) {
                return Err(ConfigError::InvalidField {
                    field: (*field).to_string(),
                    value: format!("{tokens:?}"),
                    reason: "token set must be non-empty with no blank tokens".to_string(),
                });
            }
        }

        let normalize = |tokens: &[String]| -> Vec<String> {
            tokens
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .collect()
        };

        Ok(Self {
            triggers: [
                normalize(&cfg.triggers.toxicity),
                normalize(&cfg.triggers.adsorption),
                normalize(&cfg.triggers.mbr),
                normalize(&cfg.triggers.regeneration),
                normalize(&cfg.triggers.diagnostic),
            ],
            all_keywords: normalize(&cfg.all_keywords),
        })
    }

    /// Router over the default trigger vocabulary.
    pub fn with_defaults() -> Self {
        match Self::from_config(&RouterConfig::default()) {
            Ok(router) => router,
            Err(_) => unreachable!("default trigger tables are well-formed"),
        }
    }

    /// Route a free-text request to its decision units.
    ///
    /// Evaluates every category (union, not first-match); an all-keyword
    /// dominates and returns the full unit set even when no per-unit
    /// trigger matched. Deterministic: identical text always yields an
    /// identical selection in declared order.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn route(&self, text: &str) -> IntentSelection {
        let tokens = tokenize(text);

        if self
            .all_keywords
            .iter()
            .any(|kw| tokens.iter().any(|t| t == kw))
        {
            return IntentSelection::all_units(MatchKind::AllKeyword);
        }

        let matches = DecisionUnit::ALL
            .iter()
            .zip(self.triggers.iter())
            .filter(|(_, triggers)| triggers.iter().any(|tr| tokens.iter().any(|t| t == tr)))
            .map(|(&unit, _)| UnitMatch {
                unit,
                kind: MatchKind::Trigger,
            })
            .collect();

        IntentSelection { matches }
    }
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Lowercase the request and split it on non-alphanumeric boundaries.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_trigger_selects_one_unit() {
        let router = IntentRouter::with_defaults();
        let selection = router.route("what is the membrane pressure doing?");
        let units: Vec<_> = selection.units().collect();
        assert_eq!(units, vec![DecisionUnit::Mbr]);
    }

    #[test]
    fn test_union_of_matches_in_declared_order() {
        let router = IntentRouter::with_defaults();
        // Trigger order in the text is reversed relative to declaration.
        let selection = router.route("check the furnace regeneration and the toxicity trend");
        let units: Vec<_> = selection.units().collect();
        assert_eq!(
            units,
            vec![DecisionUnit::Toxicity, DecisionUnit::Regeneration]
        );
    }

    #[test]
    fn test_all_keyword_dominates() {
        let router = IntentRouter::with_defaults();
        for text in [
            "run a full analysis",
            "give me the COMPLETE picture",
            "overall situation please",
        ] {
            let selection = router.route(text);
            let units: Vec<_> = selection.units().collect();
            assert_eq!(units, DecisionUnit::ALL.to_vec(), "text: {text}");
            assert!(selection
                .matches()
                .iter()
                .all(|m| m.kind == MatchKind::AllKeyword));
        }
    }

    #[test]
    fn test_all_keyword_wins_even_with_unit_triggers_present() {
        let router = IntentRouter::with_defaults();
        let selection = router.route("full report on mbr flux");
        assert_eq!(selection.len(), DecisionUnit::ALL.len());
    }

    #[test]
    fn test_no_match_yields_unclassified_not_error() {
        let router = IntentRouter::with_defaults();
        let selection = router.route("what is for lunch today");
        assert!(selection.is_unclassified());
        assert_eq!(selection.len(), 0);
    }

    #[test]
    fn test_matching_tolerates_case_and_whitespace() {
        let router = IntentRouter::with_defaults();
        let a = router.route("TOXICITY   forecast\tplease");
        let b = router.route("toxicity forecast please");
        assert_eq!(a, b);
        assert!(!a.is_unclassified());
    }

    #[test]
    fn test_punctuation_does_not_break_tokens() {
        let router = IntentRouter::with_defaults();
        let selection = router.route("backwash? (membrane), tmp=32");
        let units: Vec<_> = selection.units().collect();
        assert_eq!(units, vec![DecisionUnit::Mbr]);
    }

    #[test]
    fn test_route_is_deterministic() {
        let router = IntentRouter::with_defaults();
        let a = router.route("diagnose adsorption and membrane health");
        let b = router.route("diagnose adsorption and membrane health");
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_config_rejects_empty_trigger_set() {
        let mut cfg = RouterConfig::default();
        cfg.triggers.mbr.clear();
        assert!(IntentRouter::from_config(&cfg).is_err());
    }
}
