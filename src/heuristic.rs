//! Weighted heuristic trust score.
//!
//! Each factor turns one raw "badness" signal from the [`FeatureMap`] into a
//! sub-score in `[0, 1]` (1 is safest). The trust score is the weighted sum of
//! the sub-scores scaled to `0..=100`.

use crate::{error::EngineError, features::FeatureMap};
use serde::Serialize;
use std::collections::BTreeMap;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Trigger words at which the trigger sub-score reaches 0.
pub const TRIGGER_SATURATION: f64 = 5.0;
/// Redirects at which the redirect sub-score reaches 0.
pub const REDIRECT_SATURATION: f64 = 4.0;
/// URLs up to this many characters get a full length sub-score.
pub const LENGTH_FREE: f64 = 50.0;
/// Characters past [`LENGTH_FREE`] over which the length sub-score decays to 0.
pub const LENGTH_DECAY_SPAN: f64 = 170.0;
/// Special-character density at which the special sub-score reaches 0.
pub const SPECIAL_RATIO_SATURATION: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Factor {
    Brand,
    Token,
    Trigger,
    Redirect,
    Length,
    Special,
}

impl Factor {
    /// Rendering order for breakdowns and rationale lines.
    pub const ALL: [Factor; 6] = [
        Factor::Brand,
        Factor::Token,
        Factor::Trigger,
        Factor::Redirect,
        Factor::Length,
        Factor::Special,
    ];

    /// Factors every weight table must name. `brand` is the optional extension.
    pub const REQUIRED: [Factor; 5] = [
        Factor::Token,
        Factor::Trigger,
        Factor::Redirect,
        Factor::Length,
        Factor::Special,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::Brand => "brand",
            Factor::Token => "token",
            Factor::Trigger => "trigger",
            Factor::Redirect => "redirect",
            Factor::Length => "length",
            Factor::Special => "special",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Factor::ALL
            .into_iter()
            .find(|factor| factor.as_str() == name.trim().to_ascii_lowercase())
    }

    fn label(&self) -> &'static str {
        match self {
            Factor::Brand => "Brand consistency",
            Factor::Token => "Letter-case consistency",
            Factor::Trigger => "Trigger words",
            Factor::Redirect => "Redirects",
            Factor::Length => "URL length",
            Factor::Special => "Special characters",
        }
    }

    /// Sub-score for this factor. A non-finite signal gets the neutral
    /// value 1.0.
    pub fn sub_score(&self, features: &FeatureMap) -> f64 {
        match self {
            Factor::Brand => flag_score(features.brand_mismatch),
            Factor::Token => flag_score(features.token_mismatch),
            Factor::Trigger => trigger_score(features.trigger_count as f64),
            Factor::Redirect => redirect_score(features.redirect_count as f64),
            Factor::Length => length_score(features.length as f64),
            Factor::Special => special_score(features.special_char_ratio),
        }
    }
}

pub fn flag_score(mismatch: bool) -> f64 {
    if mismatch {
        0.0
    } else {
        1.0
    }
}

/// Linear decay from 1 at `signal <= 0` to 0 at `saturation`.
fn decay(signal: f64, saturation: f64) -> f64 {
    if !signal.is_finite() {
        return 1.0;
    }
    (1.0 - signal / saturation).clamp(0.0, 1.0)
}

pub fn trigger_score(trigger_count: f64) -> f64 {
    decay(trigger_count, TRIGGER_SATURATION)
}

pub fn redirect_score(redirect_count: f64) -> f64 {
    decay(redirect_count, REDIRECT_SATURATION)
}

pub fn length_score(length: f64) -> f64 {
    decay(length - LENGTH_FREE, LENGTH_DECAY_SPAN)
}

pub fn special_score(special_char_ratio: f64) -> f64 {
    decay(special_char_ratio, SPECIAL_RATIO_SATURATION)
}

/// Per-factor weights, validated to be non-negative and to sum to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Weights {
    factors: BTreeMap<Factor, f64>,
}

impl Weights {
    pub fn from_map(raw: &BTreeMap<String, f64>) -> Result<Self, EngineError> {
        let mut factors = BTreeMap::new();
        for (name, weight) in raw {
            let factor = Factor::parse(name).ok_or_else(|| {
                EngineError::Configuration(format!("unknown scoring factor {:?}", name))
            })?;
            if !weight.is_finite() || *weight < 0.0 {
                return Err(EngineError::Configuration(format!(
                    "weight for {} must be a non-negative number, got {}",
                    factor.as_str(),
                    weight
                )));
            }
            if factors.insert(factor, *weight).is_some() {
                return Err(EngineError::Configuration(format!(
                    "weight for {} given more than once",
                    factor.as_str()
                )));
            }
        }
        Self::new(factors)
    }

    pub fn new(factors: BTreeMap<Factor, f64>) -> Result<Self, EngineError> {
        let missing: Vec<&str> = Factor::REQUIRED
            .iter()
            .filter(|factor| !factors.contains_key(factor))
            .map(Factor::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::Configuration(format!(
                "missing weights for factors: {}",
                missing.join(", ")
            )));
        }

        let sum: f64 = factors.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::Configuration(format!(
                "factor weights must sum to 1.0, got {:.6}",
                sum
            )));
        }

        Ok(Self { factors })
    }

    pub fn get(&self, factor: Factor) -> Option<f64> {
        self.factors.get(&factor).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Factor, f64)> + '_ {
        Factor::ALL
            .into_iter()
            .filter_map(move |factor| self.get(factor).map(|weight| (factor, weight)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactorScore {
    pub factor: Factor,
    pub weight: f64,
    pub sub_score: f64,
}

impl FactorScore {
    pub fn percent(&self) -> u8 {
        (self.sub_score * 100.0).round().clamp(0.0, 100.0) as u8
    }

    pub fn describe(&self) -> String {
        format!(
            "{} score: {}% (weight {:.2})",
            self.factor.label(),
            self.percent(),
            self.weight
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicScore {
    pub trust: u8,
    pub breakdown: Vec<FactorScore>,
}

pub struct HeuristicScorer {
    weights: Weights,
}

impl HeuristicScorer {
    pub fn new(weights: Weights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    pub fn score(&self, features: &FeatureMap) -> HeuristicScore {
        score(features, &self.weights)
    }
}

pub fn score(features: &FeatureMap, weights: &Weights) -> HeuristicScore {
    let breakdown: Vec<FactorScore> = weights
        .iter()
        .map(|(factor, weight)| FactorScore {
            factor,
            weight,
            sub_score: factor.sub_score(features),
        })
        .collect();

    let total: f64 = breakdown.iter().map(|s| s.weight * s.sub_score).sum();
    let trust = (total * 100.0).round().clamp(0.0, 100.0) as u8;

    HeuristicScore { trust, breakdown }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, f64)]) -> Result<Weights, EngineError> {
        let raw = pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        Weights::from_map(&raw)
    }

    fn default_weights() -> Weights {
        weights(&[
            ("brand", 0.4),
            ("token", 0.1),
            ("trigger", 0.15),
            ("redirect", 0.1),
            ("length", 0.1),
            ("special", 0.15),
        ])
        .unwrap()
    }

    #[test]
    fn decay_functions_hit_their_anchors() {
        assert_eq!(trigger_score(0.0), 1.0);
        assert_eq!(trigger_score(5.0), 0.0);
        assert_eq!(trigger_score(9.0), 0.0);
        assert_eq!(redirect_score(2.0), 0.5);
        assert_eq!(redirect_score(4.0), 0.0);
        assert_eq!(length_score(50.0), 1.0);
        assert_eq!(length_score(220.0), 0.0);
        assert!((length_score(135.0) - 0.5).abs() < 1e-12);
        assert_eq!(special_score(0.0), 1.0);
        assert_eq!(special_score(0.15), 0.0);
    }

    #[test]
    fn sub_scores_never_increase_with_badness() {
        let mut last = [f64::INFINITY; 4];
        for step in 0..400 {
            let x = step as f64;
            let current = [
                trigger_score(x / 10.0),
                redirect_score(x / 10.0),
                length_score(x),
                special_score(x / 1000.0),
            ];
            for (now, before) in current.iter().zip(last.iter()) {
                assert!((0.0..=1.0).contains(now));
                assert!(now <= before);
            }
            last = current;
        }
    }

    #[test]
    fn perfect_features_score_100() {
        let result = score(&FeatureMap::default(), &default_weights());
        assert_eq!(result.trust, 100);
        assert_eq!(result.breakdown.len(), 6);
        assert!(result.breakdown.iter().all(|s| s.percent() == 100));
    }

    #[test]
    fn brand_mismatch_costs_its_weight() {
        let features = FeatureMap {
            brand_mismatch: true,
            ..FeatureMap::default()
        };
        assert_eq!(score(&features, &default_weights()).trust, 60);
    }

    #[test]
    fn brand_factor_is_optional() {
        let w = weights(&[
            ("token", 0.2),
            ("trigger", 0.2),
            ("redirect", 0.2),
            ("length", 0.2),
            ("special", 0.2),
        ])
        .unwrap();
        let features = FeatureMap {
            brand_mismatch: true,
            ..FeatureMap::default()
        };
        let result = score(&features, &w);
        assert_eq!(result.trust, 100);
        assert!(result.breakdown.iter().all(|s| s.factor != Factor::Brand));
    }

    #[test]
    fn non_finite_signal_is_neutral() {
        let features = FeatureMap {
            special_char_ratio: f64::NAN,
            ..FeatureMap::default()
        };
        assert_eq!(Factor::Special.sub_score(&features), 1.0);

        let features = FeatureMap {
            special_char_ratio: f64::INFINITY,
            ..FeatureMap::default()
        };
        assert_eq!(Factor::Special.sub_score(&features), 1.0);
        assert_eq!(score(&features, &default_weights()).trust, 100);
        assert_eq!(length_score(f64::NAN), 1.0);
        assert_eq!(trigger_score(f64::INFINITY), 1.0);
        assert_eq!(redirect_score(f64::NEG_INFINITY), 1.0);
    }

    #[test]
    fn rejects_invalid_weight_tables() {
        assert!(weights(&[("token", 1.0)]).is_err());
        assert!(weights(&[
            ("token", 0.2),
            ("trigger", 0.2),
            ("redirect", 0.2),
            ("length", 0.2),
            ("special", 0.3),
        ])
        .is_err());
        assert!(weights(&[
            ("token", 0.2),
            ("trigger", 0.2),
            ("redirect", 0.2),
            ("length", 0.2),
            ("special", 0.2),
            ("entropy", 0.0),
        ])
        .is_err());
        assert!(weights(&[
            ("token", -0.2),
            ("trigger", 0.4),
            ("redirect", 0.4),
            ("length", 0.2),
            ("special", 0.2),
        ])
        .is_err());
    }
}
