use crate::{config::ScorePath, heuristic::FactorScore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Prediction {
    #[serde(rename = "Safe URL")]
    Safe,
    #[serde(rename = "Phishing URL")]
    Phishing,
    #[serde(rename = "Invalid URL")]
    InvalidUrl,
}

impl Prediction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prediction::Safe => "Safe URL",
            Prediction::Phishing => "Phishing URL",
            Prediction::InvalidUrl => "Invalid URL",
        }
    }
}

/// Which terminal state of the decision pipeline produced a verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Invalid,
    Unreachable,
    Scored,
}

/// Both scores when both paths ran, and which one set the verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreSummary {
    pub heuristic: Option<u8>,
    pub classifier: Option<u8>,
    pub phishing_probability: Option<f64>,
    pub authority: ScorePath,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub prediction: Prediction,
    pub trust: u8,
    pub rationale: Vec<String>,
    pub outcome: Outcome,
    pub threshold: u8,
    pub scores: Option<ScoreSummary>,
    pub breakdown: Vec<FactorScore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    pub status: String,
    pub prediction: Prediction,
    pub trust: u8,
    pub features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_scores: Option<BTreeMap<String, u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<ScoreSummary>,
    pub outcome: Outcome,
    pub request_id: Uuid,
}

impl ScanResponse {
    pub fn from_verdict(verdict: Verdict, request_id: Uuid) -> Self {
        let feature_scores = (!verdict.breakdown.is_empty()).then(|| {
            verdict
                .breakdown
                .iter()
                .map(|s| (s.factor.as_str().to_string(), s.percent()))
                .collect()
        });
        let threshold = (verdict.outcome != Outcome::Invalid).then_some(verdict.threshold);

        Self {
            status: "success".to_string(),
            prediction: verdict.prediction,
            trust: verdict.trust,
            features: verdict.rationale,
            feature_scores,
            threshold,
            scores: verdict.scores,
            outcome: verdict.outcome,
            request_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub scoring: String,
    pub classifier: Option<String>,
}
