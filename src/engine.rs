use crate::{
    classifier::{trust_from_probability, ArtifactPaths, ClassifierAdapter},
    config::{GatePolicy, ScorePath, ScoringConfig, Settings},
    domain::{HostKind, SuffixList, UrlParts},
    error::EngineError,
    features::FeatureExtractor,
    heuristic::HeuristicScorer,
    probe::{ProbeReport, Prober, Reachability},
    types::{Outcome, Prediction, ScoreSummary, Verdict},
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Why a URL was rejected before any feature extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    Empty,
    MissingScheme,
    MissingHost,
    MalformedHost,
}

impl InvalidReason {
    pub fn message(&self) -> &'static str {
        match self {
            InvalidReason::Empty => "URL is empty",
            InvalidReason::MissingScheme => "URL has no scheme (expected e.g. https://)",
            InvalidReason::MissingHost => "URL has no host",
            InvalidReason::MalformedHost => "URL host is not a valid domain name or IP address",
        }
    }
}

/// A URL that passed structural validation.
#[derive(Debug, Clone)]
pub struct ValidatedUrl {
    raw: String,
    parts: UrlParts,
}

impl ValidatedUrl {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn parts(&self) -> &UrlParts {
        &self.parts
    }
}

/// Stateless scoring pipeline, built once and shared read-only.
pub struct DecisionEngine {
    config: ScoringConfig,
    extractor: FeatureExtractor,
    scorer: HeuristicScorer,
    classifier: Option<ClassifierAdapter>,
}

impl DecisionEngine {
    /// Fails if the scoring policy needs a classifier and none is supplied.
    pub fn new(
        config: ScoringConfig,
        suffixes: SuffixList,
        classifier: Option<ClassifierAdapter>,
    ) -> Result<Self, EngineError> {
        if config.policy.runs_classifier() && classifier.is_none() {
            return Err(EngineError::Configuration(format!(
                "scoring policy {:?} requires model artifacts",
                config.policy
            )));
        }
        if !config.policy.runs_classifier() && classifier.is_some() {
            warn!("Classifier artifacts loaded but scoring policy is heuristic-only; ignoring them");
        }

        let extractor = FeatureExtractor::new(&config, suffixes);
        let scorer = HeuristicScorer::new(config.weights.clone());
        let classifier = classifier.filter(|_| config.policy.runs_classifier());

        info!(
            "Decision engine ready: policy={:?} gate={:?} threshold={}",
            config.policy, config.gate, config.threshold
        );

        Ok(Self {
            config,
            extractor,
            scorer,
            classifier,
        })
    }

    /// Builds the engine from validated settings, loading the suffix list
    /// and, when the policy needs them, the model artifacts.
    pub fn from_settings(settings: &Settings) -> Result<Self, EngineError> {
        let config = settings.scoring_config()?;

        let suffixes = match &settings.domain.suffix_list_path {
            Some(path) => SuffixList::from_path(path)?,
            None => SuffixList::embedded()?,
        };

        let classifier = if config.policy.runs_classifier() {
            let model = &settings.model;
            let (Some(model_path), Some(normalizer_path)) = (&model.model_path, &model.normalizer_path) else {
                return Err(EngineError::Configuration(
                    "model.model_path and model.normalizer_path are required for classifier scoring"
                        .to_string(),
                ));
            };
            Some(ClassifierAdapter::load(&ArtifactPaths {
                model: model_path.clone(),
                normalizer: normalizer_path.clone(),
                model_sha256: model.model_sha256.clone(),
                normalizer_sha256: model.normalizer_sha256.clone(),
            })?)
        } else {
            None
        };

        Self::new(config, suffixes, classifier)
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn classifier_description(&self) -> Option<String> {
        self.classifier
            .as_ref()
            .map(|c| format!("{} {}", c.kind(), c.model_version()))
    }

    pub fn gate_enabled(&self) -> bool {
        matches!(self.config.gate, GatePolicy::RequireResolvable { .. })
    }

    /// Structural check run before anything else.
    pub fn validate(&self, raw: &str) -> Result<ValidatedUrl, InvalidReason> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(InvalidReason::Empty);
        }

        let parts = UrlParts::parse(raw);
        if parts.scheme.is_empty() {
            return Err(InvalidReason::MissingScheme);
        }
        match parts.host_kind() {
            HostKind::Missing => Err(InvalidReason::MissingHost),
            HostKind::Malformed => Err(InvalidReason::MalformedHost),
            HostKind::Domain | HostKind::Ipv4 | HostKind::Ipv6 => Ok(ValidatedUrl {
                raw: raw.to_string(),
                parts,
            }),
        }
    }

    /// Scores `raw` assuming no probe information.
    pub fn decide(&self, raw: &str) -> Result<Verdict, EngineError> {
        self.decide_with(raw, &ProbeReport::neutral())
    }

    pub fn decide_with(&self, raw: &str, probe: &ProbeReport) -> Result<Verdict, EngineError> {
        match self.validate(raw) {
            Ok(url) => self.decide_validated(&url, probe),
            Err(reason) => Ok(self.invalid(reason)),
        }
    }

    /// Validates, probes only when the configuration needs it, then scores.
    pub async fn scan(
        &self,
        raw: &str,
        prober: &dyn Prober,
        probe_redirects: bool,
    ) -> Result<Verdict, EngineError> {
        let start = Instant::now();
        let url = match self.validate(raw) {
            Ok(url) => url,
            Err(reason) => {
                debug!("Rejected URL: {}", reason.message());
                let verdict = self.invalid(reason);
                record_outcome(&verdict, start);
                return Ok(verdict);
            }
        };

        let report = if self.gate_enabled() || probe_redirects {
            let mut report = prober.probe(url.as_str()).await;
            if !probe_redirects {
                report.redirect_count = 0;
            }
            report
        } else {
            ProbeReport::neutral()
        };

        let verdict = self.decide_validated(&url, &report)?;
        record_outcome(&verdict, start);
        Ok(verdict)
    }

    fn invalid(&self, reason: InvalidReason) -> Verdict {
        Verdict {
            prediction: Prediction::InvalidUrl,
            trust: 0,
            rationale: vec![reason.message().to_string()],
            outcome: Outcome::Invalid,
            threshold: self.config.threshold,
            scores: None,
            breakdown: Vec::new(),
        }
    }

    fn decide_validated(&self, url: &ValidatedUrl, probe: &ProbeReport) -> Result<Verdict, EngineError> {
        if let GatePolicy::RequireResolvable { unreachable_trust } = self.config.gate {
            if probe.reachability == Reachability::Unresolvable {
                info!("Host {} does not resolve; short-circuiting", url.parts.host);
                return Ok(Verdict {
                    prediction: Prediction::Phishing,
                    trust: unreachable_trust,
                    rationale: vec![format!("Host {} does not resolve", url.parts.host)],
                    outcome: Outcome::Unreachable,
                    threshold: self.config.threshold,
                    scores: None,
                    breakdown: Vec::new(),
                });
            }
        }

        let (vector, features) =
            self.extractor
                .extract_parts(url.as_str(), &url.parts, probe.redirect_count);

        if !features.neutralized.is_empty() {
            warn!(url = url.as_str(), fields = ?features.neutralized, "Neutral feature values applied");
            metrics::counter!("urlguard_neutral_features_total").increment(1);
        }

        let policy = self.config.policy;
        let heuristic = policy.runs_heuristic().then(|| self.scorer.score(&features));
        let probability = match (&self.classifier, policy.runs_classifier()) {
            (Some(classifier), true) => Some(classifier.predict(&vector)?),
            _ => None,
        };

        let heuristic_trust = heuristic.as_ref().map(|h| h.trust);
        let classifier_trust = probability.map(trust_from_probability);
        let authority = policy.authority();
        let trust = match authority {
            ScorePath::Heuristic => heuristic_trust,
            ScorePath::Classifier => classifier_trust,
        }
        .ok_or_else(|| EngineError::Internal(format!("{} score was not computed", authority.as_str())))?;

        let prediction = if trust > self.config.threshold {
            Prediction::Safe
        } else {
            Prediction::Phishing
        };

        let mut rationale = features.describe();
        let breakdown = heuristic.map(|h| h.breakdown).unwrap_or_default();
        rationale.extend(breakdown.iter().map(|s| s.describe()));
        if let (Some(p), Some(classifier)) = (probability, &self.classifier) {
            rationale.push(format!(
                "Classifier ({} {}) phishing probability: {:.1}%",
                classifier.kind(),
                classifier.model_version(),
                p * 100.0
            ));
        }

        debug!(
            url = url.as_str(),
            ?heuristic_trust,
            ?classifier_trust,
            trust,
            "Scored URL"
        );

        Ok(Verdict {
            prediction,
            trust,
            rationale,
            outcome: Outcome::Scored,
            threshold: self.config.threshold,
            scores: Some(ScoreSummary {
                heuristic: heuristic_trust,
                classifier: classifier_trust,
                phishing_probability: probability,
                authority,
            }),
            breakdown,
        })
    }
}

fn record_outcome(verdict: &Verdict, start: Instant) {
    metrics::counter!("urlguard_scans_total", "prediction" => verdict.prediction.as_str()).increment(1);
    metrics::histogram!("urlguard_scan_duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::StaticProber;

    fn engine_with(settings: Settings) -> DecisionEngine {
        DecisionEngine::new(
            settings.scoring_config().unwrap(),
            SuffixList::embedded().unwrap(),
            None,
        )
        .unwrap()
    }

    fn engine() -> DecisionEngine {
        engine_with(Settings::default())
    }

    #[test]
    fn validation_reasons() {
        let e = engine();
        assert_eq!(e.validate("   ").unwrap_err(), InvalidReason::Empty);
        assert_eq!(e.validate("example.com").unwrap_err(), InvalidReason::MissingScheme);
        assert_eq!(e.validate("http://").unwrap_err(), InvalidReason::MissingHost);
        assert_eq!(e.validate("http://localhost/").unwrap_err(), InvalidReason::MalformedHost);
        assert!(e.validate("http://192.168.1.1/admin").is_ok());
        assert!(e.validate(" https://example.com ").is_ok());
    }

    #[test]
    fn classifier_policy_requires_artifacts() {
        let settings = Settings::from_toml("[scoring]\nmode = \"classifier\"\n").unwrap();
        let result = DecisionEngine::new(
            settings.scoring_config().unwrap(),
            SuffixList::embedded().unwrap(),
            None,
        );
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn gate_short_circuits_unresolvable_hosts() {
        let e = engine_with(Settings::from_toml("[gate]\nenabled = true\n").unwrap());
        let report = ProbeReport {
            redirect_count: 0,
            reachability: Reachability::Unresolvable,
        };
        let verdict = e.decide_with("https://nonexistent.example.com", &report).unwrap();
        assert_eq!(verdict.prediction, Prediction::Phishing);
        assert_eq!(verdict.trust, 5);
        assert_eq!(verdict.outcome, Outcome::Unreachable);
        assert!(verdict.scores.is_none());
    }

    #[test]
    fn unknown_reachability_passes_the_gate() {
        let e = engine_with(Settings::from_toml("[gate]\nenabled = true\n").unwrap());
        let verdict = e.decide("http://example.com").unwrap();
        assert_eq!(verdict.outcome, Outcome::Scored);
    }

    #[test]
    fn bare_suffix_host_is_scored_with_neutral_fields() {
        let e = engine();
        let url = e.validate("http://co.uk/paypal").unwrap();
        let (_, features) = e.extractor().extract_parts(url.as_str(), url.parts(), 0);
        assert_eq!(features.neutralized, vec!["registrable_domain"]);

        let verdict = e.decide("http://co.uk/paypal").unwrap();
        assert_eq!(verdict.outcome, Outcome::Scored);
        assert!(verdict.rationale.iter().any(|l| l.starts_with("Brand impersonation: yes")));
    }

    #[tokio::test]
    async fn scan_ignores_probe_redirects_unless_enabled() {
        let e = engine_with(Settings::from_toml("[gate]\nenabled = true\n").unwrap());
        let prober = StaticProber(ProbeReport {
            redirect_count: 4,
            reachability: Reachability::Resolvable,
        });

        let without = e.scan("http://example.com", &prober, false).await.unwrap();
        let with = e.scan("http://example.com", &prober, true).await.unwrap();
        assert!(with.trust < without.trust);
        assert!(without.rationale.contains(&"Redirects: 0".to_string()));
        assert!(with.rationale.contains(&"Redirects: 4".to_string()));
    }
}
