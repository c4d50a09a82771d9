use crate::{
    error::EngineError,
    heuristic::Weights,
};
use config::{builder::DefaultState, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use std::{collections::BTreeMap, env, path::PathBuf, time::Duration};

const CONFIG_PATH_VAR: &str = "URLGUARD_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/urlguard.toml";
const ENV_PREFIX: &str = "URLGUARD";

/// Raw settings as read from defaults, the TOML file and the environment.
///
/// Nothing here is trusted until [`Settings::scoring_config`] has validated it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub scoring: ScoringSettings,
    pub gate: GateSettings,
    pub probe: ProbeSettings,
    pub model: ModelSettings,
    pub domain: DomainSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    Heuristic,
    Classifier,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScorePath {
    Heuristic,
    Classifier,
}

impl ScorePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScorePath::Heuristic => "heuristic",
            ScorePath::Classifier => "classifier",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub mode: ScoringMode,
    /// Required when `mode = "both"`; names the path that sets trust and verdict.
    pub authority: Option<ScorePath>,
    /// Kept wide so out-of-range values reach validation instead of wrapping.
    pub threshold: i64,
    pub trigger_words: Vec<String>,
    pub brand_tokens: Vec<String>,
    pub suspicious_tlds: Vec<String>,
    pub weights: BTreeMap<String, f64>,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        let weights = [
            ("brand", 0.40),
            ("token", 0.10),
            ("trigger", 0.15),
            ("redirect", 0.10),
            ("length", 0.10),
            ("special", 0.15),
        ]
        .into_iter()
        .map(|(name, w)| (name.to_string(), w))
        .collect();

        Self {
            mode: ScoringMode::Heuristic,
            authority: None,
            threshold: 70,
            trigger_words: to_strings(&[
                "win", "prize", "free", "login", "verify", "bank", "secure", "account",
                "update", "signin", "confirm",
            ]),
            brand_tokens: to_strings(&[
                "paypal", "apple", "google", "microsoft", "amazon", "facebook", "netflix",
                "instagram", "linkedin", "ebay",
            ]),
            suspicious_tlds: to_strings(&["xyz", "top", "club", "monster", "work", "gq", "ml", "tk"]),
            weights,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub enabled: bool,
    pub unreachable_trust: i64,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            unreachable_trust: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Count HTTP redirects for the redirect factor. Off by default: the
    /// scorer then runs with a redirect count of 0.
    pub follow_redirects: bool,
    pub timeout_ms: u64,
    pub max_redirects: u32,
    /// Let the redirect probe request loopback, private and link-local
    /// addresses. Leave off when URLs come from untrusted clients.
    pub allow_private_targets: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            follow_redirects: false,
            timeout_ms: 3000,
            max_redirects: 10,
            allow_private_targets: false,
        }
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub model_path: Option<PathBuf>,
    pub normalizer_path: Option<PathBuf>,
    pub model_sha256: Option<String>,
    pub normalizer_sha256: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DomainSettings {
    /// Full Public Suffix List on disk; the embedded snapshot is used otherwise.
    pub suffix_list_path: Option<PathBuf>,
}

/// Which scoring paths run and which one governs the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringPolicy {
    Heuristic,
    Classifier,
    Both { authority: ScorePath },
}

impl ScoringPolicy {
    pub fn runs_heuristic(&self) -> bool {
        !matches!(self, ScoringPolicy::Classifier)
    }

    pub fn runs_classifier(&self) -> bool {
        !matches!(self, ScoringPolicy::Heuristic)
    }

    pub fn describe(&self) -> String {
        match self {
            ScoringPolicy::Both { authority } => format!("both (authority: {})", authority.as_str()),
            other => other.authority().as_str().to_string(),
        }
    }

    pub fn authority(&self) -> ScorePath {
        match self {
            ScoringPolicy::Heuristic => ScorePath::Heuristic,
            ScoringPolicy::Classifier => ScorePath::Classifier,
            ScoringPolicy::Both { authority } => *authority,
        }
    }
}

/// Optional reachability gate applied before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePolicy {
    Disabled,
    RequireResolvable { unreachable_trust: u8 },
}

/// Validated scoring configuration shared read-only by the engine.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub trigger_words: Vec<String>,
    pub brand_tokens: Vec<String>,
    pub suspicious_tlds: Vec<String>,
    pub weights: Weights,
    pub threshold: u8,
    pub policy: ScoringPolicy,
    pub gate: GatePolicy,
}

impl Settings {
    /// Loads defaults, then `$URLGUARD_CONFIG` (or `config/urlguard.toml` if
    /// present), then `URLGUARD__SECTION__KEY` environment overrides.
    pub fn load() -> Result<Self, EngineError> {
        let path = env::var(CONFIG_PATH_VAR).ok();
        let required = path.is_some();
        let path = path.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let builder = config::Config::builder()
            .add_source(File::with_name(&path).format(FileFormat::Toml).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("scoring.trigger_words")
                    .with_list_parse_key("scoring.brand_tokens")
                    .with_list_parse_key("scoring.suspicious_tlds"),
            );

        Self::build(builder)
    }

    pub fn from_toml(toml: &str) -> Result<Self, EngineError> {
        let builder = config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, EngineError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Validates the scoring section; every failure here is fatal at startup.
    pub fn scoring_config(&self) -> Result<ScoringConfig, EngineError> {
        let scoring = &self.scoring;

        let threshold = percent_setting("scoring.threshold", scoring.threshold)?;
        let unreachable_trust = percent_setting("gate.unreachable_trust", self.gate.unreachable_trust)?;

        let policy = match (scoring.mode, scoring.authority) {
            (ScoringMode::Heuristic, None | Some(ScorePath::Heuristic)) => ScoringPolicy::Heuristic,
            (ScoringMode::Classifier, None | Some(ScorePath::Classifier)) => ScoringPolicy::Classifier,
            (ScoringMode::Both, Some(authority)) => ScoringPolicy::Both { authority },
            (ScoringMode::Both, None) => {
                return Err(EngineError::Configuration(
                    "scoring.mode = \"both\" requires scoring.authority".to_string(),
                ))
            }
            (mode, Some(authority)) => {
                return Err(EngineError::Configuration(format!(
                    "scoring.authority = {:?} is not computed in mode {:?}",
                    authority, mode
                )))
            }
        };

        let gate = if self.gate.enabled {
            GatePolicy::RequireResolvable { unreachable_trust }
        } else {
            GatePolicy::Disabled
        };

        Ok(ScoringConfig {
            trigger_words: normalize_terms(&scoring.trigger_words),
            brand_tokens: normalize_terms(&scoring.brand_tokens),
            suspicious_tlds: normalize_terms(&scoring.suspicious_tlds)
                .into_iter()
                .map(|tld| tld.trim_start_matches('.').to_string())
                .collect(),
            weights: Weights::from_map(&scoring.weights)?,
            threshold,
            policy,
            gate,
        })
    }

    pub fn needs_probe(&self) -> bool {
        self.gate.enabled || self.probe.follow_redirects
    }
}

fn percent_setting(key: &str, value: i64) -> Result<u8, EngineError> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v <= 100)
        .ok_or_else(|| EngineError::Configuration(format!("{} must be within 0..=100, got {}", key, value)))
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Lowercases, trims and de-duplicates while keeping the configured order.
fn normalize_terms(terms: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(terms.len());
    for term in terms {
        let term = term.trim().to_lowercase();
        if !term.is_empty() && !out.contains(&term) {
            out.push(term);
        }
    }
    out
}
