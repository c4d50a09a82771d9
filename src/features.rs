use crate::{
    config::ScoringConfig,
    domain::{HostKind, SuffixList, UrlParts},
};
use serde::Serialize;
use std::collections::HashSet;

/// Identifies the layout of [`FeatureVector`]. Model artifacts carry the
/// schema they were fitted against and are rejected if it differs.
pub const FEATURE_SCHEMA: &str = "url-lexical-v2";

pub const FEATURE_NAMES: [&str; 16] = [
    "url_length",
    "hostname_length",
    "count_dots",
    "count_hyphen",
    "count_at",
    "count_question",
    "count_percent",
    "count_slash",
    "count_equal",
    "has_https",
    "digits_count",
    "letters_count",
    "special_char_count",
    "suspicious_words",
    "suspicious_tld",
    "has_ip",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Classifier input in [`FEATURE_NAMES`] order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Named features consumed by the heuristic scorer and rendered into the
/// rationale.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureMap {
    pub length: usize,
    pub special_char_count: usize,
    pub special_char_ratio: f64,
    pub trigger_count: usize,
    pub token_mismatch: bool,
    pub brand_mismatch: bool,
    pub redirect_count: u32,
    pub has_https: bool,
    pub has_at: bool,
    pub has_ip: bool,
    pub suspicious_tld: bool,
    pub host: String,
    pub registrable_domain: String,
    pub matched_triggers: Vec<String>,
    pub matched_brands: Vec<String>,
    /// Features that fell back to their neutral value because the part of
    /// the URL they derive from was missing.
    pub neutralized: Vec<&'static str>,
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

impl FeatureMap {
    /// One line per feature, always in the same order.
    pub fn describe(&self) -> Vec<String> {
        let triggers = if self.matched_triggers.is_empty() {
            self.trigger_count.to_string()
        } else {
            format!("{} ({})", self.trigger_count, self.matched_triggers.join(", "))
        };
        let brand = if self.brand_mismatch {
            format!(
                "yes ({} outside registrable domain {:?})",
                self.matched_brands.join(", "),
                self.registrable_domain
            )
        } else {
            "no".to_string()
        };

        vec![
            format!("URL length: {} characters", self.length),
            format!(
                "Special characters: {} ({:.1}% of URL)",
                self.special_char_count,
                self.special_char_ratio * 100.0
            ),
            format!("Trigger words: {}", triggers),
            format!("Mixed letter case: {}", yes_no(self.token_mismatch)),
            format!("Brand impersonation: {}", brand),
            format!("Redirects: {}", self.redirect_count),
            format!("HTTPS: {}", yes_no(self.has_https)),
            format!("'@' symbol: {}", if self.has_at { "present" } else { "absent" }),
            format!("IP address host: {}", yes_no(self.has_ip)),
            format!("Suspicious TLD: {}", yes_no(self.suspicious_tld)),
        ]
    }
}

pub struct FeatureExtractor {
    trigger_words: Vec<String>,
    brand_tokens: Vec<String>,
    suspicious_tlds: HashSet<String>,
    suffixes: SuffixList,
}

impl FeatureExtractor {
    pub fn new(config: &ScoringConfig, suffixes: SuffixList) -> Self {
        Self {
            trigger_words: config.trigger_words.clone(),
            brand_tokens: config.brand_tokens.clone(),
            suspicious_tlds: config.suspicious_tlds.iter().cloned().collect(),
            suffixes,
        }
    }

    /// Extracts both feature views from `url`. Never fails: components that
    /// cannot be found degrade to empty or zero values.
    pub fn extract(&self, url: &str, redirect_count: u32) -> (FeatureVector, FeatureMap) {
        let parts = UrlParts::parse(url);
        self.extract_parts(url, &parts, redirect_count)
    }

    pub fn extract_parts(
        &self,
        url: &str,
        parts: &UrlParts,
        redirect_count: u32,
    ) -> (FeatureVector, FeatureMap) {
        let url_lower = url.to_lowercase();

        let length = url.chars().count();
        let digits_count = url.chars().filter(|c| c.is_numeric()).count();
        let letters_count = url.chars().filter(|c| c.is_alphabetic()).count();
        let special_char_count = url.chars().filter(|c| !c.is_alphanumeric()).count();
        let special_char_ratio = if length > 0 {
            special_char_count as f64 / length as f64
        } else {
            0.0
        };

        let matched_triggers: Vec<String> = self
            .trigger_words
            .iter()
            .filter(|word| url_lower.contains(word.as_str()))
            .cloned()
            .collect();

        let token_mismatch = url.chars().any(|c| c.is_ascii_lowercase())
            && url.chars().any(|c| c.is_ascii_uppercase());

        let mut neutralized = Vec::new();
        let host_kind = parts.host_kind();
        let (registrable_domain, matched_brands, suspicious_tld) = if host_kind == HostKind::Missing {
            neutralized.extend(["hostname_length", "registrable_domain", "brand_mismatch", "suspicious_tld", "has_ip"]);
            (String::new(), Vec::new(), false)
        } else {
            let registrable = match self.suffixes.registrable_domain(parts) {
                Some(domain) => domain,
                None => {
                    // host is a bare public suffix; compare brands against the whole host
                    neutralized.push("registrable_domain");
                    parts.host.clone()
                }
            };
            let brands: Vec<String> = self
                .brand_tokens
                .iter()
                .filter(|brand| url_lower.contains(brand.as_str()) && !registrable.contains(brand.as_str()))
                .cloned()
                .collect();
            let suspicious = self.suspicious_tlds.contains(parts.tld());
            (registrable, brands, suspicious)
        };

        let map = FeatureMap {
            length,
            special_char_count,
            special_char_ratio,
            trigger_count: matched_triggers.len(),
            token_mismatch,
            brand_mismatch: !matched_brands.is_empty(),
            redirect_count,
            has_https: parts.scheme == "https",
            has_at: url.contains('@'),
            has_ip: matches!(host_kind, HostKind::Ipv4 | HostKind::Ipv6),
            suspicious_tld,
            host: parts.host.clone(),
            registrable_domain,
            matched_triggers,
            matched_brands,
            neutralized,
        };

        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let count = |c: char| url.matches(c).count() as f64;
        let vector = FeatureVector(vec![
            length as f64,
            parts.netloc.chars().count() as f64,
            count('.'),
            count('-'),
            count('@'),
            count('?'),
            count('%'),
            count('/'),
            count('='),
            flag(map.has_https),
            digits_count as f64,
            letters_count as f64,
            special_char_count as f64,
            flag(map.trigger_count > 0),
            flag(map.suspicious_tld),
            flag(map.has_ip),
        ]);

        (vector, map)
    }
}
