use crate::error::EngineError;
use publicsuffix::{List, Psl};
use regex::Regex;
use std::{net::Ipv6Addr, path::Path, sync::OnceLock};
use tracing::info;

const EMBEDDED_SUFFIX_LIST: &str = include_str!("../data/public_suffix_list.dat");

/// Structural split of a URL string. Every component is optional and
/// defaults to the empty string; splitting never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: String,
    pub netloc: String,
    pub host: String,
    pub port: Option<String>,
    pub path: String,
    pub query: String,
    pub fragment: String,
    pub has_userinfo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Missing,
    Domain,
    Ipv4,
    Ipv6,
    /// Present but neither a DNS name nor an IP literal.
    Malformed,
}

fn scheme_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*):").expect("valid scheme regex"))
}

fn domain_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:[a-z0-9-]+\.)+(?:[a-z]{2,}|xn--[a-z0-9-]+)$").expect("valid domain regex")
    })
}

fn ipv4_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{1,3}(?:\.\d{1,3}){3}$").expect("valid ipv4 regex"))
}

impl UrlParts {
    pub fn parse(raw: &str) -> Self {
        let mut parts = UrlParts::default();
        let mut rest = raw;

        if let Some(caps) = scheme_pattern().captures(raw) {
            let scheme = &caps[1];
            let after = &raw[scheme.len() + 1..];
            // "example.com:8080" has no authority marker; treat it as schemeless
            if after.starts_with("//") || !after.chars().next().map_or(false, |c| c.is_ascii_digit()) {
                parts.scheme = scheme.to_ascii_lowercase();
                rest = after;
            }
        }

        if let Some(after_slashes) = rest.strip_prefix("//") {
            let end = after_slashes
                .find(|c| c == '/' || c == '?' || c == '#')
                .unwrap_or(after_slashes.len());
            parts.netloc = after_slashes[..end].to_string();
            rest = &after_slashes[end..];
        }

        let (before_fragment, fragment) = match rest.split_once('#') {
            Some((head, frag)) => (head, frag),
            None => (rest, ""),
        };
        let (path, query) = match before_fragment.split_once('?') {
            Some((path, query)) => (path, query),
            None => (before_fragment, ""),
        };
        parts.path = path.to_string();
        parts.query = query.to_string();
        parts.fragment = fragment.to_string();

        let host_port = match parts.netloc.rsplit_once('@') {
            Some((_, host_port)) => {
                parts.has_userinfo = true;
                host_port
            }
            None => parts.netloc.as_str(),
        };
        let (host, port) = split_host_port(host_port);
        parts.host = normalize_host(host);
        parts.port = port.map(String::from);
        parts
    }

    pub fn host_kind(&self) -> HostKind {
        let host = self.host.as_str();
        if host.is_empty() {
            return HostKind::Missing;
        }
        if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            return if inner.parse::<Ipv6Addr>().is_ok() {
                HostKind::Ipv6
            } else {
                HostKind::Malformed
            };
        }
        if ipv4_pattern().is_match(host) {
            return HostKind::Ipv4;
        }
        if domain_pattern().is_match(host) {
            return HostKind::Domain;
        }
        HostKind::Malformed
    }

    pub fn is_ip_literal(&self) -> bool {
        matches!(self.host_kind(), HostKind::Ipv4 | HostKind::Ipv6)
    }

    /// Last DNS label of the host, empty for IP literals and missing hosts.
    pub fn tld(&self) -> &str {
        if self.host_kind() != HostKind::Domain {
            return "";
        }
        self.host.rsplit('.').next().unwrap_or("")
    }
}

fn split_host_port(host_port: &str) -> (&str, Option<&str>) {
    if host_port.starts_with('[') {
        return match host_port.find(']') {
            Some(end) => {
                let port = host_port[end + 1..].strip_prefix(':');
                (&host_port[..=end], port)
            }
            None => (host_port, None),
        };
    }
    match host_port.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => (host, Some(port)),
        _ => (host_port, None),
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('.');
    if host.is_ascii() {
        return host.to_ascii_lowercase();
    }
    idna::domain_to_ascii(host).unwrap_or_else(|_| host.to_lowercase())
}

/// Registrable-domain lookup backed by the Public Suffix List.
pub struct SuffixList {
    list: List,
}

impl SuffixList {
    pub fn embedded() -> Result<Self, EngineError> {
        Self::from_text(EMBEDDED_SUFFIX_LIST)
    }

    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("failed to read suffix list {:?}: {}", path, e))
        })?;
        let list = Self::from_text(&text)?;
        info!("Loaded public suffix list from {:?}", path);
        Ok(list)
    }

    fn from_text(text: &str) -> Result<Self, EngineError> {
        let list: List = text
            .parse()
            .map_err(|e| EngineError::Configuration(format!("invalid public suffix list: {}", e)))?;
        Ok(Self { list })
    }

    /// Effective second-level-plus-suffix portion of `parts.host`.
    ///
    /// IP literals are their own registrable domain. `None` for a missing or
    /// malformed host and for a host that is itself a public suffix
    /// (`co.uk`).
    pub fn registrable_domain(&self, parts: &UrlParts) -> Option<String> {
        match parts.host_kind() {
            HostKind::Missing | HostKind::Malformed => None,
            HostKind::Ipv4 | HostKind::Ipv6 => Some(parts.host.clone()),
            HostKind::Domain => self
                .list
                .domain(parts.host.as_bytes())
                .and_then(|domain| std::str::from_utf8(domain.as_bytes()).ok().map(String::from)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_full_url() {
        let parts = UrlParts::parse("HTTPS://user:pw@Secure.Example.co.uk:8443/a/b?x=1&y=2#top");
        assert_eq!(parts.scheme, "https");
        assert_eq!(parts.netloc, "user:pw@Secure.Example.co.uk:8443");
        assert_eq!(parts.host, "secure.example.co.uk");
        assert_eq!(parts.port.as_deref(), Some("8443"));
        assert_eq!(parts.path, "/a/b");
        assert_eq!(parts.query, "x=1&y=2");
        assert_eq!(parts.fragment, "top");
        assert!(parts.has_userinfo);
        assert_eq!(parts.host_kind(), HostKind::Domain);
        assert_eq!(parts.tld(), "uk");
    }

    #[test]
    fn missing_scheme_leaves_host_empty() {
        let parts = UrlParts::parse("example.com/login");
        assert_eq!(parts.scheme, "");
        assert_eq!(parts.netloc, "");
        assert_eq!(parts.host_kind(), HostKind::Missing);
        assert_eq!(parts.path, "example.com/login");
    }

    #[test]
    fn degenerate_inputs_do_not_panic() {
        for raw in ["", ":", "//", "http://", "http://[::1", "ü://ß", "http://@:"] {
            let _ = UrlParts::parse(raw).host_kind();
        }
    }

    #[test]
    fn recognizes_ip_literals() {
        assert_eq!(UrlParts::parse("http://192.168.0.1/x").host_kind(), HostKind::Ipv4);
        assert_eq!(UrlParts::parse("http://[::1]:8080/").host_kind(), HostKind::Ipv6);
        assert_eq!(UrlParts::parse("http://under_score/").host_kind(), HostKind::Malformed);
    }

    #[test]
    fn converts_idn_hosts() {
        let parts = UrlParts::parse("http://bücher.de/");
        assert_eq!(parts.host, "xn--bcher-kva.de");
        assert_eq!(parts.host_kind(), HostKind::Domain);
    }

    #[test]
    fn registrable_domain_separates_subdomains() {
        let psl = SuffixList::embedded().unwrap();
        let lookup = |raw: &str| psl.registrable_domain(&UrlParts::parse(raw));

        assert_eq!(lookup("https://secure.paypal.com/x").as_deref(), Some("paypal.com"));
        assert_eq!(lookup("http://paypal.evil.tld/").as_deref(), Some("evil.tld"));
        assert_eq!(lookup("http://www.example.co.uk/").as_deref(), Some("example.co.uk"));
        assert_eq!(lookup("http://10.0.0.1/").as_deref(), Some("10.0.0.1"));
        assert_eq!(lookup("http://co.uk/"), None);
        assert_eq!(lookup("no-scheme"), None);
    }
}
