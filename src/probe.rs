use crate::{
    config::ProbeSettings,
    domain::{HostKind, UrlParts},
};
use async_trait::async_trait;
use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::ResolveErrorKind,
    TokioAsyncResolver,
};
use reqwest::{header::LOCATION, redirect::Policy, Client};
use serde::Serialize;
use std::{net::IpAddr, time::Duration};
use tracing::{debug, warn};
use url::{Host, Url};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Resolvable,
    Unresolvable,
    /// The probe timed out, failed, or was not run.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub redirect_count: u32,
    pub reachability: Reachability,
}

impl ProbeReport {
    /// What scoring assumes when nothing was probed.
    pub const fn neutral() -> Self {
        Self {
            redirect_count: 0,
            reachability: Reachability::Unknown,
        }
    }
}

impl Default for ProbeReport {
    fn default() -> Self {
        Self::neutral()
    }
}

/// External reachability/redirect collaborator. Implementations must not
/// fail: any error maps to a neutral report.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeReport;
}

/// Prober that never touches the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProber;

#[async_trait]
impl Prober for NoopProber {
    async fn probe(&self, _url: &str) -> ProbeReport {
        ProbeReport::neutral()
    }
}

/// Fixed answers, for tests and offline replays.
#[derive(Debug, Clone, Copy)]
pub struct StaticProber(pub ProbeReport);

#[async_trait]
impl Prober for StaticProber {
    async fn probe(&self, _url: &str) -> ProbeReport {
        self.0
    }
}

/// DNS resolution plus manual redirect following, bounded by one timeout.
pub struct HttpProber {
    client: Client,
    resolver: TokioAsyncResolver,
    timeout: Duration,
    max_redirects: u32,
    follow_redirects: bool,
    allow_private_targets: bool,
}

impl HttpProber {
    pub fn new(settings: &ProbeSettings) -> Result<Self, reqwest::Error> {
        let timeout = settings.timeout();
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);

        Ok(Self {
            client,
            resolver,
            timeout,
            max_redirects: settings.max_redirects,
            follow_redirects: settings.follow_redirects,
            allow_private_targets: settings.allow_private_targets,
        })
    }

    async fn resolve(&self, parts: &UrlParts) -> Reachability {
        match parts.host_kind() {
            HostKind::Ipv4 | HostKind::Ipv6 => Reachability::Resolvable,
            HostKind::Domain => match self.resolver.lookup_ip(parts.host.as_str()).await {
                Ok(ips) if ips.iter().next().is_some() => Reachability::Resolvable,
                Ok(_) => Reachability::Unresolvable,
                Err(e) => match e.kind() {
                    ResolveErrorKind::NoRecordsFound { .. } => Reachability::Unresolvable,
                    _ => {
                        debug!("DNS lookup for {} failed: {}", parts.host, e);
                        Reachability::Unknown
                    }
                },
            },
            HostKind::Missing | HostKind::Malformed => Reachability::Unknown,
        }
    }

    async fn count_redirects(&self, url: &str) -> u32 {
        let mut current = match Url::parse(url) {
            Ok(url) => url,
            Err(_) => return 0,
        };
        let mut redirects = 0;

        while redirects < self.max_redirects {
            if !self.may_fetch(&current).await {
                debug!("Redirect probe for {} stopped at an internal address", current);
                break;
            }
            let response = match self.client.get(current.clone()).send().await {
                Ok(response) => response,
                Err(e) => {
                    debug!("Redirect probe for {} stopped: {}", current, e);
                    break;
                }
            };
            if !response.status().is_redirection() {
                break;
            }
            let next = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|location| current.join(location).ok());
            match next {
                Some(next) => {
                    redirects += 1;
                    current = next;
                }
                None => break,
            }
        }

        redirects
    }

    /// Whether `url` may be requested. Hosts that are, or resolve to,
    /// loopback, private or link-local addresses are refused unless
    /// `allow_private_targets` is set.
    async fn may_fetch(&self, url: &Url) -> bool {
        if self.allow_private_targets {
            return true;
        }
        match url.host() {
            Some(Host::Ipv4(ip)) => !is_internal(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => !is_internal(IpAddr::V6(ip)),
            Some(Host::Domain(name)) => match self.resolver.lookup_ip(name).await {
                Ok(ips) => ips.iter().all(|ip| !is_internal(ip)),
                Err(_) => false,
            },
            None => false,
        }
    }

    async fn run(&self, url: &str) -> ProbeReport {
        let parts = UrlParts::parse(url);
        let reachability = self.resolve(&parts).await;
        let redirect_count = if self.follow_redirects && reachability != Reachability::Unresolvable {
            self.count_redirects(url).await
        } else {
            0
        };
        ProbeReport {
            redirect_count,
            reachability,
        }
    }
}

fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // carrier-grade NAT, 100.64.0.0/10
                || (a == 100 && (b & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().map_or(false, |v4| is_internal(IpAddr::V4(v4)))
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> ProbeReport {
        match tokio::time::timeout(self.timeout, self.run(url)).await {
            Ok(report) => report,
            Err(_) => {
                warn!("Probe for {} timed out after {:?}", url, self.timeout);
                ProbeReport::neutral()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    #[tokio::test]
    async fn noop_prober_is_neutral() {
        assert_eq!(NoopProber.probe("http://example.com").await, ProbeReport::neutral());
    }

    #[test]
    fn static_prober_replays_report() {
        let report = ProbeReport {
            redirect_count: 3,
            reachability: Reachability::Unresolvable,
        };
        let got = tokio_test::block_on(StaticProber(report).probe("http://x.test"));
        assert_eq!(got, report);
    }

    fn settings(timeout_ms: u64, allow_private_targets: bool) -> ProbeSettings {
        ProbeSettings {
            follow_redirects: true,
            timeout_ms,
            max_redirects: 3,
            allow_private_targets,
        }
    }

    /// Local HTTP server answering every request with `response`, or never
    /// answering when `response` is `None`.
    async fn local_server(response: Option<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                match response {
                    Some(response) => {
                        let mut buf = [0u8; 1024];
                        let _ = stream.read(&mut buf).await;
                        let _ = stream.write_all(response.as_bytes()).await;
                    }
                    None => held.push(stream),
                }
            }
        });
        format!("http://{}/start", addr)
    }

    const REDIRECT: &str =
        "HTTP/1.1 302 Found\r\nLocation: /next\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    #[tokio::test]
    async fn counts_redirects_up_to_the_cap() {
        let url = local_server(Some(REDIRECT)).await;
        let prober = HttpProber::new(&settings(2000, true)).unwrap();

        let report = prober.probe(&url).await;
        assert_eq!(report.redirect_count, 3);
        assert_eq!(report.reachability, Reachability::Resolvable);
    }

    #[tokio::test]
    async fn internal_targets_are_not_fetched() {
        let url = local_server(Some(REDIRECT)).await;
        let prober = HttpProber::new(&settings(2000, false)).unwrap();

        let report = prober.probe(&url).await;
        assert_eq!(report.redirect_count, 0);
    }

    #[tokio::test]
    async fn silent_server_fails_open_within_the_timeout() {
        let url = local_server(None).await;
        let prober = HttpProber::new(&settings(100, true)).unwrap();

        let start = Instant::now();
        let report = prober.probe(&url).await;
        assert_eq!(report.redirect_count, 0);
        assert_ne!(report.reachability, Reachability::Unresolvable);
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn unreachable_network_fails_open() {
        let prober = HttpProber::new(&settings(100, true)).unwrap();

        let start = Instant::now();
        let report = prober.probe("http://10.255.255.1/").await;
        assert_eq!(report.redirect_count, 0);
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn classifies_internal_addresses() {
        for ip in ["127.0.0.1", "10.1.2.3", "192.168.0.1", "169.254.169.254", "100.64.0.1", "::1", "fd00::1", "fe80::1", "::ffff:10.0.0.1"] {
            assert!(is_internal(ip.parse().unwrap()), "{ip}");
        }
        for ip in ["93.184.216.34", "8.8.8.8", "2606:4700::1111"] {
            assert!(!is_internal(ip.parse().unwrap()), "{ip}");
        }
    }

    #[tokio::test]
    async fn ip_literal_counts_as_resolvable() {
        let prober = HttpProber::new(&ProbeSettings::default()).unwrap();
        let parts = UrlParts::parse("http://127.0.0.1:1/");
        assert_eq!(prober.resolve(&parts).await, Reachability::Resolvable);
    }
}
