//! Outbound HTTP fetching with a server-side request forgery guard.
//!
//! Every URL, including each redirect hop, is checked before a request is
//! made: only `http`/`https` are accepted, and the host must resolve
//! exclusively to public addresses. The addresses that passed the check are
//! pinned into the client so a second DNS answer cannot swap in an internal
//! target between the check and the connect.
//!
//! Redirects are followed by hand (up to `fetch.max_redirects`) so that each
//! hop goes through the same guard.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, LOCATION};
use thiserror::Error;
use tracing::debug;
use url::{Host, Url};

use crate::config::FetchConfig;
use crate::extract::ContentKind;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("unsupported scheme '{0}': only http and https are allowed")]
    UnsupportedScheme(String),
    #[error("refusing to fetch {host}: it resolves to non-public address {addr}")]
    BlockedAddress { host: String, addr: IpAddr },
    #[error("could not resolve host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),
    #[error("response body exceeds {0} bytes")]
    TooLarge(usize),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// A successfully fetched resource.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub url: String,
    pub kind: ContentKind,
    pub bytes: Vec<u8>,
}

/// Prepends `https://` when the input carries no http(s) scheme.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// True when `ip` is routable on the public internet.
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match embedded_v4(v6) {
            Some(v4) => is_public_v4(v4),
            None => is_public_v6(v6),
        },
    }
}

/// IPv4 address carried inside an IPv4-mapped (`::ffff:a.b.c.d`),
/// IPv4-compatible (`::a.b.c.d`) or NAT64 (`64:ff9b::a.b.c.d`) address.
fn embedded_v4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }
    let seg = ip.segments();
    let nat64 = seg[0] == 0x64 && seg[1] == 0xff9b && seg[2..6].iter().all(|s| *s == 0);
    let compatible = seg[..6].iter().all(|s| *s == 0);
    // `::` and `::1` stay IPv6 so they classify as unspecified and loopback.
    if nat64 || (compatible && u128::from(ip) > 1) {
        let [.., a, b, c, d] = ip.octets();
        return Some(Ipv4Addr::new(a, b, c, d));
    }
    None
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    // 100.64.0.0/10 carrier-grade NAT
    let shared = octets[0] == 100 && (octets[1] & 0xc0) == 64;
    // 0.0.0.0/8 "this network"
    let this_network = octets[0] == 0;
    !(ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || shared
        || this_network)
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    !(ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || unique_local || link_local)
}

/// Result of a successful guard check.
#[derive(Debug, Clone)]
pub struct GuardedUrl {
    pub url: Url,
    /// Domain name and its vetted addresses, for pinning. `None` for IP
    /// literals or when private networks are allowed.
    pub pinned: Option<(String, Vec<SocketAddr>)>,
}

/// Validates scheme and destination of `raw` without making a request.
/// Hosts listed in `fetch.trusted_hosts` skip the address check; every other
/// host must resolve to public addresses only, unless
/// `fetch.allow_private_networks` is set.
pub async fn guard_url(raw: &str, config: &FetchConfig) -> Result<GuardedUrl, FetchError> {
    let url = Url::parse(raw).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(FetchError::UnsupportedScheme(other.to_string())),
    }

    let host = url
        .host()
        .ok_or_else(|| FetchError::InvalidUrl(format!("{}: missing host", raw)))?
        .to_owned();

    if config.allow_private_networks || is_trusted(&host, &config.trusted_hosts) {
        return Ok(GuardedUrl { url, pinned: None });
    }

    let port = url.port_or_known_default().unwrap_or(443);
    match host {
        Host::Ipv4(v4) => check_addr(&v4.to_string(), IpAddr::V4(v4))?,
        Host::Ipv6(v6) => check_addr(&v6.to_string(), IpAddr::V6(v6))?,
        Host::Domain(domain) => {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((domain.as_str(), port))
                .await
                .map_err(|source| FetchError::Resolve {
                    host: domain.clone(),
                    source,
                })?
                .collect();
            if addrs.is_empty() {
                return Err(FetchError::Resolve {
                    host: domain.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no addresses returned",
                    ),
                });
            }
            for addr in &addrs {
                check_addr(&domain, addr.ip())?;
            }
            return Ok(GuardedUrl {
                url,
                pinned: Some((domain, addrs)),
            });
        }
    }

    Ok(GuardedUrl { url, pinned: None })
}

fn is_trusted(host: &Host<String>, trusted: &[String]) -> bool {
    let host = host.to_string();
    let host = host.trim_start_matches('[').trim_end_matches(']');
    trusted.iter().any(|t| {
        t.trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .eq_ignore_ascii_case(host)
    })
}

fn check_addr(host: &str, addr: IpAddr) -> Result<(), FetchError> {
    if is_public_ip(addr) {
        Ok(())
    } else {
        Err(FetchError::BlockedAddress {
            host: host.to_string(),
            addr,
        })
    }
}

/// HTTP fetcher configured from `[fetch]`.
#[derive(Debug, Clone)]
pub struct Fetcher {
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn allows_private_networks(&self) -> bool {
        self.config.allow_private_networks
    }

    /// Guards, fetches and classifies `raw_url`. The URL should already be
    /// normalized with [`normalize_url`].
    pub async fn fetch(&self, raw_url: &str) -> Result<FetchedPage, FetchError> {
        let mut current = raw_url.to_string();

        for _hop in 0..=self.config.max_redirects {
            let guarded = guard_url(&current, &self.config).await?;
            let client = self.client_for(&guarded)?;

            debug!(url = %guarded.url, "fetching");
            let response = client
                .get(guarded.url.clone())
                .send()
                .await
                .map_err(|e| self.map_reqwest(e))?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(FetchError::Status(status))?;
                let next = guarded
                    .url
                    .join(location)
                    .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", location, e)))?;
                debug!(from = %guarded.url, to = %next, "following redirect");
                current = next.to_string();
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::Status(status));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let kind = ContentKind::detect(content_type.as_deref(), guarded.url.path());
            let bytes = self.read_capped(response).await?;

            return Ok(FetchedPage {
                url: guarded.url.to_string(),
                kind,
                bytes,
            });
        }

        Err(FetchError::TooManyRedirects(self.config.max_redirects))
    }

    fn client_for(&self, guarded: &GuardedUrl) -> Result<reqwest::Client, FetchError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(&self.config.user_agent)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none());
        if let Some((domain, addrs)) = &guarded.pinned {
            builder = builder.resolve_to_addrs(domain, addrs);
        }
        Ok(builder.build()?)
    }

    async fn read_capped(&self, mut response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
        let cap = self.config.max_body_bytes;
        if response.content_length().is_some_and(|len| len as usize > cap) {
            return Err(FetchError::TooLarge(cap));
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_reqwest(e))? {
            if bytes.len() + chunk.len() > cap {
                return Err(FetchError::TooLarge(cap));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    fn map_reqwest(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.config.timeout_secs)
        } else {
            FetchError::Http(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(allow_private: bool) -> Fetcher {
        Fetcher::new(&FetchConfig {
            allow_private_networks: allow_private,
            ..FetchConfig::default()
        })
    }

    #[test]
    fn normalize_adds_https() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url("  example.com/a "), "https://example.com/a");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
    }

    #[test]
    fn public_ip_classification() {
        let blocked = [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.9",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "100.64.1.1",
            "255.255.255.255",
            "::1",
            "::",
            "fc00::1",
            "fd12:3456::1",
            "fe80::1",
            "::ffff:127.0.0.1",
            "::ffff:10.0.0.1",
            "::127.0.0.1",
            "::169.254.169.254",
            "64:ff9b::7f00:1",
            "64:ff9b::a9fe:a9fe",
        ];
        for ip in blocked {
            assert!(!is_public_ip(ip.parse().unwrap()), "{} should be blocked", ip);
        }
        let allowed = [
            "93.184.216.34",
            "8.8.8.8",
            "2606:4700:4700::1111",
            "64:ff9b::808:808",
        ];
        for ip in allowed {
            assert!(is_public_ip(ip.parse().unwrap()), "{} should be allowed", ip);
        }
    }

    #[tokio::test]
    async fn guard_rejects_private_literals() {
        for url in [
            "http://127.0.0.1/",
            "http://10.0.0.5/admin",
            "http://[::1]:8080/",
            "http://169.254.169.254/latest/meta-data",
            "http://[::ffff:127.0.0.1]/",
        ] {
            let err = guard_url(url, &FetchConfig::default()).await.unwrap_err();
            assert!(
                matches!(err, FetchError::BlockedAddress { .. }),
                "{} gave {:?}",
                url,
                err
            );
        }
    }

    #[tokio::test]
    async fn guard_rejects_localhost_name() {
        let err = guard_url("http://localhost:9000/", &FetchConfig::default()).await.unwrap_err();
        assert!(matches!(err, FetchError::BlockedAddress { .. }));
    }

    #[tokio::test]
    async fn guard_rejects_other_schemes() {
        for url in ["ftp://example.com/file", "file:///etc/passwd", "gopher://x"] {
            let err = guard_url(url, &FetchConfig::default()).await.unwrap_err();
            assert!(matches!(err, FetchError::UnsupportedScheme(_)), "{}", url);
        }
    }

    #[tokio::test]
    async fn guard_accepts_public_literal_without_dns() {
        let guarded = guard_url("https://8.8.8.8/dns-query", &FetchConfig::default()).await.unwrap();
        assert_eq!(guarded.url.host_str(), Some("8.8.8.8"));
        assert!(guarded.pinned.is_none());
    }

    #[tokio::test]
    async fn private_target_is_never_contacted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
            .expect(0)
            .mount(&server)
            .await;

        let err = fetcher(false).fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, FetchError::BlockedAddress { .. }));
        server.verify().await;
    }

    #[tokio::test]
    async fn guard_skips_only_trusted_hosts() {
        let config = FetchConfig {
            trusted_hosts: vec!["127.0.0.1".to_string(), "[::1]".to_string()],
            ..FetchConfig::default()
        };
        assert!(guard_url("http://127.0.0.1:8080/", &config).await.is_ok());
        assert!(guard_url("http://[::1]/", &config).await.is_ok());
        let err = guard_url("http://10.0.0.5/", &config).await.unwrap_err();
        assert!(matches!(err, FetchError::BlockedAddress { .. }));
    }

    #[tokio::test]
    async fn redirect_to_metadata_address_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/go"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "http://169.254.169.254/latest/meta-data"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let origin = server.address().ip().to_string();
        let trusting = Fetcher::new(&FetchConfig {
            trusted_hosts: vec![origin],
            ..FetchConfig::default()
        });
        let err = trusting
            .fetch(&format!("{}/go", server.uri()))
            .await
            .unwrap_err();
        match err {
            FetchError::BlockedAddress { addr, .. } => {
                assert_eq!(addr, "169.254.169.254".parse::<IpAddr>().unwrap())
            }
            other => panic!("unexpected error: {:?}", other),
        }
        server.verify().await;
    }

    #[tokio::test]
    async fn fetches_html_when_private_allowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<html><body><p>hello</p></body></html>"),
            )
            .mount(&server)
            .await;

        let page = fetcher(true)
            .fetch(&format!("{}/article", server.uri()))
            .await
            .unwrap();
        assert_eq!(page.kind, ContentKind::Html);
        assert!(String::from_utf8_lossy(&page.bytes).contains("hello"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher(true).fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(s) if s.as_u16() == 404));
    }

    #[tokio::test]
    async fn redirects_are_followed_and_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/paper.pdf"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/paper.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec()))
            .mount(&server)
            .await;

        let page = fetcher(true)
            .fetch(&format!("{}/old", server.uri()))
            .await
            .unwrap();
        assert!(page.url.ends_with("/paper.pdf"));
        assert_eq!(page.kind, ContentKind::Pdf);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64)))
            .mount(&server)
            .await;

        let small = Fetcher::new(&FetchConfig {
            allow_private_networks: true,
            max_body_bytes: 16,
            ..FetchConfig::default()
        });
        let err = small.fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge(16)));
    }
}
