//! Safe, per-domain rate-limited HTTP fetching.
//!
//! Every request (and every redirect hop) is validated against the SSRF
//! policy: http/https only, no localhost/.local hosts, and no targets whose
//! resolved addresses fall in private or special ranges. DNS resolution
//! happens before dialing; the TOCTOU window between resolution and connect
//! is accepted given typical cache lifetimes.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use url::{Host, Url};

use grantline_core::{Error, Result};

/// Maximum redirect hops before a fetch is abandoned.
pub const MAX_REDIRECTS: usize = 10;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// The raw result of a fetch. The body is fully read before returning.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: String,
    pub status_code: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
    pub headers: HashMap<String, String>,
}

impl FetchedDocument {
    /// Decode the body as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Retrieves raw content from a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument>;
}

/// Per-domain HTTP fetching configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub rate_limit_rps: f64,
    pub proxy_url: String,
    pub accept_language: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_retries: 3,
            rate_limit_rps: 1.0,
            proxy_url: String::new(),
            accept_language: "en-US,en;q=0.5".to_string(),
        }
    }
}

impl FetchConfig {
    fn normalized(mut self) -> Self {
        if self.timeout_seconds == 0 {
            self.timeout_seconds = 30;
        }
        if self.max_retries == 0 {
            self.max_retries = 3;
        }
        if self.rate_limit_rps <= 0.0 {
            self.rate_limit_rps = 1.0;
        }
        if self.accept_language.is_empty() {
            self.accept_language = "en-US,en;q=0.5".to_string();
        }
        self
    }
}

/// One token per `1/rps` seconds, shared by all requests to a domain.
struct IntervalLimiter {
    interval: Duration,
    next_ready: Mutex<Instant>,
}

impl IntervalLimiter {
    fn new(rps: f64) -> Self {
        let interval = Duration::from_secs_f64(1.0 / rps.max(0.001));
        Self {
            interval,
            next_ready: Mutex::new(Instant::now()),
        }
    }

    async fn acquire(&self) {
        let wait = {
            let mut next = self.next_ready.lock().await;
            let now = Instant::now();
            let wait = next.saturating_duration_since(now);
            *next = now.max(*next) + self.interval;
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

struct DomainState {
    client: reqwest::Client,
    limiter: IntervalLimiter,
    config: FetchConfig,
}

/// Fetcher with per-domain clients, rate limiting, retries and the SSRF
/// guard. Domain state is lazily created under a single-writer lock.
pub struct RateLimitedFetcher {
    domains: RwLock<HashMap<String, Arc<DomainState>>>,
    overrides: RwLock<HashMap<String, FetchConfig>>,
    default_config: FetchConfig,
}

impl RateLimitedFetcher {
    pub fn new(default_config: FetchConfig) -> Self {
        Self {
            domains: RwLock::new(HashMap::new()),
            overrides: RwLock::new(HashMap::new()),
            default_config: default_config.normalized(),
        }
    }

    /// Register a per-domain configuration (from the source registry).
    /// Takes effect for domains whose state has not been created yet.
    pub async fn set_domain_config(&self, domain: &str, config: FetchConfig) {
        self.overrides
            .write()
            .await
            .insert(domain.to_lowercase(), config.normalized());
    }

    async fn state_for(&self, domain: &str) -> Result<Arc<DomainState>> {
        if let Some(state) = self.domains.read().await.get(domain) {
            return Ok(state.clone());
        }

        let mut domains = self.domains.write().await;
        if let Some(state) = domains.get(domain) {
            return Ok(state.clone());
        }

        let config = self
            .overrides
            .read()
            .await
            .get(domain)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .redirect(reqwest::redirect::Policy::none());

        if !config.proxy_url.is_empty() {
            let proxy = reqwest::Proxy::all(&config.proxy_url)
                .map_err(|e| Error::Config(format!("invalid proxy url: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("building http client: {}", e)))?;

        let state = Arc::new(DomainState {
            client,
            limiter: IntervalLimiter::new(config.rate_limit_rps),
            config,
        });
        domains.insert(domain.to_string(), state.clone());
        Ok(state)
    }

    /// Follow redirects manually, re-validating scheme, host and resolved
    /// addresses at every hop.
    async fn request_following_redirects(
        &self,
        state: &DomainState,
        url: &str,
    ) -> Result<reqwest::Response> {
        let mut current = url.to_string();

        for _hop in 0..MAX_REDIRECTS {
            ensure_public_http_url(&current).await?;

            let resp = state
                .client
                .get(&current)
                .header("User-Agent", USER_AGENT)
                .header("Accept", ACCEPT)
                .header("Accept-Language", &state.config.accept_language)
                .header("Cache-Control", "no-cache")
                .header("Upgrade-Insecure-Requests", "1")
                .send()
                .await?;

            if !resp.status().is_redirection() {
                return Ok(resp);
            }

            let location = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Error::Fetch("redirect without location".to_string()))?;

            current = Url::parse(&current)
                .and_then(|base| base.join(location))
                .map_err(|e| Error::Fetch(format!("invalid redirect target: {}", e)))?
                .to_string();
        }

        Err(Error::Fetch(format!(
            "stopped after {} redirects",
            MAX_REDIRECTS
        )))
    }
}

#[async_trait]
impl Fetcher for RateLimitedFetcher {
    async fn fetch(&self, raw_url: &str) -> Result<FetchedDocument> {
        let parsed = Url::parse(raw_url).map_err(|e| Error::Fetch(format!("invalid URL: {}", e)))?;
        let domain = parsed
            .host_str()
            .ok_or_else(|| Error::Fetch("URL host is required".to_string()))?
            .to_lowercase();

        let state = self.state_for(&domain).await?;
        state.limiter.acquire().await;

        let mut last_err: Option<Error> = None;

        for attempt in 0..=state.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            match self.request_following_redirects(&state, raw_url).await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == reqwest::StatusCode::OK {
                        let content_type = resp
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        let headers = resp
                            .headers()
                            .iter()
                            .filter_map(|(k, v)| {
                                v.to_str().ok().map(|v| (k.to_string(), v.to_string()))
                            })
                            .collect();
                        let body = resp.bytes().await?.to_vec();
                        debug!(
                            subsystem = "ingest",
                            component = "fetcher",
                            op = "fetch",
                            url = raw_url,
                            status_code = status.as_u16(),
                            bytes = body.len(),
                            "Fetched document"
                        );
                        return Ok(FetchedDocument {
                            url: raw_url.to_string(),
                            status_code: status.as_u16(),
                            content_type,
                            body,
                            fetched_at: Utc::now(),
                            headers,
                        });
                    }

                    if should_retry_status(status.as_u16()) && attempt < state.config.max_retries {
                        warn!(
                            subsystem = "ingest",
                            component = "fetcher",
                            url = raw_url,
                            status_code = status.as_u16(),
                            attempt = attempt + 1,
                            "Retryable status, backing off"
                        );
                        last_err =
                            Some(Error::Fetch(format!("status code {}", status.as_u16())));
                        continue;
                    }

                    return Err(Error::Fetch(format!(
                        "unexpected status code: {}",
                        status.as_u16()
                    )));
                }
                Err(Error::Blocked(msg)) => {
                    // SSRF rejections are fatal for this request.
                    return Err(Error::Blocked(msg));
                }
                Err(Error::Fetch(msg)) if is_timeout_message(&msg) => {
                    if attempt < state.config.max_retries {
                        last_err = Some(Error::Fetch(msg));
                        continue;
                    }
                    return Err(Error::Fetch(msg));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Fetch("max retries exceeded".to_string())))
    }
}

/// Exponential backoff `500ms · 2^(attempt-1)` plus uniform jitter < 100ms.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_millis(500u64.saturating_mul(1u64 << (attempt.saturating_sub(1))));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
    base + jitter
}

/// HTTP statuses that warrant a retry.
pub fn should_retry_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_timeout_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("timed out") || lower.contains("timeout") || lower.contains("connect")
}

/// Validate that a URL is http/https, names a public host, and resolves
/// only to public addresses. Returns the parsed URL on success.
pub async fn ensure_public_http_url(raw_url: &str) -> Result<Url> {
    let url = Url::parse(raw_url).map_err(|e| Error::Fetch(format!("invalid URL: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::Blocked(format!("scheme {} not allowed", url.scheme())));
    }

    let host = url
        .host()
        .ok_or_else(|| Error::Blocked("URL host is required".to_string()))?;

    match host {
        Host::Ipv4(ip) => {
            if is_private_or_special_ip(IpAddr::V4(ip)) {
                return Err(Error::Blocked(format!("private address {}", ip)));
            }
        }
        Host::Ipv6(ip) => {
            if is_private_or_special_ip(IpAddr::V6(ip)) {
                return Err(Error::Blocked(format!("private address {}", ip)));
            }
        }
        Host::Domain(domain) => {
            let lower = domain.to_lowercase();
            if lower == "localhost" || lower.ends_with(".local") {
                return Err(Error::Blocked(format!("internal host {}", lower)));
            }

            let port = url.port_or_known_default().unwrap_or(80);
            let addrs: Vec<_> = tokio::net::lookup_host((lower.as_str(), port))
                .await
                .map_err(|e| Error::Fetch(format!("unable to resolve {}: {}", lower, e)))?
                .collect();
            if addrs.is_empty() {
                return Err(Error::Fetch(format!("{} resolved to no addresses", lower)));
            }
            for addr in addrs {
                if is_private_or_special_ip(addr.ip()) {
                    return Err(Error::Blocked(format!(
                        "{} resolves to private address {}",
                        lower,
                        addr.ip()
                    )));
                }
            }
        }
    }

    Ok(url)
}

/// True for loopback, link-local, RFC1918, CGNAT 100.64.0.0/10, fc00::/7,
/// fe80::/10, multicast and unspecified addresses.
pub fn is_private_or_special_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
                || v4.is_broadcast()
            {
                return true;
            }
            let octets = v4.octets();
            // CGNAT 100.64.0.0/10
            octets[0] == 100 && (octets[1] & 0xC0) == 64
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_multicast() || v6.is_unspecified() {
                return true;
            }
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_or_special_ip(IpAddr::V4(mapped));
            }
            let segments = v6.segments();
            // fc00::/7 unique local
            if (segments[0] & 0xFE00) == 0xFC00 {
                return true;
            }
            // fe80::/10 link local
            (segments[0] & 0xFFC0) == 0xFE80
        }
    }
}
