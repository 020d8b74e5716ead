//! Rate-limited, retrying, cached fetch engine.
//!
//! One call to [`FetchEngine::fetch`] resolves a URL to a [`FetchResult`]:
//! fresh cache entries are served without touching the network; otherwise
//! each attempt waits for its per-domain permit, runs under a hard timeout,
//! and transient failures (timeout, connect error, 429, 5xx) are retried with
//! exponential backoff. Failures come back as an `Error` result, never as a
//! propagated error.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use url::Url;

use linkintel_shared::{EnrichConfig, FetchResult, FetchStatus, LinkIntelError, Result};
use linkintel_storage::{CachedFetch, Storage};

use crate::limiter::DomainLimiter;

/// User-Agent string for outbound requests.
pub const USER_AGENT: &str = concat!("LinkIntel/", env!("CARGO_PKG_VERSION"));

/// Longest server-requested `Retry-After` we are willing to honor.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Fetch knobs, taken from [`EnrichConfig`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_body_bytes: usize,
    pub cache_ttl: Duration,
    pub use_cache: bool,
}

impl From<&EnrichConfig> for FetchOptions {
    fn from(config: &EnrichConfig) -> Self {
        Self {
            timeout: config.timeout,
            max_retries: config.max_retries,
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
            max_body_bytes: config.max_body_bytes,
            cache_ttl: config.cache_ttl,
            use_cache: config.use_cache,
        }
    }
}

impl FetchOptions {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }

    /// Failure reason for an attempt that exceeded the per-request timeout.
    fn timed_out(&self) -> String {
        format!("timed out after {}s", self.timeout.as_secs_f32())
    }
}

/// Outcome of a single network attempt.
enum Attempt {
    Done(FetchResult),
    Retryable {
        reason: String,
        retry_after: Option<Duration>,
    },
    Fatal {
        reason: String,
        http_status: Option<u16>,
    },
}

// ---------------------------------------------------------------------------
// FetchEngine
// ---------------------------------------------------------------------------

/// HTTP fetcher shared by every row of a run.
pub struct FetchEngine {
    client: Client,
    limiter: Arc<DomainLimiter>,
    cache: Option<Arc<Storage>>,
    opts: FetchOptions,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl FetchEngine {
    /// Create an engine. `cache` is optional so callers can run without a database.
    pub fn new(
        config: &EnrichConfig,
        limiter: Arc<DomainLimiter>,
        cache: Option<Arc<Storage>>,
    ) -> Result<Self> {
        let client = build_client(config.timeout)?;
        Ok(Self {
            client,
            limiter,
            cache,
            opts: FetchOptions::from(config),
            allow_localhost: false,
        })
    }

    /// Allow fetching localhost/private IPs (for tests against local mock servers).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// The underlying HTTP client, shared with the policy gate.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn limiter(&self) -> &Arc<DomainLimiter> {
        &self.limiter
    }

    /// Fetch `url`, consulting the cache first unless bypassed.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> FetchResult {
        let domain = url.host_str().unwrap_or_default().to_ascii_lowercase();

        if !self.allow_localhost && is_ssrf_target(url) {
            warn!("SSRF protection: blocked");
            return FetchResult::failed(url, "blocked private or non-http address", 0);
        }

        let url_hash = compute_hash(url.as_str());
        if self.opts.use_cache {
            if let Some(hit) = self.cached(url, &url_hash).await {
                debug!("cache hit");
                return hit;
            }
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = match tokio::time::timeout(self.opts.timeout, self.attempt(url, &domain))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Attempt::Retryable {
                    reason: self.opts.timed_out(),
                    retry_after: None,
                },
            };

            match outcome {
                Attempt::Done(mut result) => {
                    result.attempts = attempts;
                    info!(
                        status = result.status.as_str(),
                        http_status = result.http_status,
                        attempts,
                        "fetched"
                    );
                    self.store(&url_hash, &result).await;
                    return result;
                }
                Attempt::Fatal {
                    reason,
                    http_status,
                } => {
                    warn!(%reason, attempts, "fetch failed");
                    let mut result = FetchResult::failed(url, reason, attempts);
                    result.http_status = http_status;
                    return result;
                }
                Attempt::Retryable {
                    reason,
                    retry_after,
                } => {
                    if attempts > self.opts.max_retries {
                        warn!(%reason, attempts, "retries exhausted");
                        return FetchResult::failed(
                            url,
                            format!("{reason} (gave up after {attempts} attempts)"),
                            attempts,
                        );
                    }
                    let delay = retry_after
                        .map(|d| d.min(MAX_RETRY_AFTER))
                        .unwrap_or_else(|| self.opts.backoff(attempts));
                    debug!(%reason, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One network attempt, holding the domain permit until the body is read.
    async fn attempt(&self, url: &Url, domain: &str) -> Attempt {
        let _permit = self.limiter.acquire(domain).await;

        let response = match self.client.get(url.as_str()).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Attempt::Retryable {
                    reason: self.opts.timed_out(),
                    retry_after: None,
                };
            }
            Err(e) if e.is_connect() => {
                return Attempt::Retryable {
                    reason: format!("network: {e}"),
                    retry_after: None,
                };
            }
            Err(e) => {
                return Attempt::Fatal {
                    reason: format!("network: {e}"),
                    http_status: None,
                };
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Attempt::Retryable {
                reason: format!("HTTP {}", status.as_u16()),
                retry_after: retry_after(&response),
            };
        }
        if !status.is_success() {
            return Attempt::Fatal {
                reason: format!("HTTP {}", status.as_u16()),
                http_status: Some(status.as_u16()),
            };
        }

        let served_by = response
            .url()
            .host_str()
            .unwrap_or(domain)
            .to_ascii_lowercase();

        let (body, truncated) = match read_capped(response, self.opts.max_body_bytes).await {
            Ok(read) => read,
            Err(e) => {
                let reason = if e.is_timeout() {
                    self.opts.timed_out()
                } else {
                    format!("body read failed: {e}")
                };
                return Attempt::Retryable {
                    reason,
                    retry_after: None,
                };
            }
        };

        let fetch_status = if body.trim().is_empty() {
            FetchStatus::Empty
        } else if truncated {
            FetchStatus::Partial
        } else {
            FetchStatus::Success
        };

        Attempt::Done(FetchResult {
            url: url.clone(),
            status: fetch_status,
            content: (!body.is_empty()).then_some(body),
            http_status: Some(status.as_u16()),
            fetched_at: Utc::now(),
            domain: served_by,
            from_cache: false,
            attempts: 0,
            error: None,
        })
    }

    async fn cached(&self, url: &Url, url_hash: &str) -> Option<FetchResult> {
        let cache = self.cache.as_ref()?;
        let entry = match cache.get_fetch_cache(url_hash, self.opts.cache_ttl).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(error = %e, "cache read failed, fetching instead");
                return None;
            }
        };

        let status = FetchStatus::parse(&entry.status)?;
        Some(FetchResult {
            url: url.clone(),
            status,
            content: entry.content,
            http_status: entry.http_status,
            fetched_at: entry.fetched_at,
            domain: url.host_str().unwrap_or_default().to_ascii_lowercase(),
            from_cache: true,
            attempts: 0,
            error: None,
        })
    }

    /// Persist results that carry content. Cache write failures only log.
    async fn store(&self, url_hash: &str, result: &FetchResult) {
        let Some(cache) = &self.cache else {
            return;
        };
        if !result.status.has_content() {
            return;
        }
        let entry = CachedFetch {
            url: result.url.to_string(),
            status: result.status.as_str().to_string(),
            http_status: result.http_status,
            content: result.content.clone(),
            fetched_at: result.fetched_at,
        };
        if let Err(e) = cache.put_fetch_cache(url_hash, &entry).await {
            warn!(error = %e, "cache write failed");
        }
    }
}

/// Build the HTTP client used for page and robots.txt requests.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout)
        .build()
        .map_err(|e| LinkIntelError::Network(format!("failed to build HTTP client: {e}")))
}

/// Read at most `cap` bytes of the body. Returns the text and whether it was cut.
async fn read_capped(
    mut response: reqwest::Response,
    cap: usize,
) -> std::result::Result<(String, bool), reqwest::Error> {
    let mut buf: Vec<u8> = Vec::new();
    let mut truncated = false;

    while let Some(chunk) = response.chunk().await? {
        let room = cap.saturating_sub(buf.len());
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        buf.extend_from_slice(&chunk);
    }

    Ok((String::from_utf8_lossy(&buf).into_owned(), truncated))
}

/// Parse a delta-seconds `Retry-After` header.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub(crate) fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// Compute SHA-256 hex digest of `content` (cache key for URLs).
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> EnrichConfig {
        EnrichConfig {
            per_domain_rps: 1000.0,
            timeout: Duration::from_secs(2),
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(40),
            ..EnrichConfig::default()
        }
    }

    fn engine(config: &EnrichConfig, cache: Option<Arc<Storage>>) -> FetchEngine {
        let limiter = Arc::new(DomainLimiter::new(config.per_domain_rps));
        FetchEngine::new(config, limiter, cache)
            .unwrap()
            .allow_localhost()
    }

    async fn temp_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("li_fetch_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.unwrap())
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{p}", server.uri())).unwrap()
    }

    #[test]
    fn test_compute_hash() {
        let hash = compute_hash("hello world");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let opts = FetchOptions::from(&test_config());
        assert_eq!(opts.backoff(1), Duration::from_millis(10));
        assert_eq!(opts.backoff(2), Duration::from_millis(20));
        assert_eq!(opts.backoff(3), Duration::from_millis(40));
        assert_eq!(opts.backoff(9), Duration::from_millis(40));
    }

    #[test]
    fn ssrf_blocks_private_targets() {
        for blocked in [
            "file:///etc/passwd",
            "http://192.168.1.1/admin",
            "http://10.0.0.1/",
            "http://127.0.0.1:8080/",
            "http://localhost:3000/api",
            "http://[::1]/",
        ] {
            assert!(is_ssrf_target(&Url::parse(blocked).unwrap()), "{blocked}");
        }
        assert!(!is_ssrf_target(&Url::parse("https://acme.io/about").unwrap()));
    }

    #[tokio::test]
    async fn ssrf_target_is_never_requested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hi"))
            .expect(0)
            .mount(&server)
            .await;

        let config = test_config();
        let limiter = Arc::new(DomainLimiter::new(config.per_domain_rps));
        let engine = FetchEngine::new(&config, limiter, None).unwrap();
        let result = engine.fetch(&url(&server, "/")).await;
        assert_eq!(result.status, FetchStatus::Error);
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn success_is_cached_and_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/about"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Acme</h1>"))
            .expect(1)
            .mount(&server)
            .await;

        let storage = temp_storage().await;
        let engine = engine(&test_config(), Some(storage));
        let target = url(&server, "/about");

        let first = engine.fetch(&target).await;
        assert_eq!(first.status, FetchStatus::Success);
        assert!(!first.from_cache);
        assert_eq!(first.attempts, 1);

        let second = engine.fetch(&target).await;
        assert_eq!(second.status, FetchStatus::Success);
        assert!(second.from_cache);
        assert_eq!(second.content.as_deref(), Some("<h1>Acme</h1>"));
        assert_eq!(second.attempts, 0);
    }

    #[tokio::test]
    async fn cache_bypass_still_refreshes_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
            .expect(2)
            .mount(&server)
            .await;

        let storage = temp_storage().await;
        let mut config = test_config();
        config.use_cache = false;
        let engine = engine(&config, Some(Arc::clone(&storage)));
        let target = url(&server, "/");

        assert!(!engine.fetch(&target).await.from_cache);
        assert!(!engine.fetch(&target).await.from_cache);

        let hash = compute_hash(target.as_str());
        let entry = storage
            .get_fetch_cache(&hash, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(entry.is_some());
    }

    #[tokio::test]
    async fn retries_after_429() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok now"))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(&test_config(), None);
        let result = engine.fetch(&url(&server, "/")).await;
        assert_eq!(result.status, FetchStatus::Success);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn server_errors_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let engine = engine(&test_config(), None);
        let result = engine.fetch(&url(&server, "/")).await;
        assert_eq!(result.status, FetchStatus::Error);
        assert_eq!(result.attempts, 3);
        assert!(result.error.unwrap().contains("HTTP 503"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(&test_config(), None);
        let result = engine.fetch(&url(&server, "/missing")).await;
        assert_eq!(result.status, FetchStatus::Error);
        assert_eq!(result.http_status, Some(404));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn slow_responses_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_millis(800)),
            )
            .mount(&server)
            .await;

        let mut config = test_config();
        config.timeout = Duration::from_millis(100);
        config.max_retries = 0;
        let engine = engine(&config, None);

        let result = engine.fetch(&url(&server, "/")).await;
        assert_eq!(result.status, FetchStatus::Error);
        let error = result.error.unwrap();
        assert!(error.starts_with("timed out after 0.1s"), "{error}");
        assert!(!error.contains("network:"));
    }

    #[tokio::test]
    async fn oversized_body_is_partial_and_empty_body_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(100)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blank"))
            .respond_with(ResponseTemplate::new(200).set_body_string("   "))
            .mount(&server)
            .await;

        let mut config = test_config();
        config.max_body_bytes = 10;
        let engine = engine(&config, None);

        let big = engine.fetch(&url(&server, "/big")).await;
        assert_eq!(big.status, FetchStatus::Partial);
        assert_eq!(big.content.map(|c| c.len()), Some(10));

        let blank = engine.fetch(&url(&server, "/blank")).await;
        assert_eq!(blank.status, FetchStatus::Empty);
    }
}
