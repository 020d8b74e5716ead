//! Policy gate: decides whether a candidate URL may be fetched at all.
//!
//! Order of checks: loopback and private-network targets are refused outright,
//! the configured allow-list wins over the deny-list, the deny-list (built-in
//! plus configured) short-circuits, and finally robots.txt
//! is consulted when enabled. robots.txt bodies are memoized per origin for
//! the run and persisted through [`Storage`] between runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use texting_robots::Robot;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use url::Url;

use linkintel_shared::EnrichConfig;
use linkintel_storage::Storage;

use crate::engine::is_ssrf_target;
use crate::limiter::DomainLimiter;

/// Product token matched against robots.txt `User-agent` groups.
pub const ROBOTS_AGENT: &str = "LinkIntel";

/// Domains whose terms of service forbid automated collection.
pub const BUILTIN_DENY: &[&str] = &["linkedin.com"];

/// How long a persisted robots.txt stays valid.
const ROBOTS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Crawl-delay values above this are clamped.
const MAX_CRAWL_DELAY: Duration = Duration::from_secs(30);

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Allow { crawl_delay: Option<Duration> },
    DenyPolicy { reason: String },
    DenyRobots { reason: String },
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// Human-readable reason for a denial, `None` when allowed.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allow { .. } => None,
            Self::DenyPolicy { reason } | Self::DenyRobots { reason } => Some(reason),
        }
    }
}

enum RobotsRules {
    AllowAll,
    Parsed(Box<Robot>),
}

impl RobotsRules {
    fn from_response(http_status: u16, body: &str) -> Self {
        if !(200..300).contains(&http_status) {
            // 4xx: no robots.txt means no restrictions.
            return Self::AllowAll;
        }
        match Robot::new(ROBOTS_AGENT, body.as_bytes()) {
            Ok(robot) => Self::Parsed(Box::new(robot)),
            Err(e) => {
                warn!(error = %e, "unparseable robots.txt, treating as allow-all");
                Self::AllowAll
            }
        }
    }

    fn allows(&self, url: &Url) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Parsed(robot) => robot.allowed(url.as_str()),
        }
    }

    fn crawl_delay(&self) -> Option<Duration> {
        match self {
            Self::AllowAll => None,
            Self::Parsed(robot) => robot
                .delay
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(|d| Duration::from_secs_f32(d).min(MAX_CRAWL_DELAY)),
        }
    }
}

/// Decides fetch eligibility for URLs.
pub struct PolicyGate {
    deny: Vec<String>,
    allow: Vec<String>,
    respect_robots: bool,
    client: Client,
    storage: Option<Arc<Storage>>,
    limiter: Arc<DomainLimiter>,
    robots: RwLock<HashMap<String, Arc<RobotsRules>>>,
    allow_localhost: bool,
}

impl PolicyGate {
    pub fn new(
        config: &EnrichConfig,
        client: Client,
        limiter: Arc<DomainLimiter>,
        storage: Option<Arc<Storage>>,
    ) -> Self {
        let mut deny: Vec<String> = BUILTIN_DENY.iter().map(|d| d.to_string()).collect();
        deny.extend(config.deny_domains.iter().map(|d| normalize_domain(d)));
        deny.dedup();

        Self {
            deny,
            allow: config.allow_domains.iter().map(|d| normalize_domain(d)).collect(),
            respect_robots: config.respect_robots_txt,
            client,
            storage,
            limiter,
            robots: RwLock::new(HashMap::new()),
            allow_localhost: false,
        }
    }

    /// Accept loopback and private-network hosts (for tests against mock servers).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Check a single URL.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn check(&self, url: &Url) -> PolicyDecision {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

        if !self.allow_localhost && is_ssrf_target(url) {
            debug!("private or loopback target");
            return PolicyDecision::DenyPolicy {
                reason: format!("{host} is a private or loopback address"),
            };
        }

        let allow_listed = self.allow.iter().any(|d| domain_matches(&host, d));
        if !allow_listed {
            if let Some(denied) = self.deny.iter().find(|d| domain_matches(&host, d)) {
                debug!(%denied, "deny-listed");
                return PolicyDecision::DenyPolicy {
                    reason: format!("{host} is deny-listed ({denied})"),
                };
            }
        }

        if !self.respect_robots {
            return PolicyDecision::Allow { crawl_delay: None };
        }

        let rules = self.rules_for(url, &host).await;
        if !rules.allows(url) {
            debug!("disallowed by robots.txt");
            return PolicyDecision::DenyRobots {
                reason: format!("robots.txt disallows {}", url.path()),
            };
        }

        let crawl_delay = rules.crawl_delay();
        if let Some(delay) = crawl_delay {
            self.limiter.set_crawl_delay(&host, delay);
        }
        PolicyDecision::Allow { crawl_delay }
    }

    async fn rules_for(&self, url: &Url, host: &str) -> Arc<RobotsRules> {
        let origin = url.origin().ascii_serialization();
        if let Some(rules) = self.robots.read().await.get(&origin) {
            return Arc::clone(rules);
        }

        if let Some(storage) = &self.storage {
            match storage.get_robots(&origin, ROBOTS_TTL).await {
                Ok(Some(cached)) => {
                    let rules = Arc::new(RobotsRules::from_response(cached.http_status, &cached.body));
                    self.remember(&origin, &rules).await;
                    return rules;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "robots cache read failed"),
            }
        }

        // The robots request counts against the domain's rate like any other.
        let _permit = self.limiter.acquire(host).await;
        if let Some(rules) = self.robots.read().await.get(&origin) {
            return Arc::clone(rules);
        }

        let robots_url = format!("{origin}/robots.txt");
        let rules = match self.client.get(&robots_url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if response.status().is_server_error() {
                    warn!(status, "robots.txt unavailable, allowing");
                    Arc::new(RobotsRules::AllowAll)
                } else {
                    let body = response.text().await.unwrap_or_default();
                    if let Some(storage) = &self.storage {
                        if let Err(e) = storage.put_robots(&origin, status, &body).await {
                            warn!(error = %e, "robots cache write failed");
                        }
                    }
                    Arc::new(RobotsRules::from_response(status, &body))
                }
            }
            Err(e) => {
                warn!(error = %e, "robots.txt fetch failed, allowing");
                Arc::new(RobotsRules::AllowAll)
            }
        };

        self.remember(&origin, &rules).await;
        rules
    }

    async fn remember(&self, origin: &str, rules: &Arc<RobotsRules>) {
        self.robots
            .write()
            .await
            .insert(origin.to_string(), Arc::clone(rules));
    }
}

fn normalize_domain(domain: &str) -> String {
    domain
        .trim()
        .trim_start_matches("*.")
        .trim_start_matches('.')
        .to_ascii_lowercase()
}

/// `host` equals `domain` or is a subdomain of it.
fn domain_matches(host: &str, domain: &str) -> bool {
    !domain.is_empty()
        && (host == domain
            || host
                .strip_suffix(domain)
                .is_some_and(|rest| rest.ends_with('.')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::build_client;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gate(config: &EnrichConfig, storage: Option<Arc<Storage>>) -> PolicyGate {
        let limiter = Arc::new(DomainLimiter::new(1000.0));
        let client = build_client(Duration::from_secs(2)).unwrap();
        PolicyGate::new(config, client, limiter, storage).allow_localhost()
    }

    fn no_robots() -> EnrichConfig {
        EnrichConfig {
            respect_robots_txt: false,
            ..EnrichConfig::default()
        }
    }

    #[test]
    fn domain_matching() {
        assert!(domain_matches("linkedin.com", "linkedin.com"));
        assert!(domain_matches("www.linkedin.com", "linkedin.com"));
        assert!(!domain_matches("notlinkedin.com", "linkedin.com"));
        assert!(!domain_matches("linkedin.com.evil.io", "linkedin.com"));
    }

    #[tokio::test]
    async fn builtin_deny_list_blocks_linkedin() {
        let gate = gate(&no_robots(), None);
        let url = Url::parse("https://www.linkedin.com/in/jane").unwrap();
        let decision = gate.check(&url).await;
        assert!(matches!(decision, PolicyDecision::DenyPolicy { .. }));
        assert!(decision.reason().unwrap().contains("linkedin.com"));
    }

    #[tokio::test]
    async fn configured_deny_and_allow_lists() {
        let config = EnrichConfig {
            deny_domains: vec!["*.Facebook.com".into()],
            allow_domains: vec!["linkedin.com".into()],
            ..no_robots()
        };
        let gate = gate(&config, None);

        let fb = Url::parse("https://m.facebook.com/acme").unwrap();
        assert!(!gate.check(&fb).await.is_allowed());

        let li = Url::parse("https://linkedin.com/company/acme").unwrap();
        assert!(gate.check(&li).await.is_allowed());

        let other = Url::parse("https://acme.io/").unwrap();
        assert_eq!(
            gate.check(&other).await,
            PolicyDecision::Allow { crawl_delay: None }
        );
    }

    #[tokio::test]
    async fn robots_disallow_and_crawl_delay() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "User-agent: *\nDisallow: /private\nCrawl-delay: 2\n",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let gate = gate(&EnrichConfig::default(), None);
        let private = Url::parse(&format!("{}/private/page", server.uri())).unwrap();
        let public = Url::parse(&format!("{}/about", server.uri())).unwrap();

        assert!(matches!(
            gate.check(&private).await,
            PolicyDecision::DenyRobots { .. }
        ));
        assert_eq!(
            gate.check(&public).await,
            PolicyDecision::Allow {
                crawl_delay: Some(Duration::from_secs(2))
            }
        );
    }

    #[tokio::test]
    async fn missing_or_broken_robots_allows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let gate = gate(&EnrichConfig::default(), None);
        let url = Url::parse(&format!("{}/anything", server.uri())).unwrap();
        assert!(gate.check(&url).await.is_allowed());
    }

    #[tokio::test]
    async fn robots_body_is_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tmp = std::env::temp_dir().join(format!("li_policy_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.unwrap());
        let url = Url::parse(&format!("{}/x", server.uri())).unwrap();

        let first = gate(&EnrichConfig::default(), Some(Arc::clone(&storage)));
        assert!(!first.check(&url).await.is_allowed());

        // A fresh gate (new run) reads the stored copy instead of refetching.
        let second = gate(&EnrichConfig::default(), Some(storage));
        assert!(!second.check(&url).await.is_allowed());
    }

    #[tokio::test]
    async fn private_targets_are_denied_without_contacting_them() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /\n"))
            .expect(0)
            .mount(&server)
            .await;

        let limiter = Arc::new(DomainLimiter::new(1000.0));
        let client = build_client(Duration::from_secs(2)).unwrap();
        let strict = PolicyGate::new(&EnrichConfig::default(), client, limiter, None);

        let url = Url::parse(&format!("{}/admin", server.uri())).unwrap();
        let decision = strict.check(&url).await;
        assert!(matches!(decision, PolicyDecision::DenyPolicy { .. }));
        assert!(decision.reason().unwrap().contains("private or loopback"));

        let metadata = Url::parse("http://169.254.169.254/latest/meta-data").unwrap();
        assert!(!strict.check(&metadata).await.is_allowed());
    }
}
