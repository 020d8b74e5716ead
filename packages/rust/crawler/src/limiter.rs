//! Per-domain request limiter.
//!
//! Every domain gets its own async mutex. Holding the mutex is the permit to
//! have one request in flight, so requests to the same domain are serialized.
//! Spacing between request starts comes from `governor`: a keyed limiter
//! enforces the base rate for every domain, and a domain whose robots.txt
//! sets `Crawl-delay` also waits on its own slower limiter. Callers wait;
//! nothing is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, trace};

/// Permit for one in-flight request. Dropping it releases the domain.
#[derive(Debug)]
pub struct DomainPermit {
    _slot: OwnedMutexGuard<()>,
}

struct CrawlDelay {
    delay: Duration,
    limiter: Arc<DefaultDirectRateLimiter>,
}

/// Shared limiter enforcing concurrency 1 and a minimum spacing per domain.
pub struct DomainLimiter {
    interval: Duration,
    base: Option<DefaultKeyedRateLimiter<String>>,
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    /// Per-domain overrides from robots.txt `Crawl-delay`.
    delays: Mutex<HashMap<String, CrawlDelay>>,
}

impl std::fmt::Debug for DomainLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainLimiter")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl DomainLimiter {
    /// Create a limiter allowing `rps` request starts per second per domain.
    pub fn new(rps: f64) -> Self {
        let interval = if rps.is_finite() && rps > 0.0 {
            Duration::from_secs_f64(1.0 / rps)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            base: Quota::with_period(interval).map(RateLimiter::keyed),
            slots: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
        }
    }

    /// Minimum spacing between request starts for `domain`.
    pub fn interval_for(&self, domain: &str) -> Duration {
        let delays = self.delays.lock().unwrap_or_else(PoisonError::into_inner);
        delays
            .get(&domain.to_ascii_lowercase())
            .map_or(self.interval, |d| d.delay.max(self.interval))
    }

    /// Raise the spacing for `domain` (never lowers it below the base rate).
    ///
    /// Setting the same delay again keeps the existing limiter state.
    pub fn set_crawl_delay(&self, domain: &str, delay: Duration) {
        let domain = domain.to_ascii_lowercase();
        let mut delays = self.delays.lock().unwrap_or_else(PoisonError::into_inner);
        if delays.get(&domain).is_some_and(|d| d.delay == delay) {
            return;
        }
        let Some(quota) = Quota::with_period(delay) else {
            delays.remove(&domain);
            return;
        };
        debug!(%domain, delay_ms = delay.as_millis() as u64, "crawl delay set");
        delays.insert(
            domain,
            CrawlDelay {
                delay,
                limiter: Arc::new(RateLimiter::direct(quota)),
            },
        );
    }

    /// Wait for the domain to be free and its rate budget to allow a request.
    pub async fn acquire(&self, domain: &str) -> DomainPermit {
        let domain = domain.to_ascii_lowercase();
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(domain.clone()).or_default())
        };
        let guard = slot.lock_owned().await;

        if let Some(base) = &self.base {
            if base.check_key(&domain).is_err() {
                trace!(%domain, "rate limit wait");
                base.until_key_ready(&domain).await;
            }
        }

        let crawl_delay = {
            let delays = self.delays.lock().unwrap_or_else(PoisonError::into_inner);
            delays.get(&domain).map(|d| Arc::clone(&d.limiter))
        };
        if let Some(limiter) = crawl_delay {
            limiter.until_ready().await;
        }

        DomainPermit { _slot: guard }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn spaces_requests_to_the_same_domain() {
        let limiter = DomainLimiter::new(10.0);
        let start = Instant::now();

        drop(limiter.acquire("acme.io").await);
        drop(limiter.acquire("acme.io").await);
        drop(limiter.acquire("ACME.io").await);

        assert!(start.elapsed() >= Duration::from_millis(190));
    }

    #[tokio::test]
    async fn different_domains_do_not_wait() {
        let limiter = DomainLimiter::new(0.5);
        let start = Instant::now();

        drop(limiter.acquire("a.io").await);
        drop(limiter.acquire("b.io").await);
        drop(limiter.acquire("c.io").await);

        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn crawl_delay_raises_interval() {
        let limiter = DomainLimiter::new(100.0);
        limiter.set_crawl_delay("Slow.io", Duration::from_millis(300));
        assert_eq!(limiter.interval_for("slow.io"), Duration::from_millis(300));
        assert_eq!(limiter.interval_for("fast.io"), Duration::from_millis(10));

        let start = Instant::now();
        drop(limiter.acquire("slow.io").await);
        // Re-setting the same delay must not reset the spacing.
        limiter.set_crawl_delay("slow.io", Duration::from_millis(300));
        drop(limiter.acquire("slow.io").await);
        assert!(start.elapsed() >= Duration::from_millis(290));
    }

    #[tokio::test]
    async fn one_request_in_flight_per_domain() {
        let limiter = Arc::new(DomainLimiter::new(1000.0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire("acme.io").await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
