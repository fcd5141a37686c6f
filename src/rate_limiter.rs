//! Per-domain token bucket rate limiting

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RateLimitConfig;

/// Bucket key used when a URL carries no host
pub const DEFAULT_DOMAIN: &str = "default";

/// Slowest rate a limiter will run at, in requests per second
pub const MIN_RATE: f64 = 0.001;

/// Token bucket for a single domain
#[derive(Debug)]
struct RateBucket {
    domain: String,
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
    requests: u64,
    waits: u64,
}

impl RateBucket {
    fn new(domain: &str, capacity: f64, rate: f64) -> Self {
        Self {
            domain: domain.to_string(),
            tokens: capacity,
            capacity,
            rate,
            last_refill: Instant::now(),
            requests: 0,
            waits: 0,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}

#[derive(Debug, Default)]
struct LimiterCounters {
    total_requests: u64,
    total_waits: u64,
    total_wait_time: Duration,
}

/// Global limiter statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_waits: u64,
    pub total_wait_time: f64,
    pub avg_wait_time: f64,
    pub wait_percentage: f64,
    pub rate: f64,
    pub capacity: f64,
    pub domains: Vec<String>,
}

/// Statistics for one domain bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainStats {
    pub domain: String,
    pub requests: u64,
    pub waits: u64,
    pub current_tokens: f64,
    pub capacity: f64,
    pub rate: f64,
}

/// Token bucket limiter keyed by domain.
///
/// Each bucket sits behind its own lock, held across the wait, so callers on
/// one domain queue up behind each other while other domains stay unaffected.
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, Arc<Mutex<RateBucket>>>>,
    counters: Mutex<LimiterCounters>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        info!(
            "🚦 Rate limiter initialized: {} req/s, burst capacity {}",
            config.rate, config.capacity
        );

        // A zero or non-finite rate would make the wait unbounded
        let rate = if config.rate.is_finite() && config.rate >= MIN_RATE {
            config.rate
        } else {
            warn!("🚦 Rate {} is not usable, clamping to {} req/s", config.rate, MIN_RATE);
            MIN_RATE
        };

        Self {
            rate,
            capacity: config.capacity.max(1.0),
            buckets: Mutex::new(HashMap::new()),
            counters: Mutex::new(LimiterCounters::default()),
        }
    }

    /// Wait until a token is available for `domain`, then consume it.
    ///
    /// Returns how long the caller was suspended.
    pub async fn acquire(&self, domain: &str) -> Duration {
        let bucket = self.bucket(domain).await;
        let mut bucket = bucket.lock().await;

        bucket.refill(Instant::now());
        bucket.requests += 1;

        let waited = if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Duration::ZERO
        } else {
            let wait = Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.rate);
            debug!("⏳ Rate limit for {}: waiting {:.2}s", bucket.domain, wait.as_secs_f64());
            bucket.waits += 1;

            tokio::time::sleep(wait).await;

            // The token that accrued while sleeping is spent right away
            bucket.tokens = 0.0;
            bucket.last_refill = Instant::now();
            wait
        };
        drop(bucket);

        let mut counters = self.counters.lock().await;
        counters.total_requests += 1;
        if !waited.is_zero() {
            counters.total_waits += 1;
            counters.total_wait_time += waited;
        }

        waited
    }

    /// Acquire a token for the host of `url`
    pub async fn acquire_for_url(&self, url: &str) -> Duration {
        self.acquire(&domain_of(url)).await
    }

    async fn bucket(&self, domain: &str) -> Arc<Mutex<RateBucket>> {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(domain.to_string())
            .or_insert_with(|| {
                debug!("🪣 Created rate bucket for {}", domain);
                Arc::new(Mutex::new(RateBucket::new(domain, self.capacity, self.rate)))
            })
            .clone()
    }

    pub async fn get_statistics(&self) -> RateLimiterStats {
        let counters = self.counters.lock().await;
        let mut domains: Vec<String> = self.buckets.lock().await.keys().cloned().collect();
        domains.sort();

        let total_wait_time = counters.total_wait_time.as_secs_f64();
        RateLimiterStats {
            total_requests: counters.total_requests,
            total_waits: counters.total_waits,
            total_wait_time,
            avg_wait_time: if counters.total_waits > 0 {
                total_wait_time / counters.total_waits as f64
            } else {
                0.0
            },
            wait_percentage: if counters.total_requests > 0 {
                counters.total_waits as f64 / counters.total_requests as f64 * 100.0
            } else {
                0.0
            },
            rate: self.rate,
            capacity: self.capacity,
            domains,
        }
    }

    /// Per-domain view; `None` until the domain has been seen
    pub async fn get_domain_stats(&self, domain: &str) -> Option<DomainStats> {
        let bucket = self.buckets.lock().await.get(domain).cloned()?;
        let mut bucket = bucket.lock().await;
        bucket.refill(Instant::now());

        Some(DomainStats {
            domain: bucket.domain.clone(),
            requests: bucket.requests,
            waits: bucket.waits,
            current_tokens: bucket.tokens,
            capacity: bucket.capacity,
            rate: bucket.rate,
        })
    }

    /// Zero the counters; bucket tokens are left alone
    pub async fn reset_statistics(&self) {
        *self.counters.lock().await = LimiterCounters::default();

        let buckets: Vec<_> = self.buckets.lock().await.values().cloned().collect();
        for bucket in buckets {
            let mut bucket = bucket.lock().await;
            bucket.requests = 0;
            bucket.waits = 0;
        }
        debug!("Rate limiter statistics reset");
    }
}

/// Bucket key for a URL: its host, or [`DEFAULT_DOMAIN`]
pub fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.to_lowercase()))
        .unwrap_or_else(|| DEFAULT_DOMAIN.to_string())
}
