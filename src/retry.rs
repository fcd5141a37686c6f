//! Exponential backoff retries guarded by a circuit breaker

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::error::{HarvestError, Result};

/// Fail-fast guard shared by every call through one handler
#[derive(Debug)]
struct CircuitBreaker {
    consecutive_failures: u32,
    open: bool,
    opened_at: Option<Instant>,
    threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            open: false,
            opened_at: None,
            threshold,
            reset_timeout,
        }
    }

    fn should_auto_reset(&self, now: Instant) -> bool {
        match (self.open, self.opened_at) {
            (true, Some(opened_at)) => now.saturating_duration_since(opened_at) >= self.reset_timeout,
            _ => false,
        }
    }

    fn close(&mut self) {
        self.open = false;
        self.opened_at = None;
        self.consecutive_failures = 0;
    }
}

/// Snapshot of the breaker for callers and statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub consecutive_failures: u32,
    pub open: bool,
    /// Seconds since the breaker tripped, if open
    pub open_for_seconds: Option<f64>,
    pub threshold: u32,
    pub reset_timeout_seconds: f64,
}

#[derive(Debug, Default)]
struct RetryCounters {
    total_attempts: u64,
    total_retries: u64,
    successful_retries: u64,
    failed_retries: u64,
    circuit_breaker_trips: u64,
    circuit_breaker_resets: u64,
    errors_by_type: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStats {
    pub total_attempts: u64,
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub circuit_breaker_trips: u64,
    pub circuit_breaker_resets: u64,
    pub errors_by_type: HashMap<String, u64>,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
    pub circuit_breaker_threshold: u32,
    pub success_rate: f64,
}

/// Retry handler with exponential backoff and a global circuit breaker
pub struct RetryHandler {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    breaker: Mutex<CircuitBreaker>,
    counters: Mutex<RetryCounters>,
}

impl RetryHandler {
    pub fn new(config: &RetryConfig) -> Self {
        info!(
            "🔁 Retry handler initialized: max_attempts={}, base_delay={}ms, circuit_threshold={}",
            config.max_attempts, config.base_delay_ms, config.circuit_breaker_threshold
        );

        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            breaker: Mutex::new(CircuitBreaker::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_timeout(),
            )),
            counters: Mutex::new(RetryCounters::default()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `min(base * 2^attempt, max)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// An open breaker fails fast with [`HarvestError::CircuitOpen`] without
    /// invoking `operation`. Exhausted retries surface as
    /// [`HarvestError::RetriesExhausted`] wrapping the last error.
    pub async fn retry_with_backoff<T, F, Fut>(&self, context: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check_circuit().await?;

        for attempt in 0..self.max_attempts {
            self.counters.lock().await.total_attempts += 1;

            let error = match operation().await {
                Ok(value) => {
                    self.record_success(context, attempt).await;
                    return Ok(value);
                }
                Err(error) => error,
            };

            self.track_error(&error).await;

            if !error.is_retryable() {
                error!("❌ {}: non-retryable error: {}", context, error);
                self.record_failure().await;
                return Err(error);
            }

            warn!(
                "⚠️ {}: attempt {}/{} failed: {}",
                context,
                attempt + 1,
                self.max_attempts,
                error
            );

            if attempt + 1 == self.max_attempts {
                error!("❌ {}: all {} attempts failed", context, self.max_attempts);
                self.counters.lock().await.failed_retries += 1;
                self.record_failure().await;
                return Err(HarvestError::RetriesExhausted {
                    attempts: self.max_attempts,
                    source: Box::new(error),
                });
            }

            let delay = self.delay_for_attempt(attempt);
            self.counters.lock().await.total_retries += 1;
            info!(
                "🔄 {}: retrying in {:.1}s (attempt {}/{})",
                context,
                delay.as_secs_f64(),
                attempt + 2,
                self.max_attempts
            );
            tokio::time::sleep(delay).await;
        }

        // max_attempts >= 1, so the loop always returns
        Err(HarvestError::RetriesExhausted {
            attempts: self.max_attempts,
            source: Box::new(HarvestError::Other(format!("{}: no attempt was made", context))),
        })
    }

    async fn check_circuit(&self) -> Result<()> {
        let mut breaker = self.breaker.lock().await;

        if breaker.should_auto_reset(Instant::now()) {
            breaker.close();
            drop(breaker);
            self.counters.lock().await.circuit_breaker_resets += 1;
            info!("🟢 Circuit breaker auto-reset after timeout");
            return Ok(());
        }

        if breaker.open {
            return Err(HarvestError::CircuitOpen {
                consecutive_failures: breaker.consecutive_failures,
            });
        }

        Ok(())
    }

    async fn record_success(&self, context: &str, attempt: u32) {
        {
            let mut breaker = self.breaker.lock().await;
            if breaker.consecutive_failures > 0 {
                info!(
                    "Success after {} previous failures, resetting counter",
                    breaker.consecutive_failures
                );
            }
            breaker.consecutive_failures = 0;
        }

        if attempt > 0 {
            self.counters.lock().await.successful_retries += 1;
            info!("✅ {}: succeeded on attempt {}", context, attempt + 1);
        }
    }

    async fn record_failure(&self) {
        let mut breaker = self.breaker.lock().await;
        breaker.consecutive_failures += 1;

        if breaker.consecutive_failures >= breaker.threshold && !breaker.open {
            breaker.open = true;
            breaker.opened_at = Some(Instant::now());
            error!(
                "🔴 Circuit breaker OPEN ({} consecutive failures), will auto-reset in {}s",
                breaker.consecutive_failures,
                breaker.reset_timeout.as_secs()
            );
            drop(breaker);
            self.counters.lock().await.circuit_breaker_trips += 1;
        }
    }

    async fn track_error(&self, error: &HarvestError) {
        let mut counters = self.counters.lock().await;
        *counters
            .errors_by_type
            .entry(error.error_type().to_string())
            .or_insert(0) += 1;
    }

    /// Close the breaker and zero the failure count
    pub async fn reset_circuit_breaker(&self) {
        let mut breaker = self.breaker.lock().await;
        let was_open = breaker.open;
        breaker.close();
        drop(breaker);

        if was_open {
            self.counters.lock().await.circuit_breaker_resets += 1;
            info!("🟢 Circuit breaker manually reset");
        }
    }

    pub async fn circuit_state(&self) -> CircuitBreakerState {
        let breaker = self.breaker.lock().await;
        CircuitBreakerState {
            consecutive_failures: breaker.consecutive_failures,
            open: breaker.open,
            open_for_seconds: breaker
                .opened_at
                .map(|opened_at| Instant::now().saturating_duration_since(opened_at).as_secs_f64()),
            threshold: breaker.threshold,
            reset_timeout_seconds: breaker.reset_timeout.as_secs_f64(),
        }
    }

    pub async fn get_statistics(&self) -> RetryStats {
        let counters = self.counters.lock().await;
        let breaker = self.breaker.lock().await;

        RetryStats {
            total_attempts: counters.total_attempts,
            total_retries: counters.total_retries,
            successful_retries: counters.successful_retries,
            failed_retries: counters.failed_retries,
            circuit_breaker_trips: counters.circuit_breaker_trips,
            circuit_breaker_resets: counters.circuit_breaker_resets,
            errors_by_type: counters.errors_by_type.clone(),
            consecutive_failures: breaker.consecutive_failures,
            circuit_open: breaker.open,
            circuit_breaker_threshold: breaker.threshold,
            success_rate: if counters.total_attempts > 0 {
                (counters.total_attempts - counters.failed_retries) as f64
                    / counters.total_attempts as f64
                    * 100.0
            } else {
                0.0
            },
        }
    }

    /// Zero the counters; breaker state is kept
    pub async fn reset_statistics(&self) {
        *self.counters.lock().await = RetryCounters::default();
        debug!("Retry handler statistics reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn handler(max_attempts: u32, threshold: u32) -> RetryHandler {
        RetryHandler::new(&RetryConfig {
            max_attempts,
            base_delay_ms: 1000,
            max_delay_ms: 3000,
            circuit_breaker_threshold: threshold,
            circuit_breaker_timeout_seconds: 300,
        })
    }

    #[test]
    fn test_delay_is_capped() {
        let handler = handler(5, 10);
        assert_eq!(handler.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(handler.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(handler.delay_for_attempt(2), Duration::from_secs(3));
        assert_eq!(handler.delay_for_attempt(40), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_k_failures_with_backoff() {
        let handler = handler(4, 10);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let result = handler
            .retry_with_backoff("flaky", || {
                let calls = calls.clone();
                async move {
                    let mut calls = calls.lock().await;
                    calls.push(Instant::now());
                    if calls.len() <= 2 {
                        Err(HarvestError::Retryable("connection reset".to_string()))
                    } else {
                        Ok(calls.len())
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);

        let calls = calls.lock().await;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(1));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(2));

        let stats = handler.get_statistics().await;
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.total_retries, 2);
        assert_eq!(stats.successful_retries, 1);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.errors_by_type.get("retryable"), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_is_not_retried() {
        let handler = handler(3, 10);
        let calls = AtomicU32::new(0);

        let result: Result<()> = handler
            .retry_with_backoff("missing", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(HarvestError::Http { status: 404, message: "not found".to_string() }) }
            })
            .await;

        assert!(matches!(result, Err(HarvestError::Http { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.circuit_state().await.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let handler = handler(3, 10);
        let calls = AtomicU32::new(0);

        let result: Result<()> = handler
            .retry_with_backoff("down", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(HarvestError::Http { status: 503, message: "unavailable".to_string() }) }
            })
            .await;

        match result {
            Err(HarvestError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, HarvestError::Http { status: 503, .. }));
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // One call, one failure, however many attempts it took
        assert_eq!(handler.circuit_state().await.consecutive_failures, 1);
        assert_eq!(handler.get_statistics().await.failed_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_and_auto_resets() {
        let handler = handler(1, 3);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let result: Result<()> = handler
                .retry_with_backoff("bad", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(HarvestError::NonRetryable("gone".to_string())) }
                })
                .await;
            assert!(result.is_err());
        }
        assert!(handler.circuit_state().await.open);

        let blocked: Result<()> = handler
            .retry_with_backoff("blocked", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(blocked, Err(HarvestError::CircuitOpen { consecutive_failures: 3 })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(300)).await;

        let recovered = handler
            .retry_with_backoff("recovered", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;
        assert_eq!(recovered.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let stats = handler.get_statistics().await;
        assert_eq!(stats.circuit_breaker_trips, 1);
        assert_eq!(stats.circuit_breaker_resets, 1);
        assert!(!stats.circuit_open);
    }

    #[tokio::test]
    async fn test_manual_reset_zeroes_failures() {
        let handler = handler(1, 1);
        let _: Result<()> = handler
            .retry_with_backoff("bad", || async { Err(HarvestError::NonRetryable("no".to_string())) })
            .await;
        assert!(handler.circuit_state().await.open);

        handler.reset_circuit_breaker().await;
        let state = handler.circuit_state().await;
        assert!(!state.open);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_reset_statistics_keeps_breaker() {
        let handler = handler(1, 1);
        let _: Result<()> = handler
            .retry_with_backoff("bad", || async { Err(HarvestError::NonRetryable("no".to_string())) })
            .await;

        handler.reset_statistics().await;
        let stats = handler.get_statistics().await;
        assert_eq!(stats.total_attempts, 0);
        assert!(stats.circuit_open);
    }
}
