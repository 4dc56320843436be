//! Retry and backoff policy
//!
//! Network failures back off exponentially from the configured base delay.
//! 429 responses wait out `Retry-After` when the server sends one. Timeouts
//! are never retried: the server may still be processing the original
//! request, and replaying a non-idempotent call would double it.

use std::time::Duration;

use reqwest::header::HeaderMap;

/// Retry counters and delays for a single request
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first, for network failures and 429s separately
    pub max_retries: u32,
    /// Base delay the exponential backoff scales from
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before the given retry, doubling per attempt
    ///
    /// `attempt` is 1-based: the first retry waits `base_delay`, the second
    /// `2 * base_delay`, and so on.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Delay before replaying a rate-limited request
    ///
    /// Honors a numeric `Retry-After` header (seconds); otherwise falls back
    /// to the base delay.
    pub fn rate_limit_delay(&self, headers: &HeaderMap) -> Duration {
        headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.base_delay)
    }

    /// True once `attempt` retries have been spent
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_monotonic() {
        let policy = RetryPolicy::default();
        for attempt in 1..10 {
            assert!(policy.backoff_delay(attempt + 1) >= policy.backoff_delay(attempt));
        }
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let delay = policy.backoff_delay(u32::MAX);
        assert!(delay >= policy.backoff_delay(10));
    }

    #[test]
    fn test_rate_limit_delay_honors_retry_after() {
        let policy = RetryPolicy::default();
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", "7".parse().unwrap());
        assert_eq!(policy.rate_limit_delay(&headers), Duration::from_secs(7));
    }

    #[test]
    fn test_rate_limit_delay_falls_back_to_base() {
        let policy = RetryPolicy::new(3, Duration::from_millis(250));
        let headers = HeaderMap::new();
        assert_eq!(policy.rate_limit_delay(&headers), Duration::from_millis(250));
    }

    #[test]
    fn test_rate_limit_delay_ignores_http_date_format() {
        // only delta-seconds is supported; dates fall back to base delay
        let policy = RetryPolicy::new(3, Duration::from_millis(250));
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(policy.rate_limit_delay(&headers), Duration::from_millis(250));
    }

    #[test]
    fn test_exhaustion_boundary() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert!(!policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }
}
