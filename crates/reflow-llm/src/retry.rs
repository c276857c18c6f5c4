use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::warn;

use reflow_core::config::RetryConfig;
use reflow_core::error::ReflowError;

/// Classification a failure must offer to be driven by [`RetryPolicy`].
///
/// The defaults inspect the rendered message, so most error types only need
/// an empty impl.
pub trait RetryClassify: std::fmt::Display {
    fn is_rate_limited(&self) -> bool {
        is_rate_limit_message(&self.to_string())
    }

    /// Explicit wait requested by the provider, if the failure carries one.
    fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(&self.to_string())
    }
}

impl RetryClassify for ReflowError {
    fn is_rate_limited(&self) -> bool {
        match self {
            ReflowError::ProviderRequest { status, message } => {
                *status == 429 || is_rate_limit_message(message)
            }
            ReflowError::Transport(msg) => is_rate_limit_message(msg),
            ReflowError::Executor { message, .. } => is_rate_limit_message(message),
            _ => false,
        }
    }
}

/// Whether a failure message looks like a provider rate limit.
pub fn is_rate_limit_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("429")
        || lower.contains("rate_limit")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
}

/// Parse hints such as "Please try again in 1.5s" or "retry after 20 seconds".
pub fn parse_retry_after(msg: &str) -> Option<Duration> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:try again in|retry[- ]after:?)\s*([0-9]+(?:\.[0-9]+)?)\s*(?:s|secs?|seconds?)?\b")
            .expect("retry-after pattern is valid")
    });
    let secs: f64 = re.captures(msg)?.get(1)?.as_str().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Exponential backoff for rate-limited calls.
///
/// Only rate-limit failures are retried; anything else is returned on the
/// first attempt. After `max_retries` retries the last failure is returned.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_after_margin: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            retry_after_margin: Duration::from_millis(config.retry_after_margin_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let delay = match hint {
            Some(h) => exponential.max(h.saturating_add(self.retry_after_margin)),
            None => exponential,
        };
        delay.min(self.max_delay)
    }

    /// Run `op`, retrying rate-limit failures with backoff.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClassify,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !e.is_rate_limited() || attempt >= self.max_retries {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt, e.retry_after());
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl RetryClassify for TestError {}

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            retry_after_margin: Duration::from_millis(500),
        }
    }

    /// Fails with `err` for the first `failures` calls, then succeeds.
    fn flaky(
        calls: Arc<AtomicU32>,
        failures: u32,
        err: &'static str,
    ) -> impl FnMut() -> futures::future::Ready<Result<&'static str, TestError>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                futures::future::ready(Err(TestError(err.to_string())))
            } else {
                futures::future::ready(Ok("ok"))
            }
        }
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(is_rate_limit_message("Error code: 429 - Too Many Requests"));
        assert!(is_rate_limit_message("rate_limit_exceeded"));
        assert!(is_rate_limit_message("Rate limit reached for gpt-4o"));
        assert!(!is_rate_limit_message("Error code: 500 - internal"));
        assert!(!is_rate_limit_message("invalid api key"));
    }

    #[test]
    fn test_reflow_error_classification() {
        let e = ReflowError::ProviderRequest {
            status: 429,
            message: "slow down".into(),
        };
        assert!(e.is_rate_limited());
        let e = ReflowError::ProviderRequest {
            status: 500,
            message: "boom".into(),
        };
        assert!(!e.is_rate_limited());
        assert!(!ReflowError::Timeout(30).is_rate_limited());
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(
            parse_retry_after("Please try again in 1.5s. Visit..."),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            parse_retry_after("Retry after 20 seconds"),
            Some(Duration::from_secs(20))
        );
        assert_eq!(parse_retry_after("no hint here"), None);
    }

    #[test]
    fn test_oversized_retry_after_ignored() {
        assert_eq!(parse_retry_after("try again in 99999999999999999999s"), None);
    }

    #[test]
    fn test_huge_hint_capped_without_overflow() {
        let p = policy();
        assert_eq!(p.delay_for(0, Some(Duration::MAX)), p.max_delay);
        assert_eq!(p.delay_for(40, Some(Duration::MAX)), p.max_delay);
    }

    #[test]
    fn test_delay_schedule() {
        let p = policy();
        assert_eq!(p.delay_for(0, None), Duration::from_secs(2));
        assert_eq!(p.delay_for(1, None), Duration::from_secs(4));
        assert_eq!(p.delay_for(2, None), Duration::from_secs(8));
        assert_eq!(p.delay_for(10, None), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_hint_only_raises() {
        let p = policy();
        assert_eq!(
            p.delay_for(0, Some(Duration::from_secs(10))),
            Duration::from_millis(10_500)
        );
        assert_eq!(
            p.delay_for(2, Some(Duration::from_secs(1))),
            Duration::from_secs(8)
        );
        assert_eq!(
            p.delay_for(0, Some(Duration::from_secs(300))),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_delays_non_decreasing_and_capped() {
        let p = policy();
        let delays: Vec<Duration> = (0..8).map(|a| p.delay_for(a, None)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= p.max_delay));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_rate_limits() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let result = policy()
            .run(flaky(calls.clone(), 2, "429 Too Many Requests"))
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two sleeps: 2s + 4s
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let result = policy()
            .run(flaky(calls.clone(), 10, "rate limit exceeded"))
            .await;

        assert_eq!(result.unwrap_err().to_string(), "rate limit exceeded");
        // Initial call plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // Three sleeps only: 2s + 4s + 8s
        assert_eq!(start.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_rate_limit_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let result = policy()
            .run(flaky(calls.clone(), 1, "invalid api key"))
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_used() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let result = policy()
            .run(flaky(
                calls.clone(),
                1,
                "rate_limit_exceeded: Please try again in 7s",
            ))
            .await;

        assert!(result.is_ok());
        assert_eq!(start.elapsed(), Duration::from_millis(7_500));
    }
}
