//! Retry policy shared by the vault client and the platform reconcilers.
//!
//! A policy is parameterized by attempt ceiling, base delay, jitter and a
//! rate-limit classifier. Rate-limited failures wait for the server hint or
//! the policy's rate-limit interval; other transient failures back off
//! exponentially from the base delay.

use std::fmt::Display;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use tracing::{debug, warn};

/// Errors that can be fed to a [`RetryPolicy`].
pub trait Retryable: Display {
    /// Whether another attempt could possibly succeed.
    fn is_transient(&self) -> bool;

    /// Server-provided wait hint, e.g. from a `Retry-After` header.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// HTTP status, when the failure came from a response.
    fn status(&self) -> Option<u16> {
        None
    }
}

/// Returns true when an error text looks like a rate-limit response.
///
/// Inspects text rather than status alone because some proxies rewrite the
/// status while keeping the upstream body.
pub fn is_rate_limited(text: &str) -> bool {
    RATE_LIMITED.is_match(text)
}

static RATE_LIMITED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b429\b|too many requests|rate[ -]?limit").expect("valid regex")
});

/// Bounded retry with backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// First backoff interval for generic transient failures.
    pub base_delay: Duration,
    /// Upper bound for exponential backoff.
    pub max_delay: Duration,
    /// Random extra delay added to every wait, drawn from `0..=jitter`.
    pub jitter: Duration,
    /// Fixed wait after a rate-limited failure with no server hint.
    /// `None` uses the exponential schedule.
    pub rate_limit_delay: Option<Duration>,
    /// Classifies an error text as rate limiting.
    pub classifier: fn(&str) -> bool,
}

/// Outcome of a policy that ran out of attempts or hit a permanent error.
#[derive(Debug)]
pub struct Exhausted<E> {
    /// Attempts performed.
    pub attempts: u32,
    /// Whether the last failure was classified as rate limiting.
    pub rate_limited: bool,
    /// The last error observed.
    pub last: E,
}

impl RetryPolicy {
    /// Vault calls: a rate limit means the quota window is closed, so wait
    /// long enough for it to reopen.
    pub fn vault() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_millis(500),
            rate_limit_delay: Some(Duration::from_secs(65)),
            classifier: is_rate_limited,
        }
    }

    /// Platform API calls: short exponential backoff with wide jitter so
    /// concurrent builds sharing one token spread out.
    pub fn platform() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            jitter: Duration::from_secs(2),
            rate_limit_delay: None,
            classifier: is_rate_limited,
        }
    }

    /// A policy with no waiting at all.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            rate_limit_delay: Some(Duration::ZERO),
            classifier: is_rate_limited,
        }
    }

    /// Whether an error counts as rate limiting under this policy.
    pub fn classifies_rate_limit<E: Retryable>(&self, err: &E) -> bool {
        err.status() == Some(429) || (self.classifier)(&err.to_string())
    }

    /// Wait before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_for<E: Retryable>(&self, attempt: u32, err: &E) -> Duration {
        let base = if self.classifies_rate_limit(err) {
            err.retry_after()
                .or(self.rate_limit_delay)
                .unwrap_or_else(|| self.backoff(attempt))
        } else {
            self.backoff(attempt)
        };
        base + self.sample_jitter()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn sample_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let millis = self.jitter.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// # Arguments
    ///
    /// * `operation` - Label used in logs
    /// * `op` - Produces a fresh future per attempt
    ///
    /// # Errors
    ///
    /// Returns [`Exhausted`] carrying the last error.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, Exhausted<E>>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let rate_limited = self.classifies_rate_limit(&err);
            if !(rate_limited || err.is_transient()) || attempt >= max {
                if attempt >= max {
                    warn!(operation, attempt, rate_limited, "retry attempts exhausted");
                } else {
                    debug!(operation, attempt, "permanent failure, not retrying");
                }
                return Err(Exhausted {
                    attempts: attempt,
                    rate_limited,
                    last: err,
                });
            }

            let delay = self.delay_for(attempt, &err);
            warn!(
                operation,
                attempt,
                max_attempts = max,
                rate_limited,
                delay_ms = delay.as_millis() as u64,
                "retrying after failure"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::platform()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct FakeError {
        text: &'static str,
        transient: bool,
        retry_after: Option<Duration>,
    }

    impl Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.text)
        }
    }

    impl Retryable for FakeError {
        fn is_transient(&self) -> bool {
            self.transient
        }

        fn retry_after(&self) -> Option<Duration> {
            self.retry_after
        }
    }

    fn rate_limited() -> FakeError {
        FakeError {
            text: "HTTP 429 Too Many Requests",
            transient: false,
            retry_after: None,
        }
    }

    fn fixed(rate_limit_delay: Duration) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: Duration::ZERO,
            rate_limit_delay: Some(rate_limit_delay),
            classifier: is_rate_limited,
        }
    }

    #[test]
    fn test_classifier() {
        assert!(is_rate_limited("Error: 429"));
        assert!(is_rate_limited("too many requests, slow down"));
        assert!(is_rate_limited("Rate limit exceeded"));
        assert!(!is_rate_limited("resource not found"));
        assert!(!is_rate_limited("secret 54290 not found"));
        assert!(!is_rate_limited("id a1429b is invalid"));
        assert!(is_rate_limited("vault responded 429: busy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_rate_limits_then_success_waits_exactly_twice() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = fixed(Duration::from_secs(65));
        let start = tokio::time::Instant::now();

        let counter = Arc::clone(&calls);
        let result = policy
            .run("fetch", || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(rate_limited())
                    } else {
                        Ok(vec![("KEY", "value")])
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), vec![("KEY", "value")]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Exactly two 65s waits; the paused clock may round up to the next tick.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(130), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(131), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = fixed(Duration::from_secs(1));

        let counter = Arc::clone(&calls);
        let result: Result<(), _> = policy
            .run("fetch", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FakeError {
                        text: "unauthorized",
                        transient: false,
                        retry_after: None,
                    })
                }
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 1);
        assert!(!exhausted.rate_limited);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_rate_limit() {
        let policy = fixed(Duration::from_secs(1));
        let result: Result<(), _> = policy
            .run("fetch", || async { Err(rate_limited()) })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert!(exhausted.rate_limited);
    }

    #[test]
    fn test_retry_after_hint_wins() {
        let policy = fixed(Duration::from_secs(65));
        let err = FakeError {
            text: "429",
            transient: true,
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = fixed(Duration::ZERO);
        let err = FakeError {
            text: "503 service unavailable",
            transient: true,
            retry_after: None,
        };
        assert_eq!(policy.delay_for(1, &err), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, &err), Duration::from_millis(200));
        assert_eq!(policy.delay_for(10, &err), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter: Duration::from_millis(50),
            ..fixed(Duration::from_millis(10))
        };
        for _ in 0..50 {
            let d = policy.delay_for(1, &rate_limited());
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(60));
        }
    }
}
