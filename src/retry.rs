//! Exponential backoff with jitter.
//!
//! [`RetryHandler::execute`] runs an async operation and retries it while the failure
//! classifies as transient. Classification is string based: the classifier turns an error into
//! a label and the label is checked against the retryable markers (substring match, lowercase).
//! Errors are never wrapped, so callers see the same error whether the operation failed on the
//! first attempt or after the retry budget ran out.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Markers that classify a failure as transient.
pub const DEFAULT_RETRYABLE_ERRORS: [&str; 5] = [
    "rate limit exceeded",
    "timeout",
    "network error",
    "server error",
    "service unavailable",
];

/// Backoff parameters governing [`RetryHandler`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Relative jitter applied to each delay (`0.1` = ±10%).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Retry executor with exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryHandler {
    config: RetryConfig,
    retryable_errors: Vec<String>,
    sleep_between_attempts: bool,
}

impl RetryHandler {
    /// Build a handler using the default retryable markers.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retryable_errors: DEFAULT_RETRYABLE_ERRORS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
            sleep_between_attempts: true,
        }
    }

    /// Replace the retryable markers.
    #[must_use]
    pub fn with_retryable_errors<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_errors = markers
            .into_iter()
            .map(|marker| marker.into().to_lowercase())
            .collect();
        self
    }

    /// Retry immediately instead of sleeping between attempts.
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        self.sleep_between_attempts = false;
        self
    }

    /// Active backoff parameters.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, classifying failures by their lowercase display string.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(operation, |error: &E| error.to_string().to_lowercase())
            .await
    }

    /// Run `operation`, classifying failures with `classify`.
    ///
    /// The operation is invoked at most `max_retries + 1` times. A failure whose
    /// classification matches no retryable marker is returned immediately.
    pub async fn execute_with<T, E, F, Fut, C>(&self, mut operation: F, classify: C) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> String,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let classification = classify(&error);
                    if attempt >= self.config.max_retries || !self.is_retryable(&classification) {
                        return Err(error);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        classification = %classification,
                        "Retrying after transient failure"
                    );
                    if self.sleep_between_attempts && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Whether a classification label contains one of the retryable markers.
    pub fn is_retryable(&self, classification: &str) -> bool {
        let lowered = classification.to_lowercase();
        self.retryable_errors
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
    }

    /// Backoff delay for a zero-based attempt, jitter included, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_ms =
            self.config.initial_delay.as_millis() as f64 * self.config.backoff_factor.powi(exponent);
        let jitter_ms = if self.config.jitter_factor > 0.0 {
            base_ms * self.config.jitter_factor * rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        let max_ms = self.config.max_delay.as_millis() as f64;
        let delay_ms = (base_ms + jitter_ms).clamp(0.0, max_ms);
        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for RetryHandler {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn succeeds_after_two_transient_failures() {
        let handler = RetryHandler::new(fast_config(3));
        let calls = AtomicU32::new(0);

        let result = handler
            .execute(|| async {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call < 2 {
                    Err("Network error: connection reset".to_string())
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let handler = RetryHandler::new(fast_config(0));
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = handler
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("Rate limit exceeded".to_string())
            })
            .await;

        assert_eq!(result, Err("Rate limit exceeded".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let handler = RetryHandler::new(fast_config(5));
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = handler
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("validation failed".to_string())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_transient_failure_uses_whole_budget() {
        let handler = RetryHandler::new(fast_config(2));
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = handler
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("Request timeout".to_string())
            })
            .await;

        assert_eq!(result, Err("Request timeout".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn custom_classifier_decides_retryability() {
        let handler = RetryHandler::new(fast_config(3));
        let calls = AtomicU32::new(0);

        let result: Result<(), u16> = handler
            .execute_with(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(503)
                },
                |status: &u16| {
                    if *status >= 500 {
                        "server error".to_string()
                    } else {
                        "client error".to_string()
                    }
                },
            )
            .await;

        assert_eq!(result, Err(503));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_between_attempts() {
        let handler = RetryHandler::new(RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            jitter_factor: 0.0,
        });
        let started = tokio::time::Instant::now();

        let _: Result<(), String> = handler
            .execute(|| async { Err("service unavailable".to_string()) })
            .await;

        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let handler = RetryHandler::new(RetryConfig {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            jitter_factor: 0.0,
        });

        assert_eq!(handler.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(handler.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(handler.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(handler.delay_for_attempt(6), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let handler = RetryHandler::new(RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            backoff_factor: 1.0,
            jitter_factor: 0.2,
        });

        for _ in 0..50 {
            let delay = handler.delay_for_attempt(0).as_millis();
            assert!((800..=1200).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn custom_markers_replace_defaults() {
        let handler = RetryHandler::default().with_retryable_errors(["Overloaded"]);
        assert!(handler.is_retryable("model overloaded, try later"));
        assert!(!handler.is_retryable("timeout"));
    }
}
