//! Retry with exponential backoff.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ErrorKind, TaskError};

/// Fraction of the computed delay used as the jitter range (±).
const JITTER_RATIO: f64 = 0.1;

/// Errors that a retry policy can reason about.
pub trait RetryableError {
    /// Kind used to match against [`RetryOptions::retryable_kinds`].
    fn kind(&self) -> ErrorKind;

    /// Fatal errors are never retried, whatever their kind.
    fn is_fatal(&self) -> bool {
        false
    }
}

impl RetryableError for TaskError {
    fn kind(&self) -> ErrorKind {
        TaskError::kind(self)
    }

    fn is_fatal(&self) -> bool {
        TaskError::is_fatal(self)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt. 1.0 gives a constant delay.
    pub backoff_factor: f64,
    /// Randomise delays by ±10%.
    pub jitter: bool,
    /// Error kinds worth another attempt.
    pub retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: false,
            retryable_kinds: [ErrorKind::Network, ErrorKind::Timeout].into_iter().collect(),
        }
    }
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Delay after the given failed attempt (1-based), before jitter:
    /// `min(max_delay, initial_delay * backoff_factor^(attempt-1))`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }

    /// Delay after the given failed attempt, with jitter applied when enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let offset = rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO);
        base.mul_f64(1.0 + offset)
    }

    /// Whether an error should be retried under this policy.
    pub fn is_retryable<E: RetryableError>(&self, error: &E) -> bool {
        !error.is_fatal() && self.retryable_kinds.contains(&error.kind())
    }
}

/// State of an in-progress retry sequence, handed to the retry observer.
#[derive(Debug, Clone)]
pub struct RetryState<E> {
    /// Attempt that just failed (1-based).
    pub attempt: u32,
    /// Error of that attempt.
    pub last_error: E,
    /// Delay before the next attempt.
    pub next_delay: Duration,
}

/// Final outcome of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Result of the last attempt.
    pub result: Result<T, E>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Wall time across all attempts and delays.
    pub total_duration: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is reached.
pub async fn with_retry<T, E, F, Fut>(options: &RetryOptions, op: F) -> RetryOutcome<T, E>
where
    E: RetryableError + Clone,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_notify(options, op, |_| {}).await
}

/// Like [`with_retry`], calling `on_retry` before each backoff sleep.
///
/// Attempts are strictly sequential: the next one starts only after the
/// previous future completed and the delay elapsed.
pub async fn with_retry_notify<T, E, F, Fut, N>(
    options: &RetryOptions,
    mut op: F,
    mut on_retry: N,
) -> RetryOutcome<T, E>
where
    E: RetryableError + Clone,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: FnMut(&RetryState<E>),
{
    let started = Instant::now();
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = op(attempt).await;
        let error = match result {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    total_duration: started.elapsed(),
                }
            }
            Err(error) => error,
        };

        if attempt >= max_attempts || !options.is_retryable(&error) {
            debug!(
                attempt,
                max_attempts,
                kind = %error.kind(),
                fatal = error.is_fatal(),
                "giving up"
            );
            return RetryOutcome {
                result: Err(error),
                attempts: attempt,
                total_duration: started.elapsed(),
            };
        }

        let next_delay = options.delay_for(attempt);
        let state = RetryState {
            attempt,
            last_error: error,
            next_delay,
        };
        on_retry(&state);

        tokio::time::sleep(next_delay).await;
        attempt += 1;
    }
}
