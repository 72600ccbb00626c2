//! Circuit breaker around the supervised process call.
//!
//! Transitions are strictly `Closed -> Open -> HalfOpen -> {Closed | Open}`.
//! While open, calls fail fast without invoking the wrapped operation. Once
//! the recovery window has elapsed, exactly one call is admitted as a probe.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::TaskError;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Snapshot of the breaker's internal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Error returned through the breaker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CircuitError<E> {
    /// The circuit is open; the operation was not invoked.
    #[error("circuit breaker open; retry after {retry_after:?}")]
    Open { retry_after: Duration },

    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

impl From<CircuitError<TaskError>> for TaskError {
    fn from(err: CircuitError<TaskError>) -> Self {
        match err {
            CircuitError::Open { retry_after } => TaskError::CircuitOpen { retry_after },
            CircuitError::Inner(inner) => inner,
        }
    }
}

/// Consecutive-failure circuit breaker. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Arc<Mutex<CircuitBreakerState>>,
}

/// Admission decision for one call.
enum Admission {
    Normal,
    Probe,
}

impl CircuitBreaker {
    /// Creates a closed breaker. A threshold of zero is treated as one.
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Arc::new(Mutex::new(CircuitBreakerState::default())),
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Current state. An open circuit whose window elapsed still reports
    /// `Open` until a call turns it half-open.
    pub fn state(&self) -> CircuitState {
        self.snapshot().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        match self.inner.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Forces the breaker back to closed.
    pub fn reset(&self) {
        if let Ok(mut state) = self.inner.lock() {
            *state = CircuitBreakerState::default();
        }
    }

    /// Runs `op` through the breaker.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_counting(op, |_| true).await
    }

    /// Runs `op` through the breaker, counting only errors for which
    /// `is_failure` returns true. Other errors leave the failure count alone;
    /// a probe call ending in one hands the half-open slot back.
    pub async fn call_counting<T, E, F, Fut, P>(
        &self,
        op: F,
        is_failure: P,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let admission = self
            .try_acquire()
            .map_err(|retry_after| CircuitError::Open { retry_after })?;

        let mut guard = ProbeGuard {
            breaker: self,
            armed: matches!(admission, Admission::Probe),
        };

        let result = op().await;
        match &result {
            Ok(_) => self.on_success(guard.disarm()),
            Err(err) if is_failure(err) => self.on_failure(guard.disarm()),
            // Neutral outcome: the guard releases an outstanding probe slot
            Err(_) => drop(guard),
        }
        result.map_err(CircuitError::Inner)
    }

    fn try_acquire(&self) -> Result<Admission, Duration> {
        let mut state = match self.inner.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        match state.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|opened| opened.elapsed())
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    info!("circuit breaker half-open, admitting probe call");
                    state.state = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    Ok(Admission::Probe)
                } else {
                    Err(self.recovery_timeout - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    Err(Duration::ZERO)
                } else {
                    state.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    fn on_success(&self, probe: bool) {
        if let Ok(mut state) = self.inner.lock() {
            if probe {
                info!("probe succeeded, circuit breaker closed");
                *state = CircuitBreakerState::default();
            } else if state.state == CircuitState::Closed {
                state.consecutive_failures = 0;
            }
        }
    }

    fn on_failure(&self, probe: bool) {
        if let Ok(mut state) = self.inner.lock() {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            if probe {
                warn!("probe failed, circuit breaker reopened");
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.probe_in_flight = false;
            } else if state.state == CircuitState::Closed
                && state.consecutive_failures >= self.failure_threshold
            {
                warn!(
                    failures = state.consecutive_failures,
                    threshold = self.failure_threshold,
                    "circuit breaker opened"
                );
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
        }
    }
}

/// Returns the half-open slot if a probe call is dropped before completing,
/// so the next call can probe instead of the circuit staying half-open.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl ProbeGuard<'_> {
    fn disarm(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut state) = self.breaker.inner.lock() {
            if state.state == CircuitState::HalfOpen {
                state.state = CircuitState::Open;
                state.probe_in_flight = false;
            }
        }
    }
}
