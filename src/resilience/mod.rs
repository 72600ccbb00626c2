//! Failure-isolation primitives: retry with backoff and a circuit breaker.
//!
//! Both are generic over the operation they wrap. The orchestrator composes
//! them per task attempt as `retry(breaker(supervisor.execute))`.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitError, CircuitState};
pub use retry::{with_retry, with_retry_notify, RetryOptions, RetryOutcome, RetryState, RetryableError};
