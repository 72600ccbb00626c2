//! Result aggregation for a batch run.
//!
//! Workers record each finished task into a shared [`ResultAggregator`];
//! readers get point-in-time snapshots. The circuit-breaker state is read
//! through a function supplied at construction, so the aggregator does not
//! depend on the orchestrator that owns the breaker.

pub mod report;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::ErrorKind;
use crate::resilience::CircuitState;
use crate::task::TaskResult;

pub use report::render_report;

/// Duration statistics across tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DurationStats {
    pub count: u32,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub total: Duration,
}

impl DurationStats {
    pub fn add_sample(&mut self, duration: Duration) {
        self.count += 1;
        self.total += duration;
        self.mean = self.total / self.count;

        if self.count == 1 {
            self.min = duration;
            self.max = duration;
        } else {
            self.min = self.min.min(duration);
            self.max = self.max.max(duration);
        }
    }
}

/// Running totals for a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// Completed with placeholder output.
    pub degraded_tasks: usize,
    pub tokens_used: u64,
    /// US dollars.
    pub total_cost: f64,
    /// Attempts beyond the first, across all tasks.
    pub retries: u32,
    pub task_durations: BTreeMap<String, Duration>,
    pub durations: DurationStats,
    pub errors_by_kind: BTreeMap<String, usize>,
    /// Wall time of the batch so far.
    pub run_duration: Duration,
}

impl BatchStats {
    pub fn processed(&self) -> usize {
        self.completed_tasks + self.failed_tasks
    }

    pub fn success_rate(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            n => self.completed_tasks as f64 / n as f64,
        }
    }

    pub fn failure_rate(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            n => self.failed_tasks as f64 / n as f64,
        }
    }
}

/// Health snapshot for operational alerting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReliabilityStatus {
    pub processed: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    /// `None` when the circuit breaker is disabled.
    pub circuit_state: Option<CircuitState>,
}

/// Source of the current circuit-breaker state.
pub type CircuitStateFn = Arc<dyn Fn() -> Option<CircuitState> + Send + Sync>;

#[derive(Debug, Default)]
struct AggregatorState {
    stats: BatchStats,
    results: Vec<TaskResult>,
    started: Option<Instant>,
    finished: Option<Duration>,
}

/// Thread-safe collector of task results.
#[derive(Clone)]
pub struct ResultAggregator {
    inner: Arc<Mutex<AggregatorState>>,
    circuit_state: CircuitStateFn,
}

impl std::fmt::Debug for ResultAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultAggregator")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl ResultAggregator {
    pub fn new<F>(circuit_state: F) -> Self
    where
        F: Fn() -> Option<CircuitState> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(AggregatorState::default())),
            circuit_state: Arc::new(circuit_state),
        }
    }

    /// Resets all totals for a new batch of `total_tasks`.
    pub fn begin(&self, total_tasks: usize) {
        if let Ok(mut state) = self.inner.lock() {
            *state = AggregatorState {
                stats: BatchStats {
                    total_tasks,
                    ..BatchStats::default()
                },
                results: Vec::with_capacity(total_tasks),
                started: Some(Instant::now()),
                finished: None,
            };
        }
    }

    /// Records one task outcome.
    pub fn record(&self, result: &TaskResult) {
        if let Ok(mut state) = self.inner.lock() {
            let stats = &mut state.stats;
            if result.success {
                stats.completed_tasks += 1;
                if result.degraded {
                    stats.degraded_tasks += 1;
                }
            } else {
                stats.failed_tasks += 1;
                let kind = result.error_kind.unwrap_or(ErrorKind::Execution);
                *stats
                    .errors_by_kind
                    .entry(kind.as_label().to_string())
                    .or_insert(0) += 1;
            }
            stats.tokens_used += result.tokens_used;
            stats.total_cost += result.actual_cost;
            stats.retries += result.attempts.saturating_sub(1);
            stats
                .task_durations
                .insert(result.task_id.clone(), result.duration);
            stats.durations.add_sample(result.duration);
            state.results.push(result.clone());
        }
    }

    /// Freezes the run duration.
    pub fn finish(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.finished = state.started.map(|started| started.elapsed());
        }
    }

    /// Point-in-time copy of the totals.
    pub fn snapshot(&self) -> BatchStats {
        match self.inner.lock() {
            Ok(state) => {
                let mut stats = state.stats.clone();
                stats.run_duration = state
                    .finished
                    .or_else(|| state.started.map(|started| started.elapsed()))
                    .unwrap_or_default();
                stats
            }
            Err(_) => BatchStats::default(),
        }
    }

    /// Results recorded so far, in completion order.
    pub fn results(&self) -> Vec<TaskResult> {
        match self.inner.lock() {
            Ok(state) => state.results.clone(),
            Err(_) => Vec::new(),
        }
    }

    pub fn failures(&self) -> Vec<TaskResult> {
        self.results().into_iter().filter(|r| !r.success).collect()
    }

    pub fn reliability_status(&self) -> ReliabilityStatus {
        let stats = self.snapshot();
        ReliabilityStatus {
            processed: stats.processed(),
            success_rate: stats.success_rate(),
            failure_rate: stats.failure_rate(),
            circuit_state: (self.circuit_state)(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;

    fn ok(id: &str, tokens: u64, cost: f64, millis: u64, attempts: u32) -> TaskResult {
        TaskResult::succeeded(
            id,
            "out".into(),
            tokens,
            cost,
            Duration::from_millis(millis),
            attempts,
        )
    }

    fn failed(id: &str) -> TaskResult {
        TaskResult::failed(
            id,
            &TaskError::Timeout(Duration::from_secs(1)),
            Duration::from_millis(500),
            3,
        )
    }

    #[test]
    fn test_duration_stats() {
        let mut stats = DurationStats::default();
        stats.add_sample(Duration::from_millis(100));
        stats.add_sample(Duration::from_millis(300));
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, Duration::from_millis(200));
        assert_eq!(stats.min, Duration::from_millis(100));
        assert_eq!(stats.max, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_record_and_snapshot() {
        let aggregator = ResultAggregator::new(|| Some(CircuitState::Closed));
        aggregator.begin(3);
        aggregator.record(&ok("a", 100, 0.5, 1000, 1));
        aggregator.record(&ok("b", 50, 0.25, 3000, 2).degraded());
        aggregator.record(&failed("c"));

        let stats = aggregator.snapshot();
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.completed_tasks, 2);
        assert_eq!(stats.failed_tasks, 1);
        assert_eq!(stats.degraded_tasks, 1);
        assert_eq!(stats.tokens_used, 150);
        assert!((stats.total_cost - 0.75).abs() < 1e-9);
        assert_eq!(stats.retries, 3);
        assert_eq!(stats.errors_by_kind["timeout"], 1);
        assert_eq!(stats.task_durations["b"], Duration::from_millis(3000));
        assert_eq!(aggregator.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_reliability_reads_injected_state() {
        let aggregator = ResultAggregator::new(|| Some(CircuitState::Open));
        aggregator.begin(4);
        aggregator.record(&ok("a", 0, 0.0, 1, 1));
        aggregator.record(&failed("b"));
        aggregator.record(&failed("c"));
        aggregator.record(&failed("d"));

        let status = aggregator.reliability_status();
        assert_eq!(status.processed, 4);
        assert!((status.success_rate - 0.25).abs() < 1e-9);
        assert!((status.failure_rate - 0.75).abs() < 1e-9);
        assert_eq!(status.circuit_state, Some(CircuitState::Open));
    }

    #[tokio::test]
    async fn test_empty_rates_are_zero() {
        let aggregator = ResultAggregator::new(|| None);
        let status = aggregator.reliability_status();
        assert_eq!(status.processed, 0);
        assert_eq!(status.success_rate, 0.0);
        assert!(status.circuit_state.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_resets_and_finish_freezes_duration() {
        let aggregator = ResultAggregator::new(|| None);
        aggregator.begin(1);
        aggregator.record(&failed("x"));
        aggregator.begin(2);
        assert_eq!(aggregator.snapshot().failed_tasks, 0);
        assert!(aggregator.results().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        aggregator.finish();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(aggregator.snapshot().run_duration, Duration::from_secs(2));
    }
}
